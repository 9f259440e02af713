//! Anchor generation for Single Shot MultiBox Detectors (SSDs).
//!
//! Only the layout of the palm detection network is supported: every feature map cell has a fixed
//! number of anchors, all centered on the cell, and box sizes are regressed directly (anchor size
//! is 1).

use std::ops::Index;

use itertools::iproduct;

/// Center of an SSD anchor, relative to the network input (0.0 to 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// Feature map layout of one SSD output layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    anchors_per_cell: usize,
    columns: u32,
    rows: u32,
}

impl LayerInfo {
    /// A layer with `columns x rows` cells and `anchors_per_cell` (non-zero) anchors in each.
    pub const fn new(anchors_per_cell: usize, columns: u32, rows: u32) -> Self {
        assert!(anchors_per_cell != 0);
        Self {
            anchors_per_cell,
            columns,
            rows,
        }
    }

    fn anchors(self) -> impl Iterator<Item = Anchor> {
        iproduct!(0..self.rows, 0..self.columns, 0..self.anchors_per_cell).map(move |(y, x, _)| {
            Anchor {
                x_center: (x as f32 + 0.5) / self.columns as f32,
                y_center: (y as f32 + 0.5) / self.rows as f32,
            }
        })
    }
}

/// All anchors of a network, in output order (layer by layer, row-major within each layer).
#[derive(Debug, Clone)]
pub struct Anchors(Vec<Anchor>);

impl Anchors {
    pub fn calculate(layers: &[LayerInfo]) -> Self {
        Self(layers.iter().flat_map(|layer| layer.anchors()).collect())
    }

    pub fn anchor_count(&self) -> usize {
        self.0.len()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palm_layout_anchor_count() {
        let anchors = Anchors::calculate(&[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)]);
        assert_eq!(anchors.anchor_count(), 2016);

        // First cell of the first layer, repeated twice.
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[0].x_center(), 0.5 / 24.0);
        assert_eq!(anchors[2].x_center(), 1.5 / 24.0);
        assert_eq!(anchors[48].y_center(), 1.5 / 24.0);

        // First anchor of the second layer.
        assert_eq!(anchors[1152].x_center(), 0.5 / 12.0);
        assert_eq!(anchors[1152].y_center(), 0.5 / 12.0);
    }
}
