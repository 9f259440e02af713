//! Common functionality for object detection.

pub mod nms;
pub mod ssd;

use crate::rect::Rect;

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value, an
/// optional rotation angle of the object, and a possibly empty set of located keypoints.
///
/// Per convention, the confidence value lies between 0.0 and 1.0, which can be achieved by passing
/// the raw network output through [`crate::num::sigmoid`]. The confidence value weighs detections
/// during non-maximum suppression, so it has to have the expected range.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    angle: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the angle of the detected object, in radians, clockwise.
    ///
    /// Not all networks support computing the object angle. If it is not supported, an angle of 0.0
    /// will be returned.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Sets the angle of the detected object, in radians, clockwise.
    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    /// Returns the axis-aligned bounding rectangle containing the detected object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Applies `f` to the bounding rectangle center and to every keypoint.
    ///
    /// Width and height are scaled by `scale`. Used to move detections between coordinate
    /// systems.
    pub fn map_coords(&mut self, scale: f32, mut f: impl FnMut(f32, f32) -> (f32, f32)) {
        let (xc, yc) = f(self.rect.x_center(), self.rect.y_center());
        self.rect = Rect::from_center(
            xc,
            yc,
            self.rect.width() * scale,
            self.rect.height() * scale,
        );
        for kp in &mut self.keypoints {
            (kp.x, kp.y) = f(kp.x, kp.y);
        }
    }
}

/// A 2D keypoint produced as part of a [`Detection`].
///
/// The meaning of a keypoint depends on the specific detector and on its index in the keypoint
/// list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_coords_moves_everything() {
        let mut det = Detection::with_keypoints(
            0.9,
            Rect::from_center(10.0, 10.0, 4.0, 4.0),
            vec![Keypoint::new(9.0, 11.0)],
        );
        det.map_coords(2.0, |x, y| (x * 2.0 - 5.0, y * 2.0));

        let rect = det.bounding_rect();
        assert_eq!(rect.x_center(), 15.0);
        assert_eq!(rect.y_center(), 20.0);
        assert_eq!(rect.width(), 8.0);
        assert_eq!(det.keypoints()[0], Keypoint::new(13.0, 22.0));
    }
}
