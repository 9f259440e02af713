//! Non-Maximum Suppression and Averaging.
//!
//! Single-Shot MultiBox Detectors produce many overlapping detections for each object.
//! [`NonMaxSuppression`] merges every group of overlapping detections into their
//! confidence-weighted average (MediaPipe's weighted NMS).
//!
//! The output is ordered by descending seed confidence, so the first returned detection belongs to
//! the most confident object.

use itertools::zip_eq;

use crate::{num::TotalF32, rect::Rect};

use super::{Detection, Keypoint};

/// Intersection-over-union above which two detections are considered to overlap.
const IOU_THRESH: f32 = 0.3;

/// A non-maximum suppression algorithm.
#[derive(Clone, Default)]
pub struct NonMaxSuppression {
    group: Vec<Detection>,
}

impl NonMaxSuppression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Performs non-maximum suppression on `detections`, leaving the result in `detections`.
    pub fn process(&mut self, detections: &mut Vec<Detection>) {
        // Sort by ascending confidence, process highest confidence first by popping from the back.
        let mut pending = std::mem::take(detections);
        pending.sort_by_key(|det| TotalF32(det.confidence()));

        while let Some(seed) = pending.pop() {
            self.group.clear();
            let seed_rect = seed.bounding_rect();
            let group = &mut self.group;
            pending.retain(|other| {
                if seed_rect.iou(&other.bounding_rect()) >= IOU_THRESH {
                    group.push(other.clone());
                    false
                } else {
                    true
                }
            });

            self.group.push(seed.clone());
            detections.push(weighted_average(&seed, &self.group));
        }
    }
}

/// Confidence-weighted average of `group`, keeping the confidence of `seed`.
fn weighted_average(seed: &Detection, group: &[Detection]) -> Detection {
    let mut keypoints = vec![Keypoint::new(0.0, 0.0); seed.keypoints().len()];
    let (mut xc, mut yc, mut w, mut h, mut angle) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let mut divisor = 0.0;

    for det in group {
        let factor = det.confidence();
        divisor += factor;

        for (acc, kp) in zip_eq(&mut keypoints, det.keypoints()) {
            *acc = Keypoint::new(acc.x() + kp.x() * factor, acc.y() + kp.y() * factor);
        }
        let rect = det.bounding_rect();
        xc += rect.x_center() * factor;
        yc += rect.y_center() * factor;
        w += rect.width() * factor;
        h += rect.height() * factor;
        angle += det.angle() * factor;
    }

    if divisor <= 0.0 {
        return seed.clone();
    }

    let keypoints = keypoints
        .into_iter()
        .map(|kp| Keypoint::new(kp.x() / divisor, kp.y() / divisor))
        .collect();
    let mut avg = Detection::with_keypoints(
        seed.confidence(),
        Rect::from_center(xc / divisor, yc / divisor, w / divisor, h / divisor),
        keypoints,
    );
    avg.set_angle(angle / divisor);
    avg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32, rect: Rect) -> Detection {
        Detection::with_keypoints(confidence, rect, Vec::new())
    }

    #[test]
    fn keeps_separate_objects() {
        let mut nms = NonMaxSuppression::new();

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        // IoU of 1/16 is below the threshold.
        let mut detections = vec![
            det(0.55, rect.scale(4.0)),
            det(0.6, rect),
        ];
        nms.process(&mut detections);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bounding_rect(), rect);
    }

    #[test]
    fn nms_orders_by_confidence() {
        let mut nms = NonMaxSuppression::new();

        let mut detections = vec![
            det(0.7, Rect::from_center(0.0, 0.0, 1.0, 1.0)),
            det(0.9, Rect::from_center(5.0, 0.0, 1.0, 1.0)),
        ];
        nms.process(&mut detections);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence(), 0.9);
        assert_eq!(detections[1].confidence(), 0.7);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();

        let rect = Rect::from_center(-1.0, 3.0, 1.0, 1.0);
        let mut detections = vec![
            det(0.75, rect),
            det(0.25, rect.scale(1.5)),
        ];
        nms.process(&mut detections);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        let rect = d.bounding_rect();
        assert_eq!(d.confidence(), 0.75);
        assert_eq!(rect.x_center(), -1.0);
        assert_eq!(rect.y_center(), 3.0);
        assert_eq!(rect.width(), 1.125);
        assert_eq!(rect.height(), 1.125);
    }
}
