//! Palm detection.
//!
//! MediaPipe's palm detector is a Single-Shot MultiBox Detector with 2016 anchors on a square
//! input. Every anchor predicts a box and 7 keypoints; the boxes of overlapping anchors are merged
//! with weighted non-maximum suppression.

use std::path::Path;

use anyhow::Context;
use nalgebra::{Point2, Rotation2, Vector2};

use crate::{
    detection::{
        nms::NonMaxSuppression,
        ssd::{Anchor, Anchors, LayerInfo},
        Detection,
    },
    image::{Image, Resolution},
    nn::{Cnn, ColorMapper, NeuralNetwork, Outputs},
    num::sigmoid,
    rect::Rect,
};

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

const NUM_KEYPOINTS: usize = 7;

/// Box center, box size, then X/Y of every keypoint.
const NUM_BOX_PARAMS: usize = 4 + NUM_KEYPOINTS * 2;

const LAYERS: &[LayerInfo] = &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// Detects palms in images.
#[derive(Clone)]
pub struct PalmDetector {
    cnn: Cnn,
    anchors: Anchors,
    nms: NonMaxSuppression,
    thresh: f32,
    detections: Vec<Detection>,
}

impl PalmDetector {
    /// Loads the palm detection network from an `.onnx` file.
    ///
    /// The network must take one RGB image (NCHW) and produce box parameters of shape
    /// `[1, 2016, 18]` followed by scores of shape `[1, 2016, 1]`.
    pub fn load<P: AsRef<Path>>(path: P, thresh: f32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .load()
            .with_context(|| format!("failed to load palm detector '{}'", path.display()))?;
        Self::new(nn, thresh)
    }

    /// Wraps an already loaded palm detection network.
    pub fn new(nn: NeuralNetwork, thresh: f32) -> anyhow::Result<Self> {
        let anchors = Anchors::calculate(LAYERS);
        let num_anchors = anchors.anchor_count();

        if nn.num_outputs() != 2 {
            anyhow::bail!(
                "palm detector must have 2 outputs, this one has {}",
                nn.num_outputs()
            );
        }
        let boxes = nn.output_shape(0)?;
        let scores = nn.output_shape(1)?;
        if *boxes != [1, num_anchors, NUM_BOX_PARAMS] || *scores != [1, num_anchors, 1] {
            anyhow::bail!(
                "unexpected palm detector output shapes {:?} and {:?}",
                boxes,
                scores
            );
        }

        let cnn = Cnn::new(nn, ColorMapper::linear(0.0..=1.0))?;
        log::debug!(
            "palm detector input resolution: {}",
            cnn.input_resolution()
        );

        Ok(Self {
            cnn,
            anchors,
            nms: NonMaxSuppression::new(),
            thresh,
            detections: Vec::new(),
        })
    }

    /// Detects palms in `image`.
    ///
    /// The image is padded to a square (keeping it centered) before being passed to the network,
    /// so the aspect ratio of the hand is preserved. Returned detections are in `image`
    /// coordinates, ordered by descending confidence.
    pub fn detect(&mut self, image: &Image) -> anyhow::Result<&[Detection]> {
        let side = image.width().max(image.height()) as f32;
        let view = Rect::from_center(
            image.width() as f32 / 2.0,
            image.height() as f32 / 2.0,
            side,
            side,
        );
        let square = image.crop(view);

        let outputs = self.cnn.estimate(&square)?;
        self.detections.clear();
        extract_outputs(
            &self.anchors,
            self.cnn.input_resolution(),
            &outputs,
            self.thresh,
            &mut self.detections,
        );

        let scale = square.width() as f32 / self.cnn.input_resolution().width() as f32;
        let (x0, y0) = (view.x().round(), view.y().round());
        for det in &mut self.detections {
            det.map_coords(scale, |x, y| (x0 + x * scale, y0 + y * scale));
        }

        self.nms.process(&mut self.detections);
        log::trace!("palm detections: {:?}", self.detections);
        Ok(&self.detections)
    }
}

fn extract_outputs(
    anchors: &Anchors,
    input_res: Resolution,
    outputs: &Outputs,
    thresh: f32,
    detections: &mut Vec<Detection>,
) {
    let boxes = &outputs[0];
    let scores = &outputs[1];

    for index in 0..anchors.anchor_count() {
        let conf = sigmoid(scores[&[0, index, 0][..]]);
        if conf < thresh {
            continue;
        }

        let mut box_params = [0.0; NUM_BOX_PARAMS];
        for (i, param) in box_params.iter_mut().enumerate() {
            *param = boxes[&[0, index, i][..]];
        }
        detections.push(extract_detection(
            &anchors[index],
            input_res,
            &box_params,
            conf,
        ));
    }
}

fn extract_detection(
    anchor: &Anchor,
    input_res: Resolution,
    box_params: &[f32; NUM_BOX_PARAMS],
    confidence: f32,
) -> Detection {
    let input_w = input_res.width() as f32;
    let input_h = input_res.height() as f32;

    let xc = box_params[0] + anchor.x_center() * input_w;
    let yc = box_params[1] + anchor.y_center() * input_h;
    let w = box_params[2];
    let h = box_params[3];
    let keypoints = box_params[4..]
        .chunks_exact(2)
        .map(|xy| {
            crate::detection::Keypoint::new(
                xy[0] + anchor.x_center() * input_w,
                xy[1] + anchor.y_center() * input_h,
            )
        })
        .collect();

    let mut det = Detection::with_keypoints(confidence, Rect::from_center(xc, yc, w, h), keypoints);
    det.set_angle(palm_angle(&det));
    det
}

/// Computes the clockwise rotation of a palm compared to an upright position.
///
/// A rotation of 0° means that fingers are pointed upwards.
fn palm_angle(det: &Detection) -> f32 {
    let a = det.keypoints()[Keypoint::MiddleFingerMcp as usize];
    let finger = Point2::new(a.x(), a.y());
    let b = det.keypoints()[Keypoint::Wrist as usize];
    let wrist = Point2::new(b.x(), b.y());

    let rel = wrist - finger;
    Rotation2::rotation_between(&Vector2::y(), &rel).angle()
}

/// Computes the region to run hand landmark estimation on, from a palm detection.
///
/// The palm box is moved towards the fingers by half its height, made square and enlarged so that
/// the whole hand fits.
pub fn hand_region(palm: &Detection) -> Rect {
    const SHIFT_Y: f32 = -0.5;
    const SCALE: f32 = 2.6;

    let rect = palm.bounding_rect();
    let shift = Rotation2::new(palm.angle()) * Vector2::new(0.0, rect.height() * SHIFT_Y);
    rect.move_by(shift.x, shift.y).to_square().scale(SCALE)
}
