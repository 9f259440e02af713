//! Hand landmark prediction.

use std::path::Path;

use anyhow::Context;
use itertools::zip_eq;

use crate::{
    image::{Image, Resolution},
    landmark::{Landmarks, FEATURE_LEN, NUM_LANDMARKS},
    nn::{Cnn, ColorMapper, NeuralNetwork, Outputs},
};

/// Landmark results estimated by [`Landmarker`].
#[derive(Clone)]
pub struct LandmarkResult {
    landmarks: Landmarks,
    presence: f32,
    raw_handedness: f32,
}

impl Default for LandmarkResult {
    fn default() -> Self {
        LandmarkResult {
            landmarks: Landmarks::new(NUM_LANDMARKS),
            presence: 0.0,
            raw_handedness: 0.0,
        }
    }
}

impl LandmarkResult {
    /// Returns the landmarks in the coordinate system of the network input (pixels).
    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    /// Returns the confidence that the input contains a hand.
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the image is passed in as-is (not mirrored), and the returned value should
    /// only be relied on when the [`LandmarkResult::presence`] is over some threshold.
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Estimates the 21 landmarks of a hand in a cropped image.
#[derive(Clone)]
pub struct Landmarker {
    cnn: Cnn,
    result: LandmarkResult,
}

impl Landmarker {
    /// Loads the hand landmark network from an `.onnx` file.
    ///
    /// The network must produce 4 outputs: screen landmarks `[1, 63]`, hand presence `[1, 1]`,
    /// handedness `[1, 1]` and world landmarks `[1, 63]`.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let nn = NeuralNetwork::from_path(path)?
            .load()
            .with_context(|| format!("failed to load landmark network '{}'", path.display()))?;
        Self::new(nn)
    }

    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        let expected: [&[usize]; 4] = [&[1, FEATURE_LEN], &[1, 1], &[1, 1], &[1, FEATURE_LEN]];
        if nn.num_outputs() != expected.len() {
            anyhow::bail!(
                "landmark network must have {} outputs, this one has {}",
                expected.len(),
                nn.num_outputs()
            );
        }
        for (id, expected) in expected.iter().enumerate() {
            let shape = nn.output_shape(id)?;
            if &*shape != *expected {
                anyhow::bail!(
                    "landmark network output {id} has shape {:?}, expected {:?}",
                    shape,
                    expected
                );
            }
        }

        let cnn = Cnn::new(nn, ColorMapper::linear(0.0..=1.0))?;
        Ok(Self {
            cnn,
            result: LandmarkResult::default(),
        })
    }

    /// Returns the input resolution of the network. Landmarks are reported in this coordinate
    /// system.
    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    /// Estimates hand landmarks in `image`.
    ///
    /// `image` is stretched to the network's input resolution.
    pub fn estimate(&mut self, image: &Image) -> anyhow::Result<&LandmarkResult> {
        let outputs = self.cnn.estimate(image)?;
        extract(&outputs, &mut self.result)?;
        Ok(&self.result)
    }
}

fn extract(outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
    let screen_landmarks = &outputs[0];
    let presence_flag = &outputs[1];
    let handedness = &outputs[2];

    let coords = screen_landmarks
        .as_slice()
        .context("landmark output is not contiguous")?;
    estimate.presence = presence_flag.iter().copied().next().unwrap_or(0.0);
    estimate.raw_handedness = handedness.iter().copied().next().unwrap_or(0.0);
    for (xyz, out) in zip_eq(
        coords.chunks_exact(3),
        estimate.landmarks.positions_mut(),
    ) {
        out.copy_from_slice(xyz);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::ArrayD;

    use super::*;

    #[test]
    fn extracts_screen_landmarks() {
        let screen = ArrayD::from_shape_fn(vec![1, FEATURE_LEN], |idx| idx[1] as f32);
        let presence = ArrayD::from_elem(vec![1, 1], 0.9);
        let handedness = ArrayD::from_elem(vec![1, 1], 0.2);
        let world = ArrayD::zeros(vec![1, FEATURE_LEN]);
        let outputs = Outputs::from_iter([screen, presence, handedness, world]);

        let mut result = LandmarkResult::default();
        extract(&outputs, &mut result).unwrap();
        assert_eq!(result.presence(), 0.9);
        assert_eq!(result.handedness(), Handedness::Left);

        // Wrist first, pinky tip last.
        assert_eq!(result.landmarks().get(0).position(), [0.0, 1.0, 2.0]);
        assert_eq!(result.landmarks().get(20).position(), [60.0, 61.0, 62.0]);
    }
}
