//! Detection and landmark estimation of human hands.
//!
//! [`MediaPipeHands`] chains MediaPipe's palm detector and hand landmark network: the palm detector
//! finds the hand, the region around the most confident palm is cropped, and the landmark network
//! estimates the 21 hand landmarks in that crop.

pub mod detection;
pub mod landmark;

use std::path::Path;

use crate::{
    extract::{HandDetector, MIN_DETECTION_CONFIDENCE},
    image::Image,
    landmark::Landmarks,
    timer::Timer,
};

use self::{
    detection::{hand_region, PalmDetector},
    landmark::Landmarker,
};

/// Single-hand landmark detector backed by MediaPipe's ONNX models.
///
/// Cloning is cheap: the networks are shared, only scratch buffers are duplicated.
#[derive(Clone)]
pub struct MediaPipeHands {
    palm: PalmDetector,
    landmarker: Landmarker,
    t_palm: Timer,
    t_landmark: Timer,
}

impl MediaPipeHands {
    /// Loads the palm detection and hand landmark networks from `.onnx` files.
    pub fn load<P: AsRef<Path>, L: AsRef<Path>>(
        palm_model: P,
        landmark_model: L,
    ) -> anyhow::Result<Self> {
        let palm = PalmDetector::load(palm_model, MIN_DETECTION_CONFIDENCE)?;
        let landmarker = Landmarker::load(landmark_model)?;
        Ok(Self {
            palm,
            landmarker,
            t_palm: Timer::new("palm"),
            t_landmark: Timer::new("landmark"),
        })
    }

    /// Returns the timers measuring the two network passes.
    pub fn timers(&self) -> [&Timer; 2] {
        [&self.t_palm, &self.t_landmark]
    }
}

impl HandDetector for MediaPipeHands {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Option<Landmarks>> {
        let palm = {
            let _guard = self.t_palm.start();
            self.palm.detect(image)?.first().cloned()
        };
        let Some(palm) = palm else {
            log::trace!("no palm detected");
            return Ok(None);
        };

        let region = hand_region(&palm);
        let crop = image.crop(region);
        let input = self.landmarker.input_resolution();
        let result = {
            let _guard = self.t_landmark.start();
            self.landmarker.estimate(&crop)?
        };
        if result.presence() < MIN_DETECTION_CONFIDENCE {
            log::trace!("hand presence too low: {}", result.presence());
            return Ok(None);
        }
        log::trace!(
            "{:?} hand, presence {:.3}",
            result.handedness(),
            result.presence()
        );

        // Crop pixels -> working image pixels -> normalized coordinates.
        let sx = crop.width() as f32 / input.width() as f32;
        let sy = crop.height() as f32 / input.height() as f32;
        let (x0, y0) = (region.x().round(), region.y().round());
        let (w, h) = (image.width() as f32, image.height() as f32);

        let mut landmarks = result.landmarks().clone();
        landmarks.map_positions(|[x, y, z]| [(x0 + x * sx) / w, (y0 + y * sy) / h, z * sx / w]);
        Ok(Some(landmarks))
    }
}
