//! Landmark extraction: the one path from pixels to a [`FeatureVector`].
//!
//! Every image is resized to [`WORKING_RESOLUTION`] before detection, whether it comes from the
//! training corpus or from an inference request. The detection parameters are constants so that
//! both sides always agree on them.

use crate::{
    error::ExtractError,
    image::{Image, Resolution},
    landmark::{FeatureVector, Landmarks},
    timer::Timer,
};

/// Resolution every image is resized to before hand detection.
pub const WORKING_RESOLUTION: Resolution = Resolution::new(640, 480);

/// Minimum detection and hand presence confidence.
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.5;

/// Maximum number of hands considered per image.
pub const MAX_NUM_HANDS: usize = 1;

/// A hand landmark model.
pub trait HandDetector {
    /// Locates a single hand in `image` and estimates its landmarks.
    ///
    /// `image` is always at [`WORKING_RESOLUTION`]. Returned coordinates are normalized: X and Z
    /// are divided by the image width, Y by the image height.
    ///
    /// Returns `Ok(None)` if no hand with at least [`MIN_DETECTION_CONFIDENCE`] was found. If more
    /// than one hand is visible, the first one reported by the model is returned.
    fn detect(&mut self, image: &Image) -> anyhow::Result<Option<Landmarks>>;
}

impl<D: HandDetector + ?Sized> HandDetector for &mut D {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Option<Landmarks>> {
        (**self).detect(image)
    }
}

impl<D: HandDetector + ?Sized> HandDetector for Box<D> {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Option<Landmarks>> {
        (**self).detect(image)
    }
}

/// Turns decoded images into [`FeatureVector`]s.
pub struct Extractor<D> {
    detector: D,
    t_resize: Timer,
    t_detect: Timer,
}

impl<D: HandDetector> Extractor<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            t_resize: Timer::new("resize"),
            t_detect: Timer::new("detect"),
        }
    }

    /// Extracts the landmark features of the first hand in `image`.
    ///
    /// Returns `Ok(None)` if no hand is visible. Errors are reserved for a failing detector or
    /// malformed detector output.
    pub fn extract(&mut self, image: &Image) -> Result<Option<FeatureVector>, ExtractError> {
        let working = self.t_resize.time(|| image.resize(WORKING_RESOLUTION));
        let landmarks = self
            .t_detect
            .time(|| self.detector.detect(&working))
            .map_err(ExtractError::Detector)?;

        match landmarks {
            Some(landmarks) => FeatureVector::from_landmarks(&landmarks).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the timers measuring the extraction stages.
    pub fn timers(&self) -> [&Timer; 2] {
        [&self.t_resize, &self.t_detect]
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn into_detector(self) -> D {
        self.detector
    }
}
