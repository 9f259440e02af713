//! The inference service.
//!
//! An [`InferenceService`] is created once from a loaded [`ArtifactPair`] and then answers any
//! number of requests, possibly from many threads at once. The classifier and vocabulary are
//! immutable and shared; detectors are taken from a [`DetectorPool`] for the duration of one
//! extraction.

use std::{path::Path, sync::Arc};

use serde::Serialize;

use crate::{
    artifacts::ArtifactPair,
    classifier::Classifier,
    error::{ArtifactLoadError, PredictError},
    extract::{Extractor, HandDetector},
    image::Image,
    pool::DetectorPool,
    vocab::LabelVocabulary,
};

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// The hand in the image shows `label`.
    Label {
        label: String,
        /// Classifier probability of `label`.
        confidence: f32,
    },
    /// The image does not contain a detectable hand.
    NoHand,
}

/// Serializable response to a request.
///
/// Serializes as one of:
///
/// - `{"prediction": "A", "confidence": 0.98}`
/// - `{"error": "No hand detected", "no_hand": true}`
/// - `{"error": "<message>"}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Prediction { prediction: String, confidence: f32 },
    NoHand { error: &'static str, no_hand: bool },
    Error { error: String },
}

impl From<&Result<Prediction, PredictError>> for Response {
    fn from(result: &Result<Prediction, PredictError>) -> Self {
        match result {
            Ok(Prediction::Label { label, confidence }) => Response::Prediction {
                prediction: label.clone(),
                confidence: *confidence,
            },
            Ok(Prediction::NoHand) => Response::NoHand {
                error: "No hand detected",
                no_hand: true,
            },
            Err(e) => Response::Error {
                error: e.to_string(),
            },
        }
    }
}

/// Answers gesture classification requests.
pub struct InferenceService<D> {
    classifier: Arc<Classifier>,
    vocabulary: Arc<LabelVocabulary>,
    extractors: DetectorPool<Extractor<D>>,
}

impl<D: HandDetector> InferenceService<D> {
    /// Creates a service from a loaded artifact pair and a non-empty set of detectors.
    ///
    /// Each detector serves one request at a time.
    ///
    /// # Panics
    ///
    /// Panics if `detectors` is empty.
    pub fn new<I: IntoIterator<Item = D>>(artifacts: ArtifactPair, detectors: I) -> Self {
        let (classifier, vocabulary) = artifacts.into_parts();
        let extractors = DetectorPool::new(detectors.into_iter().map(Extractor::new));
        log::info!(
            "inference service ready: {} classes, {} detector(s)",
            vocabulary.len(),
            extractors.size()
        );

        Self {
            classifier: Arc::new(classifier),
            vocabulary: Arc::new(vocabulary),
            extractors,
        }
    }

    /// Loads the artifact pair in `dir` and creates a service from it.
    pub fn load<P, I>(dir: P, detectors: I) -> Result<Self, ArtifactLoadError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = D>,
    {
        let artifacts = ArtifactPair::load(dir)?;
        Ok(Self::new(artifacts, detectors))
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn vocabulary(&self) -> &Arc<LabelVocabulary> {
        &self.vocabulary
    }

    /// Returns the number of requests that can be processed in parallel.
    pub fn detector_count(&self) -> usize {
        self.extractors.size()
    }

    /// Classifies the hand gesture in an encoded (JPEG or PNG) image.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, PredictError> {
        let image = Image::decode(image_bytes)?;
        self.predict_image(&image)
    }

    /// Classifies the hand gesture in a decoded image.
    pub fn predict_image(&self, image: &Image) -> Result<Prediction, PredictError> {
        let features = self.extractors.checkout().extract(image)?;
        let Some(features) = features else {
            log::debug!("no hand detected in {image:?}");
            return Ok(Prediction::NoHand);
        };

        let (class, confidence) = self
            .classifier
            .predict(&features)
            .ok_or(PredictError::UnknownClass(0))?;
        let label = self
            .vocabulary
            .decode(class)
            .ok_or(PredictError::UnknownClass(class))?;
        log::debug!("predicted '{label}' ({confidence:.3})");

        Ok(Prediction::Label {
            label: label.to_string(),
            confidence,
        })
    }
}
