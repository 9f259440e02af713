//! Error types.
//!
//! Every failure the pipeline can report is a distinct type here. Not finding a hand is *not* an
//! error: [`Extractor::extract`][crate::extract::Extractor::extract] returns `None` for that, and
//! the service reports it as [`Prediction::NoHand`][crate::service::Prediction::NoHand].

use std::{io, path::PathBuf};

use thiserror::Error;

/// The input bytes are not a valid image encoding.
#[derive(Debug, Error)]
#[error("invalid image data: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// The hand detector failed while processing an image.
///
/// This indicates a broken model or backend, not a missing hand.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("hand detector failed: {0:#}")]
    Detector(anyhow::Error),

    #[error("hand detector returned {found} landmarks (expected {expected})")]
    LandmarkCount { expected: usize, found: usize },

    #[error("hand detector returned a non-finite coordinate at index {index}")]
    NonFinite { index: usize },
}

/// A single corpus file could not be turned into an image.
///
/// Never fatal to a dataset build: the file is recorded as a miss and skipped.
#[derive(Debug, Error)]
pub enum CorpusReadError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode '{}': {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

/// The corpus as a whole could not be processed.
///
/// Individual bad files are not build errors, they are recorded as misses.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to list corpus directory '{}': {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("landmark extraction failed on '{}': {source}", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
}

/// The dataset export does not follow the feature table layout.
#[derive(Debug, Error)]
pub enum DatasetFormatError {
    #[error("I/O error on dataset file: {0}")]
    Io(#[from] io::Error),

    #[error("dataset file is empty")]
    Empty,

    #[error("invalid dataset header: expected {expected} feature columns and a `label` column")]
    Header { expected: usize },

    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}, column {column}: invalid number '{value}'")]
    Number {
        line: usize,
        column: usize,
        value: String,
    },

    #[error("line {line}: empty label")]
    EmptyLabel { line: usize },

    #[error("line {line}: malformed quoted field")]
    Quote { line: usize },
}

/// The classifier and vocabulary pair could not be loaded, or does not belong together.
///
/// Fatal at startup: an inference service is never constructed from a pair that fails to load.
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported artifact format version {found} (expected {expected})")]
    FormatVersion { expected: u32, found: u32 },

    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("vocabulary contains label '{0}' more than once")]
    DuplicateLabel(String),

    #[error("classifier has no layers")]
    NoLayers,

    #[error("classifier layer {layer} is malformed: {reason}")]
    MalformedLayer { layer: usize, reason: String },

    #[error("classifier expects {found} input features, but feature vectors have {expected}")]
    InputWidth { expected: usize, found: usize },

    #[error("classifier outputs {classifier} classes, but vocabulary has {vocabulary} labels")]
    OutputWidth { classifier: usize, vocabulary: usize },

    #[error("classifier was trained against labels {classifier:?}, vocabulary has {vocabulary:?}")]
    LabelMismatch {
        classifier: Vec<String>,
        vocabulary: Vec<String>,
    },

    #[error("classifier (run {classifier}) and vocabulary (run {vocabulary}) come from different training runs")]
    RunMismatch { classifier: String, vocabulary: String },
}

/// The artifact pair could not be written.
#[derive(Debug, Error)]
pub enum ArtifactSaveError {
    #[error("failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The training table cannot be used to fit a classifier.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("training table contains {0} distinct label(s), at least 2 are required")]
    TooFewLabels(usize),

    #[error("training table has {rows} rows, which leaves no rows to train on")]
    TooFewRows { rows: usize },

    #[error("invalid training configuration: {0}")]
    Config(String),
}

/// A single inference request failed.
///
/// Request-scoped: the service remains usable.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("classifier predicted class {0}, which is not part of the vocabulary")]
    UnknownClass(usize),
}
