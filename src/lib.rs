//! Sign language gesture classification from hand landmarks.
//!
//! The crate is split into three stages that share one feature representation:
//!
//! * [`extract`]: turns an [`Image`][image::Image] into a [`FeatureVector`][landmark::FeatureVector]
//!   of 21 hand landmarks (63 numbers), or reports that no hand was found.
//! * [`dataset`] and [`classifier`]: the offline pipeline that walks a labeled image corpus, exports
//!   the extracted features, and fits a classifier plus the [`LabelVocabulary`][vocab::LabelVocabulary]
//!   it was trained against. Both are persisted together as an [`artifacts`] pair.
//! * [`service`]: the online side, which loads an artifact pair once and answers requests made of
//!   raw image bytes.
//!
//! # Coordinates
//!
//! Landmark X and Y coordinates are normalized to the working image (0.0 is the left/top edge, 1.0
//! the right/bottom edge), so Y points *down*. Z is a depth estimate relative to the wrist, scaled
//! like X.
//!
//! # Environment Variables
//!
//! * `SIGNAGE_PALM_MODEL`: path to the palm detection `.onnx` file used by
//!   [`MediaPipeHands`][hand::MediaPipeHands].
//! * `SIGNAGE_LANDMARK_MODEL`: path to the hand landmark `.onnx` file.
//! * `SIGNAGE_DETECTORS`: number of detector instances the inference service pools.
//! * `RUST_LOG`: overrides the log filter set up by [`init_logger!`].

use log::LevelFilter;

pub mod artifacts;
pub mod classifier;
pub mod dataset;
pub mod detection;
pub mod error;
pub mod extract;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod num;
pub mod pool;
pub mod rect;
pub mod service;
pub mod timer;
pub mod vocab;


/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_hir"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `tract` will always log at *warn* level, unless overridden with `RUST_LOG`.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
