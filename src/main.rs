use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use itertools::Itertools;
use signage::{
    artifacts::ArtifactPair,
    classifier::train::{TrainConfig, Trainer},
    dataset::{Dataset, DatasetBuilder},
    hand::MediaPipeHands,
    service::{InferenceService, Response},
};

/// Sign language gesture classification from hand landmarks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extracts hand landmarks from a labeled image corpus into a CSV table.
    Extract {
        /// Corpus root: one subdirectory per label, containing PNG or JPEG images.
        #[arg(long, value_name = "DIR")]
        corpus: PathBuf,

        #[arg(long, value_name = "FILE", default_value = "landmarks_dataset.csv")]
        output: PathBuf,

        /// File listing the images that did not produce an example.
        #[arg(long, value_name = "FILE", default_value = "no_hand_detected.txt")]
        misses: PathBuf,

        #[command(flatten)]
        models: Models,
    },
    /// Trains a classifier on an extracted landmark table.
    Train {
        #[arg(long, value_name = "FILE", default_value = "landmarks_dataset.csv")]
        dataset: PathBuf,

        /// Directory the classifier and vocabulary are written to.
        #[arg(long, value_name = "DIR", default_value = "model")]
        artifacts: PathBuf,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f32>,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Classifies the hand gesture in each image and prints one JSON response per line.
    Predict {
        #[arg(long, value_name = "DIR", default_value = "model")]
        artifacts: PathBuf,

        #[arg(required = true, value_name = "IMAGE")]
        images: Vec<PathBuf>,

        /// Number of hand detector instances (parallel requests).
        #[arg(long, env = "SIGNAGE_DETECTORS")]
        detectors: Option<NonZeroUsize>,

        #[command(flatten)]
        models: Models,
    },
}

#[derive(Args, Debug)]
struct Models {
    /// Palm detection network (`.onnx`).
    #[arg(long, value_name = "FILE", env = "SIGNAGE_PALM_MODEL")]
    palm_model: PathBuf,

    /// Hand landmark network (`.onnx`).
    #[arg(long, value_name = "FILE", env = "SIGNAGE_LANDMARK_MODEL")]
    landmark_model: PathBuf,
}

impl Models {
    fn load(&self) -> anyhow::Result<MediaPipeHands> {
        MediaPipeHands::load(&self.palm_model, &self.landmark_model).with_context(|| {
            format!(
                "failed to load hand models '{}' and '{}'",
                self.palm_model.display(),
                self.landmark_model.display()
            )
        })
    }
}

fn main() -> anyhow::Result<()> {
    signage::init_logger!();

    match Cli::parse().command {
        Command::Extract {
            corpus,
            output,
            misses,
            models,
        } => extract(&corpus, &output, &misses, &models),
        Command::Train {
            dataset,
            artifacts,
            epochs,
            batch_size,
            learning_rate,
            seed,
        } => {
            let defaults = TrainConfig::default();
            let config = TrainConfig {
                epochs: epochs.unwrap_or(defaults.epochs),
                batch_size: batch_size.unwrap_or(defaults.batch_size),
                learning_rate: learning_rate.unwrap_or(defaults.learning_rate),
                seed: seed.unwrap_or(defaults.seed),
                ..defaults
            };
            train(&dataset, &artifacts, config)
        }
        Command::Predict {
            artifacts,
            images,
            detectors,
            models,
        } => predict(&artifacts, &images, detectors, &models),
    }
}

fn extract(corpus: &Path, output: &Path, misses: &Path, models: &Models) -> anyhow::Result<()> {
    let mut builder = DatasetBuilder::new(models.load()?);
    let dataset = builder.build(corpus)?;
    log::debug!("network timings: {}", builder.into_detector().timers().iter().format(", "));

    dataset
        .write_csv(output)
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    dataset
        .write_misses(misses)
        .with_context(|| format!("failed to write '{}'", misses.display()))?;

    let counts = dataset
        .label_counts()
        .into_iter()
        .map(|(label, n)| format!("{label}: {n}"))
        .join(", ");
    println!("Extracted {} examples ({counts})", dataset.len());
    println!("Skipped {} images, see '{}'", dataset.misses().len(), misses.display());
    Ok(())
}

fn train(dataset: &Path, artifacts: &Path, config: TrainConfig) -> anyhow::Result<()> {
    let dataset = Dataset::read_csv(dataset)
        .with_context(|| format!("failed to read dataset '{}'", dataset.display()))?;
    let outcome = Trainer::new(config).fit(dataset.examples())?;

    match outcome.report.test {
        Some(test) => {
            println!("Test Accuracy: {:.2}%", test.accuracy * 100.0);
            println!("Test Loss: {:.4}", test.loss);
        }
        None => println!("No rows were held out for testing"),
    }

    ArtifactPair::from(outcome).save(artifacts)?;
    Ok(())
}

fn predict(
    artifacts: &Path,
    images: &[PathBuf],
    detectors: Option<NonZeroUsize>,
    models: &Models,
) -> anyhow::Result<()> {
    let detectors = detectors
        .or_else(|| thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get)
        .min(images.len().max(1));

    let hands = models.load()?;
    let pool = itertools::repeat_n(hands, detectors);
    let service = InferenceService::load(artifacts, pool)?;

    let responses = thread::scope(|s| {
        let handles = images
            .iter()
            .map(|path| {
                let service = &service;
                s.spawn(move || {
                    let result = fs::read(path)
                        .with_context(|| format!("failed to read '{}'", path.display()))
                        .map(|bytes| service.predict(&bytes));
                    match result {
                        Ok(result) => Response::from(&result),
                        Err(e) => Response::Error {
                            error: format!("{e:#}"),
                        },
                    }
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| anyhow::anyhow!("prediction thread panicked"))?;

    for response in responses {
        println!("{}", serde_json::to_string(&response)?);
    }
    Ok(())
}
