//! Shared fixtures: a deterministic stand-in for the hand landmark networks and a synthetic corpus.

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use signage::{
    classifier::train::TrainConfig,
    extract::HandDetector,
    image::{Color, Image},
    landmark::{Landmarks, NUM_LANDMARKS},
};

/// Minimum number of red pixels that count as a hand.
const MIN_HAND_PIXELS: usize = 20;

/// "Detects" a hand as the bounding box of all strongly red pixels.
///
/// The 21 landmarks are laid out on a 5 column grid spanning the bounding box, so the features
/// encode the position and the aspect ratio of the red blob.
#[derive(Debug, Clone, Default)]
pub struct RedHand {
    pub calls: usize,
}

fn is_red(c: Color) -> bool {
    c.r() > 200 && c.g() < 60 && c.b() < 60
}

impl HandDetector for RedHand {
    fn detect(&mut self, image: &Image) -> anyhow::Result<Option<Landmarks>> {
        self.calls += 1;

        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0, 0);
        let mut count = 0;
        for y in 0..image.height() {
            for x in 0..image.width() {
                if is_red(image.get(x, y)) {
                    count += 1;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
            }
        }
        if count < MIN_HAND_PIXELS {
            return Ok(None);
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        let landmarks = (0..NUM_LANDMARKS)
            .map(|i| {
                let col = (i % 5) as f32 / 4.0;
                let row = (i / 5) as f32 / 4.0;
                let x = x0 as f32 + (x1 - x0) as f32 * col;
                let y = y0 as f32 + (y1 - y0) as f32 * row;
                [x / w, y / h, -(i as f32) * 0.01]
            })
            .collect();
        Ok(Some(landmarks))
    }
}

/// Draws a hand image for `label`.
///
/// `A` is a wide blob on the left half, `B` a tall blob on the right half. `jitter` shifts the blob
/// by a few pixels.
pub fn hand_image(label: &str, jitter: (u32, u32)) -> Image {
    let (jx, jy) = jitter;
    let (x_range, y_range) = match label {
        "A" => (10 + jx..70 + jx, 40 + jy..70 + jy),
        "B" => (100 + jx..130 + jx, 10 + jy..100 + jy),
        _ => panic!("no drawing for label {label}"),
    };
    Image::from_fn(160, 120, |x, y| {
        if x_range.contains(&x) && y_range.contains(&y) {
            Color::RED
        } else {
            Color::WHITE
        }
    })
}

pub fn blank_image() -> Image {
    Image::from_fn(160, 120, |_, _| Color::WHITE)
}

pub fn png_bytes(image: &Image) -> Vec<u8> {
    image.encode_png().unwrap()
}

/// Writes `per_label` jittered images for each of `A` and `B` into `root/<label>/`.
pub fn write_corpus(root: &Path, per_label: usize, seed: u64) {
    let mut rng = fastrand::Rng::with_seed(seed);
    for label in ["A", "B"] {
        let dir = root.join(label);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_label {
            let jitter = (rng.u32(0..10), rng.u32(0..10));
            hand_image(label, jitter)
                .save(dir.join(format!("{}_{i:03}.png", label.to_lowercase())))
                .unwrap();
        }
    }
}

/// A small network and enough epochs to separate the synthetic classes quickly.
pub fn train_config() -> TrainConfig {
    TrainConfig {
        hidden_layers: vec![16],
        dropout: vec![0.0],
        epochs: 100,
        batch_size: 8,
        learning_rate: 0.01,
        seed: 7,
        ..TrainConfig::default()
    }
}

/// A uniquely named directory below the system temp directory, removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "signage-it-{name}-{}-{:016x}",
            std::process::id(),
            fastrand::u64(..)
        ));
        fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.0).ok();
    }
}
