//! Feed-forward gesture classifier.
//!
//! A [`Classifier`] is a stack of dense layers mapping a [`FeatureVector`] to a probability
//! distribution over the classes of a [`LabelVocabulary`][crate::vocab::LabelVocabulary]. Hidden
//! layers use ReLU, the output layer uses softmax. It is fitted by [`train::Trainer`] and is
//! read-only afterwards.

pub mod train;

use ndarray::{aview1, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{error::ArtifactLoadError, landmark::FeatureVector, num::argmax};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Softmax,
}

/// A fully connected layer: `activation(input · weights + bias)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// `inputs x outputs`
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl Dense {
    fn glorot(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        Self {
            weights: Array2::from_shape_simple_fn((inputs, outputs), || {
                (rng.f32() * 2.0 - 1.0) * limit
            }),
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    fn forward(&self, input: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut out = input.dot(&self.weights) + &self.bias;
        match self.activation {
            Activation::Relu => out.mapv_inplace(|v| v.max(0.0)),
            Activation::Softmax => softmax_rows(&mut out),
        }
        out
    }
}

/// A trained multi-class classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    layers: Vec<Dense>,
}

impl Classifier {
    /// Creates a randomly initialized classifier with the given hidden layer sizes.
    pub(crate) fn init(
        inputs: usize,
        hidden: &[usize],
        outputs: usize,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = inputs;
        for &size in hidden {
            layers.push(Dense::glorot(width, size, Activation::Relu, rng));
            width = size;
        }
        layers.push(Dense::glorot(width, outputs, Activation::Softmax, rng));
        Self { layers }
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Returns the number of input features the classifier expects.
    pub fn input_width(&self) -> usize {
        self.layers.first().map_or(0, Dense::inputs)
    }

    /// Returns the number of classes the classifier distinguishes.
    pub fn output_width(&self) -> usize {
        self.layers.last().map_or(0, Dense::outputs)
    }

    /// Checks that the layers form a well-formed network.
    ///
    /// Layer shapes must chain, every parameter must be finite, hidden layers must use ReLU and the
    /// last layer softmax.
    pub fn validate(&self) -> Result<(), ArtifactLoadError> {
        if self.layers.is_empty() {
            return Err(ArtifactLoadError::NoLayers);
        }

        let malformed = |layer, reason: String| ArtifactLoadError::MalformedLayer { layer, reason };
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.outputs() {
                return Err(malformed(
                    i,
                    format!(
                        "{} biases for {} outputs",
                        layer.bias.len(),
                        layer.outputs()
                    ),
                ));
            }
            if layer.inputs() == 0 || layer.outputs() == 0 {
                return Err(malformed(i, "layer has no units".into()));
            }
            if i > 0 && layer.inputs() != self.layers[i - 1].outputs() {
                return Err(malformed(
                    i,
                    format!(
                        "takes {} inputs, previous layer has {} outputs",
                        layer.inputs(),
                        self.layers[i - 1].outputs()
                    ),
                ));
            }
            let expected = if i == last {
                Activation::Softmax
            } else {
                Activation::Relu
            };
            if layer.activation != expected {
                return Err(malformed(
                    i,
                    format!("activation {:?}, expected {:?}", layer.activation, expected),
                ));
            }
            if !layer.weights.iter().chain(&layer.bias).all(|v| v.is_finite()) {
                return Err(malformed(i, "non-finite parameter".into()));
            }
        }

        Ok(())
    }

    /// Computes class probabilities for a batch of feature rows.
    ///
    /// Each row of the result sums to 1.
    ///
    /// # Panics
    ///
    /// Panics if `features` does not have [`Classifier::input_width`] columns.
    pub fn predict_batch(&self, features: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut layers = self.layers.iter();
        let Some(first) = layers.next() else {
            return Array2::zeros((features.nrows(), 0));
        };
        let mut act = first.forward(features);
        for layer in layers {
            act = layer.forward(act.view());
        }
        act
    }

    /// Computes class probabilities for one feature vector.
    pub fn predict_proba(&self, features: &FeatureVector) -> Vec<f32> {
        let input = aview1(features.as_slice()).insert_axis(Axis(0));
        self.predict_batch(input).into_raw_vec()
    }

    /// Returns the most probable class for `features` and its probability.
    ///
    /// Ties resolve to the lowest class index.
    pub fn predict(&self, features: &FeatureVector) -> Option<(usize, f32)> {
        let proba = self.predict_proba(features);
        argmax(&proba).map(|class| (class, proba[class]))
    }
}

/// Applies softmax to every row of `m`, in place.
fn softmax_rows(m: &mut Array2<f32>) {
    for mut row in m.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}
