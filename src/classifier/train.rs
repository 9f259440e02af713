//! Classifier training.
//!
//! [`Trainer::fit`] fits the label vocabulary over the whole table, holds out a seeded random test
//! split, trains with mini-batch Adam on categorical cross-entropy (validating against the tail of
//! the remaining rows after every epoch), and finally reports test loss and accuracy.
//!
//! Every random decision (the split, weight initialization, batch order, dropout masks) is drawn
//! from a single [`fastrand::Rng`] seeded from [`TrainConfig::seed`], so a run is reproducible.

use std::fmt;

use ndarray::{aview1, Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};

use crate::{
    dataset::Example, error::TrainError, landmark::FEATURE_LEN, num::argmax,
    vocab::LabelVocabulary,
};

use super::{Activation, Classifier};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking the logarithm.
const EPSILON: f32 = 1e-7;

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Width of each hidden layer.
    pub hidden_layers: Vec<usize>,
    /// Dropout rate applied after each hidden layer (one entry per hidden layer).
    pub dropout: Vec<f32>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Fraction of all rows held out for the final evaluation.
    pub test_fraction: f64,
    /// Fraction of the non-test rows used for per-epoch validation.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![512, 256, 128],
            dropout: vec![0.3, 0.3, 0.0],
            epochs: 30,
            batch_size: 64,
            learning_rate: 0.001,
            test_fraction: 0.2,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl TrainConfig {
    fn validate(&self) -> Result<(), TrainError> {
        let fail = |msg: String| Err(TrainError::Config(msg));

        if self.dropout.len() != self.hidden_layers.len() {
            return fail(format!(
                "{} dropout rates for {} hidden layers",
                self.dropout.len(),
                self.hidden_layers.len()
            ));
        }
        if self.hidden_layers.contains(&0) {
            return fail("hidden layers must have at least one unit".into());
        }
        if let Some(rate) = self.dropout.iter().find(|r| !(0.0..1.0).contains(*r)) {
            return fail(format!("dropout rate {rate} is outside of [0, 1)"));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return fail("epochs and batch size must be non-zero".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("invalid learning rate {}", self.learning_rate));
        }
        for (name, fraction) in [
            ("test", self.test_fraction),
            ("validation", self.validation_fraction),
        ] {
            if !(0.0..1.0).contains(&fraction) {
                return fail(format!("{name} fraction {fraction} is outside of [0, 1)"));
            }
        }

        Ok(())
    }
}

/// Loss and accuracy on a set of rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loss {:.4}, accuracy {:.4}", self.loss, self.accuracy)
    }
}

#[derive(Debug, Clone)]
pub struct EpochStats {
    pub epoch: usize,
    pub train: Evaluation,
    pub validation: Option<Evaluation>,
}

/// Summary of a training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    pub epochs: Vec<EpochStats>,
    /// Evaluation on the held-out test rows. [`None`] if no rows were held out.
    pub test: Option<Evaluation>,
}

/// The result of [`Trainer::fit`]: a classifier and the vocabulary its outputs are indexed by.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub classifier: Classifier,
    pub vocabulary: LabelVocabulary,
    pub report: TrainReport,
}

/// Fits [`Classifier`]s.
pub struct Trainer {
    config: TrainConfig,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Fits a vocabulary and a classifier over `examples`.
    pub fn fit(&self, examples: &[Example]) -> Result<TrainOutcome, TrainError> {
        let config = &self.config;
        config.validate()?;

        let vocabulary = LabelVocabulary::fit(examples.iter().map(|ex| &ex.label));
        if vocabulary.len() < 2 {
            return Err(TrainError::TooFewLabels(vocabulary.len()));
        }

        let mut rng = fastrand::Rng::with_seed(config.seed);
        let split = Split::new(examples.len(), config, &mut rng)?;
        log::info!(
            "training on {} rows ({} validation, {} test), {} classes",
            split.train.len(),
            split.validation.len(),
            split.test.len(),
            vocabulary.len(),
        );

        let (x, y) = encode(examples, &vocabulary);
        let mut classifier =
            Classifier::init(FEATURE_LEN, &config.hidden_layers, vocabulary.len(), &mut rng);
        let mut adam = Adam::new(&classifier, config.learning_rate);

        let mut order = split.train.clone();
        let mut epochs = Vec::with_capacity(config.epochs);
        for epoch in 1..=config.epochs {
            rng.shuffle(&mut order);

            let (mut loss_sum, mut correct) = (0.0, 0);
            for batch in order.chunks(config.batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);

                let pass = Pass::forward(&classifier, xb.view(), &config.dropout, &mut rng);
                loss_sum += cross_entropy(pass.output(), yb.view()) * batch.len() as f32;
                correct += count_correct(pass.output(), yb.view());

                let grads = pass.backward(&classifier, xb.view(), yb.view());
                adam.step(&mut classifier, &grads);
            }

            let stats = EpochStats {
                epoch,
                train: Evaluation {
                    loss: loss_sum / order.len() as f32,
                    accuracy: correct as f32 / order.len() as f32,
                },
                validation: evaluate(&classifier, &x, &y, &split.validation),
            };
            match &stats.validation {
                Some(val) => log::info!(
                    "epoch {epoch}/{}: {}; validation {}",
                    config.epochs,
                    stats.train,
                    val
                ),
                None => log::info!("epoch {epoch}/{}: {}", config.epochs, stats.train),
            }
            epochs.push(stats);
        }

        let test = evaluate(&classifier, &x, &y, &split.test);
        if let Some(test) = &test {
            log::info!("test {test}");
        }

        Ok(TrainOutcome {
            classifier,
            vocabulary,
            report: TrainReport {
                train_rows: split.train.len(),
                validation_rows: split.validation.len(),
                test_rows: split.test.len(),
                epochs,
                test,
            },
        })
    }
}

/// Row indices of the three partitions of the training table.
struct Split {
    train: Vec<usize>,
    validation: Vec<usize>,
    test: Vec<usize>,
}

impl Split {
    fn new(
        rows: usize,
        config: &TrainConfig,
        rng: &mut fastrand::Rng,
    ) -> Result<Self, TrainError> {
        let mut train: Vec<usize> = (0..rows).collect();
        rng.shuffle(&mut train);

        let test_rows = (rows as f64 * config.test_fraction).ceil() as usize;
        let test = train.split_off(rows - test_rows.min(rows));

        // Validation rows are taken from the end, after shuffling.
        let fit_rows = (train.len() as f64 * (1.0 - config.validation_fraction)).floor() as usize;
        let validation = train.split_off(fit_rows);

        if train.is_empty() {
            return Err(TrainError::TooFewRows { rows });
        }
        Ok(Self {
            train,
            validation,
            test,
        })
    }
}

/// Builds the feature matrix and the one-hot target matrix.
fn encode(examples: &[Example], vocabulary: &LabelVocabulary) -> (Array2<f32>, Array2<f32>) {
    let mut x = Array2::zeros((examples.len(), FEATURE_LEN));
    let mut y = Array2::zeros((examples.len(), vocabulary.len()));
    for (i, ex) in examples.iter().enumerate() {
        x.row_mut(i).assign(&aview1(ex.features.as_slice()));
        if let Some(class) = vocabulary.encode(&ex.label) {
            y[[i, class]] = 1.0;
        }
    }
    (x, y)
}

fn evaluate(
    classifier: &Classifier,
    x: &Array2<f32>,
    y: &Array2<f32>,
    rows: &[usize],
) -> Option<Evaluation> {
    if rows.is_empty() {
        return None;
    }
    let targets = y.select(Axis(0), rows);
    let probs = classifier.predict_batch(x.select(Axis(0), rows).view());
    Some(Evaluation {
        loss: cross_entropy(probs.view(), targets.view()),
        accuracy: count_correct(probs.view(), targets.view()) as f32 / rows.len() as f32,
    })
}

/// Mean categorical cross-entropy of a batch.
fn cross_entropy(probs: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f32 {
    let mut total = 0.0;
    Zip::from(&probs).and(&targets).for_each(|&p, &t| {
        if t != 0.0 {
            total -= t * p.clamp(EPSILON, 1.0 - EPSILON).ln();
        }
    });
    total / probs.nrows() as f32
}

fn count_correct(probs: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> usize {
    probs
        .rows()
        .into_iter()
        .zip(targets.rows())
        .filter(|(p, t)| argmax(&p.to_vec()) == argmax(&t.to_vec()))
        .count()
}

/// Activations recorded during a training forward pass.
struct Pass {
    /// Output of every layer, after dropout.
    activations: Vec<Array2<f32>>,
    /// Scaled dropout mask of every layer that applied dropout.
    masks: Vec<Option<Array2<f32>>>,
}

impl Pass {
    fn forward(
        classifier: &Classifier,
        x: ArrayView2<'_, f32>,
        dropout: &[f32],
        rng: &mut fastrand::Rng,
    ) -> Self {
        let layers = classifier.layers();
        let mut activations: Vec<Array2<f32>> = Vec::with_capacity(layers.len());
        let mut masks = Vec::with_capacity(layers.len());

        for (i, layer) in layers.iter().enumerate() {
            let mut out = match i {
                0 => layer.forward(x.view()),
                _ => layer.forward(activations[i - 1].view()),
            };

            let rate = dropout.get(i).copied().unwrap_or(0.0);
            let mask = if layer.activation() == Activation::Relu && rate > 0.0 {
                let keep = 1.0 - rate;
                let mask = Array2::from_shape_simple_fn(out.raw_dim(), || {
                    if rng.f32() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                });
                out *= &mask;
                Some(mask)
            } else {
                None
            };

            activations.push(out);
            masks.push(mask);
        }

        Self { activations, masks }
    }

    fn output(&self) -> ArrayView2<'_, f32> {
        self.activations[self.activations.len() - 1].view()
    }

    /// Backpropagates the cross-entropy loss of `targets` through the network.
    fn backward(
        &self,
        classifier: &Classifier,
        x: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
    ) -> Gradients {
        let layers = classifier.layers();
        let mut weights = Vec::with_capacity(layers.len());
        let mut bias = Vec::with_capacity(layers.len());

        // Softmax followed by cross-entropy.
        let mut delta = (&self.output() - &targets) / targets.nrows() as f32;
        for i in (0..layers.len()).rev() {
            let input = match i {
                0 => x.view(),
                _ => self.activations[i - 1].view(),
            };
            weights.push(input.t().dot(&delta));
            bias.push(delta.sum_axis(Axis(0)));

            if i > 0 {
                let mut prev = delta.dot(&layers[i].weights.t());
                let act = &self.activations[i - 1];
                match &self.masks[i - 1] {
                    Some(mask) => Zip::from(&mut prev)
                        .and(act)
                        .and(mask)
                        .for_each(|d, &a, &m| *d = if a > 0.0 { *d * m } else { 0.0 }),
                    None => Zip::from(&mut prev)
                        .and(act)
                        .for_each(|d, &a| *d = if a > 0.0 { *d } else { 0.0 }),
                }
                delta = prev;
            }
        }

        weights.reverse();
        bias.reverse();
        Gradients { weights, bias }
    }
}

struct Gradients {
    weights: Vec<Array2<f32>>,
    bias: Vec<Array1<f32>>,
}

/// The Adam optimizer, in the formulation used by Keras.
struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    m_weights: Vec<Array2<f32>>,
    v_weights: Vec<Array2<f32>>,
    m_bias: Vec<Array1<f32>>,
    v_bias: Vec<Array1<f32>>,
}

impl Adam {
    fn new(classifier: &Classifier, learning_rate: f32) -> Self {
        let layers = classifier.layers();
        let weights = || {
            layers
                .iter()
                .map(|l| Array2::zeros(l.weights.raw_dim()))
                .collect::<Vec<_>>()
        };
        let bias = || {
            layers
                .iter()
                .map(|l| Array1::zeros(l.bias.raw_dim()))
                .collect::<Vec<_>>()
        };
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m_weights: weights(),
            v_weights: weights(),
            m_bias: bias(),
            v_bias: bias(),
        }
    }

    fn step(&mut self, classifier: &mut Classifier, grads: &Gradients) {
        self.t += 1;
        let lr = self.learning_rate * (1.0 - self.beta2.powi(self.t)).sqrt()
            / (1.0 - self.beta1.powi(self.t));
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        for (i, layer) in classifier.layers.iter_mut().enumerate() {
            update(
                &mut layer.weights,
                &grads.weights[i],
                &mut self.m_weights[i],
                &mut self.v_weights[i],
                [lr, b1, b2, eps],
            );
            update(
                &mut layer.bias,
                &grads.bias[i],
                &mut self.m_bias[i],
                &mut self.v_bias[i],
                [lr, b1, b2, eps],
            );
        }
    }
}

fn update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    [lr, b1, b2, eps]: [f32; 4],
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            *p -= lr * *m / (v.sqrt() + eps);
        });
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::landmark::FeatureVector;

    fn example(label: &str, center: f32, rng: &mut fastrand::Rng) -> Example {
        let mut values = [0.0; FEATURE_LEN];
        for v in &mut values {
            *v = center + (rng.f32() - 0.5) * 0.1;
        }
        Example {
            features: FeatureVector::from_array(values).unwrap(),
            label: label.into(),
        }
    }

    fn separable(per_class: usize) -> Vec<Example> {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut examples = Vec::new();
        for _ in 0..per_class {
            examples.push(example("open", 0.2, &mut rng));
            examples.push(example("fist", 0.8, &mut rng));
        }
        examples
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            hidden_layers: vec![16, 8],
            dropout: vec![0.2, 0.0],
            epochs: 40,
            batch_size: 8,
            learning_rate: 0.01,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn split_sizes() {
        let mut rng = fastrand::Rng::with_seed(0);
        let split = Split::new(20, &TrainConfig::default(), &mut rng).unwrap();
        assert_eq!(split.test.len(), 4);
        assert_eq!(split.validation.len(), 4);
        assert_eq!(split.train.len(), 12);

        let mut all: Vec<_> = [split.train, split.validation, split.test].concat();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn fits_separable_data() {
        let outcome = Trainer::new(small_config()).fit(&separable(30)).unwrap();
        assert_eq!(outcome.vocabulary.labels(), ["fist", "open"]);
        assert_eq!(outcome.classifier.input_width(), FEATURE_LEN);
        assert_eq!(outcome.classifier.output_width(), 2);
        outcome.classifier.validate().unwrap();

        let report = &outcome.report;
        assert_eq!(report.epochs.len(), 40);
        assert_eq!(report.test_rows, 12);
        let test = report.test.unwrap();
        assert_eq!(test.accuracy, 1.0);
        assert!(test.loss < 0.1, "test loss {}", test.loss);
    }

    #[test]
    fn runs_are_reproducible() {
        let config = TrainConfig {
            epochs: 3,
            ..small_config()
        };
        let data = separable(10);
        let a = Trainer::new(config.clone()).fit(&data).unwrap();
        let b = Trainer::new(config).fit(&data).unwrap();
        assert_eq!(
            serde_json::to_string(&a.classifier).unwrap(),
            serde_json::to_string(&b.classifier).unwrap()
        );
    }

    #[test]
    fn rejects_unusable_tables() {
        let trainer = Trainer::new(small_config());

        let one_label: Vec<_> = separable(5)
            .into_iter()
            .filter(|ex| ex.label == "open")
            .collect();
        assert!(matches!(
            trainer.fit(&one_label),
            Err(TrainError::TooFewLabels(1))
        ));
        assert!(matches!(trainer.fit(&[]), Err(TrainError::TooFewLabels(0))));
        assert!(matches!(
            trainer.fit(&separable(1)),
            Err(TrainError::TooFewRows { rows: 2 })
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = TrainConfig {
            dropout: vec![0.3],
            ..TrainConfig::default()
        };
        assert!(matches!(
            Trainer::new(config).fit(&separable(10)),
            Err(TrainError::Config(_))
        ));

        let config = TrainConfig {
            test_fraction: 1.0,
            ..TrainConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::Config(_))));
    }

    #[test]
    fn dropout_masks_hidden_layers_only() {
        let mut rng = fastrand::Rng::with_seed(11);
        let classifier = Classifier::init(FEATURE_LEN, &[32, 16], 3, &mut rng);
        let x = Array2::from_elem((6, FEATURE_LEN), 0.25);

        let pass = Pass::forward(&classifier, x.view(), &[0.5, 0.0], &mut rng);
        assert_eq!(pass.activations.len(), 3);
        assert_eq!(pass.output().dim(), (6, 3));
        assert!(pass.masks[0].is_some());
        assert!(pass.masks[1].is_none());
        assert!(pass.masks[2].is_none());

        let mask = pass.masks[0].as_ref().unwrap();
        assert!(mask.iter().all(|&m| m == 0.0 || m == 2.0));
        for row in pass.output().rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = fastrand::Rng::with_seed(3);
        let mut classifier = Classifier::init(3, &[4], 2, &mut rng);
        let x = Array2::from_shape_fn((5, 3), |(i, j)| (i * 3 + j) as f32 * 0.1 - 0.5);
        let y = Array2::from_shape_fn((5, 2), |(i, j)| if i % 2 == j { 1.0 } else { 0.0 });

        let pass = Pass::forward(&classifier, x.view(), &[0.0], &mut rng);
        let grads = pass.backward(&classifier, x.view(), y.view());

        let loss = |c: &Classifier| cross_entropy(c.predict_batch(x.view()).view(), y.view());
        let h = 1e-3;
        for layer in 0..2 {
            let (rows, cols) = classifier.layers[layer].weights.dim();
            for r in 0..rows {
                for c in 0..cols {
                    let orig = classifier.layers[layer].weights[[r, c]];
                    classifier.layers[layer].weights[[r, c]] = orig + h;
                    let plus = loss(&classifier);
                    classifier.layers[layer].weights[[r, c]] = orig - h;
                    let minus = loss(&classifier);
                    classifier.layers[layer].weights[[r, c]] = orig;

                    let numeric = (plus - minus) / (2.0 * h);
                    assert_relative_eq!(grads.weights[layer][[r, c]], numeric, epsilon = 5e-3);
                }
            }
        }
    }
}
