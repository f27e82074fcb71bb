//! One-hidden-layer perceptron: ReLU hidden units, softmax output,
//! cross-entropy loss, L2 penalty, mini-batch Adam.

use bitcode::{Decode, Encode};
use rand::{rngs::StdRng, seq::SliceRandom as _, Rng as _, SeedableRng as _};
use rayon::{iter::ParallelIterator as _, slice::ParallelSlice as _};

use pcd_core::{
    classes::{observed_labels, ClassLabel},
    pointcloud::normalize::NormalizedFeatureMatrix,
    Error, Result,
};

use crate::classifier::{check_training_shape, Classifier};

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct MlpParams {
    pub hidden_units: u32,
    /// Passes over the training set.
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    /// L2 penalty on the weights.
    pub alpha: f64,
    pub seed: Option<u64>,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_units: 100,
            epochs: 300,
            batch_size: 200,
            learning_rate: 0.001,
            alpha: 0.0001,
            seed: None,
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// First and second moment estimates for one parameter block.
struct Moments {
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Moments {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64], learning_rate: f64, t: i32) {
        let correction1 = 1.0 - BETA1.powi(t);
        let correction2 = 1.0 - BETA2.powi(t);
        for (i, (p, &g)) in params.iter_mut().zip(grads).enumerate() {
            self.m[i] = BETA1 * self.m[i] + (1.0 - BETA1) * g;
            self.v[i] = BETA2 * self.v[i] + (1.0 - BETA2) * g * g;
            let m_hat = self.m[i] / correction1;
            let v_hat = self.v[i] / correction2;
            *p -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MultiLayerPerceptron {
    params: MlpParams,
    columns: Vec<String>,
    classes: Vec<ClassLabel>,
    /// `hidden × inputs`, row-major.
    hidden_weights: Vec<f64>,
    hidden_bias: Vec<f64>,
    /// `classes × hidden`, row-major.
    output_weights: Vec<f64>,
    output_bias: Vec<f64>,
}

impl MultiLayerPerceptron {
    pub fn new(params: MlpParams) -> Self {
        Self {
            params,
            columns: Vec::new(),
            classes: Vec::new(),
            hidden_weights: Vec::new(),
            hidden_bias: Vec::new(),
            output_weights: Vec::new(),
            output_bias: Vec::new(),
        }
    }

    pub fn params(&self) -> &MlpParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.classes.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn check_structure(&self) -> Result<()> {
        let n_in = self.columns.len();
        let n_hidden = self.hidden_bias.len();
        let n_out = self.classes.len();
        let consistent = n_in > 0
            && n_hidden > 0
            && n_out > 0
            && Some(self.hidden_weights.len()) == n_hidden.checked_mul(n_in)
            && Some(self.output_weights.len()) == n_out.checked_mul(n_hidden)
            && self.output_bias.len() == n_out;
        if consistent {
            Ok(())
        } else {
            Err(Error::Model(format!(
                "perceptron layer sizes do not match {n_in} inputs, {n_hidden} hidden units and {n_out} classes"
            )))
        }
    }

    fn n_hidden(&self) -> usize {
        self.hidden_bias.len()
    }

    /// Hidden activations and output logits for one row.
    fn forward(&self, row: &[f64], hidden: &mut [f64], logits: &mut [f64]) {
        let n_in = row.len();
        for (h, out) in hidden.iter_mut().enumerate() {
            let weights = &self.hidden_weights[h * n_in..(h + 1) * n_in];
            let z = self.hidden_bias[h] + weights.iter().zip(row).map(|(w, x)| w * x).sum::<f64>();
            *out = z.max(0.0);
        }
        let n_hidden = hidden.len();
        for (k, out) in logits.iter_mut().enumerate() {
            let weights = &self.output_weights[k * n_hidden..(k + 1) * n_hidden];
            *out = self.output_bias[k]
                + weights.iter().zip(hidden.iter()).map(|(w, h)| w * h).sum::<f64>();
        }
    }

    fn predict_row(&self, row: &[f64]) -> ClassLabel {
        let mut hidden = vec![0.0; self.n_hidden()];
        let mut logits = vec![0.0; self.classes.len()];
        self.forward(row, &mut hidden, &mut logits);
        let mut best = 0;
        for (k, &z) in logits.iter().enumerate() {
            if z > logits[best] {
                best = k;
            }
        }
        self.classes[best]
    }
}

/// Softmax in place; returns the log-probability of `target`.
fn softmax(logits: &mut [f64], target: usize) -> f64 {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for z in logits.iter_mut() {
        *z = (*z - max).exp();
        sum += *z;
    }
    for z in logits.iter_mut() {
        *z /= sum;
    }
    logits[target].max(f64::MIN_POSITIVE).ln()
}

/// Glorot-uniform initial weights.
fn init_weights(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Vec<f64> {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    (0..fan_in * fan_out)
        .map(|_| rng.gen_range(-bound..bound))
        .collect()
}

impl Classifier for MultiLayerPerceptron {
    fn fit(&mut self, features: &NormalizedFeatureMatrix, labels: &[ClassLabel]) -> Result<()> {
        check_training_shape(features, labels)?;
        let params = self.params;
        if params.hidden_units == 0 || params.epochs == 0 || params.batch_size == 0 {
            return Err(Error::Config(
                "hidden_units, epochs and batch_size must be at least 1".into(),
            ));
        }
        let rate_ok = params.learning_rate > 0.0 && params.learning_rate.is_finite();
        let alpha_ok = params.alpha >= 0.0 && params.alpha.is_finite();
        if !rate_ok || !alpha_ok {
            return Err(Error::Config(
                "learning_rate must be positive and alpha non-negative".into(),
            ));
        }

        let classes = observed_labels(&[labels]);
        let targets: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();

        let n_in = features.n_cols();
        let n_hidden = params.hidden_units as usize;
        let n_out = classes.len();
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        self.columns = features.columns().to_vec();
        self.classes = classes;
        self.hidden_weights = init_weights(&mut rng, n_in, n_hidden);
        self.hidden_bias = vec![0.0; n_hidden];
        self.output_weights = init_weights(&mut rng, n_hidden, n_out);
        self.output_bias = vec![0.0; n_out];

        let mut hidden_weight_moments = Moments::new(self.hidden_weights.len());
        let mut hidden_bias_moments = Moments::new(n_hidden);
        let mut output_weight_moments = Moments::new(self.output_weights.len());
        let mut output_bias_moments = Moments::new(n_out);

        let mut grad_hidden_weights = vec![0.0; self.hidden_weights.len()];
        let mut grad_hidden_bias = vec![0.0; n_hidden];
        let mut grad_output_weights = vec![0.0; self.output_weights.len()];
        let mut grad_output_bias = vec![0.0; n_out];
        let mut hidden = vec![0.0; n_hidden];
        let mut probabilities = vec![0.0; n_out];
        let mut hidden_delta = vec![0.0; n_hidden];

        let mut order: Vec<usize> = (0..features.n_rows()).collect();
        let mut t = 0;
        let mut loss = 0.0;
        for _ in 0..params.epochs {
            order.shuffle(&mut rng);
            loss = 0.0;
            for batch in order.chunks(params.batch_size as usize) {
                grad_hidden_weights.fill(0.0);
                grad_hidden_bias.fill(0.0);
                grad_output_weights.fill(0.0);
                grad_output_bias.fill(0.0);

                for &i in batch {
                    let row = features.row(i);
                    self.forward(row, &mut hidden, &mut probabilities);
                    loss -= softmax(&mut probabilities, targets[i]);
                    probabilities[targets[i]] -= 1.0;

                    hidden_delta.fill(0.0);
                    for (k, &delta) in probabilities.iter().enumerate() {
                        grad_output_bias[k] += delta;
                        let weights = &self.output_weights[k * n_hidden..(k + 1) * n_hidden];
                        let grads = &mut grad_output_weights[k * n_hidden..(k + 1) * n_hidden];
                        for h in 0..n_hidden {
                            grads[h] += delta * hidden[h];
                            hidden_delta[h] += delta * weights[h];
                        }
                    }
                    for h in 0..n_hidden {
                        if hidden[h] <= 0.0 {
                            continue;
                        }
                        let delta = hidden_delta[h];
                        grad_hidden_bias[h] += delta;
                        let grads = &mut grad_hidden_weights[h * n_in..(h + 1) * n_in];
                        for (g, x) in grads.iter_mut().zip(row) {
                            *g += delta * x;
                        }
                    }
                }

                let scale = 1.0 / batch.len() as f64;
                for (g, w) in grad_hidden_weights.iter_mut().zip(&self.hidden_weights) {
                    *g = *g * scale + params.alpha * w;
                }
                for (g, w) in grad_output_weights.iter_mut().zip(&self.output_weights) {
                    *g = *g * scale + params.alpha * w;
                }
                grad_hidden_bias.iter_mut().for_each(|g| *g *= scale);
                grad_output_bias.iter_mut().for_each(|g| *g *= scale);

                t += 1;
                let lr = params.learning_rate;
                hidden_weight_moments.step(&mut self.hidden_weights, &grad_hidden_weights, lr, t);
                hidden_bias_moments.step(&mut self.hidden_bias, &grad_hidden_bias, lr, t);
                output_weight_moments.step(&mut self.output_weights, &grad_output_weights, lr, t);
                output_bias_moments.step(&mut self.output_bias, &grad_output_bias, lr, t);
            }
        }

        log::debug!(
            "fitted perceptron with {} hidden units on {} rows, final loss {:.4}",
            n_hidden,
            features.n_rows(),
            loss / features.n_rows() as f64
        );
        Ok(())
    }

    fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>> {
        if !self.is_fitted() {
            return Err(Error::Model("perceptron is not fitted".into()));
        }
        features.ensure_columns(&self.columns)?;
        if features.n_rows() == 0 {
            return Ok(Vec::new());
        }
        Ok(features
            .values()
            .par_chunks_exact(features.n_cols())
            .map(|row| self.predict_row(row))
            .collect())
    }
}
