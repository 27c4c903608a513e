//! Logistic regression trained with momentum SGD
//!
//! Parameters are exposed as `linear.weight` and `linear.bias`.

use anyhow::{anyhow, bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::data::Batch;
use crate::config::ModelConfig;
use crate::training::{BatchScore, Model};
use crate::weights::NamedWeights;

pub const WEIGHT: &str = "linear.weight";
pub const BIAS: &str = "linear.bias";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    weight: Vec<f64>,
    bias: f64,
    weight_velocity: Vec<f64>,
    bias_velocity: f64,
    learning_rate: f64,
    momentum: f64,
    lr_decay: f64,
    /// Gradient of the last computed loss, consumed by the optimizer step
    #[serde(skip)]
    pending: Option<(Vec<f64>, f64)>,
    #[serde(skip)]
    training: bool,
}

impl LogisticRegression {
    pub fn new(features: usize, config: &ModelConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            weight: (0..features).map(|_| rng.gen_range(-0.1..0.1)).collect(),
            bias: 0.0,
            weight_velocity: vec![0.0; features],
            bias_velocity: 0.0,
            learning_rate: config.learning_rate,
            momentum: config.momentum,
            lr_decay: config.lr_decay,
            pending: None,
            training: true,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let z = self.bias + row.iter().zip(&self.weight).map(|(x, w)| x * w).sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

impl Model for LogisticRegression {
    type Batch = Batch;
    /// Predicted probability of class 1 per row
    type Output = Vec<f64>;

    fn forward(&mut self, batch: &Batch) -> anyhow::Result<Vec<f64>> {
        if let Some(row) = batch.features.iter().find(|r| r.len() != self.weight.len()) {
            bail!(
                "batch row has {} features, model expects {}",
                row.len(),
                self.weight.len()
            );
        }
        Ok(batch.features.iter().map(|row| self.predict(row)).collect())
    }

    /// Mean binary cross-entropy
    fn compute_loss(&mut self, output: &Vec<f64>, batch: &Batch) -> anyhow::Result<f64> {
        if output.len() != batch.len() || batch.is_empty() {
            bail!("{} predictions for {} labels", output.len(), batch.len());
        }
        let n = batch.len() as f64;
        let eps = 1e-12;
        let loss = output
            .iter()
            .zip(&batch.labels)
            .map(|(p, y)| -(y * (p + eps).ln() + (1.0 - y) * (1.0 - p + eps).ln()))
            .sum::<f64>()
            / n;

        if self.training {
            let mut grad_w = vec![0.0; self.weight.len()];
            let mut grad_b = 0.0;
            for ((p, y), row) in output.iter().zip(&batch.labels).zip(&batch.features) {
                let err = (p - y) / n;
                grad_b += err;
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += err * x;
                }
            }
            self.pending = Some((grad_w, grad_b));
        }
        Ok(loss)
    }

    fn backward_and_step(&mut self) -> anyhow::Result<()> {
        let (grad_w, grad_b) = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("optimizer step without a computed loss"))?;
        for ((w, v), g) in self
            .weight
            .iter_mut()
            .zip(self.weight_velocity.iter_mut())
            .zip(grad_w)
        {
            *v = self.momentum * *v + g;
            *w -= self.learning_rate * *v;
        }
        self.bias_velocity = self.momentum * self.bias_velocity + grad_b;
        self.bias -= self.learning_rate * self.bias_velocity;
        Ok(())
    }

    fn score(&self, output: &Vec<f64>, batch: &Batch) -> BatchScore {
        let correct = output
            .iter()
            .zip(&batch.labels)
            .filter(|(p, y)| (**p >= 0.5) == (**y >= 0.5))
            .count();
        BatchScore {
            correct,
            samples: batch.len(),
        }
    }

    fn named_weights(&self) -> NamedWeights {
        NamedWeights::new()
            .with(WEIGHT, self.weight.clone())
            .with(BIAS, vec![self.bias])
    }

    fn set_named_weights(&mut self, weights: &NamedWeights) -> anyhow::Result<()> {
        let weight = weights
            .get(WEIGHT)
            .ok_or_else(|| anyhow!("missing parameter {}", WEIGHT))?;
        let bias = weights
            .get(BIAS)
            .ok_or_else(|| anyhow!("missing parameter {}", BIAS))?;
        if weight.len() != self.weight.len() || bias.len() != 1 {
            bail!(
                "shape mismatch: got {}+{} values, expected {}+1",
                weight.len(),
                bias.len(),
                self.weight.len()
            );
        }
        self.weight.copy_from_slice(weight);
        self.bias = bias[0];
        Ok(())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        if !training {
            self.pending = None;
        }
    }

    fn scheduler_step(&mut self, _epoch: usize) {
        self.learning_rate *= self.lr_decay;
    }

    fn save_state(&self) -> anyhow::Result<serde_json::Value> {
        serde_json::to_value(self).context("serializing model state")
    }

    fn load_state(&mut self, state: &serde_json::Value) -> anyhow::Result<()> {
        let restored: LogisticRegression =
            serde_json::from_value(state.clone()).context("parsing model state")?;
        if restored.weight.len() != self.weight.len() {
            bail!(
                "saved model has {} features, expected {}",
                restored.weight.len(),
                self.weight.len()
            );
        }
        *self = LogisticRegression {
            training: self.training,
            ..restored
        };
        Ok(())
    }
}
