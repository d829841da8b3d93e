use crate::error::{BoxError, RescoreError};

/// What one rescored row tells the trainer: how the gold continuation and
/// the best rescored candidate compare under the model and each scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientSample {
    pub gold_lm: f32,
    /// Hypothesis score so far plus the rescored log-probability of the
    /// best candidate, so the scorer contribution is already included.
    pub generated_lm: f32,
    /// One raw score per scorer for the gold sequence.
    pub gold_scores: Vec<f32>,
    /// One raw score per scorer for the best candidate.
    pub best_scores: Vec<f32>,
}

/// Learns the rescoring coefficients while decoding.
pub trait CoefficientTrainer: Send {
    fn coefficients(&self) -> Vec<f32>;

    /// Updates the coefficients and returns the training loss.
    fn train(&mut self, sample: &CoefficientSample) -> Result<f32, BoxError>;
}

/// Hinge-loss trainer: pushes the gold continuation to outscore the best
/// candidate by at least `margin` once scorer contributions are added.
#[derive(Debug, Clone)]
pub struct MarginCoefficientTrainer {
    coefficients: Vec<f32>,
    learning_rate: f32,
    margin: f32,
}

impl MarginCoefficientTrainer {
    pub fn new(initial: Vec<f32>, learning_rate: f32, margin: f32) -> Self {
        Self {
            coefficients: initial,
            learning_rate,
            margin,
        }
    }

    fn gold_total(&self, sample: &CoefficientSample) -> f32 {
        sample.gold_lm
            + self
                .coefficients
                .iter()
                .zip(&sample.gold_scores)
                .map(|(c, s)| c * s)
                .sum::<f32>()
    }
}

impl CoefficientTrainer for MarginCoefficientTrainer {
    fn coefficients(&self) -> Vec<f32> {
        self.coefficients.clone()
    }

    fn train(&mut self, sample: &CoefficientSample) -> Result<f32, BoxError> {
        let n = self.coefficients.len();
        for scores in [&sample.gold_scores, &sample.best_scores] {
            if scores.len() != n {
                return Err(Box::new(RescoreError::CoefficientCount {
                    expected: n,
                    actual: scores.len(),
                }));
            }
        }
        if !sample.gold_lm.is_finite() || !sample.generated_lm.is_finite() {
            return Ok(0.0);
        }

        let gap = self.gold_total(sample) - sample.generated_lm;
        let loss = (self.margin - gap).max(0.0);
        if loss > 0.0 {
            for ((c, g), s) in self
                .coefficients
                .iter_mut()
                .zip(&sample.gold_scores)
                .zip(&sample.best_scores)
            {
                *c += self.learning_rate * (g - s);
            }
        }
        Ok(loss)
    }
}
