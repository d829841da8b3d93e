//! Optional adjustment of sampling candidates by auxiliary sequence scorers.
//!
//! A [`Rescorer`] asks each [`CandidateScorer`] to score every candidate
//! continuation of a hypothesis, combines the scores linearly and adds the
//! result to the candidate's log-probability before sampling. With a
//! [`CoefficientTrainer`] installed and a gold continuation supplied, the
//! combination weights are updated online.

mod coefficients;

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3};

use crate::error::{BoxError, RescoreError, SearchError};
use crate::search::selection::masked_add;

pub use coefficients::{CoefficientSample, CoefficientTrainer, MarginCoefficientTrainer};

pub const DEFAULT_SCORING_MODE: &str = "sentence_classification_head";
pub const DEFAULT_CLASS_INDEX: usize = 1;

/// Auxiliary model that scores whole token sequences.
pub trait CandidateScorer: Send {
    fn name(&self) -> &str;

    /// Longest sequence the scorer accepts, if it has a limit.
    fn max_positions(&self) -> Option<usize> {
        None
    }

    /// Returns one row of per-class scores for each sequence in `batch`.
    fn score(&mut self, mode: &str, batch: &[Vec<usize>]) -> Result<Array2<f32>, BoxError>;
}

/// Tokens the decoder has seen so far, needed to build candidate sequences.
#[derive(Debug, Clone, Copy)]
pub struct RescoreContext<'a> {
    /// `(batch, src_len)` source prefix.
    pub src_tokens: ArrayView2<'a, usize>,
    /// `(batch, beam, step)` tokens generated so far for each hypothesis.
    pub gen_tokens: ArrayView3<'a, usize>,
    pub gold: Option<GoldContinuation<'a>>,
}

/// Reference continuation used to train the rescoring coefficients.
#[derive(Debug, Clone, Copy)]
pub struct GoldContinuation<'a> {
    /// `(batch, gold_len)`
    pub tokens: ArrayView2<'a, usize>,
    /// `(batch,)` model log-probability of each gold continuation.
    pub lm_scores: ArrayView1<'a, f32>,
    /// `(batch, beam)` model log-probability of each hypothesis so far.
    pub gen_lm_scores: ArrayView2<'a, f32>,
}

impl RescoreContext<'_> {
    pub(crate) fn check(&self, batch: usize, beam: usize) -> Result<(), SearchError> {
        if self.src_tokens.nrows() != batch {
            return Err(SearchError::Shape(format!(
                "source tokens cover {} examples, batch is {batch}",
                self.src_tokens.nrows()
            )));
        }
        let (g_batch, g_beam, _) = self.gen_tokens.dim();
        if g_batch != batch || g_beam != beam {
            return Err(SearchError::Shape(format!(
                "generated tokens are {g_batch}x{g_beam}, expected {batch}x{beam}"
            )));
        }
        if let Some(gold) = &self.gold {
            if gold.tokens.nrows() != batch || gold.lm_scores.len() != batch {
                return Err(SearchError::Shape(format!(
                    "gold continuation covers {} examples, batch is {batch}",
                    gold.tokens.nrows()
                )));
            }
            if gold.gen_lm_scores.dim() != (batch, beam) {
                return Err(SearchError::Shape(format!(
                    "generated LM scores are {:?}, expected {batch}x{beam}",
                    gold.gen_lm_scores.dim()
                )));
            }
        }
        Ok(())
    }

    fn prefix(&self, batch: usize, slot: usize) -> Vec<usize> {
        self.src_tokens
            .row(batch)
            .iter()
            .chain(self.gen_tokens.slice(ndarray::s![batch, slot, ..]).iter())
            .copied()
            .collect()
    }
}

/// One candidate token of a sampling row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub token: usize,
    pub lprob: f32,
}

/// Candidates that one hypothesis (`batch`, `slot`) may be extended with.
#[derive(Debug, Clone)]
pub(crate) struct CandidateRow {
    pub batch: usize,
    pub slot: usize,
    pub candidates: Vec<Candidate>,
}

struct WeightedScorer {
    coefficient: f32,
    scorer: Box<dyn CandidateScorer>,
}

pub struct Rescorer {
    scorers: Vec<WeightedScorer>,
    mode: String,
    class_index: usize,
    trainer: Option<Box<dyn CoefficientTrainer>>,
}

impl Default for Rescorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rescorer {
    pub fn new() -> Self {
        Self {
            scorers: Vec::new(),
            mode: DEFAULT_SCORING_MODE.to_string(),
            class_index: DEFAULT_CLASS_INDEX,
            trainer: None,
        }
    }

    pub fn with_scorer(mut self, coefficient: f32, scorer: Box<dyn CandidateScorer>) -> Self {
        self.scorers.push(WeightedScorer {
            coefficient,
            scorer,
        });
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_class_index(mut self, class_index: usize) -> Self {
        self.class_index = class_index;
        self
    }

    pub fn with_trainer(mut self, trainer: Box<dyn CoefficientTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// Coefficients currently in effect, one per scorer.
    pub fn coefficients(&self) -> Vec<f32> {
        match &self.trainer {
            Some(trainer) => trainer.coefficients(),
            None => self.scorers.iter().map(|s| s.coefficient).collect(),
        }
    }

    /// Adds the weighted scorer output to every candidate of every row.
    pub(crate) fn rescore(
        &mut self,
        step: usize,
        rows: &mut [CandidateRow],
        ctx: &RescoreContext<'_>,
    ) -> Result<(), RescoreError> {
        let learning = self.trainer.is_some() && ctx.gold.is_some();
        let coefs = self.coefficients();
        if coefs.len() != self.scorers.len() {
            return Err(RescoreError::CoefficientCount {
                expected: self.scorers.len(),
                actual: coefs.len(),
            });
        }
        if learning && step % 100 == 0 {
            log::debug!("Rescoring coefficients at step {step}: {coefs:?}");
        }

        for row in rows.iter_mut() {
            let prefix = ctx.prefix(row.batch, row.slot);
            let mut batch: Vec<Vec<usize>> = row
                .candidates
                .iter()
                .map(|c| {
                    let mut seq = prefix.clone();
                    seq.push(c.token);
                    seq
                })
                .collect();
            let gold = ctx.gold.as_ref().filter(|_| learning);
            if let Some(gold) = gold {
                batch.push(
                    ctx.src_tokens
                        .row(row.batch)
                        .iter()
                        .chain(gold.tokens.row(row.batch).iter())
                        .copied()
                        .collect(),
                );
            }

            let raw = self.score_all(&batch)?;
            let n = row.candidates.len();
            for (i, cand) in row.candidates.iter_mut().enumerate() {
                let adjustment: f32 = coefs.iter().zip(&raw).map(|(c, s)| c * s[i]).sum();
                cand.lprob = masked_add(cand.lprob, adjustment);
            }
            log::trace!(
                "rescored {n} candidates for batch={} slot={}",
                row.batch,
                row.slot
            );

            if let (Some(gold), Some(trainer)) = (gold, self.trainer.as_mut()) {
                let Some((best, best_lprob)) = row
                    .candidates
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.lprob.total_cmp(&b.1.lprob))
                    .map(|(i, c)| (i, c.lprob))
                else {
                    continue;
                };
                let sample = CoefficientSample {
                    gold_lm: gold.lm_scores[row.batch],
                    generated_lm: masked_add(
                        gold.gen_lm_scores[[row.batch, row.slot]],
                        best_lprob,
                    ),
                    gold_scores: raw.iter().map(|s| s[n]).collect(),
                    best_scores: raw.iter().map(|s| s[best]).collect(),
                };
                let loss = trainer
                    .train(&sample)
                    .map_err(|e| RescoreError::Trainer(e.to_string()))?;
                log::trace!("coefficient update at step {step}: loss={loss}");
            }
        }
        Ok(())
    }

    /// Raw class scores, `[scorer][sequence]`.
    fn score_all(&mut self, batch: &[Vec<usize>]) -> Result<Vec<Vec<f32>>, RescoreError> {
        let mut all = Vec::with_capacity(self.scorers.len());
        for weighted in &mut self.scorers {
            let scorer = &mut weighted.scorer;
            let truncated;
            let input = match scorer.max_positions() {
                Some(max) if batch.iter().any(|seq| seq.len() > max) => {
                    truncated = batch
                        .iter()
                        .map(|seq| seq[seq.len().saturating_sub(max)..].to_vec())
                        .collect::<Vec<_>>();
                    &truncated[..]
                }
                _ => batch,
            };

            let out = scorer
                .score(&self.mode, input)
                .map_err(|source| RescoreError::Scorer {
                    name: scorer.name().to_string(),
                    source,
                })?;
            if out.nrows() != batch.len() {
                return Err(RescoreError::ScoreCount {
                    scorer: scorer.name().to_string(),
                    expected: batch.len(),
                    actual: out.nrows(),
                });
            }
            if self.class_index >= out.ncols() {
                return Err(RescoreError::ClassIndex {
                    scorer: scorer.name().to_string(),
                    class: self.class_index,
                    classes: out.ncols(),
                });
            }
            all.push(out.column(self.class_index).to_vec());
        }
        Ok(all)
    }
}
