use ndarray::{s, ArrayView1, ArrayView3, ArrayViewMut3};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::dictionary::Dictionary;
use crate::error::{RescoreError, SearchError};
use crate::rescore::{Candidate, CandidateRow, RescoreContext, Rescorer};

use super::selection::{check_step_inputs, masked_add, top_k, Selection, MASKED};
use super::Search;

/// How the vocabulary is cut down before drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Truncation {
    Full,
    TopK(usize),
    /// Nucleus sampling, see "The Curious Case of Neural Text Degeneration"
    /// (Holtzman et al., 2019).
    TopP(f32),
}

impl Truncation {
    pub fn from_options(topk: Option<usize>, topp: Option<f32>) -> Result<Self, SearchError> {
        match (topk, topp) {
            (Some(_), Some(_)) => Err(SearchError::Config(
                "top-k and top-p sampling are mutually exclusive".into(),
            )),
            (Some(0), None) => Err(SearchError::Config("sampling top-k must be positive".into())),
            (Some(k), None) => Ok(Self::TopK(k)),
            (None, Some(p)) if p > 0.0 && p <= 1.0 => Ok(Self::TopP(p)),
            (None, Some(p)) => Err(SearchError::Config(format!(
                "sampling top-p must lie in (0, 1], got {p}"
            ))),
            (None, None) => Ok(Self::Full),
        }
    }

    /// Candidates a single vocabulary row may be sampled from, best first
    /// for the truncated modes.
    pub(crate) fn candidates(&self, row: ArrayView1<f32>) -> Vec<Candidate> {
        match *self {
            Self::Full => row
                .iter()
                .enumerate()
                .map(|(token, &lprob)| Candidate { token, lprob })
                .collect(),
            Self::TopK(k) => top_k(row.iter().copied(), k)
                .into_iter()
                .map(|(token, lprob)| Candidate { token, lprob })
                .collect(),
            Self::TopP(p) => nucleus(row, p),
        }
    }
}

/// Smallest descending prefix whose mass exceeds `p`: every token whose
/// running sum stays below `p`, plus the one that crosses it.
fn nucleus(row: ArrayView1<f32>, p: f32) -> Vec<Candidate> {
    let sorted = top_k(row.iter().copied(), row.len());
    let mut below = 0;
    let mut cumulative = 0.0f32;
    for &(_, lprob) in &sorted {
        cumulative += lprob.exp();
        if cumulative < p {
            below += 1;
        } else {
            break;
        }
    }
    let keep = (below + 1).min(sorted.len());
    sorted
        .into_iter()
        .take(keep)
        .map(|(token, lprob)| Candidate { token, lprob })
        .collect()
}

/// Unnormalised probabilities relative to the best candidate, so rescored
/// log-probabilities above zero cannot overflow. NaN counts as masked.
fn relative_weights(candidates: &[Candidate]) -> Vec<f32> {
    let lprobs = candidates
        .iter()
        .map(|c| if c.lprob.is_nan() { MASKED } else { c.lprob });
    let max = lprobs.clone().fold(MASKED, f32::max);
    if !max.is_finite() {
        return vec![0.0; candidates.len()];
    }
    lprobs.map(|lprob| (lprob - max).exp()).collect()
}

/// Draws continuations at random from the (optionally truncated) model
/// distribution instead of ranking them.
pub struct Sampling {
    truncation: Truncation,
    vocab_size: usize,
    rng: StdRng,
    rescorer: Option<Rescorer>,
}

impl Sampling {
    pub fn new(
        dict: &Dictionary,
        topk: Option<usize>,
        topp: Option<f32>,
        seed: Option<u64>,
    ) -> Result<Self, SearchError> {
        let truncation = Truncation::from_options(topk, topp)?;
        if let Truncation::TopK(k) = truncation {
            if k > dict.vocab_size {
                return Err(SearchError::Config(format!(
                    "sampling top-k {k} exceeds vocabulary size {}",
                    dict.vocab_size
                )));
            }
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        log::debug!("Sampling search: truncation={truncation:?} seeded={}", seed.is_some());
        Ok(Self {
            truncation,
            vocab_size: dict.vocab_size,
            rng,
            rescorer: None,
        })
    }

    /// Installs a rescorer. It runs at every step, the first one included,
    /// and steps must then go through [`Search::step_with_context`].
    pub fn with_rescorer(mut self, rescorer: Rescorer) -> Self {
        self.rescorer = Some(rescorer);
        self
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    pub fn rescorer(&self) -> Option<&Rescorer> {
        self.rescorer.as_ref()
    }

    fn sample(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
        ctx: Option<&RescoreContext<'_>>,
    ) -> Result<Selection, SearchError> {
        let shape = check_step_inputs(step, &lprobs, &scores, self.vocab_size)?;

        // At the first step every hypothesis is the same, so only slot 0 counts.
        let slots = if step == 0 { 1 } else { shape.beam };
        let mut rows: Vec<CandidateRow> = (0..shape.batch)
            .flat_map(|b| (0..slots).map(move |slot| (b, slot)))
            .map(|(batch, slot)| CandidateRow {
                batch,
                slot,
                candidates: self
                    .truncation
                    .candidates(lprobs.slice(s![batch, slot, ..])),
            })
            .collect();

        if let Some(rescorer) = self.rescorer.as_mut() {
            let ctx = ctx.ok_or(RescoreError::MissingContext)?;
            ctx.check(shape.batch, shape.beam)?;
            rescorer.rescore(step, &mut rows, ctx)?;
        }

        let mut out = Selection::zeros(shape.batch, shape.beam);
        for row in &rows {
            let weights = relative_weights(&row.candidates);
            let dist = WeightedIndex::new(&weights).map_err(|e| {
                SearchError::DegenerateDistribution(format!(
                    "batch {} slot {}: {e}",
                    row.batch, row.slot
                ))
            })?;

            if step == 0 {
                for j in 0..shape.beam {
                    let pick = row.candidates[dist.sample(&mut self.rng)];
                    out.set(row.batch, j, pick.lprob, pick.token, 0);
                }
            } else {
                let pick = row.candidates[dist.sample(&mut self.rng)];
                let prev = scores[[row.batch, row.slot, step - 1]];
                out.set(
                    row.batch,
                    row.slot,
                    masked_add(pick.lprob, prev),
                    pick.token,
                    row.slot,
                );
            }
        }

        log::trace!("sampling step {step}: drew {} tokens", shape.batch * shape.beam);
        Ok(out)
    }
}

impl Search for Sampling {
    fn name(&self) -> &'static str {
        "sampling"
    }

    fn step(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        self.sample(step, lprobs, scores, None)
    }

    fn step_with_context(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
        ctx: &RescoreContext<'_>,
    ) -> Result<Selection, SearchError> {
        self.sample(step, lprobs, scores, Some(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn ln(probs: &[f32]) -> ndarray::Array1<f32> {
        arr1(probs).mapv(f32::ln)
    }

    fn tokens(cands: &[Candidate]) -> Vec<usize> {
        cands.iter().map(|c| c.token).collect()
    }

    #[test]
    fn nucleus_includes_first_crossing() {
        let row = ln(&[0.5, 0.3, 0.15, 0.05]);
        assert_eq!(tokens(&nucleus(row.view(), 0.7)), vec![0, 1]);
    }

    #[test]
    fn nucleus_keeps_one_token_for_tiny_p() {
        let row = ln(&[0.1, 0.6, 0.3]);
        assert_eq!(tokens(&nucleus(row.view(), 0.01)), vec![1]);
    }

    #[test]
    fn nucleus_with_full_mass_keeps_everything() {
        let row = ln(&[0.25, 0.25, 0.25, 0.25]);
        assert_eq!(nucleus(row.view(), 1.0).len(), 4);
    }

    #[test]
    fn top_k_truncation_keeps_best() {
        let row = ln(&[0.1, 0.6, 0.3]);
        let cands = Truncation::TopK(2).candidates(row.view());
        assert_eq!(tokens(&cands), vec![1, 2]);
    }

    #[test]
    fn weights_are_relative_to_the_best_candidate() {
        let cands = [
            Candidate { token: 0, lprob: 120.0 },
            Candidate { token: 1, lprob: 120.0 + 0.5f32.ln() },
            Candidate { token: 2, lprob: f32::NAN },
            Candidate { token: 3, lprob: MASKED },
        ];
        let weights = relative_weights(&cands);
        assert_eq!(weights[0], 1.0);
        assert!((weights[1] - 0.5).abs() < 1e-4);
        assert_eq!(&weights[2..], &[0.0, 0.0]);
    }

    #[test]
    fn fully_masked_candidates_weigh_nothing() {
        let cands = [Candidate { token: 0, lprob: MASKED }];
        assert_eq!(relative_weights(&cands), vec![0.0]);
    }

    #[test]
    fn truncation_options_are_validated() {
        assert!(Truncation::from_options(Some(0), None).is_err());
        assert!(Truncation::from_options(Some(2), Some(0.5)).is_err());
        assert!(Truncation::from_options(None, Some(1.5)).is_err());
        assert!(Truncation::from_options(None, Some(0.0)).is_err());
        assert_eq!(Truncation::from_options(None, None).unwrap(), Truncation::Full);
    }
}
