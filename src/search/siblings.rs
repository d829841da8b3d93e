use ndarray::{s, ArrayView3, ArrayViewMut3};

use crate::dictionary::Dictionary;
use crate::error::SearchError;

use super::beam::BeamSearch;
use super::selection::{add_history, check_step_inputs, masked_add, top_k, Selection};
use super::Search;

/// Beam search with diverse siblings.
///
/// Each hypothesis expands its own top-k children, the `i`-th best child
/// loses `(i + 1) * diversity_rate`, and the global top-k is taken over the
/// pooled children. A rate of zero gives back plain beam search.
///
/// See "A Simple, Fast Diverse Decoding Algorithm for Neural Generation"
/// (Li et al., 2016), <https://arxiv.org/abs/1611.08562>.
#[derive(Debug, Clone)]
pub struct DiverseSiblingsSearch {
    diversity_rate: f32,
    vocab_size: usize,
    beam: BeamSearch,
}

impl DiverseSiblingsSearch {
    pub fn new(dict: &Dictionary, diversity_rate: f32) -> Self {
        log::debug!("Diverse siblings search: rate={diversity_rate}");
        Self {
            diversity_rate,
            vocab_size: dict.vocab_size,
            beam: BeamSearch::new(dict),
        }
    }

    /// Penalty applied to the sibling at `rank` (0 = best child).
    pub fn sibling_penalty(&self, rank: usize) -> f32 {
        (rank + 1) as f32 * self.diversity_rate
    }
}

impl Search for DiverseSiblingsSearch {
    fn name(&self) -> &'static str {
        "diverse_siblings"
    }

    fn step(
        &mut self,
        step: usize,
        mut lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        if step == 0 {
            return self.beam.select(step, lprobs, scores);
        }

        let shape = check_step_inputs(step, &lprobs, &scores, self.vocab_size)?;
        let k = shape.candidates_per_row();
        add_history(&mut lprobs, &scores, step);

        let mut out = Selection::zeros(shape.batch, k);
        let mut tokens = Vec::with_capacity(shape.beam * k);
        let mut pooled = Vec::with_capacity(shape.beam * k);
        for b in 0..shape.batch {
            tokens.clear();
            pooled.clear();
            for slot in 0..shape.beam {
                let row = lprobs.slice(s![b, slot, ..]);
                for (rank, (token, score)) in top_k(row.iter().copied(), k).into_iter().enumerate()
                {
                    tokens.push(token);
                    pooled.push(masked_add(score, -self.sibling_penalty(rank)));
                }
            }
            for (j, (pos, score)) in top_k(pooled.iter().copied(), k).into_iter().enumerate() {
                out.set(b, j, score, tokens[pos], pos / k);
            }
        }

        log::trace!("diverse siblings step {step}: pooled {} children", shape.beam * k);
        Ok(out)
    }
}
