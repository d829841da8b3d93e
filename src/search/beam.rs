use ndarray::{s, ArrayView3, ArrayViewMut3};

use crate::dictionary::Dictionary;
use crate::error::SearchError;

use super::selection::{add_history, check_step_inputs, top_k, Selection};
use super::Search;

/// Plain beam search: the best `min(2K, V-1)` (beam, token) pairs over the
/// flattened beam x vocabulary scores.
#[derive(Debug, Clone)]
pub struct BeamSearch {
    vocab_size: usize,
}

impl BeamSearch {
    pub fn new(dict: &Dictionary) -> Self {
        Self {
            vocab_size: dict.vocab_size,
        }
    }

    pub(crate) fn select(
        &self,
        step: usize,
        mut lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        let shape = check_step_inputs(step, &lprobs, &scores, self.vocab_size)?;
        let k = shape.candidates_per_row();

        // At the first step every hypothesis is the same, so only slot 0 counts.
        let rows = if step == 0 {
            1
        } else {
            add_history(&mut lprobs, &scores, step);
            shape.beam
        };

        let mut out = Selection::zeros(shape.batch, k);
        for b in 0..shape.batch {
            let flat = lprobs.slice(s![b, ..rows, ..]);
            for (j, (pos, score)) in top_k(flat.iter().copied(), k).into_iter().enumerate() {
                out.set(b, j, score, pos % shape.vocab, pos / shape.vocab);
            }
        }

        log::trace!(
            "beam step {step}: batch={} beam={} picked {k} per row",
            shape.batch,
            shape.beam
        );
        Ok(out)
    }
}

impl Search for BeamSearch {
    fn name(&self) -> &'static str {
        "beam"
    }

    fn step(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        self.select(step, lprobs, scores)
    }
}
