use ndarray::{s, Array1, ArrayView1, ArrayView3, ArrayViewMut3};

use crate::config::LengthConstraints;
use crate::dictionary::Dictionary;
use crate::error::SearchError;

use super::beam::BeamSearch;
use super::selection::{check_step_inputs, Selection, MASKED};
use super::Search;

/// Beam search that forbids EOS before each example's minimum length and
/// forces it at the maximum length.
#[derive(Debug, Clone)]
pub struct LengthConstrainedBeamSearch {
    constraints: LengthConstraints,
    eos: usize,
    vocab_size: usize,
    src_lengths: Option<Array1<usize>>,
    beam: BeamSearch,
}

impl LengthConstrainedBeamSearch {
    pub fn new(dict: &Dictionary, constraints: LengthConstraints) -> Self {
        log::debug!("Length-constrained beam search with {:?}", constraints);
        Self {
            constraints,
            eos: dict.eos,
            vocab_size: dict.vocab_size,
            src_lengths: None,
            beam: BeamSearch::new(dict),
        }
    }

    pub fn constraints(&self) -> &LengthConstraints {
        &self.constraints
    }

    /// `(min_len, max_len)` for a source of `src_len` tokens.
    pub fn bounds(&self, src_len: usize) -> (f64, f64) {
        let c = &self.constraints;
        let src = src_len as f64;
        (
            f64::from(c.min_len_a) * src + c.min_len_b as f64,
            f64::from(c.max_len_a) * src + c.max_len_b as f64,
        )
    }

    fn mask_eos(&self, step: usize, lprobs: &mut ArrayViewMut3<f32>) -> Result<(), SearchError> {
        let src_lengths = self
            .src_lengths
            .as_ref()
            .ok_or(SearchError::SourceLengthsUnset)?;
        let batch = lprobs.dim().0;
        if src_lengths.len() != batch {
            return Err(SearchError::Shape(format!(
                "{} source lengths for a batch of {batch}",
                src_lengths.len()
            )));
        }

        let t = step as f64;
        for (b, &src_len) in src_lengths.iter().enumerate() {
            let (min_len, max_len) = self.bounds(src_len);
            let mut eos = lprobs.slice_mut(s![b, .., self.eos]);
            if t < min_len {
                eos.fill(MASKED);
            }
            if t == max_len {
                eos.fill(0.0);
            }
            if t > max_len {
                eos.fill(MASKED);
            }
        }
        Ok(())
    }
}

impl Search for LengthConstrainedBeamSearch {
    fn name(&self) -> &'static str {
        "length_constrained_beam"
    }

    fn set_src_lengths(&mut self, src_lengths: ArrayView1<usize>) {
        self.src_lengths = Some(src_lengths.to_owned());
    }

    fn step(
        &mut self,
        step: usize,
        mut lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        check_step_inputs(step, &lprobs, &scores, self.vocab_size)?;
        self.mask_eos(step, &mut lprobs)?;
        self.beam.select(step, lprobs, scores)
    }
}
