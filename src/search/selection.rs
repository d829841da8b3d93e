use ndarray::{Array2, ArrayView3, ArrayViewMut3, Axis};

use crate::error::SearchError;

/// Log-probability of a candidate that must never be selected.
pub const MASKED: f32 = f32::NEG_INFINITY;

/// Adds two log-domain scores; anything involving [`MASKED`] stays masked.
pub(crate) fn masked_add(a: f32, b: f32) -> f32 {
    if a == MASKED || b == MASKED {
        MASKED
    } else {
        a + b
    }
}

fn rank_key(x: f32) -> f32 {
    if x.is_nan() {
        MASKED
    } else {
        x
    }
}

/// The `k` largest values with their positions, best first.
/// Equal values keep ascending position order.
pub(crate) fn top_k<I>(values: I, k: usize) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = f32>,
{
    let mut candidates: Vec<(usize, f32)> = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i, rank_key(v)))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(k);
    candidates
}

/// Scores, token ids and originating beam slots chosen by one search step,
/// each shaped `(batch, output_beam_width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub scores: Array2<f32>,
    pub indices: Array2<usize>,
    pub beams: Array2<usize>,
}

impl Selection {
    pub fn zeros(batch: usize, width: usize) -> Self {
        Self {
            scores: Array2::zeros((batch, width)),
            indices: Array2::zeros((batch, width)),
            beams: Array2::zeros((batch, width)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.scores.nrows()
    }

    pub fn width(&self) -> usize {
        self.scores.ncols()
    }

    pub(crate) fn set(&mut self, b: usize, j: usize, score: f32, index: usize, beam: usize) {
        self.scores[[b, j]] = score;
        self.indices[[b, j]] = index;
        self.beams[[b, j]] = beam;
    }

    /// Merges per-group selections so that output slot `j * groups + g`
    /// holds the `j`-th pick of group `g`.
    pub fn interleave(groups: &[Selection]) -> Result<Self, SearchError> {
        let first = groups
            .first()
            .ok_or_else(|| SearchError::Shape("no groups to interleave".into()))?;
        let (batch, width) = (first.batch_size(), first.width());
        if let Some(bad) = groups
            .iter()
            .find(|s| s.batch_size() != batch || s.width() != width)
        {
            return Err(SearchError::Shape(format!(
                "group selection is {}x{}, expected {batch}x{width}",
                bad.batch_size(),
                bad.width()
            )));
        }

        let n = groups.len();
        let mut out = Self::zeros(batch, width * n);
        for (g, sel) in groups.iter().enumerate() {
            for b in 0..batch {
                for j in 0..width {
                    out.set(
                        b,
                        j * n + g,
                        sel.scores[[b, j]],
                        sel.indices[[b, j]],
                        sel.beams[[b, j]],
                    );
                }
            }
        }
        Ok(out)
    }
}

/// Dimensions of the tensors handed to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepShape {
    pub batch: usize,
    pub beam: usize,
    pub vocab: usize,
}

impl StepShape {
    /// `min(2 * beam, vocab - 1)`: room for finished hypotheses while
    /// always leaving at least one token unselected.
    pub fn candidates_per_row(&self) -> usize {
        (2 * self.beam).min(self.vocab - 1)
    }
}

pub(crate) fn check_step_inputs(
    step: usize,
    lprobs: &ArrayViewMut3<f32>,
    scores: &ArrayView3<f32>,
    vocab_size: usize,
) -> Result<StepShape, SearchError> {
    let (batch, beam, vocab) = lprobs.dim();
    if batch == 0 || beam == 0 {
        return Err(SearchError::Shape(format!(
            "log-probabilities must have a non-empty batch and beam, got {batch}x{beam}x{vocab}"
        )));
    }
    if vocab != vocab_size {
        return Err(SearchError::Shape(format!(
            "log-probabilities cover {vocab} tokens, dictionary has {vocab_size}"
        )));
    }
    if vocab < 2 {
        return Err(SearchError::Shape(format!(
            "vocabulary of {vocab} leaves nothing to rank"
        )));
    }
    if step > 0 {
        let (s_batch, s_beam, s_steps) = scores.dim();
        if s_batch != batch || s_beam != beam {
            return Err(SearchError::Shape(format!(
                "score history is {s_batch}x{s_beam}, log-probabilities are {batch}x{beam}"
            )));
        }
        if s_steps < step {
            return Err(SearchError::Shape(format!(
                "score history holds {s_steps} steps, step {step} needs {step}"
            )));
        }
    }
    Ok(StepShape { batch, beam, vocab })
}

/// Adds each hypothesis' score at `step - 1` to its log-probability row.
pub(crate) fn add_history(lprobs: &mut ArrayViewMut3<f32>, scores: &ArrayView3<f32>, step: usize) {
    let last = scores.index_axis(Axis(2), step - 1);
    for ((b, k), &prev) in last.indexed_iter() {
        lprobs
            .slice_mut(ndarray::s![b, k, ..])
            .mapv_inplace(|lp| masked_add(lp, prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn top_k_orders_descending() {
        let picked = top_k([0.1, 0.7, -1.0, 0.4], 3);
        assert_eq!(picked, vec![(1, 0.7), (3, 0.4), (0, 0.1)]);
    }

    #[test]
    fn top_k_ties_keep_position_order() {
        let picked = top_k([0.5, 0.5, 0.5], 2);
        assert_eq!(picked, vec![(0, 0.5), (1, 0.5)]);
    }

    #[test]
    fn top_k_ranks_nan_as_masked() {
        let picked = top_k([f32::NAN, -3.0], 2);
        assert_eq!(picked[0], (1, -3.0));
        assert_eq!(picked[1].1, MASKED);
    }

    #[test]
    fn top_k_larger_than_input() {
        assert_eq!(top_k([1.0], 4).len(), 1);
    }

    #[test]
    fn masked_add_saturates() {
        assert_eq!(masked_add(MASKED, f32::INFINITY), MASKED);
        assert_eq!(masked_add(-1.0, MASKED), MASKED);
        assert!((masked_add(-1.0, -0.5) + 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn interleave_orders_by_group() {
        let mut a = Selection::zeros(1, 2);
        a.set(0, 0, -1.0, 10, 0);
        a.set(0, 1, -2.0, 11, 2);
        let mut b = Selection::zeros(1, 2);
        b.set(0, 0, -1.5, 20, 1);
        b.set(0, 1, -2.5, 21, 3);

        let out = Selection::interleave(&[a, b]).unwrap();
        assert_eq!(out.indices.row(0).to_vec(), vec![10, 20, 11, 21]);
        assert_eq!(out.beams.row(0).to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn interleave_rejects_mismatched_groups() {
        let a = Selection::zeros(1, 2);
        let b = Selection::zeros(1, 3);
        assert!(Selection::interleave(&[a, b]).is_err());
        assert!(Selection::interleave(&[]).is_err());
    }

    #[test]
    fn shape_check_rejects_short_history() {
        let mut lprobs = Array3::<f32>::zeros((1, 2, 5));
        let scores = Array3::<f32>::zeros((1, 2, 1));
        let err = check_step_inputs(2, &lprobs.view_mut(), &scores.view(), 5);
        assert!(matches!(err, Err(SearchError::Shape(_))));
    }

    #[test]
    fn shape_check_rejects_wrong_vocab() {
        let mut lprobs = Array3::<f32>::zeros((1, 2, 5));
        let scores = Array3::<f32>::zeros((1, 2, 0));
        assert!(check_step_inputs(0, &lprobs.view_mut(), &scores.view(), 6).is_err());
    }

    #[test]
    fn candidates_leave_one_token_out() {
        let shape = StepShape {
            batch: 1,
            beam: 4,
            vocab: 5,
        };
        assert_eq!(shape.candidates_per_row(), 4);
    }
}
