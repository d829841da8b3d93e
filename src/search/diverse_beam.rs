use ndarray::{s, Array2, ArrayView3, ArrayViewMut3};

use crate::dictionary::Dictionary;
use crate::error::SearchError;

use super::beam::BeamSearch;
use super::selection::{check_step_inputs, masked_add, Selection};
use super::Search;

/// Diverse beam search with a Hamming diversity penalty.
///
/// The beam is split into interleaved groups (slots `g, g + G, g + 2G, ...`).
/// Groups are searched in order and every token picked by an earlier group
/// at this step costs `strength` per pick in the groups that follow.
///
/// See "Diverse Beam Search: Decoding Diverse Solutions from Neural Sequence
/// Models" (Vijayakumar et al., 2016).
#[derive(Debug, Clone)]
pub struct DiverseBeamSearch {
    num_groups: usize,
    strength: f32,
    vocab_size: usize,
    beam: BeamSearch,
}

impl DiverseBeamSearch {
    pub fn new(dict: &Dictionary, num_groups: usize, strength: f32) -> Result<Self, SearchError> {
        if num_groups == 0 {
            return Err(SearchError::Config(
                "diverse beam search needs at least one group".into(),
            ));
        }
        log::debug!("Diverse beam search: groups={num_groups} strength={strength}");
        Ok(Self {
            num_groups,
            strength,
            vocab_size: dict.vocab_size,
            beam: BeamSearch::new(dict),
        })
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }
}

impl Search for DiverseBeamSearch {
    fn name(&self) -> &'static str {
        "diverse_beam"
    }

    fn step(
        &mut self,
        step: usize,
        mut lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        let shape = check_step_inputs(step, &lprobs, &scores, self.vocab_size)?;
        let groups = self.num_groups;
        if shape.beam % groups != 0 {
            return Err(SearchError::Config(format!(
                "beam size {} is not divisible by {groups} groups",
                shape.beam
            )));
        }

        // Number of times each token was picked by an earlier group this step.
        let mut diversity = Array2::<f32>::zeros((shape.batch, shape.vocab));
        let mut picked = Vec::with_capacity(groups);

        for g in 0..groups {
            let mut group_lprobs = lprobs.slice_mut(s![.., g..;groups, ..]);
            let group_scores = if step > 0 {
                scores.slice(s![.., g..;groups, ..])
            } else {
                scores.view()
            };

            if g > 0 {
                for ((b, _, v), lp) in group_lprobs.indexed_iter_mut() {
                    let penalty = diversity[[b, v]];
                    if penalty > 0.0 {
                        *lp = masked_add(*lp, -self.strength * penalty);
                    }
                }
            }

            let mut sel = self.beam.select(step, group_lprobs, group_scores)?;
            sel.beams.mapv_inplace(|beam| beam * groups + g);
            for ((b, _), &token) in sel.indices.indexed_iter() {
                diversity[[b, token]] += 1.0;
            }
            picked.push(sel);
        }

        log::trace!("diverse beam step {step}: merged {groups} groups");
        Selection::interleave(&picked)
    }
}
