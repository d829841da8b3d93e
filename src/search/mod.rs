//! Candidate selection for one step of beam-style decoding.
//!
//! Every strategy takes the model's log-probabilities `(batch, beam, vocab)`
//! and the score history `(batch, beam, step)` and returns a [`Selection`]:
//! the cumulative scores, token ids and originating beam slots of the
//! candidates that survive to the next step. The log-probabilities may be
//! modified in place.

mod beam;
mod diverse_beam;
mod length;
mod sampling;
pub(crate) mod selection;
mod siblings;

use ndarray::{ArrayView1, ArrayView3, ArrayViewMut3};

use crate::config::{LengthConstraints, SearchConfig};
use crate::dictionary::Dictionary;
use crate::error::SearchError;
use crate::rescore::RescoreContext;

pub use beam::BeamSearch;
pub use diverse_beam::DiverseBeamSearch;
pub use length::LengthConstrainedBeamSearch;
pub use sampling::{Sampling, Truncation};
pub use selection::{Selection, MASKED};
pub use siblings::DiverseSiblingsSearch;

pub trait Search {
    fn name(&self) -> &'static str;

    fn step(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError>;

    /// Like [`Search::step`], with the token context an installed rescorer needs.
    fn step_with_context(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
        _ctx: &RescoreContext<'_>,
    ) -> Result<Selection, SearchError> {
        self.step(step, lprobs, scores)
    }

    /// Source lengths of the current batch; only length constraints use them.
    fn set_src_lengths(&mut self, _src_lengths: ArrayView1<usize>) {}
}

/// The five strategies behind one type, picked from a [`SearchConfig`].
pub enum StrategyKind {
    Beam(BeamSearch),
    LengthConstrained(LengthConstrainedBeamSearch),
    DiverseBeam(DiverseBeamSearch),
    Sampling(Sampling),
    DiverseSiblings(DiverseSiblingsSearch),
}

/// Strategy built from a config; rejects steps whose beam dimension differs
/// from the configured beam size.
pub struct SearchStrategy {
    kind: StrategyKind,
    beam_size: usize,
}

impl SearchStrategy {
    pub fn from_config(config: &SearchConfig, dict: &Dictionary) -> Result<Self, SearchError> {
        config.validate(dict)?;

        let kind = if config.sampling {
            StrategyKind::Sampling(Sampling::new(
                dict,
                config.sampling_topk,
                config.sampling_topp,
                config.seed,
            )?)
        } else if let Some(groups) = config.diverse_beam_groups {
            StrategyKind::DiverseBeam(DiverseBeamSearch::new(
                dict,
                groups,
                config.diverse_beam_strength,
            )?)
        } else if config.match_source_len {
            StrategyKind::LengthConstrained(LengthConstrainedBeamSearch::new(
                dict,
                LengthConstraints::match_source(),
            ))
        } else if let Some(constraints) = config.length_constraints {
            StrategyKind::LengthConstrained(LengthConstrainedBeamSearch::new(dict, constraints))
        } else if let Some(rate) = config.diversity_rate {
            StrategyKind::DiverseSiblings(DiverseSiblingsSearch::new(dict, rate))
        } else {
            StrategyKind::Beam(BeamSearch::new(dict))
        };

        let strategy = Self {
            kind,
            beam_size: config.beam_size,
        };
        log::debug!(
            "Selected {} search (beam={}, vocab={})",
            strategy.name(),
            config.beam_size,
            dict.vocab_size
        );
        Ok(strategy)
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    fn inner(&mut self) -> &mut dyn Search {
        match &mut self.kind {
            StrategyKind::Beam(s) => s,
            StrategyKind::LengthConstrained(s) => s,
            StrategyKind::DiverseBeam(s) => s,
            StrategyKind::Sampling(s) => s,
            StrategyKind::DiverseSiblings(s) => s,
        }
    }

    fn check_beam(&self, lprobs: &ArrayViewMut3<f32>) -> Result<(), SearchError> {
        let beam = lprobs.dim().1;
        if beam != self.beam_size {
            return Err(SearchError::Shape(format!(
                "beam dimension is {beam}, configured beam size is {}",
                self.beam_size
            )));
        }
        Ok(())
    }
}

impl Search for SearchStrategy {
    fn name(&self) -> &'static str {
        match &self.kind {
            StrategyKind::Beam(s) => s.name(),
            StrategyKind::LengthConstrained(s) => s.name(),
            StrategyKind::DiverseBeam(s) => s.name(),
            StrategyKind::Sampling(s) => s.name(),
            StrategyKind::DiverseSiblings(s) => s.name(),
        }
    }

    fn step(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
    ) -> Result<Selection, SearchError> {
        self.check_beam(&lprobs)?;
        self.inner().step(step, lprobs, scores)
    }

    fn step_with_context(
        &mut self,
        step: usize,
        lprobs: ArrayViewMut3<f32>,
        scores: ArrayView3<f32>,
        ctx: &RescoreContext<'_>,
    ) -> Result<Selection, SearchError> {
        self.check_beam(&lprobs)?;
        self.inner().step_with_context(step, lprobs, scores, ctx)
    }

    fn set_src_lengths(&mut self, src_lengths: ArrayView1<usize>) {
        self.inner().set_src_lengths(src_lengths);
    }
}
