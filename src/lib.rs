pub mod config;
pub mod dictionary;
mod error;
pub mod rescore;
pub mod search;

pub use config::{LengthConstraints, SearchConfig};
pub use dictionary::Dictionary;
pub use error::{BoxError, RescoreError, SearchError};
pub use rescore::{CandidateScorer, GoldContinuation, RescoreContext, Rescorer};
pub use search::{
    BeamSearch, DiverseBeamSearch, DiverseSiblingsSearch, LengthConstrainedBeamSearch, Sampling,
    Search, SearchStrategy, Selection, StrategyKind, Truncation, MASKED,
};
