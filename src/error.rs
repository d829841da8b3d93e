use thiserror::Error;

/// Error type returned by injected scorers and trainers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while selecting candidates for the next decoding step.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search configuration: {0}")]
    Config(String),

    #[error("Source lengths must be set before the first step")]
    SourceLengthsUnset,

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("ndarray shape error: {0}")]
    Ndarray(#[from] ndarray::ShapeError),

    #[error("Nothing to sample from: {0}")]
    DegenerateDistribution(String),

    #[error("Rescoring: {0}")]
    Rescore(#[from] RescoreError),
}

impl SearchError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(_) => "The search options are inconsistent. Fix them before decoding.",
            Self::SourceLengthsUnset => {
                "Source lengths were not provided to a length-constrained search."
            }
            Self::Shape(_) | Self::Ndarray(_) => {
                "The model scores do not match the expected batch, beam or vocabulary size."
            }
            Self::DegenerateDistribution(_) => {
                "Every candidate token had zero probability, so nothing could be sampled."
            }
            Self::Rescore(e) => e.user_message(),
        }
    }

    /// Only failures of injected collaborators may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rescore(RescoreError::Scorer { .. } | RescoreError::Trainer(_))
        )
    }
}

/// Errors raised by the optional candidate rescoring hook.
#[derive(Error, Debug)]
pub enum RescoreError {
    #[error("Scorer {name} failed: {source}")]
    Scorer {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Rescoring needs source and generated tokens for this step")]
    MissingContext,

    #[error("Scorer {scorer} returned {actual} rows, expected {expected}")]
    ScoreCount {
        scorer: String,
        expected: usize,
        actual: usize,
    },

    #[error("Scorer {scorer} returned {classes} classes, class {class} requested")]
    ClassIndex {
        scorer: String,
        class: usize,
        classes: usize,
    },

    #[error("Expected {expected} coefficients, got {actual}")]
    CoefficientCount { expected: usize, actual: usize },

    #[error("Coefficient training failed: {0}")]
    Trainer(String),
}

impl RescoreError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Scorer { .. } | Self::ScoreCount { .. } | Self::ClassIndex { .. } => {
                "An auxiliary scorer failed while rescoring candidates."
            }
            Self::MissingContext => {
                "Rescoring was enabled but the decoder did not pass the token context."
            }
            Self::CoefficientCount { .. } | Self::Trainer(_) => {
                "The rescoring coefficients could not be updated."
            }
        }
    }
}
