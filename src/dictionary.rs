use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub const DEFAULT_EOS: usize = 2;

/// Target vocabulary as seen by the search: its size and end-of-sentence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    pub vocab_size: usize,
    pub eos: usize,
}

impl Dictionary {
    /// Vocabulary using the usual `bos=0, pad=1, eos=2, unk=3` layout.
    pub fn new(vocab_size: usize) -> Result<Self, SearchError> {
        Self::with_eos(vocab_size, DEFAULT_EOS)
    }

    pub fn with_eos(vocab_size: usize, eos: usize) -> Result<Self, SearchError> {
        if vocab_size < 2 {
            return Err(SearchError::Config(format!(
                "vocabulary needs at least 2 entries, got {vocab_size}"
            )));
        }
        if eos >= vocab_size {
            return Err(SearchError::Config(format!(
                "eos id {eos} is outside a vocabulary of {vocab_size}"
            )));
        }
        Ok(Self { vocab_size, eos })
    }

    pub fn len(&self) -> usize {
        self.vocab_size
    }

    pub fn is_empty(&self) -> bool {
        self.vocab_size == 0
    }
}
