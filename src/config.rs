use serde::{Deserialize, Serialize};

use crate::dictionary::Dictionary;
use crate::error::SearchError;

/// Per-example length bounds: `min_len = a * src_len + b`, `max_len` likewise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LengthConstraints {
    pub min_len_a: f32,
    pub min_len_b: i64,
    pub max_len_a: f32,
    pub max_len_b: i64,
}

impl LengthConstraints {
    /// Output length must equal the source length.
    pub fn match_source() -> Self {
        Self {
            min_len_a: 1.0,
            min_len_b: 0,
            max_len_a: 1.0,
            max_len_b: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub beam_size: usize,
    pub sampling: bool,
    pub sampling_topk: Option<usize>,
    pub sampling_topp: Option<f32>,
    pub seed: Option<u64>,
    pub diverse_beam_groups: Option<usize>,
    pub diverse_beam_strength: f32,
    pub diversity_rate: Option<f32>,
    pub match_source_len: bool,
    pub length_constraints: Option<LengthConstraints>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            beam_size: 5,
            sampling: false,
            sampling_topk: None,
            sampling_topp: None,
            seed: None,
            diverse_beam_groups: None,
            diverse_beam_strength: 0.5,
            diversity_rate: None,
            match_source_len: false,
            length_constraints: None,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("SEARCH_");
        config
    }

    pub fn from_json(json: &str) -> Result<Self, SearchError> {
        serde_json::from_str(json).map_err(|e| SearchError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| std::env::var(format!("{prefix}{suffix}")).ok();

        if let Some(v) = parse_env("BEAM_SIZE").and_then(|s| s.parse().ok()) {
            self.beam_size = v;
        }
        if let Some(v) = parse_env("SAMPLING").and_then(|s| parse_flag(&s)) {
            self.sampling = v;
        }
        if let Some(v) = parse_env("SAMPLING_TOPK").and_then(|s| s.parse().ok()) {
            self.sampling_topk = Some(v);
        }
        if let Some(v) = parse_env("SAMPLING_TOPP").and_then(|s| s.parse().ok()) {
            self.sampling_topp = Some(v);
        }
        if let Some(v) = parse_env("SEED").and_then(|s| s.parse().ok()) {
            self.seed = Some(v);
        }
        if let Some(v) = parse_env("DIVERSE_BEAM_GROUPS").and_then(|s| s.parse().ok()) {
            self.diverse_beam_groups = Some(v);
        }
        if let Some(v) = parse_env("DIVERSE_BEAM_STRENGTH").and_then(|s| s.parse().ok()) {
            self.diverse_beam_strength = v;
        }
        if let Some(v) = parse_env("DIVERSITY_RATE").and_then(|s| s.parse().ok()) {
            self.diversity_rate = Some(v);
        }
        if let Some(v) = parse_env("MATCH_SOURCE_LEN").and_then(|s| parse_flag(&s)) {
            self.match_source_len = v;
        }
    }

    /// Rejects option combinations that no strategy can honour.
    pub fn validate(&self, dict: &Dictionary) -> Result<(), SearchError> {
        if self.beam_size == 0 {
            return Err(config_error("beam size must be at least 1"));
        }

        if let Some(k) = self.sampling_topk {
            if k == 0 {
                return Err(config_error("sampling top-k must be positive"));
            }
            if k > dict.vocab_size {
                return Err(config_error(format!(
                    "sampling top-k {k} exceeds vocabulary size {}",
                    dict.vocab_size
                )));
            }
        }
        if let Some(p) = self.sampling_topp {
            if p.is_nan() || p <= 0.0 || p > 1.0 {
                return Err(config_error(format!(
                    "sampling top-p must lie in (0, 1], got {p}"
                )));
            }
        }
        if self.sampling_topk.is_some() && self.sampling_topp.is_some() {
            return Err(config_error("top-k and top-p sampling are mutually exclusive"));
        }

        if self.sampling {
            if self.diverse_beam_groups.is_some() {
                return Err(config_error("sampling cannot be combined with diverse beam groups"));
            }
            if self.diversity_rate.is_some() {
                return Err(config_error("sampling cannot be combined with a diversity rate"));
            }
            if self.match_source_len || self.length_constraints.is_some() {
                return Err(config_error("sampling cannot be combined with length constraints"));
            }
        }

        if let Some(groups) = self.diverse_beam_groups {
            if groups == 0 {
                return Err(config_error("diverse beam search needs at least one group"));
            }
            if self.beam_size % groups != 0 {
                return Err(config_error(format!(
                    "beam size {} is not divisible by {groups} groups",
                    self.beam_size
                )));
            }
            if self.diversity_rate.is_some() {
                return Err(config_error(
                    "diverse beam groups and diverse siblings are mutually exclusive",
                ));
            }
        }
        if self.diverse_beam_strength.is_nan() || self.diverse_beam_strength < 0.0 {
            return Err(config_error("diverse beam strength must be non-negative"));
        }
        if let Some(rate) = self.diversity_rate {
            if rate.is_nan() || rate < 0.0 {
                return Err(config_error("diversity rate must be non-negative"));
            }
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> SearchError {
    SearchError::Config(msg.into())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
