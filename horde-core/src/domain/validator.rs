//! Validator domain model

use serde::{Deserialize, Serialize};

/// A known counterparty that submits jobs and owns accepted job records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: i64,

    /// Hotkey of the validator, unique across all validators
    pub public_key: String,

    pub active: bool,

    pub debug: bool,
}

impl std::fmt::Display for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hotkey: {}", self.public_key)
    }
}
