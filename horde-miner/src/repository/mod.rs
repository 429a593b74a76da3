//! Repository Module
//!
//! Data access layer for the miner.
//! Each repository handles storage operations for a specific domain entity.
//!
//! Repositories are trait-based so the tracker can run against PostgreSQL in
//! deployment and against memory in tests.

pub mod job;
#[cfg(test)]
pub mod memory;
pub mod validator;

pub use job::{JobRepository, PgJobRepository};
pub use validator::{PgValidatorRepository, ValidatorRepository};

use thiserror::Error;

/// Storage failures
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    Decode(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
