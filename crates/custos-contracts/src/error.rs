//! Error types for the CUSTOS audit chain.
//!
//! All fallible operations across the workspace return `CustosResult<T>`.
//! Variants carry enough context for an operator to act on the failure
//! without re-reading the chain.

use thiserror::Error;

use crate::verify::FailureReason;

/// The unified error type for the CUSTOS audit chain.
#[derive(Debug, Error)]
pub enum CustosError {
    /// A submission was malformed.  The caller fixes it and resubmits as a
    /// new event; nothing was written.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The chain head moved between the engine reading it and the store
    /// committing the append, and the retry budget ran out.
    #[error("concurrency conflict appending sequence {expected_sequence} after {attempts} attempt(s)")]
    ConcurrencyConflict { expected_sequence: u64, attempts: u32 },

    /// Something tried to rewrite or remove a persisted event.
    ///
    /// Always rejected.  Reported on the `custos::security` tracing target,
    /// never on the chain under attack.
    #[error("immutability violation{}: {reason}", sequence_suffix(.sequence_number))]
    ImmutabilityViolation {
        sequence_number: Option<u64>,
        reason: String,
    },

    /// The verifier found tampering, a gap, or a fork.
    #[error("integrity failure at sequence {sequence_number}: {reason}")]
    IntegrityFailure {
        sequence_number: u64,
        reason: FailureReason,
    },

    /// The store refused an insert that was not exactly `max + 1` or did not
    /// link to the current head.
    #[error("sequence rejected: expected {expected}, got {actual}")]
    SequenceRejected { expected: u64, actual: u64 },

    /// The storage backend failed (I/O, SQLite, poisoned lock).
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl CustosError {
    /// True for failures the chain engine may retry against a fresh head.
    pub fn is_transient(&self) -> bool {
        matches!(self, CustosError::ConcurrencyConflict { .. })
    }
}

fn sequence_suffix(sequence_number: &Option<u64>) -> String {
    sequence_number
        .map(|s| format!(" at sequence {s}"))
        .unwrap_or_default()
}

/// Convenience alias used throughout the CUSTOS crates.
pub type CustosResult<T> = Result<T, CustosError>;
