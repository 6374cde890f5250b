//! Chain verification report types.
//!
//! The verifier never corrects anything.  It produces a
//! `VerificationReport` naming the first sequence number at which the chain
//! stops being trustworthy, and everything at or after that point is
//! considered unvalidated until an operator investigates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CustosError, CustosResult},
    event::{ChainHead, GENESIS_HASH},
};

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The stored hash does not match the hash recomputed from the stored
    /// fields.
    HashMismatch,
    /// `previous_hash` does not equal the preceding event's hash, or the head
    /// record disagrees with the last event.
    ChainBreak,
    /// A sequence number is missing.
    SequenceGap,
    /// A sequence number appears more than once.
    DuplicateSequence,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::HashMismatch => "hash mismatch",
            FailureReason::ChainBreak => "chain break",
            FailureReason::SequenceGap => "sequence gap",
            FailureReason::DuplicateSequence => "duplicate sequence",
        };
        f.write_str(s)
    }
}

/// Result of one verification pass over `[from_sequence, to_sequence]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// `true` when every event in range checked out.
    pub valid: bool,

    /// Events that passed every check before the pass finished or stopped.
    pub verified_count: u64,

    /// Sequence number of the first event that failed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure_sequence: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    /// Human-readable context for the failure (expected vs. found).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    pub from_sequence: u64,

    /// Last sequence number in range; `None` for an empty chain.
    pub to_sequence: Option<u64>,

    /// The chain head observed when the pass started.
    pub head: ChainHead,

    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Convert a failed report into `CustosError::IntegrityFailure`.
    pub fn into_result(self) -> CustosResult<Self> {
        match (self.valid, self.first_failure_sequence, self.failure_reason) {
            (false, Some(sequence_number), Some(reason)) => Err(CustosError::IntegrityFailure {
                sequence_number,
                reason,
            }),
            _ => Ok(self),
        }
    }
}

/// Resume point of a chunked verification pass.
///
/// Persist this between chunks to continue a long pass later without
/// re-reading what was already checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyProgress {
    /// The sequence number the next chunk starts at.
    pub next_sequence: u64,

    /// The hash the next event's `previous_hash` must equal.
    pub expected_previous_hash: String,

    /// Events verified so far in this pass.
    pub verified_count: u64,
}

impl VerifyProgress {
    /// A pass that starts at the beginning of the chain.
    pub fn from_genesis() -> Self {
        Self {
            next_sequence: 0,
            expected_previous_hash: GENESIS_HASH.to_string(),
            verified_count: 0,
        }
    }
}
