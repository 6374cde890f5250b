//! Hash-chain verifier for the CUSTOS audit trail.
//!
//! `ChainVerifier` reads a range of events in ascending order, one chunk at a
//! time, and checks every event in four steps:
//!
//! 1. **Contiguity**: the sequence number is exactly the one expected.  A
//!    lower number is a `DuplicateSequence`, a higher one a `SequenceGap`.
//! 2. **Content**: the hash recomputed from the stored fields equals the
//!    stored hash (`HashMismatch`).
//! 3. **Linkage**: `previous_hash` equals the preceding event's stored hash
//!    (`ChainBreak`).
//! 4. **Head**: when the range ends at the chain head, the head record names
//!    the last event (`ChainBreak` at the head sequence otherwise) and no
//!    event is stored past it (`ChainBreak` at `head + 1`, a rewound head).
//!
//! The pass stops at the first failure.  No lock is held between chunks, so
//! appends proceed while a long pass runs.  The verifier never repairs
//! anything; it reports and logs.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use custos_contracts::{
    config::VerifyConfig,
    error::{CustosError, CustosResult},
    event::{ChainHead, Checkpoint, GENESIS_HASH},
    verify::{FailureReason, VerificationReport, VerifyProgress},
};
use custos_core::{hash_event, hash_matches, traits::EventStore};

/// The first problem found by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFailure {
    pub sequence_number: u64,
    pub reason: FailureReason,
    pub detail: String,
}

/// What a single call to [`ChainVerifier::verify_chunk`] concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    /// The chunk checked out and more of the range remains.
    Continue { progress: VerifyProgress },
    /// The chunk checked out and the range is exhausted.
    Complete { progress: VerifyProgress },
    /// Verification stopped.  `verified_count` includes the events of this
    /// chunk that passed before the failure.
    Failed {
        failure: ChainFailure,
        verified_count: u64,
    },
}

/// Verifies the hash chain held by an `EventStore`.
pub struct ChainVerifier {
    store: Arc<dyn EventStore>,
    chunk_size: usize,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn EventStore>, config: &VerifyConfig) -> Self {
        Self {
            store,
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Verify `[from, to]`, defaulting to the whole chain.
    ///
    /// For `from > 0` the first event is linked against the stored hash of
    /// event `from - 1`, which is trusted rather than re-verified.
    ///
    /// # Errors
    ///
    /// - `Validation` if `from > to` or `to` lies beyond the chain head
    /// - `Storage` if events cannot be read
    ///
    /// Tampering is not an error: it is a report with `valid == false`.
    pub fn verify(&self, from: Option<u64>, to: Option<u64>) -> CustosResult<VerificationReport> {
        let head = self.store.head()?;
        let from = from.unwrap_or(0);

        let Some(head_sequence) = head.sequence_number else {
            return self.verify_empty(head, from, to);
        };

        let to = to.unwrap_or(head_sequence);
        check_range(from, to, head_sequence)?;

        let anchor = if from == 0 {
            GENESIS_HASH.to_string()
        } else {
            match self.store.get_by_sequence(from - 1)? {
                Some(event) => event.hash().to_string(),
                None => {
                    let failure = ChainFailure {
                        sequence_number: from - 1,
                        reason: FailureReason::SequenceGap,
                        detail: format!("anchor event {} is missing", from - 1),
                    };
                    return Ok(failed_report(head, from, Some(to), 0, failure));
                }
            }
        };

        let progress = VerifyProgress {
            next_sequence: from,
            expected_previous_hash: anchor,
            verified_count: 0,
        };
        self.run(head, from, to, progress)
    }

    /// Verify the suffix after `checkpoint`, up to `to` (default: head).
    ///
    /// Works when every event at or before the checkpoint has been moved
    /// out of the store.  If the checkpointed event is still present, it must
    /// still carry the recorded hash.
    pub fn verify_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        to: Option<u64>,
    ) -> CustosResult<VerificationReport> {
        let head = self.store.head()?;
        let from = checkpoint.sequence_number.saturating_add(1);

        let head_sequence = match head.sequence_number {
            Some(s) if s >= checkpoint.sequence_number => s,
            _ => {
                return Err(CustosError::Validation {
                    reason: format!(
                        "checkpoint at sequence {} is beyond the chain head",
                        checkpoint.sequence_number
                    ),
                })
            }
        };

        if let Some(anchored) = self.store.get_by_sequence(checkpoint.sequence_number)? {
            if anchored.hash() != checkpoint.hash {
                let failure = ChainFailure {
                    sequence_number: checkpoint.sequence_number,
                    reason: FailureReason::ChainBreak,
                    detail: format!(
                        "stored hash {} differs from checkpoint hash {}",
                        anchored.hash(),
                        checkpoint.hash
                    ),
                };
                return Ok(failed_report(head, from, to, 0, failure));
            }
        }

        if from > head_sequence {
            // The checkpoint is the head; the suffix is empty.
            if head.hash != checkpoint.hash {
                let failure = ChainFailure {
                    sequence_number: head_sequence,
                    reason: FailureReason::ChainBreak,
                    detail: "head record disagrees with checkpoint".to_string(),
                };
                return Ok(failed_report(head, from, Some(head_sequence), 0, failure));
            }
            if let Some(failure) = self.event_beyond_head(head_sequence)? {
                return Ok(failed_report(head, from, Some(head_sequence), 0, failure));
            }
            return Ok(valid_report(head, from, Some(head_sequence), 0));
        }

        let to = to.unwrap_or(head_sequence);
        check_range(from, to, head_sequence)?;

        let progress = VerifyProgress {
            next_sequence: from,
            expected_previous_hash: checkpoint.hash.clone(),
            verified_count: 0,
        };
        self.run(head, from, to, progress)
    }

    /// Verify the next chunk of a pass that ends at `to`.
    ///
    /// Callers that persist the returned progress can stop and resume a pass
    /// across process restarts.
    pub fn verify_chunk(&self, progress: &VerifyProgress, to: u64) -> CustosResult<ChunkOutcome> {
        let start = progress.next_sequence;
        if start > to {
            return Ok(ChunkOutcome::Complete {
                progress: progress.clone(),
            });
        }

        let span = u64::try_from(self.chunk_size - 1).unwrap_or(u64::MAX);
        let end = start.saturating_add(span).min(to);
        let events = self.store.get_by_sequence_range(start, end)?;

        let mut expected_sequence = start;
        let mut expected_previous = progress.expected_previous_hash.clone();
        let mut verified = progress.verified_count;

        for event in &events {
            let sequence_number = event.sequence_number();

            let failure = if sequence_number < expected_sequence {
                Some(ChainFailure {
                    sequence_number,
                    reason: FailureReason::DuplicateSequence,
                    detail: format!(
                        "sequence {sequence_number} appears again where {expected_sequence} was expected"
                    ),
                })
            } else if sequence_number > expected_sequence {
                Some(ChainFailure {
                    sequence_number: expected_sequence,
                    reason: FailureReason::SequenceGap,
                    detail: format!(
                        "expected sequence {expected_sequence}, found {sequence_number}"
                    ),
                })
            } else if !hash_matches(event) {
                Some(ChainFailure {
                    sequence_number,
                    reason: FailureReason::HashMismatch,
                    detail: format!(
                        "stored hash {} but content hashes to {}",
                        event.hash(),
                        hash_event(event.body())
                    ),
                })
            } else if event.previous_hash() != expected_previous {
                Some(ChainFailure {
                    sequence_number,
                    reason: FailureReason::ChainBreak,
                    detail: format!(
                        "previous_hash {} does not match preceding hash {}",
                        event.previous_hash(),
                        expected_previous
                    ),
                })
            } else {
                None
            };

            if let Some(failure) = failure {
                return Ok(ChunkOutcome::Failed {
                    failure,
                    verified_count: verified,
                });
            }

            expected_previous = event.hash().to_string();
            expected_sequence += 1;
            verified += 1;
        }

        // Fewer rows than the range holds.
        if expected_sequence <= end {
            return Ok(ChunkOutcome::Failed {
                failure: ChainFailure {
                    sequence_number: expected_sequence,
                    reason: FailureReason::SequenceGap,
                    detail: format!("event {expected_sequence} is missing"),
                },
                verified_count: verified,
            });
        }

        debug!(start, end, verified, "verified chunk");

        let next = VerifyProgress {
            next_sequence: end + 1,
            expected_previous_hash: expected_previous,
            verified_count: verified,
        };
        if end >= to {
            Ok(ChunkOutcome::Complete { progress: next })
        } else {
            Ok(ChunkOutcome::Continue { progress: next })
        }
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Drive `verify_chunk` over `[from, to]` and compare the result with the
    /// head observed at the start of the pass.
    fn run(
        &self,
        head: ChainHead,
        from: u64,
        to: u64,
        mut progress: VerifyProgress,
    ) -> CustosResult<VerificationReport> {
        loop {
            match self.verify_chunk(&progress, to)? {
                ChunkOutcome::Continue { progress: next } => progress = next,
                ChunkOutcome::Complete { progress: done } => {
                    progress = done;
                    break;
                }
                ChunkOutcome::Failed {
                    failure,
                    verified_count,
                } => return Ok(failed_report(head, from, Some(to), verified_count, failure)),
            }
        }

        if head.sequence_number == Some(to) {
            let failure = if head.hash != progress.expected_previous_hash {
                Some(ChainFailure {
                    sequence_number: to,
                    reason: FailureReason::ChainBreak,
                    detail: format!(
                        "head record hash {} does not match last event hash {}",
                        head.hash, progress.expected_previous_hash
                    ),
                })
            } else {
                self.event_beyond_head(to)?
            };
            if let Some(failure) = failure {
                return Ok(failed_report(
                    head,
                    from,
                    Some(to),
                    progress.verified_count,
                    failure,
                ));
            }
        }

        info!(
            from,
            to,
            verified = progress.verified_count,
            "chain verification passed"
        );
        Ok(valid_report(head, from, Some(to), progress.verified_count))
    }

    /// An event stored past `head_sequence` means the head record was
    /// rewound.  An append committed during the pass moves the head together
    /// with its row, so the head is re-read before reporting.
    fn event_beyond_head(&self, head_sequence: u64) -> CustosResult<Option<ChainFailure>> {
        let Some(next) = head_sequence.checked_add(1) else {
            return Ok(None);
        };
        if self.store.get_by_sequence(next)?.is_none() {
            return Ok(None);
        }
        match self.store.head()?.sequence_number {
            Some(current) if current >= next => Ok(None),
            _ => Ok(Some(ChainFailure {
                sequence_number: next,
                reason: FailureReason::ChainBreak,
                detail: format!("event {next} is stored past the head record at {head_sequence}"),
            })),
        }
    }

    /// A chain whose head record is still genesis.
    fn verify_empty(
        &self,
        head: ChainHead,
        from: u64,
        to: Option<u64>,
    ) -> CustosResult<VerificationReport> {
        if from > 0 || to.is_some() {
            return Err(CustosError::Validation {
                reason: "the chain is empty; no sequence range can be verified".to_string(),
            });
        }
        if head.hash != GENESIS_HASH || self.store.get_by_sequence(0)?.is_some() {
            let failure = ChainFailure {
                sequence_number: 0,
                reason: FailureReason::ChainBreak,
                detail: "head record is genesis but the chain is not empty".to_string(),
            };
            return Ok(failed_report(head, 0, None, 0, failure));
        }
        Ok(valid_report(head, 0, None, 0))
    }
}

fn check_range(from: u64, to: u64, head_sequence: u64) -> CustosResult<()> {
    if from > to {
        return Err(CustosError::Validation {
            reason: format!("from_sequence {from} is greater than to_sequence {to}"),
        });
    }
    if to > head_sequence {
        return Err(CustosError::Validation {
            reason: format!("to_sequence {to} is beyond the chain head {head_sequence}"),
        });
    }
    Ok(())
}

fn valid_report(
    head: ChainHead,
    from: u64,
    to: Option<u64>,
    verified_count: u64,
) -> VerificationReport {
    VerificationReport {
        valid: true,
        verified_count,
        first_failure_sequence: None,
        failure_reason: None,
        detail: None,
        from_sequence: from,
        to_sequence: to,
        head,
        verified_at: Utc::now(),
    }
}

fn failed_report(
    head: ChainHead,
    from: u64,
    to: Option<u64>,
    verified_count: u64,
    failure: ChainFailure,
) -> VerificationReport {
    error!(
        sequence_number = failure.sequence_number,
        reason = %failure.reason,
        detail = %failure.detail,
        "chain integrity failure"
    );
    VerificationReport {
        valid: false,
        verified_count,
        first_failure_sequence: Some(failure.sequence_number),
        failure_reason: Some(failure.reason),
        detail: Some(failure.detail),
        from_sequence: from,
        to_sequence: to,
        head,
        verified_at: Utc::now(),
    }
}
