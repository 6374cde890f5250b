//! The chain engine: the only writer of the audit chain.
//!
//! Every append goes through the same pipeline:
//!
//!   Validate → Lock → Read head → Seal (sequence, timestamp, linkage, hash)
//!   → Store CAS append → Receipt
//!
//! Two layers keep the chain linear.  Inside one process the engine's
//! writer mutex means only one thread at a time builds an event against the
//! head.  Across processes sharing a store, the store's compare-and-swap on
//! the head rejects any append built against a stale head, and the engine
//! rebuilds it against the fresh head after a bounded, jittered backoff.

use std::{
    sync::{Arc, Mutex},
    thread,
};

use chrono::Utc;
use tracing::{debug, info, warn};

use custos_contracts::{
    config::ChainConfig,
    error::{CustosError, CustosResult},
    event::{AuditEvent, ChainHead, EventBody, EventCandidate, EventId, EventReceipt},
};

use crate::{hash::hash_event, retry::RetryPolicy, traits::EventStore};

/// Serializes concurrent appends into one strictly ordered, hash-linked chain.
///
/// Construct one engine per store per process and share it behind an `Arc`.
pub struct ChainEngine {
    store: Arc<dyn EventStore>,
    limits: ChainConfig,
    retry: RetryPolicy,
    writer: Mutex<()>,
}

impl ChainEngine {
    pub fn new(store: Arc<dyn EventStore>, config: &ChainConfig) -> Self {
        Self {
            store,
            limits: config.clone(),
            retry: RetryPolicy::from_config(config),
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Append `candidate` to the chain.
    ///
    /// # Errors
    ///
    /// - `Validation` if the candidate is malformed (nothing is touched)
    /// - `ConcurrencyConflict` if the head kept moving for every retry
    /// - any store error, unchanged
    pub fn append(&self, candidate: EventCandidate) -> CustosResult<EventReceipt> {
        self.validate(&candidate)?;

        let _writer = self.writer.lock().map_err(|e| CustosError::Storage {
            reason: format!("chain writer lock poisoned: {e}"),
        })?;

        let mut backoff_step = 0u32;
        loop {
            let head = self.store.head()?;
            let event = seal(&candidate, &head);
            let receipt = EventReceipt::from(&event);

            match self.store.append(event, &head) {
                Ok(()) => {
                    info!(
                        event_id = %receipt.event_id,
                        sequence_number = receipt.sequence_number,
                        event_type = %candidate.event_type,
                        component = %candidate.component,
                        operation = %candidate.operation,
                        hash = %receipt.hash,
                        "audit event appended"
                    );
                    return Ok(receipt);
                }
                Err(CustosError::ConcurrencyConflict {
                    expected_sequence, ..
                }) => {
                    if backoff_step >= self.retry.max_retries {
                        warn!(
                            expected_sequence,
                            attempts = backoff_step + 1,
                            "chain head conflict persisted; giving up"
                        );
                        return Err(CustosError::ConcurrencyConflict {
                            expected_sequence,
                            attempts: backoff_step + 1,
                        });
                    }
                    let delay = self.retry.delay(backoff_step);
                    debug!(
                        expected_sequence,
                        attempt = backoff_step + 1,
                        delay_ms = delay.as_millis() as u64,
                        "chain head moved; retrying against fresh head"
                    );
                    thread::sleep(delay);
                    backoff_step += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check `candidate` against the configured limits.
    ///
    /// Runs before any shared state is touched.
    pub fn validate(&self, candidate: &EventCandidate) -> CustosResult<()> {
        let max = self.limits.max_identifier_len;
        require_identifier("component", &candidate.component, max)?;
        require_identifier("operation", &candidate.operation, max)?;
        require_identifier("actor_id", &candidate.actor_id, max)?;
        if let Some(subject_id) = &candidate.subject_id {
            require_identifier("subject_id", subject_id, max)?;
        }

        if let Some(details) = &candidate.details {
            if !details.is_object() {
                return Err(CustosError::Validation {
                    reason: "details must be a JSON object".to_string(),
                });
            }
            let size = details.to_string().len();
            if size > self.limits.max_details_bytes {
                return Err(CustosError::Validation {
                    reason: format!(
                        "details is {size} bytes; limit is {}",
                        self.limits.max_details_bytes
                    ),
                });
            }
        }

        Ok(())
    }
}

fn require_identifier(field: &str, value: &str, max_len: usize) -> CustosResult<()> {
    if value.trim().is_empty() {
        return Err(CustosError::Validation {
            reason: format!("{field} is required"),
        });
    }
    if value.len() > max_len {
        return Err(CustosError::Validation {
            reason: format!("{field} exceeds {max_len} bytes"),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(CustosError::Validation {
            reason: format!("{field} contains control characters"),
        });
    }
    Ok(())
}

/// Fill in everything the engine owns and hash the result.
fn seal(candidate: &EventCandidate, head: &ChainHead) -> AuditEvent {
    let body = EventBody {
        event_id: EventId::new(),
        sequence_number: head.next_sequence(),
        timestamp: Utc::now(),
        event_type: candidate.event_type,
        component: candidate.component.clone(),
        operation: candidate.operation.clone(),
        actor_id: candidate.actor_id.clone(),
        subject_id: candidate.subject_id.clone(),
        details: candidate.details.clone(),
        previous_hash: head.hash.clone(),
    };
    let hash = hash_event(&body);
    AuditEvent::from_parts(body, hash)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
