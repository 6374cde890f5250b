//! The storage boundary of the audit chain.
//!
//! `EventStore` deliberately has no update or delete operation.  Rewriting
//! history is not something a caller can express through this trait; adapters
//! whose backing storage could technically mutate rows add their own guard on
//! top (see the SQLite adapter's triggers).

use tracing::error;

use custos_contracts::{
    error::{CustosError, CustosResult},
    event::{AuditEvent, ChainHead, EventId},
    query::ExportFilter,
};

/// Append-only persistence for sealed audit events plus the chain head.
///
/// Implementations must make `append` atomic: the event row and the head
/// advance become visible together or not at all, and readers never observe
/// one without the other.
pub trait EventStore: Send + Sync {
    /// The current chain head.
    fn head(&self) -> CustosResult<ChainHead>;

    /// Persist `event` and advance the head to it, provided the head still
    /// equals `expected_head`.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` if the head moved since `expected_head` was read
    /// - `ImmutabilityViolation` if the event would overwrite a persisted
    ///   sequence number or reuse a persisted `event_id`
    /// - `SequenceRejected` / `Validation` if the event does not extend the head
    fn append(&self, event: AuditEvent, expected_head: &ChainHead) -> CustosResult<()>;

    /// Events with `start <= sequence_number <= end`, ascending.
    fn get_by_sequence_range(&self, start: u64, end: u64) -> CustosResult<Vec<AuditEvent>>;

    fn get_by_id(&self, event_id: &EventId) -> CustosResult<Option<AuditEvent>>;

    /// Up to `limit` events matching `filter` with a sequence number greater
    /// than `after_sequence`, ascending.
    fn query(
        &self,
        filter: &ExportFilter,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> CustosResult<Vec<AuditEvent>>;

    /// Number of persisted events.
    fn count(&self) -> CustosResult<u64>;

    fn get_by_sequence(&self, sequence_number: u64) -> CustosResult<Option<AuditEvent>> {
        Ok(self
            .get_by_sequence_range(sequence_number, sequence_number)?
            .into_iter()
            .next())
    }
}

/// The admission check every adapter runs inside its critical section.
///
/// `current` is the head as stored right now; `expected` is the head the
/// writer built `event` against.
pub fn check_append(
    current: &ChainHead,
    expected: &ChainHead,
    event: &AuditEvent,
) -> CustosResult<()> {
    if current != expected {
        return Err(CustosError::ConcurrencyConflict {
            expected_sequence: expected.next_sequence(),
            attempts: 1,
        });
    }

    let next = current.next_sequence();
    let sequence_number = event.sequence_number();

    if sequence_number < next {
        return Err(CustosError::ImmutabilityViolation {
            sequence_number: Some(sequence_number),
            reason: "sequence number is already persisted; events cannot be overwritten"
                .to_string(),
        });
    }
    if sequence_number != next {
        return Err(CustosError::SequenceRejected {
            expected: next,
            actual: sequence_number,
        });
    }
    if event.previous_hash() != current.hash {
        return Err(CustosError::Validation {
            reason: format!(
                "previous_hash {} does not link to chain head {}",
                event.previous_hash(),
                current.hash
            ),
        });
    }

    Ok(())
}

/// Report an immutability violation outside the chain.
///
/// Writing it onto the chain being attacked would make the report depend on
/// the very store that is misbehaving, so it goes to the security log
/// target instead.
pub fn report_violation(err: &CustosError) {
    if let CustosError::ImmutabilityViolation {
        sequence_number,
        reason,
    } = err
    {
        error!(
            target: "custos::security",
            sequence_number = ?sequence_number,
            reason = %reason,
            "immutability violation rejected"
        );
    }
}
