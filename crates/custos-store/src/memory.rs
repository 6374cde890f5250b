//! In-memory implementation of `EventStore`.
//!
//! `InMemoryEventStore` keeps every event in a `Vec` protected by a
//! `Mutex` together with the chain head, so an append and its head advance
//! happen inside one critical section and no reader can see one without the
//! other.  Clones share the same underlying chain.
//!
//! Nothing survives the process; use the SQLite store for durability.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use custos_contracts::{
    error::{CustosError, CustosResult},
    event::{AuditEvent, ChainHead, EventId},
    query::ExportFilter,
};
use custos_core::traits::{check_append, report_violation, EventStore};

// ── Internal mutable state ────────────────────────────────────────────────────

/// The mutable interior of an `InMemoryEventStore`.
#[derive(Default)]
pub(crate) struct InMemoryState {
    /// All events, in sequence order.  Index equals sequence number.
    pub(crate) events: Vec<AuditEvent>,

    /// Every event id ever appended.
    pub(crate) ids: HashSet<EventId>,

    pub(crate) head: ChainHead,
}

// ── Public store ──────────────────────────────────────────────────────────────

/// An in-memory, append-only event store.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    pub(crate) state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CustosResult<MutexGuard<'_, InMemoryState>> {
        self.state.lock().map_err(|e| CustosError::Storage {
            reason: format!("event store lock poisoned: {e}"),
        })
    }
}

impl EventStore for InMemoryEventStore {
    fn head(&self) -> CustosResult<ChainHead> {
        Ok(self.lock()?.head.clone())
    }

    /// Admit `event` if it extends `expected_head`, then advance the head.
    fn append(&self, event: AuditEvent, expected_head: &ChainHead) -> CustosResult<()> {
        let mut state = self.lock()?;

        if let Err(e) = check_append(&state.head, expected_head, &event) {
            report_violation(&e);
            return Err(e);
        }
        if state.ids.contains(event.event_id()) {
            let err = CustosError::ImmutabilityViolation {
                sequence_number: Some(event.sequence_number()),
                reason: format!("event id {} is already persisted", event.event_id()),
            };
            report_violation(&err);
            return Err(err);
        }

        state.head = ChainHead::advanced_to(&event);
        state.ids.insert(event.event_id().clone());
        state.events.push(event);

        Ok(())
    }

    fn get_by_sequence_range(&self, start: u64, end: u64) -> CustosResult<Vec<AuditEvent>> {
        let state = self.lock()?;
        let events: Vec<AuditEvent> = state
            .events
            .iter()
            .filter(|e| (start..=end).contains(&e.sequence_number()))
            .cloned()
            .collect();
        debug!(start, end, returned = events.len(), "range read");
        Ok(events)
    }

    fn get_by_id(&self, event_id: &EventId) -> CustosResult<Option<AuditEvent>> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .find(|e| e.event_id() == event_id)
            .cloned())
    }

    fn query(
        &self,
        filter: &ExportFilter,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> CustosResult<Vec<AuditEvent>> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|e| after_sequence.map_or(true, |a| e.sequence_number() > a))
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self) -> CustosResult<u64> {
        Ok(self.lock()?.events.len() as u64)
    }
}
