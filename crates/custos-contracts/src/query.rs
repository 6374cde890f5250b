//! Export filters, pagination, and compliance report shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{AuditEvent, EventType};

/// Export filter.  Every populated field must match; empty fields match
/// everything.  Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFilter {
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl ExportFilter {
    /// Filter matching every event that references `subject_id`.
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.map_or(true, |t| event.event_type() == t)
            && self
                .component
                .as_deref()
                .map_or(true, |c| event.component() == c)
            && self
                .operation
                .as_deref()
                .map_or(true, |o| event.operation() == o)
            && self
                .actor_id
                .as_deref()
                .map_or(true, |a| event.actor_id() == a)
            && self
                .subject_id
                .as_deref()
                .map_or(true, |s| event.subject_id() == Some(s))
            && self.start_time.map_or(true, |t| event.timestamp() >= t)
            && self.end_time.map_or(true, |t| event.timestamp() <= t)
    }
}

/// Cursor pagination over ascending sequence numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Return only events with a sequence number strictly greater than this.
    #[serde(default)]
    pub after_sequence: Option<u64>,

    /// Page size.  Defaulted and capped by the export configuration.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            after_sequence: None,
            limit: Some(limit),
        }
    }
}

/// One page of exported events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPage {
    pub events: Vec<AuditEvent>,

    /// Pass as `after_sequence` to fetch the next page.  `None` when this was
    /// the last page.
    pub next_cursor: Option<u64>,
}

/// Every logged event that references one subject, in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingReport {
    pub subject_id: String,
    pub generated_at: DateTime<Utc>,
    pub events: Vec<AuditEvent>,
}

/// Aggregate counts over the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_events: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub by_component: BTreeMap<String, u64>,
    pub by_event_type: BTreeMap<String, u64>,
    pub by_operation: BTreeMap<String, u64>,
    pub chain_verified: bool,
}
