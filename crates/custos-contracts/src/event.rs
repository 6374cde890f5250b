//! Audit event types.
//!
//! `AuditEvent` is a single link in the hash chain.  It has no mutating
//! methods: once the chain engine seals it, the only thing anyone can do with
//! it is read it, clone it, or hand it to a store.  Retroactive edits are
//! therefore something done to storage, never to the value, and the verifier
//! catches them.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CustosError, CustosResult};

/// The sentinel `previous_hash` of the first event in every chain.
///
/// 64 hex zeros; no SHA-256 output of real data takes this value.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Unique identifier assigned to an event at append time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub uuid::Uuid);

impl EventId {
    /// Create a new, random event ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse the hyphenated text form used in storage and on the CLI.
    pub fn parse(s: &str) -> CustosResult<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CustosError::Validation {
                reason: format!("invalid event id '{s}': {e}"),
            })
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// The closed set of things the audit chain records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhiAccess,
    ModelPrediction,
    GovernanceAction,
    Authentication,
    ConfigChange,
    EmergencyAccess,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::PhiAccess,
        EventType::ModelPrediction,
        EventType::GovernanceAction,
        EventType::Authentication,
        EventType::ConfigChange,
        EventType::EmergencyAccess,
    ];

    /// The stable snake_case name.  Part of the hash encoding; never rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PhiAccess => "phi_access",
            EventType::ModelPrediction => "model_prediction",
            EventType::GovernanceAction => "governance_action",
            EventType::Authentication => "authentication",
            EventType::ConfigChange => "config_change",
            EventType::EmergencyAccess => "emergency_access",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CustosError::Validation {
                reason: format!("unrecognized event_type '{s}'"),
            })
    }
}

/// What a caller asks the chain engine to record.
///
/// Everything the engine owns (id, sequence, timestamp, linkage, hash) is
/// absent here by construction, so callers cannot backdate or reorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    pub event_type: EventType,
    pub component: String,
    pub operation: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EventCandidate {
    pub fn new(
        event_type: EventType,
        component: impl Into<String>,
        operation: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            component: component.into(),
            operation: operation.into(),
            actor_id: actor_id.into(),
            subject_id: None,
            details: None,
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Every field of an event except its own hash.
///
/// This is exactly the input to the content hash.  It is only reachable by
/// shared reference from a sealed `AuditEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub event_id: EventId,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub component: String,
    pub operation: String,
    pub actor_id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    pub previous_hash: String,
}

/// A sealed entry in the SHA-256 hash chain.
///
/// Modifying any stored field invalidates `hash`; rewriting `hash` as well
/// breaks the next event's `previous_hash`.  Both are caught by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(flatten)]
    body: EventBody,
    hash: String,
}

impl AuditEvent {
    /// Pair a body with its hash.
    ///
    /// Used by the chain engine after hashing and by stores rehydrating a
    /// persisted row.  No check is made here; a wrong hash is precisely what
    /// the verifier exists to report.
    pub fn from_parts(body: EventBody, hash: String) -> Self {
        Self { body, hash }
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn event_id(&self) -> &EventId {
        &self.body.event_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.body.sequence_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.body.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.body.event_type
    }

    pub fn component(&self) -> &str {
        &self.body.component
    }

    pub fn operation(&self) -> &str {
        &self.body.operation
    }

    pub fn actor_id(&self) -> &str {
        &self.body.actor_id
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.body.subject_id.as_deref()
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.body.details.as_ref()
    }

    pub fn previous_hash(&self) -> &str {
        &self.body.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The chain position this event commits to.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            sequence_number: self.body.sequence_number,
            hash: self.hash.clone(),
        }
    }
}

/// What the caller gets back from a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    pub event_id: EventId,
    pub sequence_number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AuditEvent> for EventReceipt {
    fn from(event: &AuditEvent) -> Self {
        Self {
            event_id: event.event_id().clone(),
            sequence_number: event.sequence_number(),
            hash: event.hash().to_string(),
            timestamp: event.timestamp(),
        }
    }
}

/// Pointer to the most recently appended event.
///
/// `sequence_number` is `None` and `hash` is `GENESIS_HASH` until the first
/// append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence_number: Option<u64>,
    pub hash: String,
}

impl ChainHead {
    pub fn genesis() -> Self {
        Self {
            sequence_number: None,
            hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence_number.is_none()
    }

    /// The sequence number the next appended event must carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence_number.map_or(0, |s| s + 1)
    }

    /// Number of events in a chain whose head this is.
    pub fn chain_length(&self) -> u64 {
        self.next_sequence()
    }

    /// The head after `event` has been appended on top of this one.
    pub fn advanced_to(event: &AuditEvent) -> Self {
        Self {
            sequence_number: Some(event.sequence_number()),
            hash: event.hash().to_string(),
        }
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}

/// A recorded `(sequence_number, hash)` pair used to anchor verification of
/// a chain suffix when earlier history is no longer available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence_number: u64,
    pub hash: String,
}
