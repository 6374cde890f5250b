//! Canonical event hashing.
//!
//! Every field that contributes to an event's hash is fed explicitly, in a
//! fixed order, so nothing can be omitted by accident.  Variable-length
//! fields are prefixed with their byte length (u64 little-endian) so that
//! no two different events share an encoding.
//!
//! Hash input layout:
//!   1. event_id, hyphenated
//!   2. sequence_number, 8-byte little-endian
//!   3. timestamp, RFC 3339 with nanoseconds and `Z`
//!   4. event_type, snake_case
//!   5. component
//!   6. operation
//!   7. actor_id
//!   8. subject_id, presence byte then value
//!   9. details, presence byte then compact JSON with sorted keys
//!  10. previous_hash

use chrono::SecondsFormat;
use sha2::{Digest, Sha256};

use custos_contracts::event::{AuditEvent, EventBody};

struct CanonicalHasher(Sha256);

impl CanonicalHasher {
    fn field(&mut self, bytes: &[u8]) {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn optional(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(b) => {
                self.0.update([1u8]);
                self.field(b);
            }
            None => self.0.update([0u8]),
        }
    }
}

/// Compute the SHA-256 content hash of an event body.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_event(body: &EventBody) -> String {
    let mut h = CanonicalHasher(Sha256::new());

    h.field(body.event_id.to_string().as_bytes());
    h.0.update(body.sequence_number.to_le_bytes());
    h.field(
        body.timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    h.field(body.event_type.as_str().as_bytes());
    h.field(body.component.as_bytes());
    h.field(body.operation.as_bytes());
    h.field(body.actor_id.as_bytes());
    h.optional(body.subject_id.as_deref().map(str::as_bytes));

    // `Value`'s Display is the compact form; objects keep their keys sorted.
    let details = body.details.as_ref().map(|d| d.to_string());
    h.optional(details.as_deref().map(str::as_bytes));

    h.field(body.previous_hash.as_bytes());

    hex::encode(h.0.finalize())
}

/// True when the stored hash equals the hash recomputed from stored fields.
pub fn hash_matches(event: &AuditEvent) -> bool {
    hash_event(event.body()) == event.hash()
}
