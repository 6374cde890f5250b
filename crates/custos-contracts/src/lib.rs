//! # custos-contracts
//!
//! Shared types for the CUSTOS audit chain.
//!
//! Every crate in the workspace imports from here.  No business logic lives
//! in this crate, only the event model, reports, query shapes, configuration
//! schema and the error type.

pub mod config;
pub mod error;
pub mod event;
pub mod query;
pub mod verify;

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use error::CustosError;
    use event::{AuditEvent, ChainHead, EventBody, EventId, EventType, GENESIS_HASH};
    use query::ExportFilter;
    use verify::{FailureReason, VerificationReport};

    fn sample_event(sequence_number: u64, subject: Option<&str>) -> AuditEvent {
        let body = EventBody {
            event_id: EventId::new(),
            sequence_number,
            timestamp: Utc::now(),
            event_type: EventType::PhiAccess,
            component: "readmission".to_string(),
            operation: "read_encounters".to_string(),
            actor_id: "dr-chen".to_string(),
            subject_id: subject.map(str::to_string),
            details: Some(json!({ "purpose": "treatment" })),
            previous_hash: GENESIS_HASH.to_string(),
        };
        AuditEvent::from_parts(body, "ab".repeat(32))
    }

    // ── EventType ────────────────────────────────────────────────────────────

    #[test]
    fn event_type_parses_every_known_name() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn event_type_rejects_unknown_name() {
        let err = "unknown_type".parse::<EventType>().unwrap_err();
        match err {
            CustosError::Validation { reason } => assert!(reason.contains("unknown_type")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn event_type_serializes_as_snake_case() {
        let s = serde_json::to_string(&EventType::EmergencyAccess).unwrap();
        assert_eq!(s, "\"emergency_access\"");
    }

    // ── ChainHead ────────────────────────────────────────────────────────────

    #[test]
    fn genesis_head_starts_at_sequence_zero() {
        let head = ChainHead::genesis();
        assert!(head.is_genesis());
        assert_eq!(head.next_sequence(), 0);
        assert_eq!(head.chain_length(), 0);
        assert_eq!(head.hash, GENESIS_HASH);
    }

    #[test]
    fn head_advances_to_event() {
        let event = sample_event(4, None);
        let head = ChainHead::advanced_to(&event);
        assert_eq!(head.sequence_number, Some(4));
        assert_eq!(head.next_sequence(), 5);
        assert_eq!(head.hash, event.hash());
    }

    // ── AuditEvent serde ─────────────────────────────────────────────────────

    #[test]
    fn audit_event_json_is_flat() {
        let event = sample_event(0, Some("patient/42"));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["sequence_number"], 0);
        assert_eq!(value["event_type"], "phi_access");
        assert_eq!(value["subject_id"], "patient/42");
        assert_eq!(value["hash"], event.hash());

        let decoded: AuditEvent = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }

    // ── ExportFilter ─────────────────────────────────────────────────────────

    #[test]
    fn empty_filter_matches_everything() {
        assert!(ExportFilter::default().matches(&sample_event(0, None)));
    }

    #[test]
    fn subject_filter_excludes_events_without_subject() {
        let filter = ExportFilter::for_subject("patient/42");
        assert!(filter.matches(&sample_event(0, Some("patient/42"))));
        assert!(!filter.matches(&sample_event(1, Some("patient/7"))));
        assert!(!filter.matches(&sample_event(2, None)));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let event = sample_event(0, None);
        let filter = ExportFilter {
            start_time: Some(event.timestamp()),
            end_time: Some(event.timestamp()),
            ..ExportFilter::default()
        };
        assert!(filter.matches(&event));

        let later = ExportFilter {
            start_time: Some(event.timestamp() + Duration::seconds(1)),
            ..ExportFilter::default()
        };
        assert!(!later.matches(&event));
    }

    #[test]
    fn combined_filter_requires_all_fields() {
        let event = sample_event(0, Some("patient/42"));
        let filter = ExportFilter {
            event_type: Some(EventType::PhiAccess),
            component: Some("care_gaps".to_string()),
            ..ExportFilter::for_subject("patient/42")
        };
        assert!(!filter.matches(&event));
    }

    // ── VerificationReport ───────────────────────────────────────────────────

    #[test]
    fn failed_report_converts_to_integrity_failure() {
        let report = VerificationReport {
            valid: false,
            verified_count: 1,
            first_failure_sequence: Some(1),
            failure_reason: Some(FailureReason::HashMismatch),
            detail: None,
            from_sequence: 0,
            to_sequence: Some(2),
            head: ChainHead::genesis(),
            verified_at: Utc::now(),
        };
        match report.into_result() {
            Err(CustosError::IntegrityFailure {
                sequence_number,
                reason,
            }) => {
                assert_eq!(sequence_number, 1);
                assert_eq!(reason, FailureReason::HashMismatch);
            }
            other => panic!("expected IntegrityFailure, got {other:?}"),
        }
    }

    // ── CustosError display messages ─────────────────────────────────────────

    #[test]
    fn error_immutability_violation_display() {
        let err = CustosError::ImmutabilityViolation {
            sequence_number: Some(7),
            reason: "update on audit_events".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("immutability violation at sequence 7"));
        assert!(msg.contains("update on audit_events"));

        let err = CustosError::ImmutabilityViolation {
            sequence_number: None,
            reason: "delete".to_string(),
        };
        assert_eq!(err.to_string(), "immutability violation: delete");
    }

    #[test]
    fn error_concurrency_conflict_is_transient() {
        let err = CustosError::ConcurrencyConflict {
            expected_sequence: 3,
            attempts: 6,
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("sequence 3"));
        assert!(!CustosError::Validation {
            reason: "x".to_string()
        }
        .is_transient());
    }

    #[test]
    fn error_integrity_failure_display() {
        let err = CustosError::IntegrityFailure {
            sequence_number: 12,
            reason: FailureReason::ChainBreak,
        };
        assert_eq!(err.to_string(), "integrity failure at sequence 12: chain break");
    }

    // ── Config defaults ──────────────────────────────────────────────────────

    #[test]
    fn default_config_uses_memory_backend() {
        let cfg = config::CustosConfig::default();
        assert_eq!(cfg.store.backend, config::StoreBackend::Memory);
        assert!(cfg.export.default_page_size <= cfg.export.max_page_size);
        assert!(cfg.verify.chunk_size > 0);
    }
}
