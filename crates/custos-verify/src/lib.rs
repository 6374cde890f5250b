//! # custos-verify
//!
//! Integrity verification for the CUSTOS audit chain.
//!
//! [`engine::ChainVerifier`] walks the chain in chunks, recomputing every
//! hash and checking every link, and reports the first sequence number at
//! which the chain can no longer be trusted.  [`schedule::ScheduledVerifier`]
//! runs that pass periodically on a background thread.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use custos_verify::ChainVerifier;
//!
//! let verifier = ChainVerifier::new(store, &config.verify);
//! let report = verifier.verify(None, None)?;
//! if !report.valid {
//!     eprintln!("tampering at {:?}", report.first_failure_sequence);
//! }
//! ```

pub mod engine;
pub mod schedule;

pub use engine::{ChainFailure, ChainVerifier, ChunkOutcome};
pub use schedule::ScheduledVerifier;

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    };

    use serde_json::json;

    use custos_contracts::{
        config::{ChainConfig, VerifyConfig},
        error::{CustosError, CustosResult},
        event::{AuditEvent, ChainHead, EventBody, EventCandidate, EventId, EventType},
        query::ExportFilter,
        verify::{FailureReason, VerificationReport, VerifyProgress},
    };
    use custos_core::{
        hash_event,
        traits::{check_append, EventStore},
        ChainEngine,
    };

    use super::*;

    // ── Mock: a store whose rows can be rewritten behind the chain's back ────

    #[derive(Default)]
    struct TamperableStore {
        state: Mutex<(Vec<AuditEvent>, ChainHead)>,
    }

    impl TamperableStore {
        /// Rewrite the stored row at `sequence_number`, optionally recomputing
        /// its hash as a more careful attacker would.
        fn tamper(&self, sequence_number: u64, rehash: bool, edit: impl FnOnce(&mut EventBody)) {
            let mut state = self.state.lock().unwrap();
            let slot = state
                .0
                .iter_mut()
                .find(|e| e.sequence_number() == sequence_number)
                .unwrap();
            let mut body = slot.body().clone();
            edit(&mut body);
            let hash = if rehash {
                hash_event(&body)
            } else {
                slot.hash().to_string()
            };
            *slot = AuditEvent::from_parts(body, hash);
        }

        fn remove(&self, sequence_number: u64) {
            let mut state = self.state.lock().unwrap();
            state.0.retain(|e| e.sequence_number() != sequence_number);
        }

        fn duplicate(&self, sequence_number: u64) {
            let mut state = self.state.lock().unwrap();
            let index = state
                .0
                .iter()
                .position(|e| e.sequence_number() == sequence_number)
                .unwrap();
            let copy = state.0[index].clone();
            state.0.insert(index + 1, copy);
        }

        /// Point the head record back at an earlier event.
        fn rewind_head(&self, sequence_number: u64) {
            let event = self.event(sequence_number);
            self.state.lock().unwrap().1 = ChainHead::advanced_to(&event);
        }

        fn event(&self, sequence_number: u64) -> AuditEvent {
            self.get_by_sequence(sequence_number).unwrap().unwrap()
        }
    }

    impl EventStore for TamperableStore {
        fn head(&self) -> CustosResult<ChainHead> {
            Ok(self.state.lock().unwrap().1.clone())
        }

        fn append(&self, event: AuditEvent, expected_head: &ChainHead) -> CustosResult<()> {
            let mut state = self.state.lock().unwrap();
            check_append(&state.1, expected_head, &event)?;
            state.1 = ChainHead::advanced_to(&event);
            state.0.push(event);
            Ok(())
        }

        fn get_by_sequence_range(&self, start: u64, end: u64) -> CustosResult<Vec<AuditEvent>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .0
                .iter()
                .filter(|e| (start..=end).contains(&e.sequence_number()))
                .cloned()
                .collect())
        }

        fn get_by_id(&self, event_id: &EventId) -> CustosResult<Option<AuditEvent>> {
            let state = self.state.lock().unwrap();
            Ok(state.0.iter().find(|e| e.event_id() == event_id).cloned())
        }

        fn query(
            &self,
            filter: &ExportFilter,
            after_sequence: Option<u64>,
            limit: usize,
        ) -> CustosResult<Vec<AuditEvent>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .0
                .iter()
                .filter(|e| after_sequence.map_or(true, |a| e.sequence_number() > a))
                .filter(|e| filter.matches(e))
                .take(limit)
                .cloned()
                .collect())
        }

        fn count(&self) -> CustosResult<u64> {
            Ok(self.state.lock().unwrap().0.len() as u64)
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn setup(chunk_size: usize) -> (Arc<TamperableStore>, ChainEngine, ChainVerifier) {
        let store = Arc::new(TamperableStore::default());
        let engine = ChainEngine::new(store.clone(), &ChainConfig::default());
        let verifier = ChainVerifier::new(
            store.clone(),
            &VerifyConfig {
                chunk_size,
                ..VerifyConfig::default()
            },
        );
        (store, engine, verifier)
    }

    fn append(engine: &ChainEngine, n: usize) {
        for i in 0..n {
            let candidate = EventCandidate::new(
                EventType::PhiAccess,
                "readmission",
                "read_encounters",
                "dr-chen",
            )
            .with_subject(format!("patient/{i}"))
            .with_details(json!({ "purpose": "treatment" }));
            engine.append(candidate).unwrap();
        }
    }

    fn assert_failure(report: &VerificationReport, sequence_number: u64, reason: FailureReason) {
        assert!(!report.valid, "expected a failed report, got {report:?}");
        assert_eq!(report.first_failure_sequence, Some(sequence_number));
        assert_eq!(report.failure_reason, Some(reason));
    }

    // ── Clean chains ──────────────────────────────────────────────────────────

    /// An empty chain verifies with nothing counted.
    #[test]
    fn test_empty_chain_is_valid() {
        let (_store, _engine, verifier) = setup(10);
        let report = verifier.verify(None, None).unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_count, 0);
        assert_eq!(report.to_sequence, None);
    }

    /// Verification passes after every successful append.
    #[test]
    fn test_valid_after_every_append() {
        let (_store, engine, verifier) = setup(3);
        for n in 1..=7u64 {
            append(&engine, 1);
            let report = verifier.verify(None, None).unwrap();
            assert!(report.valid);
            assert_eq!(report.verified_count, n);
            assert_eq!(report.to_sequence, Some(n - 1));
        }
    }

    /// Chunk size does not change the outcome.
    #[test]
    fn test_chunk_size_is_transparent() {
        for chunk_size in [1, 2, 3, 100] {
            let (store, engine, verifier) = setup(chunk_size);
            append(&engine, 9);
            assert!(verifier.verify(None, None).unwrap().valid);

            store.tamper(6, false, |b| b.actor_id = "mallory".to_string());
            assert_failure(
                &verifier.verify(None, None).unwrap(),
                6,
                FailureReason::HashMismatch,
            );
        }
    }

    // ── Tamper scenarios ──────────────────────────────────────────────────────

    /// Append A, B, C; rewrite B's details in storage; the pass stops at B.
    #[test]
    fn test_scenario_abc_details_rewrite() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);

        let report = verifier.verify(Some(0), Some(2)).unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_count, 3);

        store.tamper(1, false, |b| {
            b.details = Some(json!({ "purpose": "marketing" }));
        });

        let report = verifier.verify(None, None).unwrap();
        assert_failure(&report, 1, FailureReason::HashMismatch);
        assert_eq!(report.verified_count, 1);
        assert!(report.detail.is_some());
    }

    /// Rewriting an event and its hash breaks the next event's link.
    #[test]
    fn test_rehashed_rewrite_breaks_next_link() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);

        store.tamper(1, true, |b| b.operation = "bulk_export".to_string());

        let report = verifier.verify(None, None).unwrap();
        assert_failure(&report, 2, FailureReason::ChainBreak);
        assert_eq!(report.verified_count, 2);
    }

    /// Rewriting the newest event and its hash is caught by the head record.
    #[test]
    fn test_rehashed_tail_disagrees_with_head() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);

        store.tamper(2, true, |b| b.subject_id = None);

        let report = verifier.verify(None, None).unwrap();
        assert_failure(&report, 2, FailureReason::ChainBreak);
        assert_eq!(report.verified_count, 3);
    }

    /// A head record pointed back at an earlier event leaves rows past it.
    #[test]
    fn test_rewound_head_is_a_chain_break() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);

        store.rewind_head(0);

        let report = verifier.verify(None, None).unwrap();
        assert_failure(&report, 1, FailureReason::ChainBreak);
        assert_eq!(report.verified_count, 1);
        assert_eq!(report.to_sequence, Some(0));

        // A range that stops short of the head is unaffected.
        store.rewind_head(2);
        assert!(verifier.verify(None, Some(1)).unwrap().valid);
    }

    #[test]
    fn test_rewound_head_is_caught_from_checkpoint() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);
        let checkpoint = store.event(1).checkpoint();

        store.rewind_head(1);

        assert_failure(
            &verifier.verify_from_checkpoint(&checkpoint, None).unwrap(),
            2,
            FailureReason::ChainBreak,
        );
    }

    #[test]
    fn test_deleted_event_is_a_gap() {
        let (store, engine, verifier) = setup(2);
        append(&engine, 5);

        store.remove(2);

        let report = verifier.verify(None, None).unwrap();
        assert_failure(&report, 2, FailureReason::SequenceGap);
        assert_eq!(report.verified_count, 2);
    }

    #[test]
    fn test_truncated_tail_is_a_gap() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 5);

        store.remove(4);
        store.remove(3);

        assert_failure(
            &verifier.verify(None, None).unwrap(),
            3,
            FailureReason::SequenceGap,
        );
    }

    #[test]
    fn test_repeated_sequence_is_a_duplicate() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 4);

        store.duplicate(1);

        assert_failure(
            &verifier.verify(None, None).unwrap(),
            1,
            FailureReason::DuplicateSequence,
        );
    }

    #[test]
    fn test_failed_report_converts_to_integrity_failure() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 2);
        store.tamper(0, false, |b| b.component = "care_gaps".to_string());

        match verifier.verify(None, None).unwrap().into_result() {
            Err(CustosError::IntegrityFailure {
                sequence_number: 0,
                reason: FailureReason::HashMismatch,
            }) => {}
            other => panic!("expected IntegrityFailure, got {other:?}"),
        }
    }

    // ── Ranges ────────────────────────────────────────────────────────────────

    /// A range starting past 0 is anchored on the stored hash before it.
    #[test]
    fn test_partial_range_is_anchored_on_predecessor() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 6);

        store.tamper(0, false, |b| b.actor_id = "mallory".to_string());

        let report = verifier.verify(Some(2), Some(4)).unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_count, 3);
        assert_eq!(report.from_sequence, 2);

        assert!(!verifier.verify(None, None).unwrap().valid);
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        let (_store, engine, verifier) = setup(500);
        append(&engine, 3);

        assert!(matches!(
            verifier.verify(Some(2), Some(1)),
            Err(CustosError::Validation { .. })
        ));
        assert!(matches!(
            verifier.verify(None, Some(3)),
            Err(CustosError::Validation { .. })
        ));
    }

    // ── Resumable chunks ──────────────────────────────────────────────────────

    /// Driving `verify_chunk` by hand walks the chain in `chunk_size` steps.
    #[test]
    fn test_verify_chunk_resumes_from_progress() {
        let (store, engine, verifier) = setup(2);
        append(&engine, 5);

        let mut progress = VerifyProgress::from_genesis();
        let mut chunks = 0;
        let done = loop {
            chunks += 1;
            match verifier.verify_chunk(&progress, 4).unwrap() {
                ChunkOutcome::Continue { progress: next } => {
                    // Progress survives a serialization round trip between chunks.
                    let saved = serde_json::to_string(&next).unwrap();
                    progress = serde_json::from_str(&saved).unwrap();
                }
                ChunkOutcome::Complete { progress } => break progress,
                ChunkOutcome::Failed { failure, .. } => panic!("unexpected {failure:?}"),
            }
        };

        assert_eq!(chunks, 3);
        assert_eq!(done.verified_count, 5);
        assert_eq!(done.next_sequence, 5);
        assert_eq!(done.expected_previous_hash, store.event(4).hash());
    }

    // ── Checkpoints ───────────────────────────────────────────────────────────

    /// After the prefix is moved out, the suffix still verifies against a
    /// recorded checkpoint.
    #[test]
    fn test_suffix_verifies_from_checkpoint() {
        let (store, engine, verifier) = setup(2);
        append(&engine, 6);
        let checkpoint = store.event(2).checkpoint();

        for seq in 0..=2 {
            store.remove(seq);
        }

        let report = verifier.verify_from_checkpoint(&checkpoint, None).unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_count, 3);
        assert_eq!(report.from_sequence, 3);

        // A full pass now sees the missing prefix.
        assert_failure(
            &verifier.verify(None, None).unwrap(),
            0,
            FailureReason::SequenceGap,
        );
    }

    #[test]
    fn test_wrong_checkpoint_hash_breaks_suffix() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 4);
        let mut checkpoint = store.event(1).checkpoint();
        store.remove(0);
        store.remove(1);
        checkpoint.hash = "f".repeat(64);

        assert_failure(
            &verifier.verify_from_checkpoint(&checkpoint, None).unwrap(),
            2,
            FailureReason::ChainBreak,
        );
    }

    #[test]
    fn test_checkpoint_at_head_has_empty_suffix() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 2);

        let report = verifier
            .verify_from_checkpoint(&store.event(1).checkpoint(), None)
            .unwrap();
        assert!(report.valid);
        assert_eq!(report.verified_count, 0);
    }

    // ── ScheduledVerifier ─────────────────────────────────────────────────────

    fn wait_for(
        scheduled: &ScheduledVerifier,
        accept: impl Fn(&VerificationReport) -> bool,
    ) -> VerificationReport {
        for _ in 0..500 {
            if let Some(report) = scheduled.latest() {
                if accept(&report) {
                    return report;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("scheduled verifier never produced the expected report");
    }

    /// The schedule picks up tampering on a later pass.
    #[test]
    fn test_scheduled_verifier_reports_latest_pass() {
        let (store, engine, verifier) = setup(500);
        append(&engine, 3);

        let scheduled =
            ScheduledVerifier::start(Arc::new(verifier), Duration::from_millis(5)).unwrap();

        let first = wait_for(&scheduled, |r| r.valid);
        assert_eq!(first.verified_count, 3);

        store.tamper(1, false, |b| b.operation = "export_all".to_string());

        let later = wait_for(&scheduled, |r| !r.valid);
        assert_eq!(later.first_failure_sequence, Some(1));

        scheduled.shutdown();
    }
}
