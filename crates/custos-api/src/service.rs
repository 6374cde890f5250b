//! `AuditService`: the one entry point collaborators use.
//!
//! Writes go through the chain engine, reads go straight to the store, and
//! verification is delegated to the chain verifier.  The service is
//! `Send + Sync`; share it behind an `Arc` across request handlers.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use custos_contracts::{
    config::{CustosConfig, ExportConfig},
    error::{CustosError, CustosResult},
    event::{AuditEvent, ChainHead, Checkpoint, EventCandidate, EventReceipt, EventType},
    query::{AccountingReport, AuditSummary, ExportFilter, ExportPage, PageRequest},
    verify::VerificationReport,
};
use custos_core::{ChainEngine, EventStore};
use custos_verify::{ChainVerifier, ScheduledVerifier};

use crate::{config::open_store, request::SubmitRequest};

/// Component name on events the service records about the chain itself.
pub const SERVICE_COMPONENT: &str = "custos";

/// Operation name of retention checkpoint events.
pub const RETENTION_CHECKPOINT_OPERATION: &str = "retention_checkpoint";

/// A checkpoint together with the receipt of the event that recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionCheckpoint {
    pub checkpoint: Checkpoint,
    pub receipt: EventReceipt,
}

pub struct AuditService {
    store: Arc<dyn EventStore>,
    engine: ChainEngine,
    verifier: Arc<ChainVerifier>,
    export: ExportConfig,
    schedule_interval: Option<Duration>,
}

impl AuditService {
    pub fn new(store: Arc<dyn EventStore>, config: &CustosConfig) -> Self {
        let engine = ChainEngine::new(Arc::clone(&store), &config.chain);
        let verifier = Arc::new(ChainVerifier::new(Arc::clone(&store), &config.verify));
        let schedule_interval = match config.verify.schedule_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            store,
            engine,
            verifier,
            export: config.export.clone(),
            schedule_interval,
        }
    }

    /// Open the configured store and build a service over it.
    pub fn from_config(config: &CustosConfig) -> CustosResult<Self> {
        Ok(Self::new(open_store(&config.store)?, config))
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn head(&self) -> CustosResult<ChainHead> {
        self.store.head()
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Record one event.
    ///
    /// Every accepted call appends a new event; resubmitting the same
    /// request records it again.
    ///
    /// # Errors
    ///
    /// `Validation` for an unknown `event_type` or a missing or malformed
    /// field; nothing is appended in that case.
    pub fn submit(&self, request: SubmitRequest) -> CustosResult<EventReceipt> {
        let candidate = request.into_candidate().map_err(|e| {
            warn!(error = %e, "submission rejected");
            e
        })?;
        self.record(candidate)
    }

    /// Record an already typed candidate.
    pub fn record(&self, candidate: EventCandidate) -> CustosResult<EventReceipt> {
        self.engine.append(candidate)
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// One page of events matching `filter`, ascending by sequence number.
    ///
    /// The page size defaults to `export.default_page_size` and is capped at
    /// `export.max_page_size`.
    pub fn export(&self, filter: &ExportFilter, page: PageRequest) -> CustosResult<ExportPage> {
        if let (Some(start), Some(end)) = (filter.start_time, filter.end_time) {
            if start > end {
                return Err(CustosError::Validation {
                    reason: format!("start_time {start} is after end_time {end}"),
                });
            }
        }

        let limit = page
            .limit
            .unwrap_or(self.export.default_page_size)
            .clamp(1, self.export.max_page_size.max(1));

        // One extra row tells us whether another page exists.
        let mut events = self
            .store
            .query(filter, page.after_sequence, limit.saturating_add(1))?;
        let next_cursor = if events.len() > limit {
            events.truncate(limit);
            events.last().map(AuditEvent::sequence_number)
        } else {
            None
        };

        debug!(
            after_sequence = ?page.after_sequence,
            returned = events.len(),
            has_more = next_cursor.is_some(),
            "export page"
        );
        Ok(ExportPage {
            events,
            next_cursor,
        })
    }

    /// Every event matching `filter`, following cursors to the end.
    pub fn export_all(&self, filter: &ExportFilter) -> CustosResult<Vec<AuditEvent>> {
        let mut out = Vec::new();
        self.scan(filter, |events| out.extend(events))?;
        Ok(out)
    }

    /// Hand every page matching `filter` to `visit`, in chain order.  At most
    /// one page of `export.max_page_size` events is held at a time.
    fn scan(
        &self,
        filter: &ExportFilter,
        mut visit: impl FnMut(Vec<AuditEvent>),
    ) -> CustosResult<()> {
        let mut page = PageRequest {
            after_sequence: None,
            limit: Some(self.export.max_page_size),
        };
        loop {
            let ExportPage {
                events,
                next_cursor,
            } = self.export(filter, page)?;
            visit(events);
            match next_cursor {
                Some(cursor) => page.after_sequence = Some(cursor),
                None => return Ok(()),
            }
        }
    }

    /// Every logged event referencing `subject_id`, in chain order.
    pub fn accounting_report(&self, subject_id: &str) -> CustosResult<AccountingReport> {
        if subject_id.trim().is_empty() {
            return Err(CustosError::Validation {
                reason: "subject_id is required".to_string(),
            });
        }
        let events = self.export_all(&ExportFilter::for_subject(subject_id))?;
        info!(subject_id, events = events.len(), "accounting report generated");
        Ok(AccountingReport {
            subject_id: subject_id.to_string(),
            generated_at: Utc::now(),
            events,
        })
    }

    /// Aggregate counts over the whole chain plus a verification pass.
    ///
    /// Both walk the chain a page or a chunk at a time.
    pub fn summary(&self) -> CustosResult<AuditSummary> {
        let mut summary = AuditSummary {
            total_events: 0,
            first_timestamp: None,
            last_timestamp: None,
            by_component: BTreeMap::new(),
            by_event_type: BTreeMap::new(),
            by_operation: BTreeMap::new(),
            chain_verified: false,
        };

        self.scan(&ExportFilter::default(), |events| {
            for event in &events {
                summary.total_events += 1;
                summary.first_timestamp.get_or_insert(event.timestamp());
                summary.last_timestamp = Some(event.timestamp());
                *summary
                    .by_component
                    .entry(event.component().to_string())
                    .or_default() += 1;
                *summary
                    .by_event_type
                    .entry(event.event_type().as_str().to_string())
                    .or_default() += 1;
                *summary
                    .by_operation
                    .entry(event.operation().to_string())
                    .or_default() += 1;
            }
        })?;

        summary.chain_verified = self.verifier.verify(None, None)?.valid;
        Ok(summary)
    }

    // ── Verification ──────────────────────────────────────────────────────────

    pub fn verify(&self, from: Option<u64>, to: Option<u64>) -> CustosResult<VerificationReport> {
        self.verifier.verify(from, to)
    }

    pub fn verify_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        to: Option<u64>,
    ) -> CustosResult<VerificationReport> {
        self.verifier.verify_from_checkpoint(checkpoint, to)
    }

    /// Start the background schedule, unless `schedule_interval_secs` is 0.
    pub fn start_scheduled_verification(&self) -> CustosResult<Option<ScheduledVerifier>> {
        self.schedule_interval
            .map(|interval| ScheduledVerifier::start(Arc::clone(&self.verifier), interval))
            .transpose()
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    /// Record a checkpoint of the chain through `through_sequence`.
    ///
    /// The prefix is verified first; a checkpoint is never recorded over a
    /// broken chain.  The checkpoint is appended as a `governance_action`
    /// event, so it is itself part of the chain.  Once the prefix is archived
    /// elsewhere, the remaining suffix verifies with
    /// [`AuditService::verify_from_checkpoint`].  Nothing is deleted here.
    pub fn record_retention_checkpoint(
        &self,
        actor_id: &str,
        through_sequence: u64,
        reason: &str,
    ) -> CustosResult<RetentionCheckpoint> {
        self.verifier
            .verify(None, Some(through_sequence))?
            .into_result()?;

        let checkpoint = self
            .store
            .get_by_sequence(through_sequence)?
            .map(|event| event.checkpoint())
            .ok_or_else(|| CustosError::Validation {
                reason: format!("no event at sequence {through_sequence}"),
            })?;

        let candidate = EventCandidate::new(
            EventType::GovernanceAction,
            SERVICE_COMPONENT,
            RETENTION_CHECKPOINT_OPERATION,
            actor_id,
        )
        .with_details(json!({
            "checkpoint": checkpoint,
            "reason": reason,
        }));
        let receipt = self.record(candidate)?;

        info!(
            through_sequence,
            checkpoint_hash = %checkpoint.hash,
            recorded_at = receipt.sequence_number,
            "retention checkpoint recorded"
        );
        Ok(RetentionCheckpoint {
            checkpoint,
            receipt,
        })
    }

    /// The most recently recorded retention checkpoint, if any.
    pub fn latest_retention_checkpoint(&self) -> CustosResult<Option<Checkpoint>> {
        let filter = ExportFilter {
            event_type: Some(EventType::GovernanceAction),
            component: Some(SERVICE_COMPONENT.to_string()),
            operation: Some(RETENTION_CHECKPOINT_OPERATION.to_string()),
            ..ExportFilter::default()
        };
        let mut latest = None;
        self.scan(&filter, |mut events| {
            if let Some(event) = events.pop() {
                latest = Some(event);
            }
        })?;
        let Some(event) = latest else {
            return Ok(None);
        };

        let checkpoint = event
            .details()
            .and_then(|d| d.get("checkpoint"))
            .cloned()
            .ok_or_else(|| CustosError::Storage {
                reason: format!(
                    "retention event {} carries no checkpoint",
                    event.sequence_number()
                ),
            })?;
        serde_json::from_value(checkpoint)
            .map(Some)
            .map_err(|e| CustosError::Storage {
                reason: format!(
                    "retention event {} has a malformed checkpoint: {e}",
                    event.sequence_number()
                ),
            })
    }
}
