//! `custos demo`: clinical collaborators writing to one audit chain.
//!
//! Four collaborators record what they do (a note summarizer, a
//! readmission model, a patient data query path and a prior authorization
//! workflow), then a compliance officer verifies the chain, pulls an
//! accounting of disclosures for one patient and records a retention
//! checkpoint.  An attempt to overwrite history is refused along the way.

use serde_json::json;

use custos_api::{AuditService, LlmCall, ModelInference, SubmitRequest};
use custos_contracts::{
    error::{CustosError, CustosResult},
    event::{AuditEvent, EventBody},
};
use custos_core::{hash_event, EventStore};

const PATIENT: &str = "patient-101";

pub fn run(service: &AuditService) -> CustosResult<bool> {
    print_banner();

    record_collaborator_events(service)?;
    let valid = verify_chain(service)?;
    accounting_of_disclosures(service)?;
    attempt_overwrite(service)?;
    retention_checkpoint(service)?;
    print_summary(service)?;

    Ok(valid)
}

// ── Step 1: collaborators record events ───────────────────────────────────────

fn record_collaborator_events(service: &AuditService) -> CustosResult<()> {
    println!("=== Step 1: Collaborators record events ===");
    println!();

    let requests = [
        SubmitRequest::authentication("gateway", "dr-chen", "sso", true),
        SubmitRequest::phi_access(
            "note-summarizer",
            "dr-chen",
            PATIENT,
            "clinical_notes",
            "treatment",
        ),
        SubmitRequest::llm_call(
            "note-summarizer",
            "svc-summarizer",
            &LlmCall {
                model: "clinical-summarizer-small".to_string(),
                prompt_tokens: 1840,
                completion_tokens: 312,
                latency_ms: 910.0,
                cost_usd: 0.0031,
                purpose: "discharge_summary".to_string(),
            },
        ),
        SubmitRequest::model_inference(
            "readmission",
            "svc-readmission",
            &ModelInference {
                model_id: "readmit-gbm".to_string(),
                model_version: "3.1.0".to_string(),
                input_hash: "4be1".repeat(16),
                output_summary: "30-day readmission risk 0.27".to_string(),
                latency_ms: 38.0,
                cost_usd: 0.0,
            },
        ),
        SubmitRequest::phi_access(
            "patient-query",
            "nurse-okafor",
            PATIENT,
            "medications",
            "treatment",
        ),
        SubmitRequest::emergency_access(
            "patient-query",
            "dr-ruiz",
            "patient-204",
            "unresponsive on arrival; no consent on file",
        ),
        SubmitRequest::phi_disclosure(
            "prior-auth",
            "svc-prior-auth",
            PATIENT,
            "payer-northwind",
            &["diagnoses", "procedures"],
            "payment",
        ),
        SubmitRequest::config_change(
            "gateway",
            "ops-lee",
            "session_timeout_secs",
            json!(900),
            json!(600),
        ),
    ];

    for request in requests {
        let label = format!("{} / {}", request.component, request.operation);
        let receipt = service.submit(request)?;
        println!(
            "  #{:<3} {:<40} {}",
            receipt.sequence_number,
            label,
            &receipt.hash[..16]
        );
    }

    // Collaborator-supplied details are sanitized by the builders.
    let sanitized = service.submit(SubmitRequest::governance_action(
        "prior-auth",
        "privacy-officer",
        "approve_release",
        json!({ "ticket": "PRIV-88", "payer_phone": "555-0100" }),
    ))?;
    println!(
        "  #{:<3} prior-auth / approve_release (payer_phone stored as [REDACTED])",
        sanitized.sequence_number
    );

    match service.submit(SubmitRequest::new(
        "unknown_type",
        "gateway",
        "probe",
        "svc-probe",
    )) {
        Err(CustosError::Validation { reason }) => {
            println!("  Rejected unknown event type: {}", reason)
        }
        other => println!("  UNEXPECTED: {:?}", other),
    }
    println!();
    Ok(())
}

// ── Step 2: verification ──────────────────────────────────────────────────────

fn verify_chain(service: &AuditService) -> CustosResult<bool> {
    println!("=== Step 2: Verify the chain ===");
    println!();

    let report = service.verify(None, None)?;
    if report.valid {
        println!("  Chain intact: {} events verified", report.verified_count);
    } else {
        println!(
            "  INTEGRITY FAILURE at sequence {:?}: {:?}",
            report.first_failure_sequence, report.failure_reason
        );
    }
    println!();
    Ok(report.valid)
}

// ── Step 3: accounting of disclosures ─────────────────────────────────────────

fn accounting_of_disclosures(service: &AuditService) -> CustosResult<()> {
    println!("=== Step 3: Accounting report for {PATIENT} ===");
    println!();

    let report = service.accounting_report(PATIENT)?;
    for event in &report.events {
        println!(
            "  #{:<3} {}  {:<16} {:<15} by {}",
            event.sequence_number(),
            event.timestamp().format("%Y-%m-%d %H:%M:%S"),
            event.operation(),
            event.component(),
            event.actor_id()
        );
    }
    println!("  {} events reference {PATIENT}", report.events.len());
    println!();
    Ok(())
}

// ── Step 4: history cannot be rewritten ───────────────────────────────────────

fn attempt_overwrite(service: &AuditService) -> CustosResult<()> {
    println!("=== Step 4: Attempt to rewrite history ===");
    println!();

    let store = service.store();
    let Some(original) = store.get_by_sequence(1)? else {
        return Ok(());
    };

    let mut body: EventBody = original.body().clone();
    body.details = Some(json!({ "purpose": "marketing" }));
    let forged = AuditEvent::from_parts(body.clone(), hash_event(&body));

    match store.append(forged, &store.head()?) {
        Err(e @ CustosError::ImmutabilityViolation { .. }) => println!("  Refused: {}", e),
        other => println!("  UNEXPECTED: {:?}", other),
    }

    let unchanged = store.get_by_sequence(1)?.is_some_and(|e| e == original);
    println!("  Event #1 unchanged: {}", unchanged);
    println!();
    Ok(())
}

// ── Step 5: retention checkpoint ──────────────────────────────────────────────

fn retention_checkpoint(service: &AuditService) -> CustosResult<()> {
    println!("=== Step 5: Retention checkpoint ===");
    println!();

    let through = service.head()?.sequence_number.unwrap_or(0);
    let recorded = service.record_retention_checkpoint(
        "records-officer",
        through,
        "demo retention window",
    )?;
    println!(
        "  Checkpoint through #{} recorded as event #{}",
        recorded.checkpoint.sequence_number, recorded.receipt.sequence_number
    );

    service.submit(SubmitRequest::authentication(
        "gateway",
        "dr-chen",
        "sso",
        false,
    ))?;

    let suffix = service.verify_from_checkpoint(&recorded.checkpoint, None)?;
    println!(
        "  Suffix after checkpoint: valid={} ({} events)",
        suffix.valid, suffix.verified_count
    );
    println!();
    Ok(())
}

// ── Step 6: summary ───────────────────────────────────────────────────────────

fn print_summary(service: &AuditService) -> CustosResult<()> {
    println!("=== Step 6: Summary ===");
    println!();

    let summary = service.summary()?;
    println!("  Total events:   {}", summary.total_events);
    println!("  Chain verified: {}", summary.chain_verified);
    for (event_type, count) in &summary.by_event_type {
        println!("    {:<18} {}", event_type, count);
    }
    println!();
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("CUSTOS: Hash-Chained Audit Trail");
    println!("Clinical Collaborator Demo");
    println!("================================");
    println!();
    println!("Every append:");
    println!("  [1] Validate the submission (unknown types and missing fields are rejected)");
    println!("  [2] Assign the next sequence number and link to the previous event's hash");
    println!("  [3] Hash the canonical encoding of every field with SHA-256");
    println!("  [4] Compare-and-swap the chain head; retry on conflict");
    println!();
}
