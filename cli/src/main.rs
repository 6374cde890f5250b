//! CUSTOS command-line interface.
//!
//! Every subcommand prints JSON on stdout.  `verify`, `summary` and `watch`
//! exit with status 2 when the chain fails verification; any other error
//! exits 1.
//!
//! Usage:
//!   custos --db audit.db submit --event-type phi_access --component readmission \
//!       --operation read_encounters --actor dr-chen --subject patient/42
//!   custos --db audit.db verify
//!   custos --db audit.db export --subject patient/42 --limit 50
//!   custos --db audit.db accounting patient/42
//!   custos --db audit.db checkpoint --actor records-officer --through 999 --reason retention
//!   custos --db audit.db watch --interval-secs 60
//!   custos demo

mod demo;

use std::{path::PathBuf, process::ExitCode, thread, time::Duration};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use custos_api::{config, AuditService, SubmitRequest};
use custos_contracts::{
    config::{CustosConfig, StoreBackend},
    error::{CustosError, CustosResult},
    event::EventType,
    query::{ExportFilter, PageRequest},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// CUSTOS: an append-only, SHA-256 hash-chained audit trail.
#[derive(Parser)]
#[command(
    name = "custos",
    about = "Append-only, hash-chained audit trail",
    long_about = "Records audit events on a tamper-evident SHA-256 hash chain,\n\
                  exports them for compliance review, and verifies chain integrity."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file.  Overrides the configured store.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one audit event.
    Submit {
        #[arg(long)]
        event_type: String,
        #[arg(long)]
        component: String,
        #[arg(long)]
        operation: String,
        #[arg(long = "actor")]
        actor_id: String,
        #[arg(long = "subject")]
        subject_id: Option<String>,
        /// JSON object with additional context.
        #[arg(long)]
        details: Option<Value>,
    },
    /// Verify the hash chain.
    Verify {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
        /// Verify only the suffix after the latest retention checkpoint.
        #[arg(long, conflicts_with = "from")]
        from_checkpoint: bool,
    },
    /// Export one page of events matching the filters.
    Export {
        #[arg(long)]
        event_type: Option<EventType>,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        operation: Option<String>,
        #[arg(long = "actor")]
        actor_id: Option<String>,
        #[arg(long = "subject")]
        subject_id: Option<String>,
        /// Inclusive lower bound, RFC 3339.
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Inclusive upper bound, RFC 3339.
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// Cursor from a previous page.
        #[arg(long)]
        after: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Every event referencing one subject.
    Accounting { subject_id: String },
    /// Aggregate counts and verification status.
    Summary,
    /// Record a retention checkpoint through a sequence number.
    Checkpoint {
        #[arg(long = "actor")]
        actor_id: String,
        #[arg(long)]
        through: u64,
        #[arg(long)]
        reason: String,
    },
    /// Re-verify the whole chain on a schedule, printing each report, until
    /// a pass fails or `--passes` reports have been printed.
    Watch {
        /// Overrides `verify.schedule_interval_secs`.
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        passes: Option<u64>,
    },
    /// Walk through the clinical collaborator scenarios.  Without `--db` the
    /// chain is in memory and discarded on exit.
    Demo,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("custos error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CustosResult<bool> {
    let mut config = load_config(cli.config.as_deref(), cli.db)?;
    if let Command::Watch {
        interval_secs: Some(secs),
        ..
    } = cli.command
    {
        config.verify.schedule_interval_secs = secs;
    }
    let service = AuditService::from_config(&config)?;
    execute(&service, cli.command)
}

/// Returns `Ok(false)` when the chain failed verification.
fn execute(service: &AuditService, command: Command) -> CustosResult<bool> {
    match command {
        Command::Submit {
            event_type,
            component,
            operation,
            actor_id,
            subject_id,
            details,
        } => {
            let request = SubmitRequest {
                event_type,
                component,
                operation,
                actor_id,
                subject_id,
                details,
            };
            print_json(&service.submit(request)?)?;
            Ok(true)
        }
        Command::Verify {
            from,
            to,
            from_checkpoint,
        } => {
            let report = if from_checkpoint {
                let checkpoint =
                    service
                        .latest_retention_checkpoint()?
                        .ok_or_else(|| CustosError::Validation {
                            reason: "no retention checkpoint has been recorded".to_string(),
                        })?;
                service.verify_from_checkpoint(&checkpoint, to)?
            } else {
                service.verify(from, to)?
            };
            print_json(&report)?;
            Ok(report.valid)
        }
        Command::Export {
            event_type,
            component,
            operation,
            actor_id,
            subject_id,
            start,
            end,
            after,
            limit,
        } => {
            let filter = ExportFilter {
                event_type,
                component,
                operation,
                actor_id,
                subject_id,
                start_time: start,
                end_time: end,
            };
            let page = PageRequest {
                after_sequence: after,
                limit,
            };
            print_json(&service.export(&filter, page)?)?;
            Ok(true)
        }
        Command::Accounting { subject_id } => {
            print_json(&service.accounting_report(&subject_id)?)?;
            Ok(true)
        }
        Command::Summary => {
            let summary = service.summary()?;
            print_json(&summary)?;
            Ok(summary.chain_verified)
        }
        Command::Checkpoint {
            actor_id,
            through,
            reason,
        } => {
            print_json(&service.record_retention_checkpoint(&actor_id, through, &reason)?)?;
            Ok(true)
        }
        Command::Watch { passes, .. } => watch(service, passes),
        Command::Demo => demo::run(service),
    }
}

/// Print every scheduled report as it lands.  Returns `Ok(false)` on the
/// first failed pass.
fn watch(service: &AuditService, passes: Option<u64>) -> CustosResult<bool> {
    let scheduled = service
        .start_scheduled_verification()?
        .ok_or_else(|| CustosError::Config {
            reason: "verify.schedule_interval_secs is 0; scheduled verification is disabled"
                .to_string(),
        })?;

    let mut printed = 0u64;
    let mut last_seen = None;
    loop {
        if let Some(report) = scheduled.latest() {
            if last_seen != Some(report.verified_at) {
                last_seen = Some(report.verified_at);
                printed += 1;
                print_json(&report)?;
                if !report.valid {
                    return Ok(false);
                }
                if passes.is_some_and(|limit| printed >= limit) {
                    return Ok(true);
                }
            }
        }
        thread::sleep(Duration::from_millis(250));
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<&std::path::Path>, db: Option<PathBuf>) -> CustosResult<CustosConfig> {
    let mut config = match path {
        Some(path) => config::from_file(path)?,
        None => CustosConfig::default(),
    };
    if let Some(db) = db {
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = db;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> CustosResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CustosError::Storage {
        reason: format!("failed to serialize output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}
