//! SQLite implementation of `EventStore`.
//!
//! The append-only rule is enforced by the database itself, not just by the
//! absence of update/delete methods here:
//!
//! - `BEFORE UPDATE` and `BEFORE DELETE` triggers on `audit_events` abort
//!   with an `ImmutabilityViolation` message, so even a privileged
//!   connection issuing raw SQL cannot rewrite a row while they exist.
//! - A `BEFORE INSERT` trigger rejects any row that is not `max + 1`.
//! - `chain_head` holds exactly one row; it cannot be deleted, and a trigger
//!   refuses any head that does not name the newest persisted event.
//!
//! An append is one `IMMEDIATE` transaction: read head, admission check,
//! insert row, conditional head update (`WHERE` the head still equals the
//! writer's expected head), commit.  The conditional update is the
//! compare-and-swap that keeps several processes sharing one database file
//! on a single linear chain.  A writer that finds the database locked by
//! another process gets the same `ConcurrencyConflict` as one that lost the
//! swap, so the engine's backoff covers both.
//!
//! File-backed stores open a second connection for reads.  In WAL mode it
//! sees only committed transactions and does not wait on the writer.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension,
    TransactionBehavior,
};
use tracing::{debug, info};

use custos_contracts::{
    error::{CustosError, CustosResult},
    event::{AuditEvent, ChainHead, EventBody, EventId, EventType, GENESIS_HASH},
    query::ExportFilter,
};
use custos_core::traits::{check_append, report_violation, EventStore};

/// Marker raised by the guard triggers and recognised when mapping errors.
const IMMUTABILITY_MARKER: &str = "ImmutabilityViolation";
const SEQUENCE_MARKER: &str = "SequenceRejected";

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS audit_events (
        sequence_number INTEGER PRIMARY KEY,
        event_id TEXT NOT NULL UNIQUE,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        component TEXT NOT NULL,
        operation TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        subject_id TEXT,
        details TEXT,
        previous_hash TEXT NOT NULL,
        hash TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_subject ON audit_events(subject_id);
    CREATE INDEX IF NOT EXISTS idx_audit_events_component ON audit_events(component);
    CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events(event_type);
    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);

    CREATE TABLE IF NOT EXISTS chain_head (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        sequence_number INTEGER,
        hash TEXT NOT NULL
    );

    CREATE TRIGGER IF NOT EXISTS audit_events_no_update
    BEFORE UPDATE ON audit_events
    BEGIN
        SELECT RAISE(ABORT, 'ImmutabilityViolation: audit events cannot be updated');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
    BEFORE DELETE ON audit_events
    BEGIN
        SELECT RAISE(ABORT, 'ImmutabilityViolation: audit events cannot be deleted');
    END;

    CREATE TRIGGER IF NOT EXISTS audit_events_contiguous
    BEFORE INSERT ON audit_events
    WHEN NEW.sequence_number IS NOT
        COALESCE((SELECT MAX(sequence_number) FROM audit_events), -1) + 1
    BEGIN
        SELECT RAISE(ABORT, 'SequenceRejected: sequence_number must be max + 1');
    END;

    CREATE TRIGGER IF NOT EXISTS chain_head_no_delete
    BEFORE DELETE ON chain_head
    BEGIN
        SELECT RAISE(ABORT, 'ImmutabilityViolation: chain head cannot be deleted');
    END;

    CREATE TRIGGER IF NOT EXISTS chain_head_tracks_newest
    BEFORE UPDATE ON chain_head
    WHEN NEW.sequence_number IS NOT (SELECT MAX(sequence_number) FROM audit_events)
      OR NEW.hash IS NOT (SELECT hash FROM audit_events WHERE sequence_number = NEW.sequence_number)
    BEGIN
        SELECT RAISE(ABORT, 'ImmutabilityViolation: chain head must name the newest event');
    END;
";

const EVENT_COLUMNS: &str = "sequence_number, event_id, timestamp, event_type, component, \
     operation, actor_id, subject_id, details, previous_hash, hash";

/// A durable, append-only event store backed by SQLite.
pub struct SqliteEventStore {
    writer: Mutex<Connection>,
    /// Separate read connection for file-backed stores; `None` for an
    /// in-memory database, which cannot be shared between connections.
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteEventStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> CustosResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| CustosError::Storage {
                    reason: format!("failed to create directory {}: {e}", parent.display()),
                })?;
            }
        }

        let writer = open_connection(path, busy_timeout)?;
        initialize(&writer)?;
        let reader = open_connection(path, busy_timeout)?;

        info!(path = %path.display(), "opened sqlite event store");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database (for tests and the demo).
    pub fn open_in_memory() -> CustosResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| map_sqlite("failed to open in-memory database", e))?;
        initialize(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock_writer(&self) -> CustosResult<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|e| CustosError::Storage {
            reason: format!("sqlite writer lock poisoned: {e}"),
        })
    }

    fn lock_reader(&self) -> CustosResult<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader.lock().map_err(|e| CustosError::Storage {
                reason: format!("sqlite reader lock poisoned: {e}"),
            }),
            None => self.lock_writer(),
        }
    }

    fn select(&self, clause: &str, values: Vec<Value>) -> CustosResult<Vec<AuditEvent>> {
        let conn = self.lock_reader()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM audit_events {clause}");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_sqlite("failed to prepare event query", e))?;
        let rows = stmt
            .query_map(params_from_iter(values), read_row)
            .map_err(|e| map_sqlite("failed to query events", e))?;

        let mut events = Vec::new();
        for row in rows {
            let row = row.map_err(|e| map_sqlite("failed to read event row", e))?;
            events.push(row.into_event()?);
        }
        Ok(events)
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> CustosResult<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        map_sqlite(&format!("failed to open database at {}", path.display()), e)
    })?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| map_sqlite("failed to set busy timeout", e))?;
    Ok(conn)
}

fn initialize(conn: &Connection) -> CustosResult<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
        .map_err(|e| map_sqlite("failed to set pragmas", e))?;
    conn.execute_batch(SCHEMA)
        .map_err(|e| map_sqlite("failed to create schema", e))?;
    conn.execute(
        "INSERT OR IGNORE INTO chain_head (id, sequence_number, hash) VALUES (1, NULL, ?1)",
        params![GENESIS_HASH],
    )
    .map_err(|e| map_sqlite("failed to seed chain head", e))?;
    Ok(())
}

impl EventStore for SqliteEventStore {
    fn head(&self) -> CustosResult<ChainHead> {
        let conn = self.lock_reader()?;
        read_head(&conn)
    }

    fn append(&self, event: AuditEvent, expected_head: &ChainHead) -> CustosResult<()> {
        let mut conn = self.lock_writer()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| map_append("failed to start append transaction", e, expected_head))?;

        let current = read_head(&tx)?;
        if let Err(e) = check_append(&current, expected_head, &event) {
            report_violation(&e);
            return Err(e);
        }

        let id_taken: Option<i64> = tx
            .query_row(
                "SELECT sequence_number FROM audit_events WHERE event_id = ?1",
                params![event.event_id().to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| map_sqlite("failed to check event id", e))?;
        if id_taken.is_some() {
            let err = CustosError::ImmutabilityViolation {
                sequence_number: Some(event.sequence_number()),
                reason: format!("event id {} is already persisted", event.event_id()),
            };
            report_violation(&err);
            return Err(err);
        }

        let sequence_number = to_sql_int(event.sequence_number())?;
        let details = event.details().map(|d| d.to_string());
        let inserted = tx.execute(
            "INSERT INTO audit_events (sequence_number, event_id, timestamp, event_type, component,
                operation, actor_id, subject_id, details, previous_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sequence_number,
                event.event_id().to_string(),
                format_timestamp(&event.timestamp()),
                event.event_type().as_str(),
                event.component(),
                event.operation(),
                event.actor_id(),
                event.subject_id(),
                details,
                event.previous_hash(),
                event.hash(),
            ],
        );
        if let Err(e) = inserted {
            if e.to_string().contains(SEQUENCE_MARKER) {
                return Err(CustosError::SequenceRejected {
                    expected: next_stored_sequence(&tx)?,
                    actual: event.sequence_number(),
                });
            }
            return Err(map_append("failed to insert event", e, expected_head));
        }

        let expected_sequence = expected_head.sequence_number.map(to_sql_int).transpose()?;
        let swapped = tx
            .execute(
                "UPDATE chain_head SET sequence_number = ?1, hash = ?2
                 WHERE id = 1 AND sequence_number IS ?3 AND hash = ?4",
                params![sequence_number, event.hash(), expected_sequence, expected_head.hash],
            )
            .map_err(|e| map_sqlite("failed to advance chain head", e))?;
        if swapped != 1 {
            // Dropping `tx` rolls back the insert.
            return Err(CustosError::ConcurrencyConflict {
                expected_sequence: expected_head.next_sequence(),
                attempts: 1,
            });
        }

        tx.commit()
            .map_err(|e| map_append("failed to commit append transaction", e, expected_head))?;

        debug!(sequence_number = event.sequence_number(), "event committed");
        Ok(())
    }

    fn get_by_sequence_range(&self, start: u64, end: u64) -> CustosResult<Vec<AuditEvent>> {
        self.select(
            "WHERE sequence_number BETWEEN ?1 AND ?2 ORDER BY sequence_number",
            vec![
                Value::Integer(to_sql_int(start)?),
                Value::Integer(to_sql_int(end.min(i64::MAX as u64))?),
            ],
        )
    }

    fn get_by_id(&self, event_id: &EventId) -> CustosResult<Option<AuditEvent>> {
        Ok(self
            .select(
                "WHERE event_id = ?1",
                vec![Value::Text(event_id.to_string())],
            )?
            .into_iter()
            .next())
    }

    fn query(
        &self,
        filter: &ExportFilter,
        after_sequence: Option<u64>,
        limit: usize,
    ) -> CustosResult<Vec<AuditEvent>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(after) = after_sequence {
            conditions.push("sequence_number > ?");
            values.push(Value::Integer(to_sql_int(after.min(i64::MAX as u64))?));
        }
        if let Some(t) = filter.event_type {
            conditions.push("event_type = ?");
            values.push(Value::Text(t.as_str().to_string()));
        }
        let text_filters = [
            ("component = ?", &filter.component),
            ("operation = ?", &filter.operation),
            ("actor_id = ?", &filter.actor_id),
            ("subject_id = ?", &filter.subject_id),
        ];
        for (condition, value) in text_filters {
            if let Some(v) = value {
                conditions.push(condition);
                values.push(Value::Text(v.clone()));
            }
        }
        // Stored timestamps are fixed-width RFC 3339 UTC, so text order is
        // chronological order.
        if let Some(start) = filter.start_time {
            conditions.push("timestamp >= ?");
            values.push(Value::Text(format_timestamp(&start)));
        }
        if let Some(end) = filter.end_time {
            conditions.push("timestamp <= ?");
            values.push(Value::Text(format_timestamp(&end)));
        }

        let mut clause = String::new();
        if !conditions.is_empty() {
            clause.push_str("WHERE ");
            clause.push_str(&conditions.join(" AND "));
        }
        clause.push_str(" ORDER BY sequence_number LIMIT ?");
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        self.select(&clause, values)
    }

    fn count(&self) -> CustosResult<u64> {
        let conn = self.lock_reader()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))
            .map_err(|e| map_sqlite("failed to count events", e))?;
        from_sql_int(n)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

/// A row exactly as stored, before any parsing that could fail.
struct RawEventRow {
    sequence_number: i64,
    event_id: String,
    timestamp: String,
    event_type: String,
    component: String,
    operation: String,
    actor_id: String,
    subject_id: Option<String>,
    details: Option<String>,
    previous_hash: String,
    hash: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEventRow> {
    Ok(RawEventRow {
        sequence_number: row.get(0)?,
        event_id: row.get(1)?,
        timestamp: row.get(2)?,
        event_type: row.get(3)?,
        component: row.get(4)?,
        operation: row.get(5)?,
        actor_id: row.get(6)?,
        subject_id: row.get(7)?,
        details: row.get(8)?,
        previous_hash: row.get(9)?,
        hash: row.get(10)?,
    })
}

impl RawEventRow {
    fn into_event(self) -> CustosResult<AuditEvent> {
        let sequence_number = from_sql_int(self.sequence_number)?;
        let corrupt = |what: &str, e: &dyn std::fmt::Display| CustosError::Storage {
            reason: format!("corrupt {what} in row at sequence {sequence_number}: {e}"),
        };

        let event_id = EventId::parse(&self.event_id).map_err(|e| corrupt("event_id", &e))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt("timestamp", &e))?
            .with_timezone(&Utc);
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|e: CustosError| corrupt("event_type", &e))?;
        let details = self
            .details
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| corrupt("details", &e))?;

        let body = EventBody {
            event_id,
            sequence_number,
            timestamp,
            event_type,
            component: self.component,
            operation: self.operation,
            actor_id: self.actor_id,
            subject_id: self.subject_id,
            details,
            previous_hash: self.previous_hash,
        };
        Ok(AuditEvent::from_parts(body, self.hash))
    }
}

fn read_head(conn: &Connection) -> CustosResult<ChainHead> {
    let (sequence_number, hash): (Option<i64>, String) = conn
        .query_row(
            "SELECT sequence_number, hash FROM chain_head WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| map_sqlite("failed to read chain head", e))?;
    Ok(ChainHead {
        sequence_number: sequence_number.map(from_sql_int).transpose()?,
        hash,
    })
}

/// The sequence number the contiguity trigger will accept next.
fn next_stored_sequence(conn: &Connection) -> CustosResult<u64> {
    let next: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sequence_number), -1) + 1 FROM audit_events",
            [],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite("failed to read newest sequence", e))?;
    from_sql_int(next)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_sql_int(n: u64) -> CustosResult<i64> {
    i64::try_from(n).map_err(|_| CustosError::Storage {
        reason: format!("sequence number {n} exceeds sqlite integer range"),
    })
}

fn from_sql_int(n: i64) -> CustosResult<u64> {
    u64::try_from(n).map_err(|_| CustosError::Storage {
        reason: format!("negative sequence number {n} in storage"),
    })
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Map an error on the append path.  Lock contention with another
/// connection is a head conflict the engine retries.
fn map_append(context: &str, e: rusqlite::Error, expected_head: &ChainHead) -> CustosError {
    if is_busy(&e) {
        debug!(context, error = %e, "database busy; reporting head conflict");
        return CustosError::ConcurrencyConflict {
            expected_sequence: expected_head.next_sequence(),
            attempts: 1,
        };
    }
    map_sqlite(context, e)
}

/// Map a SQLite error, recognising trigger-raised immutability violations.
pub(crate) fn map_sqlite(context: &str, e: rusqlite::Error) -> CustosError {
    let message = e.to_string();
    if message.contains(IMMUTABILITY_MARKER) {
        let err = CustosError::ImmutabilityViolation {
            sequence_number: None,
            reason: message,
        };
        report_violation(&err);
        return err;
    }
    CustosError::Storage {
        reason: format!("{context}: {message}"),
    }
}
