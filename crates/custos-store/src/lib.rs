//! # custos-store
//!
//! Append-only `EventStore` adapters for the CUSTOS audit chain.
//!
//! - [`InMemoryEventStore`]: `Vec` behind a `Mutex`; tests and demos.
//! - [`SqliteEventStore`]: durable, trigger-guarded, safe to share between
//!   processes through the head compare-and-swap.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use custos_store::SqliteEventStore;
//!
//! let store = SqliteEventStore::open("/var/lib/custos/audit.db", Duration::from_secs(5))?;
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
