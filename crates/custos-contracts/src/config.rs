//! Configuration schema.
//!
//! Every section and field is defaulted, so an empty TOML document is a
//! valid configuration.  Parsing lives in `custos-api`; this crate only
//! defines the shape.
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "/var/lib/custos/audit.db"
//!
//! [chain]
//! max_retries = 8
//!
//! [verify]
//! chunk_size = 1000
//! schedule_interval_secs = 600
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustosConfig {
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub export: ExportConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file for the SQLite backend.  Ignored by the memory backend.
    pub path: PathBuf,

    /// How long a SQLite writer waits on a lock held by another process.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("custos.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Chain engine limits and the retry policy for head conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Retries after a head conflict, not counting the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Down-jitter applied to each backoff (0.25 = up to 25% shorter).
    pub jitter_factor: f64,
    /// Upper bound on component, operation, actor_id and subject_id length.
    pub max_identifier_len: usize,
    /// Upper bound on the compact JSON size of `details`.
    pub max_details_bytes: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 2,
            max_backoff_ms: 100,
            jitter_factor: 0.25,
            max_identifier_len: 256,
            max_details_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_page_size: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Events read per chunk.  No lock is held between chunks.
    pub chunk_size: usize,

    /// Interval between scheduled full passes.  0 disables the schedule.
    pub schedule_interval_secs: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            schedule_interval_secs: 300,
        }
    }
}
