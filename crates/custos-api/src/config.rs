//! Loading `CustosConfig` from TOML and opening the configured store.
//!
//! ```rust,ignore
//! use custos_api::config;
//!
//! let cfg = config::from_file(Path::new("custos.toml"))?;
//! let store = config::open_store(&cfg.store)?;
//! ```

use std::{path::Path, sync::Arc, time::Duration};

use tracing::info;

use custos_contracts::{
    config::{CustosConfig, StoreBackend, StoreConfig},
    error::{CustosError, CustosResult},
};
use custos_core::EventStore;
use custos_store::{InMemoryEventStore, SqliteEventStore};

/// Parse a configuration document.
///
/// # Errors
///
/// Returns `CustosError::Config` if the TOML is malformed or does not match
/// the `CustosConfig` schema.
pub fn from_toml_str(s: &str) -> CustosResult<CustosConfig> {
    toml::from_str(s).map_err(|e| CustosError::Config {
        reason: format!("failed to parse custos TOML: {}", e),
    })
}

/// Read and parse a configuration file.
///
/// # Errors
///
/// Returns `CustosError::Config` if the file cannot be read or its contents
/// are not a valid configuration.
pub fn from_file(path: &Path) -> CustosResult<CustosConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| CustosError::Config {
        reason: format!("failed to read config file '{}': {}", path.display(), e),
    })?;
    from_toml_str(&contents)
}

/// Open the store described by `config`.
pub fn open_store(config: &StoreConfig) -> CustosResult<Arc<dyn EventStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("using in-memory event store; events will not survive the process");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StoreBackend::Sqlite => Ok(Arc::new(SqliteEventStore::open(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )?)),
    }
}
