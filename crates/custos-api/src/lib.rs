//! # custos-api
//!
//! Ingestion, export and compliance reporting over the CUSTOS audit chain.
//!
//! [`AuditService`] is the surface collaborators call: `submit` events,
//! `export` them page by page, produce an `accounting_report` for one
//! subject, `verify` the chain, and record retention checkpoints.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use custos_api::{config, AuditService, SubmitRequest};
//!
//! let cfg = config::from_file(Path::new("custos.toml"))?;
//! let service = AuditService::from_config(&cfg)?;
//!
//! let receipt = service.submit(SubmitRequest::phi_access(
//!     "summarization", "dr-chen", "patient/42", "clinical_notes", "treatment",
//! ))?;
//! ```

pub mod config;
pub mod request;
pub mod sanitize;
pub mod service;

pub use request::{LlmCall, ModelInference, SubmitRequest};
pub use sanitize::sanitize_details;
pub use service::{AuditService, RetentionCheckpoint};
