//! # custos-core
//!
//! The write path of the CUSTOS audit chain.
//!
//! This crate provides:
//! - The `EventStore` trait, the append-only storage boundary
//! - Canonical SHA-256 event hashing
//! - The `ChainEngine`, the single logical writer that orders, links and
//!   hashes every event
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use custos_core::ChainEngine;
//!
//! let engine = ChainEngine::new(Arc::new(store), &config.chain);
//! let receipt = engine.append(candidate)?;
//! ```

pub mod engine;
pub mod hash;
pub mod retry;
pub mod traits;

pub use engine::ChainEngine;
pub use hash::{hash_event, hash_matches};
pub use traits::EventStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
