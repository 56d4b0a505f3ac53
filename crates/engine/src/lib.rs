//! BinVault Engine - snapshot orchestration over the core storage layer
//!
//! This crate provides:
//! - Patch records (ULID ids, tag names, summary counters)
//! - The patch index: the tag -> manifest registry
//! - Working-tree traversal
//! - Snapshot creation with a bounded worker pool
//! - Checkout of a tagged snapshot into a destination root
//! - Engine configuration loaded from `.bv/config.toml`

pub mod checkout;
pub mod config;
pub mod index;
pub mod patch;
pub mod snapshot;
pub mod traverse;

// Re-exports
pub use checkout::{checkout, CheckoutError, CheckoutSummary};
pub use config::{Config, ConfigError, UnreadablePolicy};
pub use index::{IndexError, PatchIndex};
pub use patch::{valid_tag, PatchRecord, PatchStats};
pub use snapshot::{create_snapshot, SnapshotError, SnapshotSummary};
pub use traverse::{walk, SkippedEntry, WalkedEntry, Walker};
