//! SQLite storage layer for Deskline.
//!
//! This module provides the on-device store with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Post-commit change notifications for the sync bridge
//! - A content-addressed blob table for audio payloads
//!
//! # Submodules
//!
//! - [`changes`] - Change sets and the observer hook
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod changes;
pub mod schema;
pub mod sqlite;

pub use changes::{Change, ChangeObserver, ChangeSet, Origin};
pub use sqlite::{DashboardCounts, LocalStore, MutationContext};

/// Local store shared between the CLI and the sync bridge's workers.
///
/// The lock is only ever held for synchronous store calls, never across an
/// `.await`.
pub type SharedStore = std::sync::Arc<std::sync::Mutex<LocalStore>>;
