//! Local-first synchronization.
//!
//! - **Bridge**: forwards committed local changes to the remote and applies
//!   the remote change feeds locally
//! - **Hashing**: SHA256 content keys for audio payloads
//! - **Files**: atomic and JSONL helpers backing the remote outbox
//!
//! # Example
//!
//! ```ignore
//! use deskline::remote::MemoryServer;
//! use deskline::sync::SyncBridge;
//!
//! let server = MemoryServer::new();
//! let bridge = SyncBridge::start(store.clone(), Some(server.client(&device_id)));
//! store.lock()?.create_ticket(ticket)?;
//! bridge.flush().await;
//! ```

pub mod bridge;
pub mod file;
pub mod hash;

pub use bridge::{BridgeStats, RefreshCallback, SyncBridge};
pub use hash::{blob_key, is_blob_key, verify_blob};
