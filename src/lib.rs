//! Deskline - call center front office that keeps working offline.
//!
//! Recordings, tasks, tickets, case notes, and users live in an on-device
//! SQLite store. A sync bridge mirrors every local change to a remote
//! document store and applies other devices' changes as they arrive.
//!
//! # Architecture
//!
//! - [`model`] - Typed records and their remote document form
//! - [`storage`] - SQLite store with post-commit change notifications
//! - [`remote`] - Remote document store interface and clients
//! - [`sync`] - Sync bridge between the two stores
//! - [`retention`] - Ninety-day cleanup
//! - [`directory`] - User name lookups for display
//! - [`config`] - Paths and sync settings
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod remote;
pub mod retention;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
