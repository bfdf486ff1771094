//! Remote client factory.
//!
//! Picks a client from [`SyncSettings`]. `memory://` selects the in-process
//! server (useful for demos and tests); anything else is treated as an HTTP
//! endpoint.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use super::Remote;
use super::http::{HttpRemote, HttpRemoteConfig};
use super::memory::MemoryServer;
use crate::config::SyncSettings;

/// Endpoint that selects the in-process server.
pub const MEMORY_ENDPOINT: &str = "memory://";

/// Outbox file name inside the data directory.
pub const OUTBOX_FILE: &str = "outbox.jsonl";

/// Create the remote client for this device.
///
/// Returns `None` if sync is disabled, unconfigured, or the client cannot be
/// built; the caller then runs local-only.
#[must_use]
pub fn create_remote(settings: &SyncSettings, device_id: &str, data_dir: &Path) -> Option<Remote> {
    if !settings.is_configured() {
        debug!("sync disabled or unconfigured");
        return None;
    }
    let endpoint = settings.endpoint.as_deref()?.trim();
    let project_id = settings.project_id.as_deref()?.trim();

    if endpoint == MEMORY_ENDPOINT {
        return Some(Remote::Memory(MemoryServer::new().client(device_id)));
    }

    let config = HttpRemoteConfig {
        endpoint: endpoint.to_string(),
        project_id: project_id.to_string(),
        api_key: settings.api_key.clone(),
        device_id: device_id.to_string(),
        poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
        outbox_path: settings
            .offline_persistence
            .then(|| data_dir.join(OUTBOX_FILE)),
    };

    match HttpRemote::new(config) {
        Ok(remote) => Some(Remote::Http(remote)),
        Err(e) => {
            warn!(error = %e, "could not create remote client");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteStore;
    use tempfile::TempDir;

    fn settings(endpoint: &str) -> SyncSettings {
        SyncSettings {
            enabled: true,
            endpoint: Some(endpoint.to_string()),
            project_id: Some("desk".to_string()),
            ..SyncSettings::default()
        }
    }

    #[test]
    fn test_disabled_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let mut s = settings("https://docs.example");
        s.enabled = false;
        assert!(create_remote(&s, "dev", temp_dir.path()).is_none());
    }

    #[test]
    fn test_missing_project_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let mut s = settings("https://docs.example");
        s.project_id = None;
        assert!(create_remote(&s, "dev", temp_dir.path()).is_none());
    }

    #[test]
    fn test_memory_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let remote = create_remote(&settings("memory://"), "dev", temp_dir.path()).unwrap();
        assert_eq!(remote.name(), "memory");
    }

    #[test]
    fn test_http_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let remote =
            create_remote(&settings("https://docs.example"), "dev", temp_dir.path()).unwrap();
        assert_eq!(remote.name(), "http");
        assert_eq!(remote.pending_writes(), 0);
    }
}
