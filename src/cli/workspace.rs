//! Per-command environment: store, runtime, and sync bridge.
//!
//! Every command that touches data opens a [`Workspace`], does its work
//! through it, and calls [`Workspace::finish`] so local changes are handed
//! to the remote before the process exits.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{data_dir_for, load_config, resolve_db_path, resolve_sync_settings};
use crate::error::{Error, Result};
use crate::model::{RecordKey, User};
use crate::remote::{Remote, RemoteStore, create_remote};
use crate::storage::{LocalStore, SharedStore};
use crate::sync::SyncBridge;
use crate::validate::find_similar_names;

/// How long `finish` waits for queued remote writes.
const FINISH_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Workspace {
    // Dropped before the runtime so worker tasks are aborted first.
    bridge: SyncBridge<Remote>,
    store: SharedStore,
    runtime: tokio::runtime::Runtime,
    db_path: PathBuf,
    device_id: String,
}

impl Workspace {
    /// Open an existing database and start syncing.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the database does not exist.
    pub fn open(db_path: Option<&PathBuf>) -> Result<Self> {
        let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }
        Self::open_at(&db_path)
    }

    /// Open (creating if needed) the database at `db_path` and start syncing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, config, or runtime cannot be set up.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        let store = LocalStore::open(db_path)?;
        let device_id = store.device_id()?;

        let settings = resolve_sync_settings(&load_config()?);
        let remote = create_remote(&settings, &device_id, &data_dir_for(db_path));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let store: SharedStore = Arc::new(Mutex::new(store));
        let bridge = {
            let _guard = runtime.enter();
            SyncBridge::start(Arc::clone(&store), remote)
        };

        debug!(db = %db_path.display(), device = %device_id, "workspace open");
        Ok(Self {
            bridge,
            store,
            runtime,
            db_path: db_path.to_path_buf(),
            device_id,
        })
    }

    /// Lock the store. Do not hold the guard across [`Workspace::block_on`].
    pub fn store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn shared_store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub fn bridge(&self) -> &SyncBridge<Remote> {
        &self.bridge
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Look a user up by name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument`, with close spellings when there are any,
    /// if no user has this name.
    pub fn user_named(&self, name: &str) -> Result<User> {
        let store = self.store();
        if let Some(user) = store.find_user_by_name(name)? {
            return Ok(user);
        }
        let names: Vec<String> = store.list_users()?.into_iter().map(|u| u.name).collect();
        let similar = find_similar_names(name, &names, 3);
        if similar.is_empty() {
            Err(Error::InvalidArgument(format!("no user named '{name}'")))
        } else {
            Err(Error::InvalidArgument(format!(
                "no user named '{name}', did you mean: {}?",
                similar.join(", ")
            )))
        }
    }

    /// The user commands act as: `name` if given, else the first admin.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the user does not exist or there is no
    /// admin to default to.
    pub fn acting_user(&self, name: Option<&str>) -> Result<User> {
        if let Some(name) = name {
            return self.user_named(name);
        }
        self.store()
            .list_users()?
            .into_iter()
            .find(User::is_admin)
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "no admin user; run `deskline init --admin NAME --pin PIN` or pass --as USER"
                        .into(),
                )
            })
    }

    /// Key of the acting user, for stamping new records.
    ///
    /// # Errors
    ///
    /// Same as [`Workspace::acting_user`].
    pub fn acting_user_key(&self, name: Option<&str>) -> Result<RecordKey> {
        let user = self.acting_user(name)?;
        user.id
            .ok_or_else(|| Error::Other(format!("user {} has no ID", user.name)))
    }

    /// Hand every local change to the remote and give queued writes a
    /// short chance to go out.
    ///
    /// # Errors
    ///
    /// Never fails today; returns `Result` so callers can `?` it uniformly.
    pub fn finish(self) -> Result<()> {
        self.runtime.block_on(async {
            self.bridge.flush().await;
            if let Some(remote) = self.bridge.remote() {
                if remote.pending_writes() > 0 {
                    match tokio::time::timeout(FINISH_FLUSH_TIMEOUT, remote.flush_pending()).await {
                        Ok(Ok(sent)) => debug!(sent, "flushed queued writes"),
                        Ok(Err(e)) => warn!(error = %e, "could not flush queued writes"),
                        Err(_) => debug!("remote slow; queued writes stay in the outbox"),
                    }
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_db_is_not_initialized() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.db");
        assert!(matches!(Workspace::open(Some(&path)), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_acting_user_defaults_to_admin() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::open_at(&temp_dir.path().join("deskline.db")).unwrap();
        assert!(ws.acting_user(None).is_err());

        ws.store().add_user("Ravish", "1111", Role::Agent).unwrap();
        ws.store().add_user("Mina", "2222", Role::Admin).unwrap();

        assert_eq!(ws.acting_user(None).unwrap().name, "Mina");
        assert_eq!(ws.acting_user(Some("ravish")).unwrap().name, "Ravish");
        let err = ws.acting_user(Some("Ravsh")).unwrap_err();
        assert!(err.to_string().contains("Ravish"));
        ws.finish().unwrap();
    }
}
