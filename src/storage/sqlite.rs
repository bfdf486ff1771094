//! SQLite storage implementation.
//!
//! This module provides the local store for Deskline using SQLite.
//! Every write goes through [`LocalStore::mutate`], which runs the work in an
//! IMMEDIATE transaction, commits, and only then hands the collected changes
//! to the registered observers.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    CaseNote, Collection, Document, Record, RecordKey, Recording, RecordingPatch, Role, Task,
    TaskPatch, TaskStatus, Ticket, TicketPatch, TicketStatus, User, patch_document,
    ticket::{client_for_column, format_description},
};
use crate::storage::changes::{Change, ChangeObserver, ChangeSet, Origin};
use crate::storage::schema::{apply_schema, columns};
use crate::sync::hash::{blob_key, verify_blob};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// SQLite-based local store.
pub struct LocalStore {
    conn: Connection,
    observers: Vec<Arc<dyn ChangeObserver>>,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.conn.path())
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Context for a mutation, collecting the changes it makes.
///
/// Passed to mutation closures; the changes are published to observers
/// after the transaction commits.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    pub origin: Origin,
    pub changes: Vec<Change>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, origin: Origin) -> Self {
        Self {
            op_name: op_name.to_string(),
            origin,
            changes: Vec::new(),
        }
    }

    /// Record a change made inside the transaction.
    pub fn record(&mut self, change: Change) {
        self.changes.push(change);
    }
}

/// Headline counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    /// Calls recorded since midnight (UTC).
    pub calls_today: usize,
    pub pending_tasks: usize,
    pub open_tickets: usize,
}

impl LocalStore {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            observers: Vec::new(),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            observers: Vec::new(),
        })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register an observer for committed changes.
    pub fn observe(&mut self, observer: Arc<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Commits (or rolls back on error)
    /// 4. Publishes the collected changes to every observer
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on
    /// error and observers see nothing.
    pub fn mutate<F, R>(&mut self, op: &str, origin: Origin, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, origin);
        let result = f(&tx, &mut ctx)?;
        tx.commit()?;

        if !ctx.changes.is_empty() {
            debug!(op, ?origin, changes = ctx.changes.len(), "committed");
            let set = ChangeSet {
                op: ctx.op_name,
                origin,
                changes: ctx.changes,
            };
            for observer in &self.observers {
                observer.on_commit(&set);
            }
        }

        Ok(result)
    }

    // ==================
    // Generic record CRUD
    // ==================

    /// Insert a new record.
    ///
    /// Assigns the next numeric key unless the record already carries one.
    /// An explicit numeric key advances the counter past it.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the explicit key exists or the
    /// insert fails.
    pub fn insert<T: Record>(&mut self, record: T) -> Result<T> {
        let op = format!("insert_{}", T::COLLECTION);
        self.mutate(&op, Origin::Local, |tx, ctx| insert_in_tx(tx, ctx, record))
    }

    /// Fetch a record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored row does not decode.
    pub fn get<T: Record>(&self, key: &RecordKey) -> Result<Option<T>> {
        read_document(&self.conn, T::COLLECTION, key)?
            .map(|doc| T::from_document(key.clone(), doc))
            .transpose()
    }

    /// Fetch a record by key, failing with `RecordNotFound` if absent.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if no record has this key.
    pub fn require<T: Record>(&self, key: &RecordKey) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| Error::not_found(T::COLLECTION, key))
    }

    /// All records of a collection in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list<T: Record>(&self) -> Result<Vec<T>> {
        query_records(&self.conn, "ORDER BY rowid", [])
    }

    /// Apply a partial update.
    ///
    /// Only the fields set in `patch` are written and published.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the record is absent, or `InvalidDocument`
    /// if the patched record would not decode.
    pub fn update<T: Record>(&mut self, key: &RecordKey, patch: &T::Patch) -> Result<T> {
        let patch = patch_document(patch)?;
        let op = format!("update_{}", T::COLLECTION);
        self.mutate(&op, Origin::Local, |tx, ctx| update_in_tx(tx, ctx, key, patch))
    }

    /// Full-field upsert of a record that carries its key.
    ///
    /// Publishes `Created` for a new key, or `Updated` with only the fields
    /// that differ from the stored row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record has no key.
    pub fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        let key = record
            .key()
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("{} put without a key", T::COLLECTION)))?;
        let doc = record.to_document()?;
        let op = format!("put_{}", T::COLLECTION);
        self.mutate(&op, Origin::Local, |tx, ctx| {
            put_in_tx(tx, ctx, T::COLLECTION, &key, doc).map(|_| ())
        })
    }

    /// Hard delete by key. Returns `false` if there was nothing to delete.
    ///
    /// Deleting a recording also deletes its tickets and, once unreferenced,
    /// its audio payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete<T: Record>(&mut self, key: &RecordKey) -> Result<bool> {
        let op = format!("delete_{}", T::COLLECTION);
        self.mutate(&op, Origin::Local, |tx, ctx| {
            delete_in_tx(tx, ctx, T::COLLECTION, key)
        })
    }

    /// Delete many records of one collection in a single transaction.
    ///
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if any delete fails; nothing is removed in that case.
    pub fn delete_many(&mut self, collection: Collection, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let op = format!("delete_many_{collection}");
        self.mutate(&op, Origin::Local, |tx, ctx| {
            let mut removed = 0;
            for key in keys {
                if delete_in_tx(tx, ctx, collection, key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    // ==================
    // Remote-origin writes
    // ==================

    /// Upsert a document received from the remote.
    ///
    /// The document must already be normalized to the collection's shape.
    /// Changes are tagged `Origin::Remote`. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn apply_remote_put(
        &mut self,
        collection: Collection,
        key: &RecordKey,
        doc: Document,
    ) -> Result<bool> {
        let op = format!("remote_put_{collection}");
        self.mutate(&op, Origin::Remote, |tx, ctx| {
            put_in_tx(tx, ctx, collection, key, doc)
        })
    }

    /// Delete a record because the remote removed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn apply_remote_delete(&mut self, collection: Collection, key: &RecordKey) -> Result<bool> {
        let op = format!("remote_delete_{collection}");
        self.mutate(&op, Origin::Remote, |tx, ctx| {
            delete_in_tx(tx, ctx, collection, key)
        })
    }

    /// Store an audio payload fetched from the remote.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the payload does not hash to `key`.
    pub fn store_remote_blob(&mut self, key: &str, data: &[u8]) -> Result<()> {
        if !verify_blob(key, data) {
            return Err(Error::Remote(format!("blob {key} failed content check")));
        }
        self.mutate("remote_put_blob", Origin::Remote, |tx, ctx| {
            put_blob_in_tx(tx, ctx, data).map(|_| ())
        })
    }

    // ==================
    // Counts
    // ==================

    /// Number of records in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, collection: Collection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", table(collection));
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Records created at or after `since` (epoch ms).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a collection without a timestamp.
    pub fn count_since(&self, collection: Collection, since: i64) -> Result<usize> {
        let field = timestamp_column(collection)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} >= ?1",
            table(collection),
            quote(field)
        );
        let n: i64 = self.conn.query_row(&sql, [since], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Records created in the window `(after, until]` (epoch ms).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a collection without a timestamp.
    pub fn count_between(&self, collection: Collection, after: i64, until: i64) -> Result<usize> {
        let field = timestamp_column(collection)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {f} > ?1 AND {f} <= ?2",
            table(collection),
            f = quote(field)
        );
        let n: i64 = self.conn.query_row(&sql, [after, until], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Keys of records created at or before `cutoff` (epoch ms).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a collection without a timestamp.
    pub fn keys_created_until(&self, collection: Collection, cutoff: i64) -> Result<Vec<RecordKey>> {
        let field = timestamp_column(collection)?;
        let sql = format!(
            "SELECT \"id\" FROM {} WHERE {} <= ?1",
            table(collection),
            quote(field)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let keys = stmt
            .query_map([cutoff], |row| row.get(0))?
            .collect::<std::result::Result<Vec<RecordKey>, _>>()?;
        Ok(keys)
    }

    /// Records whose `status` column equals `status`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a collection without a status.
    pub fn count_by_status(&self, collection: Collection, status: &str) -> Result<usize> {
        if !matches!(collection, Collection::Activities | Collection::Tickets) {
            return Err(Error::InvalidArgument(format!("{collection} has no status")));
        }
        let sql = format!("SELECT COUNT(*) FROM {} WHERE \"status\" = ?1", table(collection));
        let n: i64 = self.conn.query_row(&sql, [status], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Calls today, pending tasks, and open tickets as of `now` (epoch ms).
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn dashboard_counts(&self, now: i64) -> Result<DashboardCounts> {
        let midnight = now - now.rem_euclid(DAY_MS);
        Ok(DashboardCounts {
            calls_today: self.count_since(Collection::Calls, midnight)?,
            pending_tasks: self.count_by_status(Collection::Activities, TaskStatus::Pending.as_str())?,
            open_tickets: self.count_by_status(Collection::Tickets, TicketStatus::Open.as_str())?,
        })
    }

    // ==================
    // Users
    // ==================

    /// All users ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_users(&self) -> Result<Vec<User>> {
        query_records(&self.conn, "ORDER BY \"name\" COLLATE NOCASE", [])
    }

    /// Look a user up by name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(query_records::<User, _>(
            &self.conn,
            "WHERE \"name\" = ?1 COLLATE NOCASE ORDER BY rowid LIMIT 1",
            [name.trim()],
        )?
        .pop())
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank name or PIN and `UserExists` if
    /// the name is taken (ignoring case).
    pub fn add_user(&mut self, name: &str, pin: &str, role: Role) -> Result<User> {
        let user = User::new(name, pin.trim(), role);
        if user.name.is_empty() || user.pin.is_empty() {
            return Err(Error::InvalidArgument("Name and PIN are required".into()));
        }
        self.mutate("add_user", Origin::Local, |tx, ctx| {
            let taken: bool = tx
                .prepare("SELECT 1 FROM \"users\" WHERE \"name\" = ?1 COLLATE NOCASE")?
                .exists([&user.name])?;
            if taken {
                return Err(Error::UserExists { name: user.name.clone() });
            }
            insert_in_tx(tx, ctx, user)
        })
    }

    /// Check a name / PIN pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if no user matches.
    pub fn authenticate(&self, name: &str, pin: &str) -> Result<User> {
        match self.find_user_by_name(name)? {
            Some(user) if user.pin == pin => Ok(user),
            _ => Err(Error::InvalidCredentials),
        }
    }

    /// Seed an admin account unless a user with this name exists.
    ///
    /// Returns the created user, or `None` when one was already there.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn ensure_admin(&mut self, name: &str, pin: &str) -> Result<Option<User>> {
        if self.find_user_by_name(name)?.is_some() {
            return Ok(None);
        }
        self.add_user(name, pin, Role::Admin).map(Some)
    }

    /// Delete a user on behalf of `actor`.
    ///
    /// Their historical records are kept.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` unless `actor` is an admin deleting someone
    /// else, and `RecordNotFound` if the user does not exist.
    pub fn remove_user(&mut self, actor: &User, key: &RecordKey) -> Result<()> {
        if !actor.is_admin() {
            return Err(Error::PermissionDenied("only admins can delete users".into()));
        }
        if actor.key() == Some(key) {
            return Err(Error::PermissionDenied("you cannot delete yourself".into()));
        }
        if self.delete::<User>(key)? {
            Ok(())
        } else {
            Err(Error::not_found(Collection::Users, key))
        }
    }

    // ==================
    // Recordings
    // ==================

    /// Save a recording together with its audio payload.
    ///
    /// The payload goes to the blob store in the same transaction, and the
    /// recording's `audioRef` is set to its key.
    ///
    /// # Errors
    ///
    /// Returns an error if either write fails.
    pub fn add_recording(&mut self, mut recording: Recording, audio: Option<&[u8]>) -> Result<Recording> {
        self.mutate("add_recording", Origin::Local, |tx, ctx| {
            if let Some(data) = audio {
                recording.audio_ref = Some(put_blob_in_tx(tx, ctx, data)?);
            }
            insert_in_tx(tx, ctx, recording)
        })
    }

    /// Recordings newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_recordings(&self) -> Result<Vec<Recording>> {
        query_records(&self.conn, "ORDER BY \"timestamp\" DESC, rowid DESC", [])
    }

    /// Recordings whose client name contains `term`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search_recordings(&self, term: &str) -> Result<Vec<Recording>> {
        let term = term.trim().to_lowercase();
        Ok(self
            .list_recordings()?
            .into_iter()
            .filter(|r| r.client_name.to_lowercase().contains(&term))
            .collect())
    }

    /// Change a recording's client name and date label.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the recording does not exist.
    pub fn rename_recording(
        &mut self,
        key: &RecordKey,
        client_name: &str,
        date_string: Option<&str>,
    ) -> Result<Recording> {
        let patch = RecordingPatch {
            client_name: Some(client_name.trim().to_string()),
            date_string: date_string.map(str::to_string),
            duration: None,
        };
        self.update::<Recording>(key, &patch)
    }

    /// Delete a recording and every ticket raised from it.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the recording does not exist.
    pub fn delete_recording(&mut self, key: &RecordKey) -> Result<()> {
        if self.delete::<Recording>(key)? {
            Ok(())
        } else {
            Err(Error::not_found(Collection::Calls, key))
        }
    }

    // ==================
    // Tasks
    // ==================

    /// Tasks newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        query_records(&self.conn, "ORDER BY \"timestamp\" DESC, rowid DESC", [])
    }

    /// Flip a task between pending and completed.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the task does not exist.
    pub fn toggle_task(&mut self, key: &RecordKey) -> Result<Task> {
        let task: Task = self.require(key)?;
        let patch = TaskPatch {
            status: Some(task.status.toggled()),
            ..TaskPatch::default()
        };
        self.update::<Task>(key, &patch)
    }

    /// Retitle a task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a blank title, `RecordNotFound` if the
    /// task does not exist.
    pub fn rename_task(&mut self, key: &RecordKey, title: &str) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("Task title is required".into()));
        }
        let patch = TaskPatch {
            title: Some(title.to_string()),
            ..TaskPatch::default()
        };
        self.update::<Task>(key, &patch)
    }

    // ==================
    // Tickets
    // ==================

    /// Tickets newest first, optionally only those created by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_tickets(&self, owner: Option<&RecordKey>) -> Result<Vec<Ticket>> {
        match owner {
            Some(owner) => query_records(
                &self.conn,
                "WHERE \"userId\" = ?1 ORDER BY \"createdAt\" DESC, rowid DESC",
                [owner],
            ),
            None => query_records(&self.conn, "ORDER BY \"createdAt\" DESC, rowid DESC", []),
        }
    }

    /// Tickets whose description or client contains `term`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search_tickets(&self, term: &str) -> Result<Vec<Ticket>> {
        let term = term.trim().to_lowercase();
        Ok(self
            .list_tickets(None)?
            .into_iter()
            .filter(|t| {
                t.description.to_lowercase().contains(&term)
                    || t.client_name.to_lowercase().contains(&term)
            })
            .collect())
    }

    /// Tickets raised from a recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tickets_for_call(&self, call: &RecordKey) -> Result<Vec<Ticket>> {
        query_records(&self.conn, "WHERE \"callId\" = ?1 ORDER BY rowid", [call])
    }

    /// Create a ticket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the description is blank.
    pub fn create_ticket(&mut self, mut ticket: Ticket) -> Result<Ticket> {
        ticket.description = format_description(&ticket.description);
        if ticket.description.is_empty() {
            return Err(Error::InvalidArgument("Description is required".into()));
        }
        self.insert(ticket)
    }

    /// Raise an open, medium-priority ticket from a recording.
    ///
    /// Copies the recording's client name and duration.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the recording does not exist and
    /// `InvalidArgument` if the description is blank.
    pub fn create_ticket_from_call(
        &mut self,
        call_key: &RecordKey,
        description: &str,
        user_id: RecordKey,
        now: i64,
    ) -> Result<Ticket> {
        let call: Recording = self.require(call_key)?;
        let mut ticket = Ticket::new(description, &call.client_name, user_id, now);
        ticket.call_id = Some(call_key.clone());
        ticket.duration = Some(call.duration);
        self.create_ticket(ticket)
    }

    /// Move a ticket to another board column (client).
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the ticket does not exist.
    pub fn move_ticket(&mut self, key: &RecordKey, column: &str) -> Result<Ticket> {
        let patch = TicketPatch {
            client_name: Some(client_for_column(column)),
            ..TicketPatch::default()
        };
        self.update::<Ticket>(key, &patch)
    }

    /// Set a ticket's status.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the ticket does not exist.
    pub fn set_ticket_status(&mut self, key: &RecordKey, status: TicketStatus) -> Result<Ticket> {
        let patch = TicketPatch {
            status: Some(status),
            ..TicketPatch::default()
        };
        self.update::<Ticket>(key, &patch)
    }

    /// Assign a ticket, or clear the assignee with `None`.
    ///
    /// Unknown assignees are accepted and render as `Unassigned`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the ticket does not exist.
    pub fn assign_ticket(&mut self, key: &RecordKey, assignee: Option<RecordKey>) -> Result<Ticket> {
        let patch = TicketPatch {
            assignee_id: Some(assignee),
            ..TicketPatch::default()
        };
        self.update::<Ticket>(key, &patch)
    }

    /// Edit ticket fields. A new description is bullet-formatted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the new description is blank and
    /// `RecordNotFound` if the ticket does not exist.
    pub fn edit_ticket(&mut self, key: &RecordKey, mut patch: TicketPatch) -> Result<Ticket> {
        if let Some(description) = patch.description.take() {
            let formatted = format_description(&description);
            if formatted.is_empty() {
                return Err(Error::InvalidArgument("Description is required".into()));
            }
            patch.description = Some(formatted);
        }
        self.update::<Ticket>(key, &patch)
    }

    // ==================
    // Case notes
    // ==================

    /// Case notes newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_case_notes(&self) -> Result<Vec<CaseNote>> {
        query_records(&self.conn, "ORDER BY \"timestamp\" DESC, rowid DESC", [])
    }

    /// Case notes matching `term` in client, notes, or case type.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn search_case_notes(&self, term: &str) -> Result<Vec<CaseNote>> {
        let term = term.trim().to_lowercase();
        Ok(self
            .list_case_notes()?
            .into_iter()
            .filter(|n| n.matches(&term))
            .collect())
    }

    // ==================
    // Blob store
    // ==================

    /// Store an audio payload and return its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_blob(&mut self, data: &[u8]) -> Result<String> {
        self.mutate("put_blob", Origin::Local, |tx, ctx| put_blob_in_tx(tx, ctx, data))
    }

    /// Fetch an audio payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row("SELECT data FROM blobs WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    /// Whether a payload is stored locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_blob(&self, key: &str) -> Result<bool> {
        Ok(self.conn.prepare("SELECT 1 FROM blobs WHERE key = ?1")?.exists([key])?)
    }

    /// Delete a payload. Returns `false` if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_blob(&mut self, key: &str) -> Result<bool> {
        self.mutate("delete_blob", Origin::Local, |tx, ctx| delete_blob_in_tx(tx, ctx, key))
    }

    /// Delete every payload no recording references. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or a delete fails.
    pub fn prune_orphan_blobs(&mut self) -> Result<usize> {
        self.mutate("prune_blobs", Origin::Local, |tx, ctx| {
            let orphans: Vec<String> = tx
                .prepare(
                    "SELECT key FROM blobs WHERE key NOT IN \
                     (SELECT \"audioRef\" FROM \"calls\" WHERE \"audioRef\" IS NOT NULL)",
                )?
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            for key in &orphans {
                delete_blob_in_tx(tx, ctx, key)?;
            }
            Ok(orphans.len())
        })
    }

    // ==================
    // Metadata
    // ==================

    /// Read a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    /// Write a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Stable identifier of this store, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read or written.
    pub fn device_id(&self) -> Result<String> {
        if let Some(id) = self.get_meta("device_id")? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set_meta("device_id", &id)?;
        Ok(id)
    }
}

// ==================
// SQL helpers
// ==================

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn table(collection: Collection) -> String {
    quote(collection.as_str())
}

fn timestamp_column(collection: Collection) -> Result<&'static str> {
    collection
        .timestamp_field()
        .ok_or_else(|| Error::InvalidArgument(format!("{collection} has no timestamp")))
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
    }
}

fn key_to_sql(key: &RecordKey) -> SqlValue {
    match key {
        RecordKey::Id(id) => SqlValue::Integer(*id),
        RecordKey::Opaque(s) => SqlValue::Text(s.clone()),
    }
}

/// Split a `SELECT *` row into its key and document.
fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RecordKey, Document)> {
    let stmt = row.as_ref();
    let mut key = None;
    let mut doc = Document::new();
    for i in 0..stmt.column_count() {
        let name = stmt.column_name(i)?;
        if name == "id" {
            key = Some(row.get::<_, RecordKey>(i)?);
        } else {
            doc.insert(name.to_string(), sql_to_json(row.get_ref(i)?));
        }
    }
    let key = key.ok_or_else(|| rusqlite::Error::InvalidColumnName("id".into()))?;
    Ok((key, doc))
}

fn query_records<T: Record, P: rusqlite::Params>(
    conn: &Connection,
    tail: &str,
    params: P,
) -> Result<Vec<T>> {
    let sql = format!("SELECT * FROM {} {tail}", table(T::COLLECTION));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, row_to_document)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(key, doc)| T::from_document(key, doc))
        .collect()
}

fn read_document(conn: &Connection, collection: Collection, key: &RecordKey) -> Result<Option<Document>> {
    let sql = format!("SELECT * FROM {} WHERE \"id\" = ?1", table(collection));
    Ok(conn
        .query_row(&sql, [key], row_to_document)
        .optional()?
        .map(|(_, doc)| doc))
}

fn exists(conn: &Connection, collection: Collection, key: &RecordKey) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE \"id\" = ?1", table(collection));
    Ok(conn.prepare(&sql)?.exists([key])?)
}

/// Insert or fully overwrite a row. Document fields outside the table are ignored.
fn upsert_row(conn: &Connection, collection: Collection, key: &RecordKey, doc: &Document) -> Result<()> {
    let cols = columns(collection);
    let names: Vec<String> = cols.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (2..=cols.len() + 1).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = names.iter().map(|c| format!("{c} = excluded.{c}")).collect();
    let sql = format!(
        "INSERT INTO {} (\"id\", {}) VALUES (?1, {}) ON CONFLICT(\"id\") DO UPDATE SET {}",
        table(collection),
        names.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    );

    let mut values = Vec::with_capacity(cols.len() + 1);
    values.push(key_to_sql(key));
    values.extend(cols.iter().map(|c| doc.get(*c).map_or(SqlValue::Null, json_to_sql)));
    conn.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(())
}

/// Write the patch's known fields. Returns `false` if the row is absent.
fn update_row(conn: &Connection, collection: Collection, key: &RecordKey, patch: &Document) -> Result<bool> {
    let fields: Vec<(&str, &Value)> = columns(collection)
        .iter()
        .filter_map(|c| patch.get(*c).map(|v| (*c, v)))
        .collect();
    if fields.is_empty() {
        return exists(conn, collection, key);
    }

    let sets: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{} = ?{}", quote(c), i + 2))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE \"id\" = ?1",
        table(collection),
        sets.join(", ")
    );

    let mut values = Vec::with_capacity(fields.len() + 1);
    values.push(key_to_sql(key));
    values.extend(fields.iter().map(|(_, v)| json_to_sql(v)));
    Ok(conn.execute(&sql, rusqlite::params_from_iter(values))? > 0)
}

fn delete_row(conn: &Connection, collection: Collection, key: &RecordKey) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE \"id\" = ?1", table(collection));
    Ok(conn.execute(&sql, [key])? > 0)
}

/// Raise the collection's counter so the next assigned id is above `id`.
fn bump_counter(conn: &Connection, collection: Collection, id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO key_counters (collection, next_id) VALUES (?1, ?2)
         ON CONFLICT(collection) DO UPDATE SET next_id = MAX(next_id, excluded.next_id)",
        params![collection.as_str(), id.saturating_add(1)],
    )?;
    Ok(())
}

fn allocate_key(conn: &Connection, collection: Collection) -> Result<i64> {
    let mut id: i64 = conn
        .query_row(
            "SELECT next_id FROM key_counters WHERE collection = ?1",
            [collection.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(1);
    while exists(conn, collection, &RecordKey::Id(id))? {
        id += 1;
    }
    bump_counter(conn, collection, id)?;
    Ok(id)
}

fn insert_in_tx<T: Record>(conn: &Connection, ctx: &mut MutationContext, mut record: T) -> Result<T> {
    let collection = T::COLLECTION;
    let key = match record.key().cloned() {
        Some(key) => {
            if exists(conn, collection, &key)? {
                return Err(Error::InvalidArgument(format!(
                    "{collection} record {key} already exists"
                )));
            }
            if let RecordKey::Id(id) = key {
                bump_counter(conn, collection, id)?;
            }
            key
        }
        None => RecordKey::Id(allocate_key(conn, collection)?),
    };
    record.set_key(key.clone());

    let document = record.to_document()?;
    upsert_row(conn, collection, &key, &document)?;
    ctx.record(Change::Created {
        collection,
        key,
        document,
    });
    Ok(record)
}

fn update_in_tx<T: Record>(
    conn: &Connection,
    ctx: &mut MutationContext,
    key: &RecordKey,
    patch: Document,
) -> Result<T> {
    let collection = T::COLLECTION;
    let mut merged = read_document(conn, collection, key)?
        .ok_or_else(|| Error::not_found(collection, key))?;
    merged.extend(patch.clone());
    let record = T::from_document(key.clone(), merged)?;

    update_row(conn, collection, key, &patch)?;
    if !patch.is_empty() {
        ctx.record(Change::Updated {
            collection,
            key: key.clone(),
            patch,
        });
    }
    Ok(record)
}

/// Full upsert; publishes `Created` or an `Updated` diff. Returns whether anything changed.
fn put_in_tx(
    conn: &Connection,
    ctx: &mut MutationContext,
    collection: Collection,
    key: &RecordKey,
    doc: Document,
) -> Result<bool> {
    let previous = read_document(conn, collection, key)?;
    upsert_row(conn, collection, key, &doc)?;
    if let RecordKey::Id(id) = key {
        bump_counter(conn, collection, *id)?;
    }

    let Some(previous) = previous else {
        ctx.record(Change::Created {
            collection,
            key: key.clone(),
            document: doc,
        });
        return Ok(true);
    };

    let patch: Document = columns(collection)
        .iter()
        .filter_map(|c| {
            let new = doc.get(*c).cloned().unwrap_or(Value::Null);
            let old = previous.get(*c).cloned().unwrap_or(Value::Null);
            (new != old).then(|| ((*c).to_string(), new))
        })
        .collect();
    if patch.is_empty() {
        return Ok(false);
    }
    ctx.record(Change::Updated {
        collection,
        key: key.clone(),
        patch,
    });
    Ok(true)
}

/// Delete one record, cascading from recordings to their tickets and audio.
fn delete_in_tx(
    conn: &Connection,
    ctx: &mut MutationContext,
    collection: Collection,
    key: &RecordKey,
) -> Result<bool> {
    let mut audio_ref = None;
    if collection == Collection::Calls {
        audio_ref = read_document(conn, collection, key)?
            .and_then(|doc| doc.get("audioRef").and_then(Value::as_str).map(str::to_string));

        let tickets: Vec<RecordKey> = conn
            .prepare("SELECT \"id\" FROM \"tickets\" WHERE \"callId\" = ?1 ORDER BY rowid")?
            .query_map([key], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        for ticket in tickets {
            if delete_row(conn, Collection::Tickets, &ticket)? {
                ctx.record(Change::Deleted {
                    collection: Collection::Tickets,
                    key: ticket,
                });
            }
        }
    }

    if !delete_row(conn, collection, key)? {
        return Ok(false);
    }
    ctx.record(Change::Deleted {
        collection,
        key: key.clone(),
    });

    if let Some(blob) = audio_ref {
        let still_used = conn
            .prepare("SELECT 1 FROM \"calls\" WHERE \"audioRef\" = ?1")?
            .exists([&blob])?;
        if !still_used {
            delete_blob_in_tx(conn, ctx, &blob)?;
        }
    }
    Ok(true)
}

fn put_blob_in_tx(conn: &Connection, ctx: &mut MutationContext, data: &[u8]) -> Result<String> {
    let key = blob_key(data);
    let size = i64::try_from(data.len()).unwrap_or(i64::MAX);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO blobs (key, data, size, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![key, data, size, chrono::Utc::now().timestamp_millis()],
    )?;
    if inserted > 0 {
        ctx.record(Change::BlobStored {
            key: key.clone(),
            data: Arc::from(data),
        });
    }
    Ok(key)
}

fn delete_blob_in_tx(conn: &Connection, ctx: &mut MutationContext, key: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM blobs WHERE key = ?1", [key])? > 0;
    if removed {
        ctx.record(Change::BlobDeleted { key: key.to_string() });
    }
    Ok(removed)
}
