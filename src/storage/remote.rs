use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use time::OffsetDateTime;

use crate::config::RemoteOptions;
use crate::entry::DiaryEntry;
use crate::error::{Operation, StoreError};
use crate::storage::{schema, BackendKind, EntryBackend};

const COLLECTION: &str = "diaryEntries";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the live subscription pushes to the store.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    Snapshot(Vec<DiaryEntry>),
    Error(StoreError),
}

/// Document collection namespaced per user, kept in a SQLite database.
pub struct RemoteBackend {
    conn: Connection,
    db_path: PathBuf,
    user: Option<String>,
    live: bool,
    read_only: bool,
    poll_interval: Duration,
}

impl RemoteBackend {
    pub fn open(options: &RemoteOptions) -> Result<Self, StoreError> {
        let db_path = options.database_path.clone();
        let path_label = db_path.display().to_string();
        if !options.read_only {
            if let Some(parent) = db_path.parent() {
                fs::create_dir_all(parent).map_err(|err| StoreError::Remote {
                    op: Operation::List,
                    path: path_label.clone(),
                    message: format!("creating {}: {err}", parent.display()),
                })?;
            }
        }
        let opened = open_connection(&db_path, options.read_only).and_then(|conn| {
            if !options.read_only {
                schema::apply(&conn)?;
            }
            Ok(conn)
        });
        let conn = opened.map_err(|err| map_sql_error(err, Operation::List, &path_label))?;

        Ok(Self {
            conn,
            db_path,
            user: options.user.clone(),
            live: options.live,
            read_only: options.read_only,
            poll_interval: options.poll_interval(),
        })
    }

    fn collection_path(&self) -> String {
        collection_path(self.user.as_deref())
    }

    fn require_user(&self, op: Operation) -> Result<&str, StoreError> {
        self.user.as_deref().ok_or_else(|| StoreError::PermissionDenied {
            op,
            path: self.collection_path(),
        })
    }

    fn write_body(entry: &DiaryEntry) -> Result<String, StoreError> {
        serde_json::to_string(entry).map_err(|err| StoreError::Serialization(err.to_string()))
    }
}

impl EntryBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn location(&self) -> String {
        self.collection_path()
    }

    fn load(&mut self) -> Result<Vec<DiaryEntry>, StoreError> {
        let user = self.require_user(Operation::List)?.to_string();
        fetch_collection(&self.conn, &user)
            .map_err(|err| map_sql_error(err, Operation::List, &self.collection_path()))
    }

    fn add(&mut self, entry: &DiaryEntry) -> Result<(), StoreError> {
        let user = self.require_user(Operation::Write)?.to_string();
        let body = Self::write_body(entry)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn
            .execute(
                "INSERT INTO entries (user_id, entry_id, body, date_created, date_modified)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![user, entry.id, body, now],
            )
            .map_err(|err| map_sql_error(err, Operation::Write, &self.collection_path()))?;
        tracing::debug!(id = %entry.id, "added remote entry");
        Ok(())
    }

    fn set(&mut self, entry: &DiaryEntry) -> Result<(), StoreError> {
        let user = self.require_user(Operation::Write)?.to_string();
        let body = Self::write_body(entry)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        upsert_document(&self.conn, &user, &entry.id, &body, now)
            .map_err(|err| map_sql_error(err, Operation::Write, &self.collection_path()))?;
        tracing::debug!(id = %entry.id, "set remote entry");
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        let user = self.require_user(Operation::Write)?.to_string();
        self.conn
            .execute(
                "DELETE FROM entries WHERE user_id = ?1 AND entry_id = ?2",
                params![user, id],
            )
            .map_err(|err| map_sql_error(err, Operation::Write, &self.collection_path()))?;
        tracing::debug!(%id, "deleted remote entry");
        Ok(())
    }

    fn set_batch(&mut self, entries: &[DiaryEntry]) -> Result<(), StoreError> {
        let user = self.require_user(Operation::Write)?.to_string();
        let path = self.collection_path();
        let bodies = entries
            .iter()
            .map(|entry| Ok((entry.id.as_str(), Self::write_body(entry)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_sql_error(err, Operation::Write, &path))?;
        for (id, body) in &bodies {
            upsert_document(&tx, &user, id, body, now)
                .map_err(|err| map_sql_error(err, Operation::Write, &path))?;
        }
        tx.commit()
            .map_err(|err| map_sql_error(err, Operation::Write, &path))?;
        tracing::debug!(count = bodies.len(), "committed remote batch");
        Ok(())
    }

    fn subscribe(&mut self) -> Result<Option<Subscription>, StoreError> {
        if !self.live {
            return Ok(None);
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let Some(user) = self.user.clone() else {
            // Refused subscriptions report through the channel like any other
            // listener failure.
            let _ = tx.send(SyncMessage::Error(StoreError::PermissionDenied {
                op: Operation::List,
                path: self.collection_path(),
            }));
            return Ok(Some(Subscription::detached(rx)));
        };

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let watcher = Watcher {
            db_path: self.db_path.clone(),
            read_only: self.read_only,
            user,
            interval: self.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("diary-remote-watch".into())
            .spawn(move || watcher.run(tx, stop_rx))
            .map_err(|err| StoreError::Remote {
                op: Operation::List,
                path: self.collection_path(),
                message: format!("spawning watcher: {err}"),
            })?;
        tracing::info!(path = %self.collection_path(), "live subscription started");
        Ok(Some(Subscription {
            receiver: rx,
            stop: Some(stop_tx),
            handle: Some(handle),
        }))
    }
}

/// Handle for a running live subscription. Stopping (or dropping) it ends the
/// watcher thread; no messages arrive afterwards.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<SyncMessage>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    fn detached(receiver: Receiver<SyncMessage>) -> Self {
        Self {
            receiver,
            stop: None,
            handle: None,
        }
    }

    pub fn receiver(&self) -> Receiver<SyncMessage> {
        self.receiver.clone()
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("remote watcher panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Watcher {
    db_path: PathBuf,
    read_only: bool,
    user: String,
    interval: Duration,
}

impl Watcher {
    fn run(self, tx: Sender<SyncMessage>, stop: Receiver<()>) {
        let path = collection_path(Some(&self.user));
        let conn = match open_connection(&self.db_path, self.read_only) {
            Ok(conn) => conn,
            Err(err) => {
                let _ = tx.send(SyncMessage::Error(map_sql_error(err, Operation::List, &path)));
                return;
            }
        };

        let mut last_version: Option<i64> = None;
        loop {
            let version = conn.query_row("PRAGMA data_version", [], |row| row.get::<_, i64>(0));
            let outcome = version.and_then(|version| {
                if last_version == Some(version) {
                    return Ok(None);
                }
                last_version = Some(version);
                fetch_collection(&conn, &self.user).map(Some)
            });
            match outcome {
                Ok(Some(entries)) => {
                    tracing::debug!(count = entries.len(), "pushing remote snapshot");
                    if tx.send(SyncMessage::Snapshot(entries)).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    let _ = tx.send(SyncMessage::Error(map_sql_error(err, Operation::List, &path)));
                    break;
                }
            }

            match stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(%path, "remote watcher stopped");
    }
}

fn open_connection(path: &Path, read_only: bool) -> rusqlite::Result<Connection> {
    let conn = if read_only {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?
    } else {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn fetch_collection(conn: &Connection, user: &str) -> rusqlite::Result<Vec<DiaryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, body FROM entries
         WHERE user_id = ?1
         ORDER BY date_created, entry_id",
    )?;
    let rows = stmt.query_map(params![user], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut entries = Vec::new();
    for row in rows {
        let (id, body) = row?;
        match serde_json::from_str::<DiaryEntry>(&body) {
            Ok(entry) => entries.push(entry),
            Err(err) => tracing::warn!(%id, %err, "skipping unreadable remote document"),
        }
    }
    Ok(entries)
}

fn upsert_document(
    conn: &Connection,
    user: &str,
    id: &str,
    body: &str,
    now: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO entries (user_id, entry_id, body, date_created, date_modified)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(user_id, entry_id) DO UPDATE SET
             body = excluded.body,
             date_modified = excluded.date_modified",
        params![user, id, body, now],
    )
}

fn collection_path(user: Option<&str>) -> String {
    format!("users/{}/{COLLECTION}", user.unwrap_or("<unauthenticated>"))
}

fn map_sql_error(err: rusqlite::Error, op: Operation, path: &str) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ReadOnly)
        | Some(ErrorCode::PermissionDenied)
        | Some(ErrorCode::AuthorizationForStatementDenied) => StoreError::PermissionDenied {
            op,
            path: path.to_string(),
        },
        _ => StoreError::Remote {
            op,
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryDraft;
    use assert_matches::assert_matches;
    use std::time::Instant;
    use tempfile::TempDir;

    fn options(temp: &TempDir, user: Option<&str>) -> RemoteOptions {
        RemoteOptions {
            database_path: temp.path().join("remote.db"),
            user: user.map(str::to_string),
            live: true,
            poll_interval_ms: 20,
            read_only: false,
        }
    }

    fn sample(id: &str, title: &str) -> DiaryEntry {
        EntryDraft::new(title, "body")
            .with_tags("x")
            .into_entry(id.to_string(), "2024-02-02T10:00:00Z".to_string())
    }

    fn next_snapshot(rx: &Receiver<SyncMessage>) -> Vec<DiaryEntry> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(SyncMessage::Snapshot(entries)) => return entries,
                Ok(SyncMessage::Error(err)) => panic!("unexpected watcher error: {err}"),
                Err(err) => panic!("no snapshot before deadline: {err}"),
            }
        }
    }

    #[test]
    fn collections_are_namespaced_per_user() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut alice = RemoteBackend::open(&options(&temp, Some("alice")))?;
        let mut bob = RemoteBackend::open(&options(&temp, Some("bob")))?;

        alice.add(&sample("1", "alice entry"))?;
        bob.add(&sample("1", "bob entry"))?;

        let alice_entries = alice.load()?;
        assert_eq!(alice_entries.len(), 1);
        assert_eq!(alice_entries[0].title, "alice entry");
        assert_eq!(alice.location(), "users/alice/diaryEntries");
        Ok(())
    }

    #[test]
    fn set_merges_only_the_target_document() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut backend = RemoteBackend::open(&options(&temp, Some("alice")))?;
        backend.add(&sample("1", "one"))?;
        backend.add(&sample("2", "two"))?;
        backend.set(&sample("2", "two, revised"))?;
        backend.delete("1")?;

        let titles: Vec<_> = backend.load()?.into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["two, revised"]);
        Ok(())
    }

    #[test]
    fn unauthenticated_access_is_permission_denied() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut backend = RemoteBackend::open(&options(&temp, None))?;
        assert_matches!(
            backend.load(),
            Err(StoreError::PermissionDenied { op: Operation::List, ref path })
                if path == "users/<unauthenticated>/diaryEntries"
        );
        assert_matches!(
            backend.add(&sample("1", "nope")),
            Err(StoreError::PermissionDenied { op: Operation::Write, .. })
        );
        Ok(())
    }

    #[test]
    fn read_only_database_rejects_writes() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut writer = RemoteBackend::open(&options(&temp, Some("alice")))?;
        writer.add(&sample("1", "seed"))?;

        let mut ro_options = options(&temp, Some("alice"));
        ro_options.read_only = true;
        let mut reader = RemoteBackend::open(&ro_options)?;
        assert_eq!(reader.load()?.len(), 1);
        assert_matches!(
            reader.set(&sample("1", "changed")),
            Err(StoreError::PermissionDenied { op: Operation::Write, .. })
        );
        Ok(())
    }

    #[test]
    fn subscription_pushes_full_collection_on_change() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut backend = RemoteBackend::open(&options(&temp, Some("alice")))?;
        backend.add(&sample("1", "first"))?;

        let mut subscription = backend.subscribe()?.expect("live subscription");
        let rx = subscription.receiver();
        assert_eq!(next_snapshot(&rx).len(), 1);

        backend.add(&sample("2", "second"))?;
        assert_eq!(next_snapshot(&rx).len(), 2);

        subscription.stop();
        assert!(!subscription.is_active());
        backend.add(&sample("3", "third"))?;
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        Ok(())
    }

    #[test]
    fn unauthenticated_subscription_reports_through_channel() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut backend = RemoteBackend::open(&options(&temp, None))?;
        let subscription = backend.subscribe()?.expect("subscription handle");
        assert_matches!(
            subscription.receiver().try_recv(),
            Ok(SyncMessage::Error(StoreError::PermissionDenied { op: Operation::List, .. }))
        );
        Ok(())
    }
}
