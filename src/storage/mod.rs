use std::fmt;

use crate::config::{AppConfig, BackendChoice};
use crate::entry::DiaryEntry;
use crate::error::StoreError;

pub mod local;
pub mod remote;
mod schema;

pub use local::LocalBackend;
pub use remote::{RemoteBackend, Subscription, SyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

/// Persistence behind the entry store. Local storage rewrites the whole
/// collection on every call; the remote collection works per document.
pub trait EntryBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Path or collection name used in error reports.
    fn location(&self) -> String;

    fn load(&mut self) -> Result<Vec<DiaryEntry>, StoreError>;

    fn add(&mut self, entry: &DiaryEntry) -> Result<(), StoreError>;

    /// Insert-or-replace of a single entry; other entries are untouched.
    fn set(&mut self, entry: &DiaryEntry) -> Result<(), StoreError>;

    fn delete(&mut self, id: &str) -> Result<(), StoreError>;

    /// Writes every entry or none of them.
    fn set_batch(&mut self, entries: &[DiaryEntry]) -> Result<(), StoreError>;

    /// Starts pushing the full collection on every change. Backends without
    /// change notification return `Ok(None)`.
    fn subscribe(&mut self) -> Result<Option<Subscription>, StoreError> {
        Ok(None)
    }
}

pub fn init(config: &AppConfig) -> Result<Box<dyn EntryBackend>, StoreError> {
    match config.backend {
        BackendChoice::Local => {
            let backend = LocalBackend::open(&config.local.store_dir, &config.local.key)?;
            Ok(Box::new(backend))
        }
        BackendChoice::Remote => {
            let backend = RemoteBackend::open(&config.remote)?;
            Ok(Box::new(backend))
        }
    }
}

/// Upserts `entry` into `entries` by id, keeping position when it already exists.
pub(crate) fn upsert(entries: &mut Vec<DiaryEntry>, entry: &DiaryEntry) {
    match entries.iter_mut().find(|existing| existing.id == entry.id) {
        Some(existing) => *existing = entry.clone(),
        None => entries.push(entry.clone()),
    }
}
