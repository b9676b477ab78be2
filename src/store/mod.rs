use std::collections::BTreeSet;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use time::Date;
use uuid::Uuid;

use crate::entry::{normalize_tags, now_rfc3339, DiaryEntry, EntryDraft};
use crate::error::{Operation, StoreError, StoreEvent};
use crate::search::{newest_first, FilterCriteria, FilterView};
use crate::storage::{EntryBackend, Subscription, SyncMessage};

mod import;

/// Result of [`EntryStore::initialize`].
#[derive(Debug)]
pub enum Initialized {
    Loaded { count: usize },
    /// Entries arrive through the subscription; the caller owns the handle and
    /// must stop or drop it on teardown.
    Subscribed(Subscription),
    AlreadyReady,
}

/// An optimistic change: the in-memory effect has happened, `persisted` says
/// whether the backend accepted it.
#[derive(Debug)]
#[must_use]
pub struct Applied<T> {
    pub value: T,
    pub persisted: Result<(), StoreError>,
}

impl<T> Applied<T> {
    pub fn is_persisted(&self) -> bool {
        self.persisted.is_ok()
    }
}

#[derive(Debug)]
#[must_use]
pub enum Mutation {
    Applied { persisted: Result<(), StoreError> },
    NotFound,
}

impl Mutation {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Mutation::NotFound)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub replaced: usize,
    pub rejected: usize,
}

impl ImportReport {
    pub fn accepted(&self) -> usize {
        self.added + self.replaced
    }
}

/// Owns the diary entries, the derived tag index and the filter state, and
/// mediates every write to the configured backend.
pub struct EntryStore {
    backend: Box<dyn EntryBackend>,
    entries: Vec<DiaryEntry>,
    tags: Vec<String>,
    criteria: FilterCriteria,
    ready: bool,
    live: bool,
    remote_rx: Option<Receiver<SyncMessage>>,
    events_tx: Sender<StoreEvent>,
    events_rx: Receiver<StoreEvent>,
}

impl EntryStore {
    pub fn new(backend: Box<dyn EntryBackend>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            entries: Vec::new(),
            tags: Vec::new(),
            criteria: FilterCriteria::default(),
            ready: false,
            live: false,
            remote_rx: None,
            events_tx,
            events_rx,
        }
    }

    /// Prefer a live subscription over a one-shot load when the backend offers one.
    pub fn with_live_sync(mut self, enabled: bool) -> Self {
        self.live = enabled;
        self
    }

    pub fn backend(&self) -> &dyn EntryBackend {
        self.backend.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn initialize(&mut self) -> Result<Initialized, StoreError> {
        if self.ready {
            return Ok(Initialized::AlreadyReady);
        }

        if self.live {
            match self.backend.subscribe() {
                Ok(Some(subscription)) => {
                    self.remote_rx = Some(subscription.receiver());
                    self.ready = true;
                    return Ok(Initialized::Subscribed(subscription));
                }
                Ok(None) => {}
                Err(err) => return Err(self.report(err, Operation::List, None)),
            }
        }

        match self.backend.load() {
            Ok(entries) => {
                let count = entries.len();
                self.replace_all(entries);
                self.ready = true;
                tracing::info!(count, backend = %self.backend.kind(), "loaded diary entries");
                Ok(Initialized::Loaded { count })
            }
            Err(err) => Err(self.report(err, Operation::List, None)),
        }
    }

    pub fn add_entry(&mut self, draft: EntryDraft) -> Applied<String> {
        let id = Uuid::new_v4().to_string();
        let entry = draft.into_entry(id.clone(), now_rfc3339());
        self.entries.push(entry.clone());
        self.refresh_tags();

        let persisted = self
            .backend
            .add(&entry)
            .map_err(|err| self.report(err, Operation::Write, Some(&entry.id)));
        Applied {
            value: id,
            persisted,
        }
    }

    /// Replaces the stored entry with the same id. The creation date is kept.
    pub fn update_entry(&mut self, mut entry: DiaryEntry) -> Mutation {
        let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) else {
            tracing::debug!(id = %entry.id, "update for unknown entry ignored");
            return Mutation::NotFound;
        };
        entry.title = entry.title.trim().to_string();
        entry.tags = normalize_tags(&entry.tags);
        entry.date = existing.date.clone();
        *existing = entry.clone();
        self.refresh_tags();

        let persisted = self
            .backend
            .set(&entry)
            .map_err(|err| self.report(err, Operation::Write, Some(&entry.id)));
        Mutation::Applied { persisted }
    }

    pub fn delete_entry(&mut self, id: &str) -> Mutation {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        if self.entries.len() == before {
            return Mutation::NotFound;
        }
        self.refresh_tags();

        let persisted = self
            .backend
            .delete(id)
            .map_err(|err| self.report(err, Operation::Write, Some(id)));
        Mutation::Applied { persisted }
    }

    /// Merges entry-shaped values by id. Memory changes only after the whole
    /// batch has been persisted.
    pub fn import_entries(&mut self, candidates: &Value) -> Result<ImportReport, StoreError> {
        let import::Candidates { accepted, rejected } = import::collect(candidates);
        let mut report = ImportReport {
            rejected,
            ..ImportReport::default()
        };
        if accepted.is_empty() {
            self.emit(StoreEvent::Imported {
                accepted: 0,
                rejected,
            });
            return Ok(report);
        }

        if let Err(err) = self.backend.set_batch(&accepted) {
            return Err(self.report(err, Operation::Write, None));
        }

        for entry in accepted {
            match self.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => {
                    *existing = entry;
                    report.replaced += 1;
                }
                None => {
                    self.entries.push(entry);
                    report.added += 1;
                }
            }
        }
        self.refresh_tags();
        tracing::info!(
            added = report.added,
            replaced = report.replaced,
            rejected = report.rejected,
            "imported entries"
        );
        self.emit(StoreEvent::Imported {
            accepted: report.accepted(),
            rejected,
        });
        Ok(report)
    }

    /// Parses an import file. Text that is not JSON is the only failure that
    /// rejects the whole import.
    pub fn import_json(&mut self, text: &str) -> Result<ImportReport, StoreError> {
        let value: Value = serde_json::from_str(text).map_err(|err| {
            tracing::warn!(%err, "import file is not valid JSON");
            StoreError::MalformedImport(err.to_string())
        })?;
        self.import_entries(&value)
    }

    pub fn export_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(&self.entries)
            .map_err(|err| StoreError::Serialization(err.to_string()))
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.criteria.search_term = term.into();
    }

    pub fn set_selected_date(&mut self, date: Option<Date>) {
        self.criteria.selected_date = date;
    }

    pub fn search_term(&self) -> &str {
        &self.criteria.search_term
    }

    pub fn selected_date(&self) -> Option<Date> {
        self.criteria.selected_date
    }

    pub fn is_filtered(&self) -> bool {
        !self.criteria.is_unfiltered()
    }

    pub fn entries(&self) -> &[DiaryEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&DiaryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn view(&self) -> FilterView<'_> {
        FilterView::new(&self.entries, &self.criteria)
    }

    /// Title and content of the `limit` newest entries, for prompt generation.
    pub fn recent_context(&self, limit: usize) -> String {
        let mut recent: Vec<&DiaryEntry> = self.entries.iter().collect();
        recent.sort_by(|a, b| newest_first(a, b));
        recent
            .into_iter()
            .take(limit)
            .map(|entry| format!("{}\n{}", entry.title, entry.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Applies everything the live subscription has pushed so far. Returns the
    /// number of snapshots applied.
    pub fn poll_remote(&mut self) -> usize {
        let Some(rx) = self.remote_rx.clone() else {
            return 0;
        };
        let pending: Vec<SyncMessage> = rx.try_iter().collect();
        self.apply_sync_messages(pending)
    }

    /// Blocks until the subscription delivers something or `timeout` passes,
    /// then applies whatever is pending.
    pub fn wait_for_sync(&mut self, timeout: Duration) -> usize {
        let Some(rx) = self.remote_rx.clone() else {
            return 0;
        };
        let Ok(first) = rx.recv_timeout(timeout) else {
            return 0;
        };
        let mut pending = vec![first];
        pending.extend(rx.try_iter());
        self.apply_sync_messages(pending)
    }

    pub fn events(&self) -> Receiver<StoreEvent> {
        self.events_rx.clone()
    }

    pub fn drain_events(&self) -> Vec<StoreEvent> {
        self.events_rx.try_iter().collect()
    }

    fn apply_sync_messages(&mut self, messages: Vec<SyncMessage>) -> usize {
        let mut applied = 0;
        for message in messages {
            match message {
                SyncMessage::Snapshot(entries) => {
                    let count = entries.len();
                    self.replace_all(entries);
                    self.emit(StoreEvent::Synced { count });
                    applied += 1;
                }
                SyncMessage::Error(err) => {
                    tracing::warn!(%err, "live subscription failed");
                    if let StoreError::PermissionDenied { op, path } = &err {
                        self.emit(StoreEvent::PermissionDenied {
                            op: *op,
                            path: path.clone(),
                        });
                    }
                    self.emit(StoreEvent::SubscriptionFailed {
                        message: err.to_string(),
                    });
                    self.remote_rx = None;
                }
            }
        }
        applied
    }

    fn replace_all(&mut self, entries: Vec<DiaryEntry>) {
        self.entries = entries;
        self.refresh_tags();
    }

    fn refresh_tags(&mut self) {
        self.tags = build_tag_index(&self.entries);
    }

    fn report(&self, err: StoreError, op: Operation, id: Option<&str>) -> StoreError {
        tracing::warn!(%err, %op, id = id.unwrap_or("-"), "persistence failure");
        let event = match (&err, op) {
            (StoreError::PermissionDenied { op, path }, _) => StoreEvent::PermissionDenied {
                op: *op,
                path: path.clone(),
            },
            (_, Operation::List) => StoreEvent::LoadFailed {
                message: err.to_string(),
            },
            (_, Operation::Write) => StoreEvent::WriteFailed {
                id: id.map(str::to_string),
                message: err.to_string(),
            },
        };
        self.emit(event);
        err
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Sorted, deduplicated union of every entry's tags.
pub fn build_tag_index(entries: &[DiaryEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| entry.tags.iter())
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn export_file_name(day: Date) -> String {
    format!(
        "diary-export-{:04}-{:02}-{:02}.json",
        day.year(),
        u8::from(day.month()),
        day.day()
    )
}
