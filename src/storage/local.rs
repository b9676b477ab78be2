use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::entry::DiaryEntry;
use crate::error::StoreError;
use crate::storage::{upsert, BackendKind, EntryBackend};

const BLOB_EXTENSION: &str = "json";
const BLOB_TMP_EXTENSION: &str = "json.tmp";

/// Key/value storage holding the whole collection as one JSON blob.
#[derive(Debug)]
pub struct LocalBackend {
    dir: PathBuf,
    key: String,
}

impl LocalBackend {
    pub fn open(dir: &Path, key: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|err| local_error(dir, "creating storage dir", &err))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            key: key.to_string(),
        })
    }

    pub fn blob_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.key, BLOB_EXTENSION))
    }

    fn read_blob(&self) -> Result<Blob, StoreError> {
        let path = self.blob_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Blob::default()),
            Err(err) => return Err(local_error(&path, "reading", &err)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Blob::default());
        }
        let values: Vec<Value> = serde_json::from_slice(&raw).map_err(|err| {
            tracing::error!(path = %path.display(), %err, "local entry blob is corrupt");
            StoreError::Local {
                path: path.display().to_string(),
                message: format!("parsing stored entries: {err}"),
            }
        })?;

        let mut blob = Blob::default();
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<DiaryEntry>(value.clone()) {
                Ok(entry) => blob.entries.push(entry),
                Err(err) => {
                    tracing::warn!(path = %path.display(), index, %err, "skipping unreadable local entry");
                    blob.unreadable.push(value);
                }
            }
        }
        Ok(blob)
    }

    fn write_blob(&self, blob: &Blob) -> Result<(), StoreError> {
        let final_path = self.blob_path();
        let mut values = blob
            .entries
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        values.extend(blob.unreadable.iter().cloned());
        let json =
            serde_json::to_vec(&values).map_err(|err| StoreError::Serialization(err.to_string()))?;
        let tmp_path = final_path.with_extension(BLOB_TMP_EXTENSION);
        fs::write(&tmp_path, &json).map_err(|err| local_error(&tmp_path, "writing", &err))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|err| local_error(&final_path, "replacing", &err))?;
        tracing::debug!(count = blob.entries.len(), path = %final_path.display(), "saved local entries");
        Ok(())
    }

    /// Read-modify-write of the whole collection. Records that could not be
    /// read are written back untouched.
    fn modify<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<DiaryEntry>),
    {
        let mut blob = self.read_blob()?;
        f(&mut blob.entries);
        self.write_blob(&blob)
    }
}

#[derive(Debug, Default)]
struct Blob {
    entries: Vec<DiaryEntry>,
    unreadable: Vec<Value>,
}

impl EntryBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn location(&self) -> String {
        self.blob_path().display().to_string()
    }

    fn load(&mut self) -> Result<Vec<DiaryEntry>, StoreError> {
        self.read_blob().map(|blob| blob.entries)
    }

    fn add(&mut self, entry: &DiaryEntry) -> Result<(), StoreError> {
        self.modify(|entries| entries.push(entry.clone()))
    }

    fn set(&mut self, entry: &DiaryEntry) -> Result<(), StoreError> {
        self.modify(|entries| upsert(entries, entry))
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        self.modify(|entries| entries.retain(|entry| entry.id != id))
    }

    fn set_batch(&mut self, batch: &[DiaryEntry]) -> Result<(), StoreError> {
        self.modify(|entries| {
            for entry in batch {
                upsert(entries, entry);
            }
        })
    }
}

fn local_error(path: &Path, action: &str, err: &io::Error) -> StoreError {
    tracing::error!(path = %path.display(), %err, "local storage {action} failed");
    StoreError::Local {
        path: path.display().to_string(),
        message: format!("{action}: {err}"),
    }
}
