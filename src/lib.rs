pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod prompt;
pub mod search;
pub mod stats;
pub mod storage;
pub mod store;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use entry::{DiaryEntry, EntryDraft, Mood, Weather};
pub use error::{Operation, StoreError, StoreEvent};
pub use store::EntryStore;
