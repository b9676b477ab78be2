use std::fmt;

use thiserror::Error;

/// What a backend was asked to do when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::List => f.write_str("list"),
            Operation::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("missing or insufficient permissions: {op} on {path}")]
    PermissionDenied { op: Operation, path: String },
    #[error("local storage failure at {path}: {message}")]
    Local { path: String, message: String },
    #[error("remote {op} failed on {path}: {message}")]
    Remote {
        op: Operation,
        path: String,
        message: String,
    },
    #[error("import file is not valid JSON: {0}")]
    MalformedImport(String),
    #[error("serialising entries: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

/// Out-of-band notifications for whoever renders the store. Failures are
/// reported here instead of unwinding through store actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    PermissionDenied { op: Operation, path: String },
    LoadFailed { message: String },
    WriteFailed { id: Option<String>, message: String },
    SubscriptionFailed { message: String },
    Imported { accepted: usize, rejected: usize },
    Synced { count: usize },
}
