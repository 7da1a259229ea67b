//! Engine error type.

use std::path::PathBuf;

use crate::intent::IntentError;
use crate::netlink;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The main table has no usable IPv4 default route.
    #[error("no IPv4 default route in the main routing table")]
    NoDefaultRoute,

    /// The default interface carries no IPv4 address.
    #[error("interface {interface} has no primary IPv4 address")]
    NoPrimaryAddress { interface: String },

    /// The table name is already registered under another id.
    #[error("routing table {name:?} is registered as {existing}, intent requests {requested}")]
    TableConflict {
        name: String,
        existing: u32,
        requested: u32,
    },

    /// The table id is already registered under another name.
    #[error("routing table id {id} is registered as {existing:?}, intent requests {requested:?}")]
    TableIdConflict {
        id: u32,
        existing: String,
        requested: String,
    },

    /// A plan operation failed while being applied or reverted.
    #[error("{kind} failed: {reason}")]
    OperationFailed { kind: String, reason: String },

    /// The boot unit could not be installed or removed.
    #[error("failed to install {unit}: {reason}")]
    Install { unit: String, reason: String },

    #[error("invalid intent: {0}")]
    InvalidIntent(#[from] IntentError),

    #[error(transparent)]
    Netlink(#[from] netlink::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A host query or mutation did not finish in time.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// The iproute2 table file could not be read or updated.
    #[error("{}: {reason}", path.display())]
    RtTables { path: PathBuf, reason: String },
}

impl Error {
    /// Whether the error must stop the pipeline before any host mutation.
    ///
    /// Only per-operation failures are recoverable: they are recorded in the
    /// applied result and the caller decides whether to revert.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::OperationFailed { .. })
    }

    /// Check if the underlying cause is a missing object, including an
    /// address that is not configured.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Netlink(e) => e.is_not_found() || e.is_address_not_available(),
            _ => false,
        }
    }

    /// Check if the underlying cause is an object that already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Netlink(e) => e.is_already_exists(),
            _ => false,
        }
    }

    pub(crate) fn rt_tables(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::RtTables {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
