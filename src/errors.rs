//! Error handling for the telemetry ingestor
//!
//! Every fallible operation on the accumulator, the batch exporter and the
//! delivery side reports an [`IngestError`]. Lock and identity failures are
//! fatal for the instance; I/O failures fail the single ingest that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the ingestor
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Could not lock accumulator file {}: {source}", path.display())]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Accumulator file name '{name}' does not carry a valid identity")]
    MalformedIdentity { name: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No active lock on the accumulator")]
    NoActiveLock,

    #[error("Accumulator file {} is corrupt: {reason}", path.display())]
    CorruptAccumulator { path: PathBuf, reason: String },

    #[error("Batch file {} is corrupt: {reason}", path.display())]
    CorruptBatch { path: PathBuf, reason: String },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias used across the crate
pub type IngestResult<T> = Result<T, IngestError>;

impl IngestError {
    /// Create a lock acquisition error
    pub fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LockAcquisition {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed identity error
    pub fn malformed_identity(name: impl Into<String>) -> Self {
        Self::MalformedIdentity { name: name.into() }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a corrupt accumulator error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptAccumulator {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt batch error
    pub fn corrupt_batch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptBatch {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the instance can keep serving after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::LockAcquisition { .. }
                | IngestError::MalformedIdentity { .. }
                | IngestError::NoActiveLock
        )
    }
}

/// Helper trait for mutex operations that report poisoning as an error
/// instead of panicking.
pub trait SafeLock<T: ?Sized> {
    /// Lock a mutex, returning an IngestError on poison
    fn safe_lock(&self) -> IngestResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> IngestResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| IngestError::MutexPoisoned {
            resource: std::any::type_name::<T>().to_string(),
        })
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::serialization("json_operation", err)
    }
}

/// Convert from figment errors
impl From<figment::Error> for IngestError {
    fn from(err: figment::Error) -> Self {
        IngestError::config(err.to_string())
    }
}
