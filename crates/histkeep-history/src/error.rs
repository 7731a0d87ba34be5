/// Persistence error taxonomy.
///
/// None of these ever escape `update`/`undo`/`redo`/`clear`: they are
/// handed to the controller's error observer and the in-memory history
/// carries on.
use std::sync::Arc;

use crate::codec::CodecError;

/// Failure reading the persisted record.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("stored record for '{key}' could not be decoded: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("backing store failed to read '{key}': {source:#}")]
    Backend { key: String, source: anyhow::Error },
}

/// Failure writing the current value.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("value for '{key}' could not be encoded: {source}")]
    Serialize {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("backing store failed to write '{key}': {source:#}")]
    Backend { key: String, source: anyhow::Error },
}

/// Failure deleting the persisted record.
#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error("backing store failed to delete '{key}': {source:#}")]
    Backend { key: String, source: anyhow::Error },
}

/// Everything the error observer can be told about.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error(transparent)]
    Remove(#[from] RemoveError),
}

/// Callback receiving persistence failures.
pub type ErrorObserver = Arc<dyn Fn(&PersistenceError) + Send + Sync>;

/// Default observer: log and continue.
pub fn log_error(err: &PersistenceError) {
    tracing::warn!("History persistence failed: {err}");
}

/// Failure constructing a controller.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("persistence requires a running tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
