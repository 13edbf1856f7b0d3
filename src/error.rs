//! Errors surfaced by indexing and persistence.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Another index or remove operation holds the writer slot.
    #[error("index is busy: another indexing operation is in progress")]
    ConcurrentWriteRejected,

    #[error("folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("folder is not indexed: {}", .0.display())]
    FolderNotIndexed(PathBuf),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot (de)serialize {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("index corruption: {0}")]
    Corruption(String),

    #[error("invalid ingest pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("background indexing task failed: {0}")]
    Worker(String),
}
