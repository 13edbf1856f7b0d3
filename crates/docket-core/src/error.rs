//! Typed errors for the core pipeline stages.

use thiserror::Error;

/// Per-file failure while turning extracted text into a structured document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("document has no extractable text: {0}")]
    EmptyDocument(String),

    #[error("text extraction failed for {path}: {reason}")]
    ExtractionFailure { path: String, reason: String },
}

/// Per-chunk failure while computing an embedding.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding failed: {0}")]
    Failed(String),

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Failure decoding or mutating the vector index.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("vector index is corrupt: {0}")]
    Corrupt(String),

    #[error("vector for {chunk_id} has {actual} dimensions, index expects {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
}

/// A reranker could not score the candidate passages.
#[derive(Debug, Error)]
#[error("rerank failed: {0}")]
pub struct RerankError(pub String);
