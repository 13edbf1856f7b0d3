//! # Docket Core
//!
//! Pure retrieval logic for Docket: data models, structural parsing of
//! extracted legal text, section-aware chunking, the BM25 and vector
//! indexes, the embedder trait, hybrid search, and query interpretation.
//!
//! This crate performs no filesystem or network I/O and starts no threads.
//! Text extraction, persistence, and the single-writer indexer live in the
//! `docket` app crate.

pub mod chunk;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod lexical;
pub mod models;
pub mod parse;
pub mod query;
pub mod search;
pub mod vector;
