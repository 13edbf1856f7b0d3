//! # Docket
//!
//! A local, offline search engine for legal documents.
//!
//! Docket indexes folders of contracts, NDAs, policies, and licenses (PDF,
//! DOCX, plain text), recovers their structure (numbered sections, defined
//! terms, parties, dates, jurisdiction), and answers natural-language
//! questions with a hybrid of BM25 and embedding similarity. Everything runs
//! on one machine against one index directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  Folders    │──▶│ KnowledgeIndexer │──▶│ index root   │
//! │ PDF/DOCX/TXT│   │ parse+chunk+embed│   │ JSON + .bin  │
//! └─────────────┘   └────────┬─────────┘   └──────────────┘
//!                            │ snapshot
//!                            ▼
//!                   ┌───────────────────┐
//!                   │ HybridSearchEngine│◀── QueryInterpreter ◀── docket search
//!                   └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docket index ./contracts
//! docket search "non-compete duration in California"
//! docket stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`embedding`] | Embedder selection |
//! | [`indexer`] | Single-writer incremental indexing |
//! | [`library`] | Facade used by the CLI |
//! | [`storage`] | Atomic persistence of index artifacts |
//! | [`audit`] | Fire-and-forget audit trail |

pub mod audit;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod folders;
pub mod indexer;
pub mod library;
pub mod progress;
pub mod scan;
pub mod state;
pub mod stats;
pub mod storage;
