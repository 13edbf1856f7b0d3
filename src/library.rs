//! Application facade: the operations exposed to the CLI and embedders of
//! this crate.
//!
//! [`Library`] wires configuration to a [`KnowledgeIndexer`], a
//! [`HybridSearchEngine`] sharing the same embedder, a [`QueryInterpreter`],
//! and an audit sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use docket_core::error::SearchError;
use docket_core::models::{QueryFilters, SearchQuery, SearchResult};
use docket_core::query::QueryInterpreter;
use docket_core::search::{HybridSearchEngine, Reranker, SearchParams};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditSink, JsonlAuditSink, NullAuditSink};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::IndexError;
use crate::folders::FolderSummary;
use crate::indexer::{IndexOptions, IndexReport, IndexStats, KnowledgeIndexer, RemoveReport};

/// Results plus how the query was understood.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: SearchQuery,
    pub results: Vec<SearchResult>,
    /// The query asks for a specific fact (a clause, definition, date or
    /// party) rather than open-ended search.
    pub lookup: bool,
    /// Heuristic in `[0, 1]` from the score distribution of the results.
    pub confidence: f64,
    pub elapsed_ms: u64,
}

/// `min(1, 0.5·top + 0.3·(top − mean) + 0.2·min(n/5, 1))` over final scores;
/// `0` for no results.
pub fn confidence(results: &[SearchResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let scores: Vec<f64> = results.iter().map(|r| r.final_score).collect();
    let top = scores.iter().cloned().fold(f64::MIN, f64::max);
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let coverage = (scores.len() as f64 / 5.0).min(1.0);
    (0.5 * top + 0.3 * (top - mean) + 0.2 * coverage).clamp(0.0, 1.0)
}

pub struct Library {
    indexer: Arc<KnowledgeIndexer>,
    engine: HybridSearchEngine,
    interpreter: QueryInterpreter,
    audit: Arc<dyn AuditSink>,
}

impl Library {
    /// Open the index described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let audit: Arc<dyn AuditSink> = if config.audit.enabled {
            Arc::new(
                JsonlAuditSink::start(&config.audit.path)
                    .with_context(|| "Failed to start audit writer")?,
            )
        } else {
            Arc::new(NullAuditSink)
        };
        let indexer = KnowledgeIndexer::builder(config)
            .embedder(Arc::clone(&embedder))
            .audit(Arc::clone(&audit))
            .open()
            .with_context(|| format!("Failed to open index at {}", config.index.root.display()))?;
        let engine = HybridSearchEngine::new(config.search_params(), embedder);
        Ok(Self::from_parts(Arc::new(indexer), engine))
    }

    /// Assemble from an existing indexer; the audit sink is the indexer's.
    pub fn from_parts(indexer: Arc<KnowledgeIndexer>, engine: HybridSearchEngine) -> Self {
        let top_k = engine.params().max_results;
        Self {
            audit: indexer.audit(),
            indexer,
            engine,
            interpreter: QueryInterpreter::new(top_k),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.engine = self.engine.with_reranker(reranker);
        self
    }

    pub fn indexer(&self) -> &Arc<KnowledgeIndexer> {
        &self.indexer
    }

    pub fn index_folder(&self, folder: &Path, options: &IndexOptions) -> Result<IndexReport, IndexError> {
        self.indexer.index_folder(folder, options)
    }

    /// Index on the blocking pool; see [`KnowledgeIndexer::spawn_index_folder`].
    pub async fn index_folder_in_background(
        &self,
        folder: PathBuf,
        options: IndexOptions,
    ) -> Result<IndexReport, IndexError> {
        self.indexer
            .spawn_index_folder(folder, options)
            .await
            .map_err(|e| IndexError::Worker(e.to_string()))?
    }

    pub fn remove_folder(&self, folder: &Path) -> Result<RemoveReport, IndexError> {
        self.indexer.remove_folder(folder)
    }

    pub fn get_stats(&self) -> IndexStats {
        self.indexer.get_stats()
    }

    pub fn list_folders(&self) -> Vec<FolderSummary> {
        self.indexer.list_folders()
    }

    /// Interpret `query_text`, merge explicit `filters` over the inferred
    /// ones, and search the current snapshot.
    ///
    /// `limit` caps the result count (and lowers the backfill floor to match).
    pub fn search(
        &self,
        query_text: &str,
        filters: Option<QueryFilters>,
        limit: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let mut query = self.interpreter.interpret(query_text);
        if let Some(explicit) = filters {
            query.filters = query.filters.merged_with(&explicit);
        }

        let engine = match limit {
            Some(n) => {
                let n = n.max(1);
                query.top_k = n;
                let params = SearchParams {
                    max_results: n,
                    min_results: self.engine.params().min_results.min(n),
                    ..self.engine.params().clone()
                };
                self.engine.clone().with_params(params)
            }
            None => self.engine.clone(),
        };

        let snapshot = self.indexer.snapshot();
        let results = match engine.search(&snapshot.corpus, &query) {
            Ok(results) => results,
            Err(e) => {
                warn!(query = %query_text, error = %e, "search rejected");
                self.audit.record(AuditEvent::new(
                    "search_failed",
                    json!({ "query": query_text, "error": e.to_string() }),
                ));
                return Err(e);
            }
        };

        let response = SearchResponse {
            confidence: confidence(&results),
            elapsed_ms: started.elapsed().as_millis() as u64,
            lookup: query.intent.is_lookup(),
            query,
            results,
        };
        info!(
            query = %query_text,
            intent = ?response.query.intent,
            results = response.results.len(),
            confidence = response.confidence,
            "search complete"
        );
        self.audit.record(AuditEvent::new(
            "search",
            json!({
                "query": query_text,
                "intent": response.query.intent,
                "lookup": response.lookup,
                "filters": response.query.filters,
                "results": response.results.len(),
                "top_chunk": response.results.first().map(|r| r.chunk.chunk_id.clone()),
                "elapsed_ms": response.elapsed_ms,
            }),
        ));
        Ok(response)
    }
}
