//! TOML configuration.
//!
//! Every section carries serde defaults, so an empty file (or no file at all)
//! yields a working offline setup. [`load_config`] validates the values and
//! bails with a message naming the offending key.

use anyhow::{bail, Context, Result};
use docket_core::search::{BoostParams, SearchParams};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub boosts: BoostsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted index artifacts.
    #[serde(default = "default_index_root")]
    pub root: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
        }
    }
}

fn default_index_root() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default)]
    pub strict_threshold: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            score_threshold: default_score_threshold(),
            min_results: default_min_results(),
            max_results: default_max_results(),
            rerank_top_n: default_rerank_top_n(),
            strict_threshold: false,
        }
    }
}

fn default_bm25_weight() -> f64 {
    0.4
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_candidate_multiplier() -> usize {
    4
}
fn default_score_threshold() -> f64 {
    0.3
}
fn default_min_results() -> usize {
    3
}
fn default_max_results() -> usize {
    10
}
fn default_rerank_top_n() -> usize {
    20
}

/// Multiplicative metadata boosts. Every multiplier must be `>= 1.0`.
#[derive(Debug, Deserialize, Clone)]
pub struct BoostsConfig {
    #[serde(default = "default_header_boost")]
    pub header: f64,
    #[serde(default = "default_definition_boost")]
    pub definition: f64,
    #[serde(default = "default_recent_boost")]
    pub recent: f64,
    #[serde(default = "default_executed_boost")]
    pub executed: f64,
    #[serde(default = "default_context_boost")]
    pub dates: f64,
    #[serde(default = "default_context_boost")]
    pub money: f64,
    /// A document modified within this many days counts as recent.
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
}

impl Default for BoostsConfig {
    fn default() -> Self {
        Self {
            header: default_header_boost(),
            definition: default_definition_boost(),
            recent: default_recent_boost(),
            executed: default_executed_boost(),
            dates: default_context_boost(),
            money: default_context_boost(),
            recent_days: default_recent_days(),
        }
    }
}

fn default_header_boost() -> f64 {
    1.3
}
fn default_definition_boost() -> f64 {
    1.2
}
fn default_recent_boost() -> f64 {
    1.2
}
fn default_executed_boost() -> f64 {
    1.3
}
fn default_context_boost() -> f64 {
    1.1
}
fn default_recent_days() -> i64 {
    365
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (offline feature hashing) or `local` (fastembed model).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}

impl EmbeddingConfig {
    /// Vector dimensionality the index is built with.
    pub fn effective_dims(&self) -> usize {
        if let Some(dims) = self.dims {
            return dims;
        }
        match self.model.as_deref() {
            Some("bge-base-en-v1.5") | Some("nomic-embed-text-v1.5") => 768,
            Some("bge-large-en-v1.5") => 1024,
            _ => 384,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.docx", "**/*.txt", "**/*.md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: default_audit_path(),
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}
fn default_audit_path() -> PathBuf {
    PathBuf::from("./data/audit.jsonl")
}

impl Config {
    /// Retrieval tuning for the hybrid engine.
    pub fn search_params(&self) -> SearchParams {
        let r = &self.retrieval;
        let b = &self.boosts;
        SearchParams {
            bm25_weight: r.bm25_weight,
            vector_weight: r.vector_weight,
            candidate_multiplier: r.candidate_multiplier,
            score_threshold: r.score_threshold,
            min_results: r.min_results,
            max_results: r.max_results,
            strict_threshold: r.strict_threshold,
            rerank_top_n: r.rerank_top_n,
            boosts: BoostParams {
                header: b.header,
                definition: b.definition,
                recent: b.recent,
                executed: b.executed,
                dates: b.dates,
                money: b.money,
                recent_days: b.recent_days,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!("chunking.overlap must be < chunking.chunk_size");
        }

        // Validate retrieval
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.bm25_weight) {
            bail!("retrieval.bm25_weight must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&r.vector_weight) {
            bail!("retrieval.vector_weight must be in [0.0, 1.0]");
        }
        if (r.bm25_weight + r.vector_weight - 1.0).abs() > 1e-6 {
            bail!(
                "retrieval.bm25_weight + retrieval.vector_weight must equal 1.0 (got {})",
                r.bm25_weight + r.vector_weight
            );
        }
        if r.candidate_multiplier < 1 {
            bail!("retrieval.candidate_multiplier must be >= 1");
        }
        if r.min_results < 1 {
            bail!("retrieval.min_results must be >= 1");
        }
        if r.max_results < r.min_results {
            bail!("retrieval.max_results must be >= retrieval.min_results");
        }

        // Validate boosts
        let b = &self.boosts;
        for (name, value) in [
            ("header", b.header),
            ("definition", b.definition),
            ("recent", b.recent),
            ("executed", b.executed),
            ("dates", b.dates),
            ("money", b.money),
        ] {
            if value < 1.0 {
                bail!("boosts.{} must be >= 1.0 (got {})", name, value);
            }
        }
        if b.recent_days < 0 {
            bail!("boosts.recent_days must be >= 0");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "hash" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash or local.",
                other
            ),
        }
        if self.embedding.effective_dims() == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        // Validate ingest
        if self.ingest.include_globs.is_empty() {
            bail!("ingest.include_globs must not be empty");
        }
        for pattern in self.ingest.include_globs.iter().chain(&self.ingest.exclude_globs) {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid glob pattern in [ingest]: '{}'", pattern))?;
        }

        Ok(())
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}
