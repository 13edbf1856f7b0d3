//! Hybrid retrieval over a [`Corpus`] snapshot.
//!
//! The engine is pure given a corpus: it reads both indexes, never mutates
//! them, and returns read-only [`SearchResult`] projections.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Reject queries without searchable tokens ([`SearchError::InvalidQuery`]);
//!    an empty corpus yields an empty list.
//! 2. Score lexical (BM25) and vector (cosine) candidates independently,
//!    dropping chunks that fail the query's filters, required terms, or
//!    excluded terms, and keep `max(top_k, max_results) × candidate_multiplier`
//!    per channel.
//! 3. Min-max normalize each channel to `[0, 1]`.
//! 4. Fuse: `score = bm25_weight × bm25 + vector_weight × vector`
//!    (a chunk absent from a channel scores 0 there).
//! 5. Multiply by the metadata boosts that apply (header, definition,
//!    recent, executed, dates, money).
//! 6. Sort by score (desc), chunk_id (asc).
//! 7. Optionally rerank the top `rerank_top_n`:
//!    `0.7 × rerank + 0.3 × fused`.
//! 8. Select: results at or above `score_threshold` if there are at least
//!    `min_results` of them, otherwise the best `min_results` regardless;
//!    always capped at `max_results`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::corpus::Corpus;
use crate::embedding::Embedder;
use crate::error::{RerankError, SearchError};
use crate::lexical::tokenize;
use crate::models::{Chunk, ChunkView, DocumentView, QueryIntent, SearchQuery, SearchResult};

/// Multiplicative metadata boosts. Every multiplier is `>= 1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostParams {
    pub header: f64,
    pub definition: f64,
    pub recent: f64,
    pub executed: f64,
    pub dates: f64,
    pub money: f64,
    /// Documents modified within this many days count as recent.
    pub recent_days: i64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            header: 1.3,
            definition: 1.2,
            recent: 1.2,
            executed: 1.3,
            dates: 1.1,
            money: 1.1,
            recent_days: 365,
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub bm25_weight: f64,
    pub vector_weight: f64,
    /// Candidates fetched per channel, as a multiple of the requested size.
    pub candidate_multiplier: usize,
    pub score_threshold: f64,
    pub min_results: usize,
    pub max_results: usize,
    /// Return only above-threshold results, never backfill.
    pub strict_threshold: bool,
    pub rerank_top_n: usize,
    pub boosts: BoostParams,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            bm25_weight: 0.4,
            vector_weight: 0.6,
            candidate_multiplier: 4,
            score_threshold: 0.3,
            min_results: 3,
            max_results: 10,
            strict_threshold: false,
            rerank_top_n: 20,
            boosts: BoostParams::default(),
        }
    }
}

/// Secondary scorer applied to the top fused candidates.
///
/// Scores are expected in `[0, 1]`, one per passage, in input order.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>, RerankError>;
}

const RERANK_WEIGHT: f64 = 0.7;
const MAX_HIGHLIGHTS: usize = 3;
const FALLBACK_HIGHLIGHT_CHARS: usize = 200;

const DATE_CUES: &[&str] = &["when", "date", "dates", "deadline", "deadlines", "expire", "expires", "expiration"];
const MONEY_CUES: &[&str] = &[
    "pay", "payment", "payments", "fee", "fees", "cost", "costs", "price", "amount", "compensation", "salary",
];

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[(String, f64)]) -> Vec<(&str, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(id, s)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            };
            (id.as_str(), norm)
        })
        .collect()
}

/// Weighted fusion of two normalized scores.
pub fn fuse(bm25_norm: f64, vector_norm: f64, params: &SearchParams) -> f64 {
    params.bm25_weight * bm25_norm + params.vector_weight * vector_norm
}

/// Apply the selection policy to a ranked list.
pub fn select<T>(ranked: Vec<T>, score: impl Fn(&T) -> f64, params: &SearchParams) -> Vec<T> {
    let max = params.max_results;
    let above = ranked
        .iter()
        .filter(|r| score(*r) >= params.score_threshold)
        .count();
    if params.strict_threshold || above >= params.min_results {
        ranked
            .into_iter()
            .filter(|r| score(r) >= params.score_threshold)
            .take(max)
            .collect()
    } else {
        ranked.into_iter().take(params.min_results.min(max)).collect()
    }
}

/// Up to three sentences of `text` containing a query token, or its opening
/// characters when none match.
pub fn highlights(text: &str, query_tokens: &[String]) -> Vec<String> {
    let wanted: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
    let mut out = Vec::new();
    for sentence in split_sentences(text) {
        if tokenize(sentence).iter().any(|t| wanted.contains(t.as_str())) {
            out.push(sentence.trim().to_string());
            if out.len() == MAX_HIGHLIGHTS {
                break;
            }
        }
    }
    if out.is_empty() {
        let head: String = text.trim().chars().take(FALLBACK_HIGHLIGHT_CHARS).collect();
        if !head.is_empty() {
            out.push(head);
        }
    }
    out
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        let boundary = ch == '\n'
            || (matches!(ch, '.' | '!' | '?')
                && chars.peek().map_or(true, |(_, next)| next.is_whitespace()));
        if boundary {
            let end = i + ch.len_utf8();
            if !text[start..end].trim().is_empty() {
                sentences.push(&text[start..end]);
            }
            start = end;
        }
    }
    if !text[start..].trim().is_empty() {
        sentences.push(&text[start..]);
    }
    sentences
}

struct Scored<'a> {
    chunk: &'a Chunk,
    bm25: f64,
    vector: f64,
    boost: f64,
    rerank: Option<f64>,
    score: f64,
}

/// Executes queries against both indexes of a corpus snapshot.
#[derive(Clone)]
pub struct HybridSearchEngine {
    params: SearchParams,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridSearchEngine {
    pub fn new(params: SearchParams, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            params,
            embedder,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Same embedder and reranker, different tuning.
    pub fn with_params(mut self, params: SearchParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn search(&self, corpus: &Corpus, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        self.search_at(corpus, query, Utc::now())
    }

    /// Like [`search`](Self::search), with an explicit clock for recency boosts.
    #[instrument(skip_all, fields(query = %query.raw))]
    pub fn search_at(
        &self,
        corpus: &Corpus,
        query: &SearchQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if query.tokens.is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "'{}' has no searchable terms after normalization",
                query.raw.trim()
            )));
        }
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let pool = query.top_k.max(self.params.max_results).max(1) * self.params.candidate_multiplier.max(1);
        let lexical = self.lexical_candidates(corpus, query, pool);
        let vector = self.vector_candidates(corpus, query, pool);
        debug!(lexical = lexical.len(), vector = vector.len(), "candidates");
        if lexical.is_empty() && vector.is_empty() {
            return Ok(Vec::new());
        }

        let bm25_map: HashMap<&str, f64> = normalize_scores(&lexical).into_iter().collect();
        let vec_map: HashMap<&str, f64> = normalize_scores(&vector).into_iter().collect();
        let mut ids: Vec<&str> = bm25_map.keys().chain(vec_map.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let wants_dates = wants_dates(query);
        let wants_money = wants_money(query);
        let mut scored: Vec<Scored<'_>> = ids
            .into_iter()
            .filter_map(|id| corpus.chunk(id))
            .map(|chunk| {
                let bm25 = bm25_map.get(chunk.chunk_id.as_str()).copied().unwrap_or(0.0);
                let vector = vec_map.get(chunk.chunk_id.as_str()).copied().unwrap_or(0.0);
                let boost = self.boost_for(corpus, chunk, now, wants_dates, wants_money);
                Scored {
                    chunk,
                    bm25,
                    vector,
                    boost,
                    rerank: None,
                    score: fuse(bm25, vector, &self.params) * boost,
                }
            })
            .collect();
        sort_ranked(&mut scored);

        if let Some(reranker) = &self.reranker {
            self.rerank(reranker.as_ref(), query, &mut scored);
        }

        let selected = select(scored, |s| s.score, &self.params);
        debug!(selected = selected.len(), "selection applied");

        Ok(selected
            .into_iter()
            .filter_map(|s| {
                let doc = corpus.document(&s.chunk.doc_id)?;
                Some(SearchResult {
                    chunk: ChunkView::from(s.chunk),
                    document: DocumentView::from(doc),
                    bm25_score: s.bm25,
                    vector_score: s.vector,
                    metadata_boost: s.boost,
                    rerank_score: s.rerank,
                    final_score: s.score,
                    match_highlights: highlights(&s.chunk.text, &query.tokens),
                })
            })
            .collect())
    }

    fn lexical_candidates(&self, corpus: &Corpus, query: &SearchQuery, pool: usize) -> Vec<(String, f64)> {
        corpus
            .lexical()
            .top(&query.tokens, pool, |id| admits(corpus, query, id))
    }

    fn vector_candidates(&self, corpus: &Corpus, query: &SearchQuery, pool: usize) -> Vec<(String, f64)> {
        if corpus.vector().is_empty() || self.params.vector_weight <= 0.0 {
            return Vec::new();
        }
        let query_vec = match self.embedder.embed(&query.text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, using lexical scores only");
                return Vec::new();
            }
        };
        corpus
            .vector()
            .search(&query_vec, corpus.vector().len())
            .into_iter()
            .filter(|(id, sim)| *sim > 0.0 && admits(corpus, query, id))
            .take(pool)
            .map(|(id, sim)| (id, f64::from(sim)))
            .collect()
    }

    fn boost_for(
        &self,
        corpus: &Corpus,
        chunk: &Chunk,
        now: DateTime<Utc>,
        wants_dates: bool,
        wants_money: bool,
    ) -> f64 {
        let b = &self.params.boosts;
        let mut boost = 1.0;
        if chunk.is_header {
            boost *= b.header;
        }
        if chunk.is_definition {
            boost *= b.definition;
        }
        if wants_dates && chunk.contains_dates {
            boost *= b.dates;
        }
        if wants_money && chunk.contains_money {
            boost *= b.money;
        }
        if let Some(doc) = corpus.document(&chunk.doc_id) {
            if now.signed_duration_since(doc.modified_at) <= Duration::days(b.recent_days) {
                boost *= b.recent;
            }
            if doc.status.is_executed() {
                boost *= b.executed;
            }
        }
        boost
    }

    fn rerank(&self, reranker: &dyn Reranker, query: &SearchQuery, scored: &mut [Scored<'_>]) {
        let n = self.params.rerank_top_n.min(scored.len());
        if n == 0 {
            return;
        }
        let passages: Vec<&str> = scored[..n].iter().map(|s| s.chunk.text.as_str()).collect();
        match reranker.score(&query.text, &passages) {
            Ok(scores) if scores.len() == n => {
                for (s, r) in scored[..n].iter_mut().zip(scores) {
                    s.rerank = Some(r);
                    s.score = RERANK_WEIGHT * r + (1.0 - RERANK_WEIGHT) * s.score;
                }
                // Blended scores can fall below unreranked ones.
                sort_ranked(scored);
                debug!(reranker = reranker.name(), n, "reranked");
            }
            Ok(scores) => warn!(
                reranker = reranker.name(),
                expected = n,
                got = scores.len(),
                "reranker returned wrong number of scores, keeping fused order"
            ),
            Err(e) => warn!(reranker = reranker.name(), error = %e, "rerank failed, keeping fused order"),
        }
    }
}

fn sort_ranked(scored: &mut [Scored<'_>]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

fn wants_dates(query: &SearchQuery) -> bool {
    query.intent == QueryIntent::ExtractDates
        || tokenize(&query.raw).iter().any(|t| DATE_CUES.contains(&t.as_str()))
}

fn wants_money(query: &SearchQuery) -> bool {
    query.raw.contains('$') || tokenize(&query.raw).iter().any(|t| MONEY_CUES.contains(&t.as_str()))
}

/// Whether a chunk passes the query's document filters and term constraints.
fn admits(corpus: &Corpus, query: &SearchQuery, chunk_id: &str) -> bool {
    let Some(chunk) = corpus.chunk(chunk_id) else {
        return false;
    };
    if !query.filters.is_empty() {
        match corpus.document(&chunk.doc_id) {
            Some(doc) if query.filters.matches(doc) => {}
            _ => return false,
        }
    }
    if query.required_terms.is_empty() && query.excluded_terms.is_empty() {
        return true;
    }
    let lower = chunk.text.to_lowercase();
    let tokens: HashSet<String> = tokenize(&chunk.text).into_iter().collect();
    let has = |term: &str| {
        let term = term.to_lowercase();
        if term.contains(char::is_whitespace) || tokenize(&term).len() != 1 {
            lower.contains(&term)
        } else {
            tokens.contains(&term)
        }
    };
    query.required_terms.iter().all(|t| has(t)) && !query.excluded_terms.iter().any(|t| has(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embedding::HashEmbedder;
    use crate::models::QueryFilters;
    use crate::parse::{DocumentParser, RawDocument};

    fn pair(id: &str, score: f64) -> (String, f64) {
        (id.to_string(), score)
    }

    fn corpus_with(docs: &[(&str, &str)]) -> Corpus {
        let embedder = HashEmbedder::new(64);
        let mut corpus = Corpus::new(64);
        for (path, text) in docs {
            let doc = DocumentParser::new()
                .parse(&RawDocument {
                    file_path: path.to_string(),
                    content_hash: "h".to_string(),
                    modified_at: Utc::now(),
                    pages: vec![(1, text.to_string())],
                })
                .unwrap();
            let chunks: Vec<Chunk> = Chunker::new(512, 50)
                .chunks(&doc)
                .map(|mut c| {
                    c.embedding = Some(embedder.embed(&c.text).unwrap());
                    c
                })
                .collect();
            corpus.insert_document(doc, chunks);
        }
        corpus
    }

    fn query(raw: &str) -> SearchQuery {
        SearchQuery {
            raw: raw.to_string(),
            text: raw.to_string(),
            tokens: tokenize(raw),
            intent: QueryIntent::GeneralSearch,
            filters: QueryFilters::default(),
            required_terms: Vec::new(),
            excluded_terms: Vec::new(),
            top_k: 10,
        }
    }

    fn engine(params: SearchParams) -> HybridSearchEngine {
        HybridSearchEngine::new(params, Arc::new(HashEmbedder::new(64)))
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let binding = [pair("c1", 5.0)];
        let result = normalize_scores(&binding);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![pair("c1", 10.0), pair("c2", 5.0), pair("c3", 0.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let binding = [pair("c1", 3.0), pair("c2", 3.0)];
        let result = normalize_scores(&binding);
        for (_, score) in &result {
            assert!((*score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fusion_monotonic_in_bm25() {
        let params = SearchParams::default();
        let mut last = f64::NEG_INFINITY;
        for step in 0..=10 {
            let bm25 = step as f64 / 10.0;
            let score = fuse(bm25, 0.37, &params);
            assert!(score >= last);
            last = score;
        }
    }

    #[test]
    fn test_select_bounds() {
        let params = SearchParams::default();
        for n in 1..30 {
            for step in 0..=10 {
                let cut = step as f64 / 10.0;
                let ranked: Vec<f64> = (0..n).map(|i| cut * (n - i) as f64 / n as f64).collect();
                let chosen = select(ranked, |s| *s, &params);
                assert!(chosen.len() >= params.min_results.min(n));
                assert!(chosen.len() <= params.max_results);
            }
        }
    }

    #[test]
    fn test_select_backfills_below_threshold() {
        let params = SearchParams::default();
        let chosen = select(vec![0.9, 0.1, 0.05, 0.01], |s| *s, &params);
        assert_eq!(chosen, vec![0.9, 0.1, 0.05]);
    }

    #[test]
    fn test_select_strict_threshold() {
        let params = SearchParams {
            strict_threshold: true,
            ..SearchParams::default()
        };
        let chosen = select(vec![0.9, 0.1, 0.05], |s| *s, &params);
        assert_eq!(chosen, vec![0.9]);
    }

    #[test]
    fn test_empty_query_is_invalid() {
        let corpus = corpus_with(&[("/a.txt", "Some text.")]);
        let err = engine(SearchParams::default())
            .search(&corpus, &query("the of and"))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[test]
    fn test_empty_corpus_returns_empty() {
        let results = engine(SearchParams::default())
            .search(&Corpus::new(64), &query("anything"))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_lexical_match_outranks_disjoint_doc_at_any_weight() {
        let corpus = corpus_with(&[
            ("/a.txt", "Arbitration proceedings occur in Houston."),
            ("/b.txt", "Quarterly invoices list shipping charges."),
        ]);
        for step in 0..=10 {
            let w = step as f64 / 10.0;
            let params = SearchParams {
                bm25_weight: 1.0 - w,
                vector_weight: w,
                ..SearchParams::default()
            };
            let results = engine(params).search(&corpus, &query("arbitration")).unwrap();
            assert!(results[0].document.file_path.ends_with("a.txt"));
            if let Some(other) = results.iter().find(|r| r.document.file_path.ends_with("b.txt")) {
                assert_eq!(other.bm25_score, 0.0);
                assert!(other.final_score < results[0].final_score);
            }
        }
    }

    #[test]
    fn test_boosts_compose_multiplicatively() {
        let corpus = corpus_with(&[("/a.txt", "1. Payment\nThe fee is $500 due on 01/15/2024.")]);
        let results = engine(SearchParams::default())
            .search(&corpus, &query("when is the fee payment due"))
            .unwrap();
        let top = &results[0];
        let b = BoostParams::default();
        let expected = b.header * b.recent * b.dates * b.money;
        assert!((top.metadata_boost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_filters_and_excluded_terms() {
        let corpus = corpus_with(&[
            ("/a.txt", "Governed by the laws of Texas. Arbitration in Austin."),
            ("/b.txt", "Governed by the laws of California. Arbitration in Fresno."),
        ]);
        let mut q = query("arbitration");
        q.filters.jurisdictions = vec![crate::models::Jurisdiction::California];
        let results = engine(SearchParams::default()).search(&corpus, &q).unwrap();
        assert!(results.iter().all(|r| r.document.file_path.ends_with("b.txt")));

        let mut q = query("arbitration");
        q.excluded_terms = vec!["fresno".to_string()];
        let results = engine(SearchParams::default()).search(&corpus, &q).unwrap();
        assert!(results.iter().all(|r| r.document.file_path.ends_with("a.txt")));
    }

    struct Reverse;

    impl Reranker for Reverse {
        fn name(&self) -> &str {
            "reverse"
        }

        fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f64>, RerankError> {
            let last = passages.len().saturating_sub(1).max(1) as f64;
            Ok((0..passages.len()).map(|i| i as f64 / last).collect())
        }
    }

    struct Broken;

    impl Reranker for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f64>, RerankError> {
            Err(RerankError("model missing".to_string()))
        }
    }

    #[test]
    fn test_rerank_reorders_and_failure_falls_back() {
        let corpus = corpus_with(&[
            ("/a.txt", "Termination termination termination notice."),
            ("/b.txt", "Termination requires notice in writing to the other party."),
        ]);
        let base = engine(SearchParams::default());
        let fused = base.search(&corpus, &query("termination")).unwrap();

        let reranked = base
            .clone()
            .with_reranker(Arc::new(Reverse))
            .search(&corpus, &query("termination"))
            .unwrap();
        assert_eq!(reranked[0].chunk.chunk_id, fused[1].chunk.chunk_id);
        assert!(reranked[0].rerank_score.is_some());

        let fallback = base
            .with_reranker(Arc::new(Broken))
            .search(&corpus, &query("termination"))
            .unwrap();
        let ids = |r: &[SearchResult]| r.iter().map(|x| x.chunk.chunk_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&fallback), ids(&fused));
    }

    struct Dismissive;

    impl Reranker for Dismissive {
        fn name(&self) -> &str {
            "dismissive"
        }

        fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f64>, RerankError> {
            Ok(vec![0.0; passages.len()])
        }
    }

    #[test]
    fn test_partial_rerank_keeps_final_order_sorted() {
        let corpus = corpus_with(&[
            ("/a.txt", "Termination notice is required."),
            ("/b.txt", "Termination notice is required promptly."),
            (
                "/c.txt",
                "Termination of the lease happens after many years of occupancy by the tenant under the agreement.",
            ),
        ]);
        let params = SearchParams {
            rerank_top_n: 1,
            score_threshold: 0.0,
            ..SearchParams::default()
        };
        let base = engine(params);
        let fused = base.search(&corpus, &query("termination notice")).unwrap();
        assert!(fused.len() >= 2);

        let reranked = base
            .with_reranker(Arc::new(Dismissive))
            .search(&corpus, &query("termination notice"))
            .unwrap();
        assert_eq!(reranked.len(), fused.len());
        for pair in reranked.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
        let demoted = reranked.iter().find(|r| r.rerank_score.is_some()).unwrap();
        assert_eq!(demoted.chunk.chunk_id, fused[0].chunk.chunk_id);
        assert!(demoted.final_score < fused[0].final_score);
        assert_ne!(reranked[0].chunk.chunk_id, fused[0].chunk.chunk_id);
    }

    #[test]
    fn test_highlights() {
        let text = "Intro line. The non-compete lasts 12 months. Unrelated.";
        let h = highlights(text, &tokenize("non-compete"));
        assert_eq!(h, vec!["The non-compete lasts 12 months."]);
        let fallback = highlights(text, &tokenize("zebra"));
        assert_eq!(fallback, vec![text.to_string()]);
    }
}
