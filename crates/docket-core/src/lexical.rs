//! BM25 lexical index over chunk tokens.
//!
//! Maintains per-term postings (chunk → term frequency), per-chunk token
//! lengths, and the running total length needed for the average, so chunks
//! can be added and removed one at a time without rebuilding the corpus.
//!
//! Scoring uses the standard Okapi BM25 formula with `k1 = 1.5`, `b = 0.75`
//! and the non-negative IDF variant `ln(1 + (N - df + 0.5) / (df + 0.5))`.
//!
//! The whole index is `serde`-serializable; it is persisted as the
//! `lexical/corpus.json` artifact.
//!
//! Posting lists sit behind `Arc` and are copied on first write, so a
//! cloned index only duplicates the lists a later add or remove touches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with",
];

/// Lowercase, split on anything that is not a letter or digit, and drop stopwords.
///
/// Hyphenated words split into their parts, so `non-compete` yields
/// `["non", "compete"]` on both the index and query side.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Inverted index with incremental BM25 statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    k1: f64,
    b: f64,
    /// term → (chunk_id → term frequency)
    postings: BTreeMap<String, Arc<BTreeMap<String, u32>>>,
    /// chunk_id → token count
    lengths: BTreeMap<String, usize>,
    total_length: usize,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            postings: BTreeMap::new(),
            lengths: BTreeMap::new(),
            total_length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.lengths.contains_key(chunk_id)
    }

    /// IDs of every indexed chunk, in ascending order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.lengths.keys().map(String::as_str)
    }

    /// Number of chunks containing `term`.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, |docs| docs.len())
    }

    pub fn average_length(&self) -> f64 {
        if self.lengths.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.lengths.len() as f64
        }
    }

    /// Index `text` under `chunk_id`, replacing any previous entry.
    pub fn add(&mut self, chunk_id: &str, text: &str) {
        if self.contains(chunk_id) {
            self.remove(chunk_id);
        }
        let tokens = tokenize(text);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        for (term, tf) in counts {
            Arc::make_mut(self.postings.entry(term).or_default()).insert(chunk_id.to_string(), tf);
        }
        self.lengths.insert(chunk_id.to_string(), tokens.len());
        self.total_length += tokens.len();
    }

    /// Remove `chunk_id`, updating document frequencies of all its terms.
    ///
    /// Returns `false` when the chunk was not indexed.
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(len) = self.lengths.remove(chunk_id) else {
            return false;
        };
        self.total_length -= len;
        self.postings.retain(|_, docs| {
            if docs.contains_key(chunk_id) {
                Arc::make_mut(docs).remove(chunk_id);
            }
            !docs.is_empty()
        });
        true
    }

    /// Raw BM25 score for every chunk sharing at least one term with the query.
    ///
    /// Duplicate query tokens count once.
    #[instrument(skip_all, fields(terms = query_tokens.len()))]
    pub fn score(&self, query_tokens: &[String]) -> HashMap<String, f64> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        let n = self.lengths.len() as f64;
        if n == 0.0 {
            return scores;
        }
        let avgdl = self.average_length().max(f64::EPSILON);
        let unique: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();

        for term in unique {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (chunk_id, &tf) in docs.iter() {
                let dl = self.lengths.get(chunk_id).copied().unwrap_or(0) as f64;
                let tf = tf as f64;
                let norm = tf * (self.k1 + 1.0) / (tf + self.k1 * (1.0 - self.b + self.b * dl / avgdl));
                *scores.entry(chunk_id.clone()).or_insert(0.0) += idf * norm;
            }
        }
        scores
    }

    /// The `k` best-scoring chunks accepted by `admit`, ties broken by
    /// chunk_id ascending.
    pub fn top<F>(&self, query_tokens: &[String], k: usize, admit: F) -> Vec<(String, f64)>
    where
        F: Fn(&str) -> bool,
    {
        let mut ranked: Vec<(String, f64)> = self
            .score(query_tokens)
            .into_iter()
            .filter(|(id, s)| *s > 0.0 && admit(id))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }
}
