//! Core data models used throughout Docket.
//!
//! These types represent the structured documents, chunks, queries, and
//! search results that flow through the indexing and retrieval pipeline.
//! Everything here is plain data: serializable, cloneable, and free of
//! index internals.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Document type, inferred from content cues by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Contract,
    Nda,
    Policy,
    License,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Contract => "contract",
            DocType::Nda => "nda",
            DocType::Policy => "policy",
            DocType::License => "license",
            DocType::Other => "other",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contract" | "agreement" => Ok(DocType::Contract),
            "nda" | "non-disclosure" => Ok(DocType::Nda),
            "policy" => Ok(DocType::Policy),
            "license" | "licence" => Ok(DocType::License),
            "other" => Ok(DocType::Other),
            other => Err(format!(
                "unknown document type '{}'. Use contract, nda, policy, license, or other.",
                other
            )),
        }
    }
}

/// Governing jurisdiction detected from state-name and venue mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Jurisdiction {
    #[serde(rename = "US")]
    Federal,
    #[serde(rename = "CA")]
    California,
    #[serde(rename = "NY")]
    NewYork,
    #[serde(rename = "TX")]
    Texas,
    #[serde(rename = "FL")]
    Florida,
    #[serde(rename = "IL")]
    Illinois,
    #[serde(rename = "DE")]
    Delaware,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Jurisdiction {
    pub fn code(&self) -> &'static str {
        match self {
            Jurisdiction::Federal => "US",
            Jurisdiction::California => "CA",
            Jurisdiction::NewYork => "NY",
            Jurisdiction::Texas => "TX",
            Jurisdiction::Florida => "FL",
            Jurisdiction::Illinois => "IL",
            Jurisdiction::Delaware => "DE",
            Jurisdiction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Jurisdiction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us" | "federal" | "united states" => Ok(Jurisdiction::Federal),
            "ca" | "california" => Ok(Jurisdiction::California),
            "ny" | "new york" => Ok(Jurisdiction::NewYork),
            "tx" | "texas" => Ok(Jurisdiction::Texas),
            "fl" | "florida" => Ok(Jurisdiction::Florida),
            "il" | "illinois" => Ok(Jurisdiction::Illinois),
            "de" | "delaware" => Ok(Jurisdiction::Delaware),
            "unknown" => Ok(Jurisdiction::Unknown),
            other => Err(format!("unknown jurisdiction '{}'", other)),
        }
    }
}

/// Execution status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Executed,
    Unknown,
}

impl DocumentStatus {
    pub fn is_executed(&self) -> bool {
        matches!(self, DocumentStatus::Executed)
    }
}

/// Clause categories recognized by keyword detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClauseType {
    NonCompete,
    Confidentiality,
    Termination,
    Arbitration,
    Indemnification,
    IntellectualProperty,
    GoverningLaw,
}

impl ClauseType {
    pub const ALL: [ClauseType; 7] = [
        ClauseType::NonCompete,
        ClauseType::Confidentiality,
        ClauseType::Termination,
        ClauseType::Arbitration,
        ClauseType::Indemnification,
        ClauseType::IntellectualProperty,
        ClauseType::GoverningLaw,
    ];

    /// Search phrase used when a query names this clause.
    pub fn phrase(&self) -> &'static str {
        match self {
            ClauseType::NonCompete => "non-compete",
            ClauseType::Confidentiality => "confidentiality",
            ClauseType::Termination => "termination",
            ClauseType::Arbitration => "arbitration",
            ClauseType::Indemnification => "indemnification",
            ClauseType::IntellectualProperty => "intellectual property",
            ClauseType::GoverningLaw => "governing law",
        }
    }
}

/// A scored classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification<T> {
    pub value: T,
    /// Confidence in `[0.0, 1.0]`; `0.0` means the fallback variant was chosen.
    pub confidence: f32,
}

/// Byte range of one source page inside the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub number: u32,
    pub start: usize,
    pub end: usize,
}

/// One section of a structured document.
///
/// `raw_text` is the exact slice of the document text from the heading line
/// up to the next heading, so concatenating the sections in order yields
/// the whole document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Heading line as written, e.g. `"4.2 Non-Compete"`.
    pub title: String,
    /// Numbering token of the heading, e.g. `"4.2"` or `"IV"`.
    pub number: Option<String>,
    /// Depth: `0` for untitled/root, `1` for top-level, `2` for `x.y`, ...
    pub level: u8,
    /// Index of the enclosing section, if any.
    pub parent: Option<usize>,
    /// Whether the section begins with a detected heading line.
    pub has_heading: bool,
    pub page_start: u32,
    pub page_end: u32,
    /// Byte offset of the section inside the document text.
    pub char_start: usize,
    #[serde(default)]
    pub clause_types: Vec<ClauseType>,
    #[serde(default)]
    pub raw_text: String,
}

/// A parsed document with structure and detected metadata.
///
/// Immutable once produced for a given file version; a changed file
/// produces a new value that supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    /// Stable hash of the normalized file path.
    pub doc_id: String,
    pub file_path: String,
    pub title: String,
    /// SHA-256 of the file bytes.
    pub content_hash: String,
    pub doctype: DocType,
    pub doctype_confidence: f32,
    pub jurisdiction: Jurisdiction,
    pub jurisdiction_confidence: f32,
    pub status: DocumentStatus,
    pub parties: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
    pub defined_terms: BTreeMap<String, String>,
    pub key_clauses: Vec<ClauseType>,
    pub modified_at: DateTime<Utc>,
    pub page_count: u32,
    pub pages: Vec<PageSpan>,
    pub sections: Vec<Section>,
}

impl StructuredDocument {
    /// The full document text, rebuilt from the section partition.
    pub fn text(&self) -> String {
        self.sections.iter().map(|s| s.raw_text.as_str()).collect()
    }

    /// Page number containing byte offset `pos`.
    pub fn page_at(&self, pos: usize) -> u32 {
        let idx = self.pages.partition_point(|p| p.start <= pos);
        self.pages
            .get(idx.saturating_sub(1))
            .map(|p| p.number)
            .unwrap_or(1)
    }

    /// Titles of the section and all its ancestors, root first.
    pub fn section_path(&self, index: usize) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let Some(section) = self.sections.get(i) else {
                break;
            };
            path.push(section.title.clone());
            cursor = section.parent;
        }
        path.reverse();
        path
    }

    /// Copy without section text, for persistence next to the chunk records.
    pub fn without_text(&self) -> Self {
        let mut doc = self.clone();
        for section in &mut doc.sections {
            section.raw_text.clear();
        }
        doc
    }
}

/// A bounded span of document text sized for embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{doc_id}#c{index:04}`.
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub section_index: usize,
    /// Carried-over overlap prefix followed by the chunk body.
    pub text: String,
    /// Byte length of the overlap prefix at the start of `text`.
    pub overlap_len: usize,
    pub section_path: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    /// Byte range of the body inside the document text.
    pub char_start: usize,
    pub char_end: usize,
    pub is_header: bool,
    pub is_definition: bool,
    pub contains_dates: bool,
    pub contains_money: bool,
    pub contains_parties: bool,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Set when embedding failed: the chunk is searchable lexically only.
    #[serde(default)]
    pub embedding_failed: bool,
}

impl Chunk {
    /// The non-overlap span of this chunk.
    pub fn body(&self) -> &str {
        &self.text[self.overlap_len..]
    }
}

/// Build the chunk ID for `doc_id` and `index`.
pub fn chunk_id(doc_id: &str, index: usize) -> String {
    format!("{}#c{:04}", doc_id, index)
}

/// Inclusive date range used by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Structured filters extracted from a query or supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub doctypes: Vec<DocType>,
    #[serde(default)]
    pub jurisdictions: Vec<Jurisdiction>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub parties: Vec<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.doctypes.is_empty()
            && self.jurisdictions.is_empty()
            && self.date_range.is_none()
            && self.parties.is_empty()
    }

    /// Overlay `other` on top of `self`: any non-empty field in `other` wins.
    pub fn merged_with(mut self, other: &QueryFilters) -> Self {
        if !other.doctypes.is_empty() {
            self.doctypes = other.doctypes.clone();
        }
        if !other.jurisdictions.is_empty() {
            self.jurisdictions = other.jurisdictions.clone();
        }
        if other.date_range.is_some() {
            self.date_range = other.date_range;
        }
        if !other.parties.is_empty() {
            self.parties = other.parties.clone();
        }
        self
    }

    /// Whether a document passes every populated filter.
    pub fn matches(&self, doc: &StructuredDocument) -> bool {
        if !self.doctypes.is_empty() && !self.doctypes.contains(&doc.doctype) {
            return false;
        }
        if !self.jurisdictions.is_empty() && !self.jurisdictions.contains(&doc.jurisdiction) {
            return false;
        }
        if let Some(range) = &self.date_range {
            let mut dated = doc.effective_date.into_iter().chain(doc.dates.iter().copied());
            if !dated.any(|d| range.contains(d)) {
                return false;
            }
        }
        if !self.parties.is_empty() {
            let known: Vec<String> = doc.parties.iter().map(|p| p.to_lowercase()).collect();
            let hit = self.parties.iter().any(|wanted| {
                let wanted = wanted.to_lowercase();
                known.iter().any(|p| p.contains(&wanted))
            });
            if !hit {
                return false;
            }
        }
        true
    }
}

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    FindClause,
    FindDefinition,
    ExtractDates,
    ExtractParties,
    CompareTerms,
    CheckCompliance,
    Summarize,
    GeneralSearch,
}

impl QueryIntent {
    /// Lookup/filter questions target a specific fact; the rest are open search.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            QueryIntent::FindClause
                | QueryIntent::FindDefinition
                | QueryIntent::ExtractDates
                | QueryIntent::ExtractParties
        )
    }
}

/// A normalized query ready for the hybrid engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub raw: String,
    /// Text sent to the embedder: the raw query minus exclusions, plus
    /// any clause phrases it names.
    pub text: String,
    pub tokens: Vec<String>,
    pub intent: QueryIntent,
    pub filters: QueryFilters,
    #[serde(default)]
    pub required_terms: Vec<String>,
    #[serde(default)]
    pub excluded_terms: Vec<String>,
    pub top_k: usize,
}

/// Read-only projection of a chunk in a search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkView {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub section_path: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub is_header: bool,
    pub is_definition: bool,
}

impl From<&Chunk> for ChunkView {
    fn from(c: &Chunk) -> Self {
        Self {
            chunk_id: c.chunk_id.clone(),
            doc_id: c.doc_id.clone(),
            text: c.text.clone(),
            section_path: c.section_path.clone(),
            page_start: c.page_start,
            page_end: c.page_end,
            is_header: c.is_header,
            is_definition: c.is_definition,
        }
    }
}

/// Read-only projection of a document in a search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentView {
    pub doc_id: String,
    pub file_path: String,
    pub title: String,
    pub doctype: DocType,
    pub jurisdiction: Jurisdiction,
    pub status: DocumentStatus,
    pub parties: Vec<String>,
    pub effective_date: Option<NaiveDate>,
    pub modified_at: DateTime<Utc>,
}

impl From<&StructuredDocument> for DocumentView {
    fn from(d: &StructuredDocument) -> Self {
        Self {
            doc_id: d.doc_id.clone(),
            file_path: d.file_path.clone(),
            title: d.title.clone(),
            doctype: d.doctype,
            jurisdiction: d.jurisdiction,
            status: d.status,
            parties: d.parties.clone(),
            effective_date: d.effective_date,
            modified_at: d.modified_at,
        }
    }
}

/// A ranked, attributed passage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk: ChunkView,
    pub document: DocumentView,
    /// Normalized lexical score in `[0, 1]` (0 when absent from lexical candidates).
    pub bm25_score: f64,
    /// Normalized vector score in `[0, 1]` (0 when absent from vector candidates).
    pub vector_score: f64,
    /// Product of the metadata multipliers applied.
    pub metadata_boost: f64,
    pub rerank_score: Option<f64>,
    pub final_score: f64,
    pub match_highlights: Vec<String>,
}
