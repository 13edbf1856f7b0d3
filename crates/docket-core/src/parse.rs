//! Structural parser for extracted legal text.
//!
//! Turns the `(page, text)` pairs produced by a text extractor into a
//! [`StructuredDocument`]: an ordered section tree with page ranges, plus
//! detected parties, dates, defined terms, clause types, document type,
//! jurisdiction, and execution status.
//!
//! # Sections
//!
//! Heading lines are recognized in this order:
//!
//! | Form                      | Example                | Level          |
//! |---------------------------|------------------------|----------------|
//! | `ARTICLE <n>`             | `ARTICLE IV: Term`     | 1              |
//! | `Section <n>` / `§<n>`    | `§5.2 Payment`         | dots + 1       |
//! | Roman numeral             | `IV. TERMINATION`      | 1              |
//! | Decimal numbering         | `4.2 Non-Compete`      | dots + 1       |
//! | ALL-CAPS line             | `GOVERNING LAW`        | 0              |
//!
//! Sections partition the document text exactly: each section's
//! `raw_text` runs from its heading line to the next heading, and a
//! whitespace-only preamble is folded into the first section. A document
//! without any heading yields a single untitled section spanning the text.
//!
//! # Classification
//!
//! Document type and jurisdiction use a [`Classifier`]: weighted regex
//! counts over the whole text, highest score wins, ties go to the earlier
//! entry of a fixed priority list, and no hits at all selects the fallback
//! variant with confidence `0.0`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::models::{
    Classification, ClauseType, DocType, DocumentStatus, Jurisdiction, PageSpan, Section,
    StructuredDocument,
};

/// Extracted text of one file, as handed over by a text extractor.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub file_path: String,
    /// SHA-256 of the file bytes.
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
    /// `(page_number, text)` pairs in page order.
    pub pages: Vec<(u32, String)>,
}

/// Normalize a path string so the same file always hashes to the same ID.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stable document ID: the first 16 hex chars of SHA-256 over the normalized path.
pub fn doc_id_for_path(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_path(path).as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

static ARTICLE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:ARTICLE|Article)\s+([IVXLCDM]+|\d+)[:.\s]+(.+)$").expect("article regex")
});
static SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:§|Section|SECTION)\s*(\d+(?:\.\d+)*)[:.\s]+(.+)$").expect("section regex")
});
static ROMAN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([IVXLCDM]+)\.\s+(\S.*)$").expect("roman regex"));
static NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}(?:\.\d{1,3})*)\.?[:\s]+([A-Z][^.]*)\.?$").expect("numbered regex")
});
static CAPS_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9\s&'/,()\-]{2,}:?$").expect("caps regex"));

const MAX_HEADING_LEN: usize = 100;

static EFFECTIVE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:effective|executed|signed|dated)(?:\s+as\s+of)?(?:\s+date)?\s*:?\s*(?:on\s+)?((?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}|\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|\d{4}-\d{2}-\d{2})",
    )
    .expect("effective date regex")
});
static ANY_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}|\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2})\b",
    )
    .expect("date regex")
});
static BETWEEN_PARTIES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i:by\s+and\s+)?(?i:between)\s+([^,(\n]+?)(?:,?\s*\([^)]*\))?,?\s+(?i:and)\s+([^,(;\n]+?)(?:\s*\(|[,;.]\s|[,;.]?$|\n)"#,
    )
    .expect("party regex")
});
static ENTITY_PARTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b((?:[A-Z][A-Za-z0-9&\-]*\s+){1,4}(?:Inc|LLC|L\.L\.C|Ltd|LLP|Corp|Corporation|Co)\b\.?)",
    )
    .expect("entity regex")
});
static PARTY_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bParty\s+[A-Z]\b").expect("party letter regex"));
static DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["“]([^"”]{1,49})["”]\s+(?:means|shall\s+mean|is\s+defined\s+as)\s+([^.]{1,199})\."#)
        .expect("definition regex")
});
static DEFINITION_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["“][^"”]{1,49}["”]\s+(?:means|shall\s+mean|is\s+defined\s+as|has\s+the\s+meaning)"#)
        .expect("definition cue regex")
});
static DRAFT_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdraft\b|\bfor\s+discussion\s+purposes\b").expect("draft regex"));
static EXECUTED_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)/s/\s*\w|\bfully\s+executed\b|\b(?:executed|signed)\s+(?:by|on)\b|\bsignature:\s*[a-z]",
    )
    .expect("executed regex")
});

static CLAUSE_PATTERNS: Lazy<Vec<(ClauseType, Regex)>> = Lazy::new(|| {
    [
        (ClauseType::NonCompete, r"(?i)non-?\s?compet|not\s+to\s+compete"),
        (ClauseType::Confidentiality, r"(?i)confidential|non-disclosure"),
        (ClauseType::Termination, r"(?i)terminat|cancellation"),
        (ClauseType::Arbitration, r"(?i)arbitrat|dispute\s+resolution"),
        (ClauseType::Indemnification, r"(?i)indemnif|liabilit"),
        (ClauseType::IntellectualProperty, r"(?i)intellectual\s+property|\bip\s+rights\b"),
        (ClauseType::GoverningLaw, r"(?i)governing\s+law|choice\s+of\s+law|governed\s+by\s+the\s+laws"),
    ]
    .into_iter()
    .map(|(clause, pattern)| (clause, Regex::new(pattern).expect("clause regex")))
    .collect()
});

/// Scored-keyword classifier over a closed set of variants.
pub struct Classifier<T> {
    rules: Vec<(T, Regex, f32)>,
    fallback: T,
    saturation: f32,
}

impl<T: Copy> Classifier<T> {
    /// `rules` are `(variant, pattern, weight)` in priority order; a score of
    /// `saturation` or more maps to confidence `1.0`.
    pub fn new(rules: &[(T, &str, f32)], fallback: T, saturation: f32) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(value, pattern, weight)| Ok((*value, Regex::new(pattern)?, *weight)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            rules,
            fallback,
            saturation,
        })
    }

    pub fn classify(&self, text: &str) -> Classification<T> {
        let mut best: Option<(T, f32)> = None;
        for (value, pattern, weight) in &self.rules {
            let score = pattern.find_iter(text).count() as f32 * weight;
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((*value, score));
            }
        }
        match best {
            Some((value, score)) => Classification {
                value,
                confidence: (score / self.saturation).min(1.0),
            },
            None => Classification {
                value: self.fallback,
                confidence: 0.0,
            },
        }
    }
}

static DOCTYPE_CLASSIFIER: Lazy<Classifier<DocType>> = Lazy::new(|| {
    Classifier::new(
        &[
            (
                DocType::Nda,
                r"(?i)\bnon-disclosure\b|\bconfidentiality\s+agreement\b|\bnda\b",
                2.0,
            ),
            (DocType::Contract, r"(?i)\bcontract\b|\bagreement\b", 1.0),
            (DocType::License, r"(?i)\blicen[cs]e\b|\blicensing\b|\blicensor\b|\blicensee\b", 1.0),
            (DocType::Policy, r"(?i)\bpolicy\b|\bhandbook\b|\bprocedures?\b", 1.0),
        ],
        DocType::Other,
        5.0,
    )
    .expect("doctype rules")
});

static JURISDICTION_CLASSIFIER: Lazy<Classifier<Jurisdiction>> = Lazy::new(|| {
    Classifier::new(
        &[
            (Jurisdiction::California, r"\bCalifornia\b", 1.0),
            (Jurisdiction::NewYork, r"\bNew\s+York\b", 1.0),
            (Jurisdiction::Texas, r"\bTexas\b", 1.0),
            (Jurisdiction::Florida, r"\bFlorida\b", 1.0),
            (Jurisdiction::Illinois, r"\bIllinois\b", 1.0),
            (Jurisdiction::Delaware, r"\bDelaware\b", 1.0),
            (Jurisdiction::Federal, r"\bUnited\s+States\b|\bFederal\b|\bU\.S\.", 1.0),
        ],
        Jurisdiction::Unknown,
        3.0,
    )
    .expect("jurisdiction rules")
});

struct Heading {
    title: String,
    number: Option<String>,
    level: u8,
}

fn level_for(number: &str) -> u8 {
    (number.matches('.').count() + 1).min(u8::MAX as usize) as u8
}

fn detect_heading(line: &str) -> Option<Heading> {
    if line.is_empty() || line.len() > MAX_HEADING_LEN {
        return None;
    }
    let title = line.trim_end_matches(':').to_string();
    if let Some(c) = ARTICLE_HEADING.captures(line) {
        return Some(Heading {
            title,
            number: Some(c[1].to_string()),
            level: 1,
        });
    }
    if let Some(c) = SECTION_HEADING.captures(line) {
        return Some(Heading {
            title,
            level: level_for(&c[1]),
            number: Some(c[1].to_string()),
        });
    }
    if let Some(c) = ROMAN_HEADING.captures(line) {
        return Some(Heading {
            title,
            number: Some(c[1].to_string()),
            level: 1,
        });
    }
    if let Some(c) = NUMBERED_HEADING.captures(line) {
        return Some(Heading {
            title,
            level: level_for(&c[1]),
            number: Some(c[1].to_string()),
        });
    }
    let letters = line.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if letters >= 3 && CAPS_HEADING.is_match(line) {
        return Some(Heading {
            title,
            number: None,
            level: 0,
        });
    }
    None
}

/// Clause types mentioned in `text`, in [`ClauseType::ALL`] order.
pub fn detect_clauses(text: &str) -> Vec<ClauseType> {
    CLAUSE_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(clause, _)| *clause)
        .collect()
}

/// Whether `text` contains a recognizable calendar date.
pub fn contains_date(text: &str) -> bool {
    ANY_DATE.is_match(text) || EFFECTIVE_DATE.is_match(text)
}

/// Whether `text` defines a term (`"Term" means ...`).
pub fn contains_definition(text: &str) -> bool {
    DEFINITION_CUE.is_match(text)
}

/// Parse a date in one of the formats legal documents commonly use.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    ["%B %d %Y", "%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d", "%m/%d/%y", "%m-%d-%y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

fn extract_title(text: &str, file_path: &str) -> String {
    let head: String = text.chars().take(500).collect();
    for line in head.lines().map(str::trim) {
        if line.len() <= 10 || line.len() >= 100 {
            continue;
        }
        let has_upper = line.chars().any(|c| c.is_uppercase());
        let has_lower = line.chars().any(|c| c.is_lowercase());
        if has_upper && !has_lower {
            return title_case(line);
        }
        let lower = line.to_lowercase();
        if ["agreement", "contract", "policy", "nda", "license"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return line.to_string();
        }
    }
    let stem = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path);
    title_case(&stem.replace(['_', '-'], " "))
}

fn clean_party(raw: &str) -> Option<String> {
    let mut party = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '“' || c == '”' || c == ',')
        .trim()
        .to_string();
    for prefix in ["the ", "The "] {
        if let Some(rest) = party.strip_prefix(prefix) {
            party = rest.to_string();
        }
    }
    let starts_upper = party.chars().next().is_some_and(|c| c.is_uppercase());
    if party.len() > 3 && party.len() < 80 && starts_upper {
        Some(party)
    } else {
        None
    }
}

fn extract_parties(text: &str) -> Vec<String> {
    let head: String = text.chars().take(3000).collect();
    let mut parties: Vec<String> = Vec::new();
    let mut push = |candidate: Option<String>| {
        if let Some(p) = candidate {
            if !parties.iter().any(|existing| existing.eq_ignore_ascii_case(&p)) {
                parties.push(p);
            }
        }
    };
    for caps in BETWEEN_PARTIES.captures_iter(&head) {
        push(clean_party(&caps[1]));
        push(clean_party(&caps[2]));
    }
    for m in ENTITY_PARTY.find_iter(&head) {
        push(clean_party(m.as_str()));
    }
    for m in PARTY_LETTER.find_iter(&head) {
        push(clean_party(m.as_str()));
    }
    parties.truncate(5);
    parties
}

fn extract_dates(text: &str) -> (Vec<NaiveDate>, Option<NaiveDate>) {
    let effective = EFFECTIVE_DATE
        .captures_iter(text)
        .find_map(|c| parse_date(&c[1]));
    let mut dates: Vec<NaiveDate> = ANY_DATE
        .find_iter(text)
        .filter_map(|m| parse_date(m.as_str()))
        .chain(effective)
        .collect();
    dates.sort();
    dates.dedup();
    (dates, effective)
}

fn extract_definitions(text: &str) -> BTreeMap<String, String> {
    DEFINITION
        .captures_iter(text)
        .map(|c| (c[1].trim().to_string(), c[2].trim().to_string()))
        .collect()
}

fn detect_status(text: &str) -> DocumentStatus {
    if DRAFT_CUE.is_match(text) {
        DocumentStatus::Draft
    } else if EXECUTED_CUE.is_match(text) {
        DocumentStatus::Executed
    } else {
        DocumentStatus::Unknown
    }
}

/// Converts extracted page text into a [`StructuredDocument`].
///
/// Stateless; one parser can be shared across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &RawDocument) -> Result<StructuredDocument, ParseError> {
        let mut text = String::new();
        let mut pages = Vec::with_capacity(raw.pages.len());
        for (i, (number, page_text)) in raw.pages.iter().enumerate() {
            // Pages cut mid-line carry their trailing whitespace.
            if i > 0 && !text.ends_with(char::is_whitespace) {
                text.push('\n');
            }
            let start = text.len();
            text.push_str(page_text);
            pages.push(PageSpan {
                number: *number,
                start,
                end: text.len(),
            });
        }
        if text.trim().is_empty() {
            return Err(ParseError::EmptyDocument(raw.file_path.clone()));
        }

        let title = extract_title(&text, &raw.file_path);
        let doctype = DOCTYPE_CLASSIFIER.classify(&text);
        let jurisdiction = JURISDICTION_CLASSIFIER.classify(&text);
        let (dates, effective_date) = extract_dates(&text);

        let mut doc = StructuredDocument {
            doc_id: doc_id_for_path(&raw.file_path),
            file_path: raw.file_path.clone(),
            title,
            content_hash: raw.content_hash.clone(),
            doctype: doctype.value,
            doctype_confidence: doctype.confidence,
            jurisdiction: jurisdiction.value,
            jurisdiction_confidence: jurisdiction.confidence,
            status: detect_status(&text),
            parties: extract_parties(&text),
            dates,
            effective_date,
            defined_terms: extract_definitions(&text),
            key_clauses: detect_clauses(&text),
            modified_at: raw.modified_at,
            page_count: pages.len() as u32,
            pages,
            sections: Vec::new(),
        };
        doc.sections = build_sections(&doc, &text);
        Ok(doc)
    }
}

fn build_sections(doc: &StructuredDocument, text: &str) -> Vec<Section> {
    let mut starts: Vec<(usize, Option<Heading>)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(heading) = detect_heading(line.trim()) {
            starts.push((offset, Some(heading)));
        }
        offset += line.len();
    }

    match starts.first_mut() {
        None => starts.push((0, None)),
        Some(first) if first.0 > 0 => {
            if text[..first.0].trim().is_empty() {
                first.0 = 0;
            } else {
                starts.insert(0, (0, None));
            }
        }
        Some(_) => {}
    }

    let bounds: Vec<usize> = starts
        .iter()
        .skip(1)
        .map(|(s, _)| *s)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut sections: Vec<Section> = Vec::with_capacity(starts.len());
    for ((start, heading), end) in starts.into_iter().zip(bounds) {
        let raw_text = &text[start..end];
        let (title, number, level, has_heading) = match heading {
            Some(h) => (h.title, h.number, h.level, true),
            None => (doc.title.clone(), None, 0, false),
        };
        let parent = if has_heading {
            sections
                .iter()
                .rposition(|s| s.has_heading && s.level < level)
        } else {
            None
        };
        sections.push(Section {
            title,
            number,
            level,
            parent,
            has_heading,
            page_start: doc.page_at(start),
            page_end: doc.page_at(end.saturating_sub(1).max(start)),
            char_start: start,
            clause_types: detect_clauses(raw_text),
            raw_text: raw_text.to_string(),
        });
    }
    sections
}
