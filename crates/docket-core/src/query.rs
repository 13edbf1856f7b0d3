//! Rule-based query interpretation.
//!
//! Turns free text into a [`SearchQuery`]: intent, structured filters
//! (jurisdiction, document type, date range, parties), required and excluded
//! terms, and the normalized token list. Nothing here can fail; anything
//! unrecognized is simply left out of the filters.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::lexical::tokenize;
use crate::models::{DateRange, DocType, Jurisdiction, QueryFilters, QueryIntent, SearchQuery};
use crate::parse::{detect_clauses, parse_date};

pub const DEFAULT_TOP_K: usize = 10;

static INTENT_RULES: Lazy<Vec<(QueryIntent, Regex)>> = Lazy::new(|| {
    [
        (
            QueryIntent::FindClause,
            r"\b(?:find|show|what)\b.*\bclauses?\b|non-?compet|\btermination\b|\bconfidentiality\b|\bliability\b|\bindemnif|\barbitration\b",
        ),
        (QueryIntent::CheckCompliance, r"\bcompli\w*|\blegal\b|\bviolat\w*|\brequire\w*"),
        (QueryIntent::CompareTerms, r"\bcompar\w*|\bdifference\b|\bsimilar\b|\bcontrast\b"),
        (
            QueryIntent::FindDefinition,
            r"\bwhat\s+is\b|\bdefine\b|\bdefinition\b|\bmeans\b|\brefers\s+to\b",
        ),
        (
            QueryIntent::ExtractDates,
            r"\bwhen\b|\bdates?\b|\bdeadlines?\b|\bexpir\w*|\beffective\b",
        ),
        (QueryIntent::ExtractParties, r"\bwho\b|\bpart(?:y|ies)\b|\bbetween\b.*\band\b"),
        (QueryIntent::Summarize, r"\bsummar\w*|\boverview\b|\bexplain\b|\bdescribe\b"),
    ]
    .into_iter()
    .map(|(intent, pattern)| (intent, Regex::new(&format!("(?i){}", pattern)).expect("intent regex")))
    .collect()
});

static JURISDICTION_TERMS: Lazy<Vec<(Jurisdiction, Regex)>> = Lazy::new(|| {
    [
        (Jurisdiction::California, r"\b(?:california|ca)\b"),
        (Jurisdiction::NewYork, r"\b(?:new\s+york|ny)\b"),
        (Jurisdiction::Texas, r"\b(?:texas|tx)\b"),
        (Jurisdiction::Florida, r"\b(?:florida|fl)\b"),
        (Jurisdiction::Illinois, r"\b(?:illinois|il)\b"),
        (Jurisdiction::Delaware, r"\bdelaware\b"),
        (Jurisdiction::Federal, r"\bfederal\b|\bunited\s+states\b|\bu\.s\.(?:\s|$)"),
    ]
    .into_iter()
    .map(|(j, pattern)| (j, Regex::new(&format!("(?i){}", pattern)).expect("jurisdiction regex")))
    .collect()
});

static DOCTYPE_TERMS: Lazy<Vec<(DocType, Regex)>> = Lazy::new(|| {
    [
        (DocType::Nda, r"\bndas?\b|\bnon-disclosure\b"),
        (DocType::Contract, r"\bcontracts?\b|\bagreements?\b"),
        (DocType::Policy, r"\bpolic(?:y|ies)\b|\bhandbook\b"),
        (DocType::License, r"\blicen[cs]es?\b"),
    ]
    .into_iter()
    .map(|(d, pattern)| (d, Regex::new(&format!("(?i){}", pattern)).expect("doctype regex")))
    .collect()
});

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("quoted regex"));
static PLUS_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)\+([\w][\w\-]*)").expect("plus regex"));
static MINUS_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)-([\w][\w\-]*)").expect("minus regex"));
static YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(before|after|since|until|prior\s+to)\s+)?((?:19|20)\d{2})\b").expect("year regex")
});
static FULL_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(before|after|since|until|prior\s+to)\s+)?((?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4})\b",
    )
    .expect("full date regex")
});
static BETWEEN_NAMES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bbetween\s+([A-Z][\w&]*(?:\s+[A-Z][\w&]*)*)\s+and\s+([A-Z][\w&]*(?:\s+[A-Z][\w&]*)*)")
        .expect("between regex")
});
static WITH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:with|party)\s+([A-Z][\w&]*(?:\s+[A-Z][\w&]*)*)").expect("with regex")
});

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[derive(Debug, Clone)]
pub struct QueryInterpreter {
    top_k: usize,
}

impl Default for QueryInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl QueryInterpreter {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    pub fn interpret(&self, raw: &str) -> SearchQuery {
        let required_terms = required_terms(raw);
        let excluded_terms: Vec<String> = MINUS_TERM
            .captures_iter(raw)
            .map(|c| c[1].to_lowercase())
            .collect();

        let cleaned = MINUS_TERM.replace_all(raw, " ");
        let cleaned = cleaned.replace(['"', '+'], " ");
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut text = cleaned.clone();
        let lower = cleaned.to_lowercase();
        for clause in detect_clauses(&cleaned) {
            if !lower.contains(clause.phrase()) {
                text.push(' ');
                text.push_str(clause.phrase());
            }
        }

        SearchQuery {
            raw: raw.to_string(),
            tokens: tokenize(&text),
            text,
            intent: classify_intent(&cleaned),
            filters: extract_filters(&cleaned),
            required_terms,
            excluded_terms,
            top_k: self.top_k,
        }
    }
}

pub fn classify_intent(query: &str) -> QueryIntent {
    INTENT_RULES
        .iter()
        .find(|(_, pattern)| pattern.is_match(query))
        .map(|(intent, _)| *intent)
        .unwrap_or(QueryIntent::GeneralSearch)
}

fn required_terms(raw: &str) -> Vec<String> {
    let mut terms: Vec<String> = QUOTED
        .captures_iter(raw)
        .map(|c| c[1].trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    for c in PLUS_TERM.captures_iter(raw) {
        push_unique(&mut terms, c[1].to_lowercase());
    }
    terms
}

pub fn extract_filters(query: &str) -> QueryFilters {
    let mut filters = QueryFilters::default();
    for (jurisdiction, pattern) in JURISDICTION_TERMS.iter() {
        if pattern.is_match(query) {
            push_unique(&mut filters.jurisdictions, *jurisdiction);
        }
    }
    for (doctype, pattern) in DOCTYPE_TERMS.iter() {
        if pattern.is_match(query) {
            push_unique(&mut filters.doctypes, *doctype);
        }
    }
    filters.date_range = extract_date_range(query);

    for c in BETWEEN_NAMES.captures_iter(query) {
        push_unique(&mut filters.parties, c[1].to_string());
        push_unique(&mut filters.parties, c[2].to_string());
    }
    for c in WITH_NAME.captures_iter(query) {
        push_unique(&mut filters.parties, c[1].to_string());
    }
    filters
}

fn bound(qualifier: Option<&str>, start: NaiveDate, end: NaiveDate) -> DateRange {
    match qualifier.map(|q| q.to_lowercase()) {
        Some(q) if q == "after" || q == "since" => DateRange {
            start: Some(start),
            end: None,
        },
        Some(_) => DateRange {
            start: None,
            end: Some(end),
        },
        None => DateRange {
            start: Some(start),
            end: Some(end),
        },
    }
}

fn widen(acc: Option<DateRange>, next: DateRange) -> DateRange {
    match acc {
        None => next,
        Some(a) => DateRange {
            start: match (a.start, next.start) {
                (Some(x), Some(y)) => Some(x.min(y)),
                _ => None,
            },
            end: match (a.end, next.end) {
                (Some(x), Some(y)) => Some(x.max(y)),
                _ => None,
            },
        },
    }
}

/// Date range implied by explicit dates or years in the query.
///
/// `before`/`until` bound the end, `after`/`since` bound the start, and a
/// bare year covers that whole year. Several mentions widen the range.
pub fn extract_date_range(query: &str) -> Option<DateRange> {
    let mut range: Option<DateRange> = None;
    let mut date_spans = Vec::new();
    for c in FULL_DATE.captures_iter(query) {
        let Some(m) = c.get(2) else { continue };
        date_spans.push(m.range());
        if let Some(date) = parse_date(m.as_str()) {
            range = Some(widen(range, bound(c.get(1).map(|q| q.as_str()), date, date)));
        }
    }
    for c in YEAR.captures_iter(query) {
        let Some(m) = c.get(2) else { continue };
        if date_spans.iter().any(|span| span.contains(&m.start())) {
            continue;
        }
        let Ok(year) = m.as_str().parse::<i32>() else { continue };
        let (Some(start), Some(end)) = (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year, 12, 31),
        ) else {
            continue;
        };
        range = Some(widen(range, bound(c.get(1).map(|q| q.as_str()), start, end)));
    }
    range.filter(|r| r.start.is_some() || r.end.is_some())
}
