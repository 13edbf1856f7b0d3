//! Sentence-boundary text chunker.
//!
//! Splits each section of a [`StructuredDocument`] into [`Chunk`]s of at
//! most `chunk_size` characters, carrying the last `overlap` characters of
//! the previous chunk forward so context survives the boundary.
//!
//! # Algorithm
//!
//! 1. Walk sections in order; overlap never crosses a section boundary.
//! 2. Split section text into segments that end after `. ! ? ; :` followed
//!    by whitespace, or after a line break. Segments keep their trailing
//!    whitespace, so segments concatenate back to the section text.
//! 3. Accumulate segments until the next one would exceed `chunk_size`,
//!    then emit the accumulated span as the chunk body.
//! 4. A heading line is always emitted together with the segment after it.
//! 5. A single segment longer than `chunk_size` is cut at whitespace, never
//!    mid-word (if there is no whitespace the whole segment is kept).
//! 6. The overlap prefix is the tail of the previous body, advanced to the
//!    start of a word.
//!
//! Concatenating [`Chunk::body`] over all chunks reproduces the document
//! text exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! let chunker = Chunker::new(512, 50);
//! for chunk in chunker.chunks(&doc) {
//!     println!("{} {:?}", chunk.chunk_id, chunk.section_path);
//! }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{chunk_id, Chunk, StructuredDocument};
use crate::parse::{contains_date, contains_definition};

static MONEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s+(?:dollars|usd)\b|\busd\s?\d")
        .expect("money regex")
});

const SEGMENT_TERMINATORS: [char; 5] = ['.', '!', '?', ';', ':'];

/// Section-aware chunker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `chunk_size` is clamped to at least 1 and `overlap` to below `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    /// Lazily chunk `doc`. The iterator can be cloned to restart from the
    /// current position, or recreated to start over.
    pub fn chunks<'a>(&self, doc: &'a StructuredDocument) -> Chunks<'a> {
        Chunks {
            doc,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            section: 0,
            pos: 0,
            prev_body: None,
            index: 0,
        }
    }
}

/// Iterator over the chunks of one document.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    doc: &'a StructuredDocument,
    chunk_size: usize,
    overlap: usize,
    section: usize,
    /// Byte offset inside the current section's text.
    pos: usize,
    /// Byte range of the previous body inside the current section.
    prev_body: Option<(usize, usize)>,
    index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let section = self.doc.sections.get(self.section)?;
            let raw = section.raw_text.as_str();
            if self.pos >= raw.len() {
                self.section += 1;
                self.pos = 0;
                self.prev_body = None;
                continue;
            }

            let start = self.pos;
            let heading_start = start == 0 && section.has_heading;
            let end = next_chunk_end(raw, start, self.chunk_size, heading_start);
            let prefix = match self.prev_body {
                Some((ps, pe)) => overlap_tail(&raw[ps..pe], self.overlap),
                None => "",
            };

            let body = &raw[start..end];
            let char_start = section.char_start + start;
            let char_end = section.char_start + end;
            let mut text = String::with_capacity(prefix.len() + body.len());
            text.push_str(prefix);
            text.push_str(body);

            let chunk = Chunk {
                chunk_id: chunk_id(&self.doc.doc_id, self.index),
                doc_id: self.doc.doc_id.clone(),
                chunk_index: self.index,
                section_index: self.section,
                overlap_len: prefix.len(),
                section_path: self.doc.section_path(self.section),
                page_start: self.doc.page_at(char_start),
                page_end: self.doc.page_at(char_end.saturating_sub(1).max(char_start)),
                char_start,
                char_end,
                is_header: heading_start,
                is_definition: contains_definition(body)
                    || section.title.to_lowercase().contains("definition"),
                contains_dates: contains_date(body),
                contains_money: MONEY.is_match(body),
                contains_parties: self.doc.parties.iter().any(|p| body.contains(p.as_str())),
                embedding: None,
                embedding_failed: false,
                text,
            };

            self.prev_body = Some((start, end));
            self.pos = end;
            self.index += 1;
            return Some(chunk);
        }
    }
}

/// Find where the chunk starting at `start` ends.
fn next_chunk_end(raw: &str, start: usize, chunk_size: usize, heading_start: bool) -> usize {
    // Heading line stays with the sentence after it.
    let (first, min_cut) = if heading_start {
        let heading_end = skip_whitespace(raw, line_end(raw, start));
        if heading_end < raw.len() {
            (segment_end(raw, heading_end), heading_end)
        } else {
            (heading_end, start)
        }
    } else {
        (segment_end(raw, start), start)
    };

    let mut end = if char_len(&raw[start..first]) > chunk_size {
        split_oversize(raw, start, min_cut, first, chunk_size)
    } else {
        let mut end = first;
        while end < raw.len() {
            let next = segment_end(raw, end);
            if char_len(&raw[start..next]) > chunk_size {
                break;
            }
            end = next;
        }
        end
    };

    // Trailing whitespace is never emitted as a chunk of its own.
    if raw[end..].trim().is_empty() {
        end = raw.len();
    }
    end
}

/// End of the sentence/clause segment beginning at `from`, including
/// its trailing whitespace.
fn segment_end(raw: &str, from: usize) -> usize {
    let mut chars = raw[from..].char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        let is_break = ch == '\n'
            || (SEGMENT_TERMINATORS.contains(&ch)
                && chars.peek().is_some_and(|(_, next)| next.is_whitespace()));
        if is_break {
            return skip_whitespace(raw, from + i + ch.len_utf8());
        }
    }
    raw.len()
}

fn line_end(raw: &str, from: usize) -> usize {
    raw[from..]
        .find('\n')
        .map(|i| from + i + 1)
        .unwrap_or(raw.len())
}

fn skip_whitespace(raw: &str, from: usize) -> usize {
    raw[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| from + i)
        .unwrap_or(raw.len())
}

/// Cut an oversize segment `[start, seg_end)` after a whitespace character,
/// preferring the last cut that fits within `chunk_size` characters.
fn split_oversize(raw: &str, start: usize, min_cut: usize, seg_end: usize, chunk_size: usize) -> usize {
    let limit = byte_offset_of_char(raw, start, chunk_size).min(seg_end);
    let is_cut = |at: usize| {
        at > min_cut
            && at > start
            && raw[..at].chars().next_back().is_some_and(char::is_whitespace)
            && raw[at..].chars().next().is_some_and(|c| !c.is_whitespace())
    };

    let backward = raw[start..limit]
        .char_indices()
        .rev()
        .map(|(i, _)| start + i)
        .chain(std::iter::once(limit))
        .filter(|&at| is_cut(at))
        .max();
    if let Some(at) = backward {
        return at;
    }
    raw[limit..seg_end]
        .char_indices()
        .map(|(i, _)| limit + i)
        .find(|&at| is_cut(at))
        .unwrap_or(seg_end)
}

/// Tail of `body` of at most `overlap` characters, starting at a word.
fn overlap_tail(body: &str, overlap: usize) -> &str {
    if overlap == 0 || body.is_empty() {
        return "";
    }
    let count = char_len(body);
    if count <= overlap {
        return body;
    }
    let from = byte_offset_of_char(body, 0, count - overlap);
    let starts_word = body[..from].chars().next_back().is_some_and(char::is_whitespace);
    if starts_word {
        return &body[from..];
    }
    match body[from..].find(char::is_whitespace) {
        Some(ws) => {
            let rest = &body[from + ws..];
            rest.trim_start()
        }
        None => "",
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`-th character after byte `start`, clamped to the end.
fn byte_offset_of_char(s: &str, start: usize, n: usize) -> usize {
    s[start..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| start + i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{DocumentParser, RawDocument};
    use chrono::Utc;

    fn doc(text: &str) -> StructuredDocument {
        DocumentParser::new()
            .parse(&RawDocument {
                file_path: "/docs/test.txt".to_string(),
                content_hash: "h".to_string(),
                modified_at: Utc::now(),
                pages: vec![(1, text.to_string())],
            })
            .unwrap()
    }

    fn long_text() -> String {
        let mut text = String::from("1. Scope\n");
        for i in 0..40 {
            text.push_str(&format!("Sentence number {} describes an obligation of the parties. ", i));
        }
        text.push_str("\n2. Payment\nThe fee is $5,000 payable on March 1, 2024.\n");
        text
    }

    #[test]
    fn test_bodies_reconstruct_document() {
        let text = long_text();
        let d = doc(&text);
        let chunks: Vec<Chunk> = Chunker::new(200, 40).chunks(&d).collect();
        assert!(chunks.len() > 3);
        let rebuilt: String = chunks.iter().map(|c| c.body()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_chunk_indices_and_ids() {
        let d = doc(&long_text());
        for (i, c) in Chunker::new(150, 20).chunks(&d).enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.chunk_id, format!("{}#c{:04}", d.doc_id, i));
        }
    }

    #[test]
    fn test_body_within_budget_and_on_boundaries() {
        let d = doc(&long_text());
        for c in Chunker::new(200, 40).chunks(&d) {
            assert!(c.body().chars().count() <= 200, "oversize: {:?}", c.body());
            let last = c.body().trim_end().chars().last().unwrap();
            assert!(
                SEGMENT_TERMINATORS.contains(&last) || c.body().ends_with('\n') || last.is_alphanumeric(),
                "unexpected boundary in {:?}",
                c.body()
            );
        }
    }

    #[test]
    fn test_overlap_comes_from_previous_body() {
        let d = doc(&long_text());
        let chunks: Vec<Chunk> = Chunker::new(200, 40).chunks(&d).collect();
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.section_index != prev.section_index {
                assert_eq!(next.overlap_len, 0);
                continue;
            }
            let prefix = &next.text[..next.overlap_len];
            assert!(prefix.chars().count() <= 40);
            assert!(prev.body().ends_with(prefix));
        }
    }

    #[test]
    fn test_heading_kept_with_first_sentence() {
        let d = doc(&long_text());
        let chunks: Vec<Chunk> = Chunker::new(60, 10).chunks(&d).collect();
        let heads: Vec<&Chunk> = chunks.iter().filter(|c| c.is_header).collect();
        assert_eq!(heads.len(), 2);
        for h in heads {
            let lines: Vec<&str> = h.body().lines().collect();
            assert!(lines.len() >= 2, "heading alone in chunk: {:?}", h.body());
        }
    }

    #[test]
    fn test_never_splits_mid_word() {
        let text = "word ".repeat(100);
        let d = doc(&text);
        let chunks: Vec<Chunk> = Chunker::new(23, 5).chunks(&d).collect();
        for c in &chunks {
            assert!(c.body().starts_with("word"), "bad start {:?}", c.body());
        }
        let rebuilt: String = chunks.iter().map(|c| c.body()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_flags() {
        let d = doc(&long_text());
        let chunks: Vec<Chunk> = Chunker::new(512, 50).chunks(&d).collect();
        let payment = chunks
            .iter()
            .find(|c| c.section_path.iter().any(|s| s == "2. Payment"))
            .unwrap();
        assert!(payment.contains_money);
        assert!(payment.contains_dates);
        assert_eq!(payment.page_start, 1);
    }

    #[test]
    fn test_restartable() {
        let d = doc(&long_text());
        let chunker = Chunker::new(120, 30);
        let first: Vec<String> = chunker.chunks(&d).map(|c| c.text).collect();
        let second: Vec<String> = chunker.chunks(&d).map(|c| c.text).collect();
        assert_eq!(first, second);

        let mut iter = chunker.chunks(&d);
        iter.next();
        let resumed: Vec<String> = iter.clone().map(|c| c.text).collect();
        assert_eq!(resumed, first[1..].to_vec());
    }

    #[test]
    fn test_overlap_tail_snaps_to_word() {
        assert_eq!(overlap_tail("alpha beta gamma", 8), "gamma");
        assert_eq!(overlap_tail("alpha beta gamma", 10), "beta gamma");
        assert_eq!(overlap_tail("short", 10), "short");
        assert_eq!(overlap_tail("unbroken", 3), "");
    }
}
