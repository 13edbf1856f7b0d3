//! Text extraction for PDF, DOCX, and plain-text documents.
//!
//! Extraction hands back `(page_number, text)` pairs. PDFs are split on the
//! form feeds `pdf-extract` emits between pages; when a PDF yields a single
//! run of text, pages are approximated in [`SIMULATED_PAGE_CHARS`] slices so
//! citations still carry a page number. DOCX and plain text have no physical
//! pages and are split the same way.

use std::io::Read;
use std::path::Path;

use docket_core::error::ParseError;

/// Approximate characters per page when the format has no page markers.
pub const SIMULATED_PAGE_CHARS: usize = 3000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Source of page text for the indexer.
///
/// `bytes` are the file contents the indexer already read (and hashed), so
/// implementations never touch the filesystem twice.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<Vec<(u32, String)>, ParseError>;
}

/// Formats recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pdf,
    Docx,
    Text,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "txt" | "text" | "md" | "markdown" => Some(Format::Text),
            _ => None,
        }
    }
}

/// The default extractor: dispatches on file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<Vec<(u32, String)>, ParseError> {
        let failure = |reason: String| ParseError::ExtractionFailure {
            path: path.display().to_string(),
            reason,
        };
        match Format::from_path(path) {
            Some(Format::Pdf) => extract_pdf(bytes).map_err(failure),
            Some(Format::Docx) => extract_docx(bytes)
                .map(|text| paginate(&text))
                .map_err(failure),
            Some(Format::Text) => Ok(paginate(&String::from_utf8_lossy(bytes))),
            None => Err(ParseError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<(u32, String)>, String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())?;
    if !text.contains('\x0c') {
        return Ok(paginate(&text));
    }
    let mut pages: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    // A trailing form feed leaves an empty final page.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i as u32 + 1, text))
        .collect())
}

/// Slice `text` into pages of roughly [`SIMULATED_PAGE_CHARS`] characters,
/// breaking after a newline (or failing that, whitespace) so lines stay whole.
pub fn paginate(text: &str) -> Vec<(u32, String)> {
    let mut pages = Vec::new();
    let mut rest = text;
    while rest.len() > SIMULATED_PAGE_CHARS {
        let mut limit = SIMULATED_PAGE_CHARS;
        while !rest.is_char_boundary(limit) {
            limit -= 1;
        }
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(char::is_whitespace))
            .map(|i| i + 1)
            .unwrap_or(limit);
        // The cut keeps its separator so pages concatenate back to the source.
        let (page, tail) = rest.split_at(cut);
        pages.push(page.to_string());
        rest = tail;
    }
    pages.push(rest.to_string());
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i as u32 + 1, text))
        .collect()
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| "word/document.xml not found".to_string())?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| e.to_string())?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, one line per `w:p` paragraph so headings stay on
/// their own line.
fn extract_paragraphs(xml: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::parse::{DocumentParser, RawDocument};
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn unsupported_extension_returns_error() {
        let err = FileExtractor
            .extract(Path::new("notes.xlsx"), b"foo")
            .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_returns_extraction_failure() {
        let err = FileExtractor
            .extract(Path::new("a.pdf"), b"not a pdf")
            .unwrap_err();
        assert!(matches!(err, ParseError::ExtractionFailure { .. }));
    }

    #[test]
    fn invalid_zip_returns_extraction_failure() {
        let err = FileExtractor
            .extract(Path::new("a.docx"), b"not a zip")
            .unwrap_err();
        assert!(matches!(err, ParseError::ExtractionFailure { .. }));
    }

    #[test]
    fn text_files_are_one_page_when_short() {
        let pages = FileExtractor
            .extract(Path::new("nda.MD"), b"MUTUAL NDA\n\n1. Purpose")
            .unwrap();
        assert_eq!(pages, vec![(1, "MUTUAL NDA\n\n1. Purpose".to_string())]);
    }

    #[test]
    fn paginate_breaks_long_text_on_lines() {
        let line = "x".repeat(99);
        let text = vec![line.as_str(); 70].join("\n");
        let pages = paginate(&text);
        assert!(pages.len() > 1);
        assert_eq!(pages[0].0, 1);
        assert!(pages.iter().all(|(_, p)| p.len() <= SIMULATED_PAGE_CHARS));
        let joined: String = pages.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn paginate_word_cut_keeps_sentence_intact_after_parsing() {
        let sentence = "The licensee shall keep all confidential information secret. ";
        let text = format!("1. Confidentiality\n{}", sentence.repeat(80));
        let pages = paginate(&text);
        assert!(pages.len() > 2);
        assert!(pages[1].1.ends_with(' '));

        let doc = DocumentParser::new()
            .parse(&RawDocument {
                file_path: "/docs/long.txt".to_string(),
                content_hash: "h".to_string(),
                modified_at: chrono::Utc::now(),
                pages,
            })
            .unwrap();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].raw_text.trim_end(), text.trim_end());
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>1. Definitions</w:t></w:r></w:p>
<w:p><w:r><w:t>"Affiliate" means </w:t></w:r><w:r><w:t>any entity.</w:t></w:r></w:p>
</w:body></w:document>"#;
        let pages = FileExtractor
            .extract(Path::new("contract.docx"), &docx_bytes(xml))
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].1, "1. Definitions\n\"Affiliate\" means any entity.\n");
    }

    #[test]
    fn docx_without_document_xml_fails() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<a/>").unwrap();
            zip.finish().unwrap();
        }
        let err = FileExtractor
            .extract(Path::new("x.docx"), &cursor.into_inner())
            .unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
