//! In-memory corpus: documents, chunks, and both retrieval indexes.
//!
//! [`Corpus`] is the unit of snapshot isolation. Every mutation replaces a
//! document's chunk set in the lexical and vector indexes together, so a
//! chunk ID is either present in both (or lexical-only when its embedding
//! failed) or in neither.
//!
//! Documents and chunks are shared behind `Arc`, so cloning a corpus to
//! publish a snapshot copies pointers, not text or embeddings.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::lexical::LexicalIndex;
use crate::models::{Chunk, StructuredDocument};
use crate::vector::VectorIndex;

#[derive(Debug, Clone)]
pub struct Corpus {
    documents: BTreeMap<String, Arc<StructuredDocument>>,
    chunks: BTreeMap<String, Arc<Chunk>>,
    doc_chunks: BTreeMap<String, Arc<[String]>>,
    lexical: LexicalIndex,
    vector: VectorIndex,
}

/// What [`Corpus::assemble`] had to repair while loading persisted parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub lexical_rebuilt: bool,
    pub vector_rebuilt: bool,
    /// Chunks dropped because their document record was missing.
    pub orphan_chunks: usize,
    /// Documents dropped because none of their chunks survived.
    pub empty_documents: usize,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        *self == RestoreReport::default()
    }
}

impl Corpus {
    pub fn new(dims: usize) -> Self {
        Self {
            documents: BTreeMap::new(),
            chunks: BTreeMap::new(),
            doc_chunks: BTreeMap::new(),
            lexical: LexicalIndex::new(),
            vector: VectorIndex::new(dims),
        }
    }

    pub fn dims(&self) -> usize {
        self.vector.dims()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn document(&self, doc_id: &str) -> Option<&StructuredDocument> {
        self.documents.get(doc_id).map(Arc::as_ref)
    }

    pub fn documents(&self) -> impl Iterator<Item = &StructuredDocument> {
        self.documents.values().map(Arc::as_ref)
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id).map(Arc::as_ref)
    }

    /// All chunks in chunk-ID order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values().map(Arc::as_ref)
    }

    pub fn chunk_ids_for(&self, doc_id: &str) -> &[String] {
        self.doc_chunks.get(doc_id).map(|ids| &ids[..]).unwrap_or(&[])
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    /// Replace `doc` and its chunks, returning `(chunks_added, chunks_removed)`.
    ///
    /// Chunks carrying an embedding of the wrong dimensionality are kept
    /// lexical-only and flagged `embedding_failed`.
    pub fn insert_document(&mut self, doc: StructuredDocument, chunks: Vec<Chunk>) -> (usize, usize) {
        let removed = self.remove_document(&doc.doc_id);
        let mut ids = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            self.index_chunk(&mut chunk);
            ids.push(chunk.chunk_id.clone());
            self.chunks.insert(chunk.chunk_id.clone(), Arc::new(chunk));
        }
        let added = ids.len();
        debug!(doc_id = %doc.doc_id, added, removed, "document replaced");
        self.doc_chunks.insert(doc.doc_id.clone(), ids.into());
        self.documents.insert(doc.doc_id.clone(), Arc::new(doc));
        (added, removed)
    }

    /// Remove a document and all its chunks from both indexes.
    ///
    /// Returns the number of chunks removed.
    pub fn remove_document(&mut self, doc_id: &str) -> usize {
        self.documents.remove(doc_id);
        let Some(ids) = self.doc_chunks.remove(doc_id) else {
            return 0;
        };
        for id in ids.iter() {
            self.lexical.remove(id);
            self.vector.remove(id);
            self.chunks.remove(id);
        }
        ids.len()
    }

    fn index_chunk(&mut self, chunk: &mut Chunk) {
        self.lexical.add(&chunk.chunk_id, &chunk.text);
        if chunk.embedding_failed {
            return;
        }
        if let Some(embedding) = &chunk.embedding {
            if let Err(e) = self.vector.add(&chunk.chunk_id, embedding) {
                warn!(chunk_id = %chunk.chunk_id, error = %e, "vector rejected, keeping chunk lexical-only");
                chunk.embedding_failed = true;
            }
        }
    }

    /// Rebuild a corpus from persisted parts.
    ///
    /// Section text is restored from chunk bodies. The lexical and vector
    /// indexes are reused only when they cover exactly the expected chunk
    /// IDs; otherwise they are rebuilt by replaying every chunk record.
    pub fn assemble(
        documents: Vec<StructuredDocument>,
        chunks: Vec<Chunk>,
        lexical: Option<LexicalIndex>,
        vector: Option<VectorIndex>,
        dims: usize,
    ) -> (Self, RestoreReport) {
        let mut report = RestoreReport::default();
        let mut corpus = Corpus::new(dims);

        let mut by_doc: BTreeMap<String, Vec<Chunk>> = BTreeMap::new();
        for chunk in chunks {
            by_doc.entry(chunk.doc_id.clone()).or_default().push(chunk);
        }

        for mut doc in documents {
            let Some(mut doc_chunks) = by_doc.remove(&doc.doc_id) else {
                report.empty_documents += 1;
                continue;
            };
            doc_chunks.sort_by_key(|c| c.chunk_index);
            for section in &mut doc.sections {
                section.raw_text.clear();
            }
            for chunk in &doc_chunks {
                if let Some(section) = doc.sections.get_mut(chunk.section_index) {
                    section.raw_text.push_str(chunk.body());
                }
            }
            let ids: Vec<String> = doc_chunks.iter().map(|c| c.chunk_id.clone()).collect();
            for chunk in doc_chunks {
                corpus.chunks.insert(chunk.chunk_id.clone(), Arc::new(chunk));
            }
            corpus.doc_chunks.insert(doc.doc_id.clone(), ids.into());
            corpus.documents.insert(doc.doc_id.clone(), Arc::new(doc));
        }
        report.orphan_chunks = by_doc.values().map(Vec::len).sum();

        let expected_lexical: BTreeSet<&str> = corpus.chunks.keys().map(String::as_str).collect();
        let lexical_ok = match &lexical {
            Some(l) => l.chunk_ids().collect::<BTreeSet<_>>() == expected_lexical,
            None => expected_lexical.is_empty(),
        };

        let expected_vector: BTreeSet<&str> = corpus
            .chunks
            .values()
            .filter(|c| !c.embedding_failed)
            .filter(|c| c.embedding.as_ref().is_some_and(|e| e.len() == dims))
            .map(|c| c.chunk_id.as_str())
            .collect();
        let vector_ok = match &vector {
            Some(v) => v.dims() == dims && v.chunk_ids().collect::<BTreeSet<_>>() == expected_vector,
            None => expected_vector.is_empty(),
        };

        // A missing artifact with nothing to hold is not a repair.
        match lexical {
            Some(l) if lexical_ok => corpus.lexical = l,
            None if lexical_ok => {}
            _ => {
                report.lexical_rebuilt = true;
                for chunk in corpus.chunks.values() {
                    corpus.lexical.add(&chunk.chunk_id, &chunk.text);
                }
            }
        }
        match vector {
            Some(v) if vector_ok => corpus.vector = v,
            None if vector_ok => {}
            _ => {
                report.vector_rebuilt = true;
                for chunk in corpus.chunks.values_mut() {
                    if chunk.embedding_failed {
                        continue;
                    }
                    if let Some(embedding) = &chunk.embedding {
                        if corpus.vector.add(&chunk.chunk_id, embedding).is_err() {
                            Arc::make_mut(chunk).embedding_failed = true;
                        }
                    }
                }
            }
        }

        if !report.is_clean() {
            warn!(?report, "corpus restored with repairs");
        }
        (corpus, report)
    }
}
