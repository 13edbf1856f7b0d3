//! KnowledgeIndexer: incremental folder indexing with a single writer and
//! snapshot readers.
//!
//! # Concurrency
//!
//! The live index is an `Arc<IndexSnapshot>` behind a reader-writer lock.
//! Readers clone the `Arc` and search it without holding any lock. A writer
//! (index, remove, persist, load) must first take the writer slot; a second
//! writer is rejected with [`IndexError::ConcurrentWriteRejected`] rather
//! than queued. The writer mutates a private copy and publishes it by
//! swapping the `Arc`, so readers see each file either before or after its
//! update, never half-applied.
//!
//! # Pipeline
//!
//! ```text
//! scan → hash → (unchanged? skip) → extract → parse → chunk → embed → swap in
//! ```
//!
//! Per-file failures are logged, recorded in the report, and skipped. Only
//! persistence failures abort an operation. [`storage`](crate::storage)
//! commits whole generations, so the previous on-disk state stays valid, and
//! the indexer puts the last committed snapshot back in front of readers.
//!
//! Paths the folder walk cannot read are reported as skipped. Ledger entries
//! under them are kept, not treated as deleted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docket_core::chunk::Chunker;
use docket_core::corpus::{Corpus, RestoreReport};
use docket_core::embedding::{Embedder, HashEmbedder};
use docket_core::models::{Chunk, StructuredDocument};
use docket_core::parse::{normalize_path, DocumentParser, RawDocument};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEvent, AuditSink, NullAuditSink};
use crate::config::Config;
use crate::error::IndexError;
use crate::extract::{FileExtractor, TextExtractor};
use crate::folders::{FolderRegistry, FolderSummary};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::scan::Scanner;
use crate::state::{is_under, FileRecord, IndexState};
use crate::storage::Storage;

/// Files applied to the working copy between publishes to readers.
const PUBLISH_EVERY: usize = 32;

/// Everything a reader needs, published as one immutable value.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub corpus: Corpus,
    pub state: IndexState,
    pub folders: FolderRegistry,
}

/// Cooperative cancellation, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct IndexOptions {
    /// Ignore the hash ledger and reprocess every file.
    pub force_full: bool,
    pub cancel: CancelToken,
    pub progress: Arc<dyn IndexProgressReporter>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            force_full: false,
            cancel: CancelToken::default(),
            progress: Arc::new(NoProgress),
        }
    }
}

impl IndexOptions {
    pub fn full() -> Self {
        Self {
            force_full: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of one `index_folder` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub documents_processed: usize,
    pub documents_unchanged: usize,
    /// Previously indexed files no longer present in the folder.
    pub documents_removed: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    /// Chunks kept lexical-only because embedding failed.
    pub embedding_failures: usize,
    pub skipped: Vec<SkippedFile>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoveReport {
    pub folder: String,
    pub documents_removed: usize,
    pub chunks_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub lexical_only_chunks: usize,
    pub folders: usize,
    pub embedding_model: String,
    pub dims: usize,
    pub index_root: PathBuf,
    pub disk_bytes: u64,
}

/// What loading had to repair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub restore: RestoreReport,
    /// Ledger entries dropped because their document did not survive intact.
    pub ledger_entries_dropped: usize,
    /// Documents dropped because the ledger had no record of them.
    pub untracked_documents: usize,
    /// The stored records were unreadable and the index started empty.
    pub reset: bool,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        *self == LoadReport::default()
    }
}

enum FileOutcome {
    Unchanged,
    Skipped(String),
    Indexed {
        doc: Box<StructuredDocument>,
        chunks: Vec<Chunk>,
        record: FileRecord,
        embedding_failures: usize,
    },
}

/// Holds the writer slot until dropped.
struct WriterSlot<'a>(&'a AtomicBool);

impl<'a> WriterSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, IndexError> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| WriterSlot(flag))
            .map_err(|_| IndexError::ConcurrentWriteRejected)
    }
}

impl Drop for WriterSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Absolute form of `path`, resolving symlinks when it exists.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

fn path_key(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

pub struct IndexerBuilder {
    config: Config,
    extractor: Arc<dyn TextExtractor>,
    embedder: Option<Arc<dyn Embedder>>,
    audit: Arc<dyn AuditSink>,
}

impl IndexerBuilder {
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Load the persisted index (repairing it if needed) and return a ready indexer.
    pub fn open(self) -> Result<KnowledgeIndexer, IndexError> {
        let embedder = self.embedder.unwrap_or_else(|| {
            Arc::new(HashEmbedder::new(self.config.embedding.effective_dims()))
        });
        let indexer = KnowledgeIndexer {
            storage: Storage::new(&self.config.index.root),
            parser: DocumentParser::new(),
            chunker: Chunker::new(self.config.chunking.chunk_size, self.config.chunking.overlap),
            scanner: Scanner::new(&self.config.ingest)?,
            extractor: self.extractor,
            batch_size: self.config.embedding.batch_size.max(1),
            current: RwLock::new(Arc::new(IndexSnapshot {
                corpus: Corpus::new(embedder.dims()),
                state: IndexState::default(),
                folders: FolderRegistry::default(),
            })),
            embedder,
            audit: self.audit,
            writer: AtomicBool::new(false),
        };
        indexer.load()?;
        Ok(indexer)
    }
}

/// Owns the index: the only component that mutates documents, chunks, and
/// the hash ledger.
pub struct KnowledgeIndexer {
    storage: Storage,
    parser: DocumentParser,
    chunker: Chunker,
    scanner: Scanner,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    audit: Arc<dyn AuditSink>,
    batch_size: usize,
    current: RwLock<Arc<IndexSnapshot>>,
    writer: AtomicBool,
}

impl KnowledgeIndexer {
    /// Builder with the file extractor, a hash embedder sized from config,
    /// and no audit trail.
    pub fn builder(config: &Config) -> IndexerBuilder {
        IndexerBuilder {
            config: config.clone(),
            extractor: Arc::new(FileExtractor),
            embedder: None,
            audit: Arc::new(NullAuditSink),
        }
    }

    /// The current published state. Cheap; never blocks on a writer.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    /// Whether an index/remove/persist/load operation is running.
    pub fn is_busy(&self) -> bool {
        self.writer.load(Ordering::Acquire)
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Index every matching file under `folder`.
    ///
    /// Unchanged files (same content hash) are skipped without being read
    /// past hashing. Files that disappeared since the last run are removed.
    ///
    /// # Errors
    ///
    /// [`IndexError::ConcurrentWriteRejected`] when another writer is active,
    /// [`IndexError::FolderNotFound`] when `folder` is not a directory, and
    /// storage errors when the result cannot be persisted.
    #[instrument(skip(self, folder, options), fields(folder = %folder.display(), full = options.force_full))]
    pub fn index_folder(&self, folder: &Path, options: &IndexOptions) -> Result<IndexReport, IndexError> {
        let _slot = WriterSlot::acquire(&self.writer)?;
        if !folder.is_dir() {
            return Err(IndexError::FolderNotFound(folder.to_path_buf()));
        }
        let root = absolute(folder);
        let folder_key = path_key(&root);
        info!(folder = %folder_key, "indexing folder");
        self.audit.record(AuditEvent::new(
            "index_started",
            json!({ "folder": folder_key, "full": options.force_full }),
        ));

        options.progress.report(IndexProgressEvent::Discovering {
            folder: folder_key.clone(),
        });
        let scan = self.scanner.scan(&root);
        let files = scan.files;
        debug!(candidates = files.len(), unreadable = scan.unreadable.len(), "scan complete");

        let base = self.snapshot();
        let mut next: IndexSnapshot = (*base).clone();
        let mut report = IndexReport::default();

        // Records under an unreadable entry are kept as they are.
        let unreadable: Vec<String> = scan.unreadable.iter().map(|(p, _)| path_key(p)).collect();
        for ((_, reason), key) in scan.unreadable.iter().zip(&unreadable) {
            report.skipped.push(SkippedFile {
                path: key.clone(),
                reason: format!("unreadable: {}", reason),
            });
        }
        let present: HashSet<String> = files.iter().map(|p| path_key(p)).collect();
        let gone: Vec<FileRecord> = next
            .state
            .files_under(&folder_key)
            .filter(|r| !present.contains(&r.file_path))
            .filter(|r| !unreadable.iter().any(|u| is_under(&r.file_path, u)))
            .cloned()
            .collect();
        for record in &gone {
            report.chunks_removed += next.corpus.remove_document(&record.doc_id);
            next.state.remove(&record.file_path);
            report.documents_removed += 1;
            info!(file = %record.file_path, "file no longer present, removed from index");
        }

        let total = files.len() as u64;
        let mut pending = gone.len();
        for (i, path) in files.iter().enumerate() {
            if options.cancel.is_cancelled() {
                info!(done = i, total, "indexing cancelled");
                report.cancelled = true;
                break;
            }

            match self.prepare_file(path, &next, options.force_full) {
                FileOutcome::Unchanged => {
                    debug!(file = %path.display(), "unchanged, skipped");
                    report.documents_unchanged += 1;
                }
                FileOutcome::Skipped(reason) => {
                    warn!(file = %path.display(), reason = %reason, "file skipped");
                    self.audit.record(AuditEvent::new(
                        "file_skipped",
                        json!({ "file": path_key(path), "reason": reason }),
                    ));
                    report.skipped.push(SkippedFile {
                        path: path_key(path),
                        reason,
                    });
                }
                FileOutcome::Indexed {
                    doc,
                    chunks,
                    record,
                    embedding_failures,
                } => {
                    let (added, removed) = next.corpus.insert_document(*doc, chunks);
                    info!(file = %record.file_path, chunks = added, replaced = removed, "file indexed");
                    next.state.upsert(record);
                    report.documents_processed += 1;
                    report.chunks_added += added;
                    report.chunks_removed += removed;
                    report.embedding_failures += embedding_failures;
                    pending += 1;
                }
            }

            if pending >= PUBLISH_EVERY {
                self.publish(next.clone());
                pending = 0;
            }
            options.progress.report(IndexProgressEvent::Indexing {
                folder: folder_key.clone(),
                n: i as u64 + 1,
                total,
            });
        }

        let now = Utc::now();
        let entry = next.folders.touch(&folder_key, now);
        if !report.cancelled {
            entry.last_indexed = Some(now);
        }

        if let Err(e) = self.storage.save(&next.corpus, &next.state, &next.folders) {
            // Readers go back to what is on disk.
            *self.current.write() = base;
            warn!(folder = %folder_key, error = %e, "index not persisted, changes discarded");
            self.audit.record(AuditEvent::new(
                "index_failed",
                json!({ "folder": folder_key, "error": e.to_string(), "report": report }),
            ));
            return Err(e);
        }
        self.publish(next);

        info!(
            processed = report.documents_processed,
            unchanged = report.documents_unchanged,
            removed = report.documents_removed,
            skipped = report.skipped.len(),
            chunks_added = report.chunks_added,
            chunks_removed = report.chunks_removed,
            cancelled = report.cancelled,
            "indexing finished"
        );
        self.audit.record(AuditEvent::new(
            "index_completed",
            json!({ "folder": folder_key, "report": report }),
        ));
        Ok(report)
    }

    /// Run [`index_folder`](Self::index_folder) on the blocking pool so the
    /// caller's runtime keeps serving queries.
    pub fn spawn_index_folder(
        self: &Arc<Self>,
        folder: PathBuf,
        options: IndexOptions,
    ) -> tokio::task::JoinHandle<Result<IndexReport, IndexError>> {
        let indexer = Arc::clone(self);
        tokio::task::spawn_blocking(move || indexer.index_folder(&folder, &options))
    }

    /// Build the new document and chunk set for one file, off to the side.
    fn prepare_file(&self, path: &Path, current: &IndexSnapshot, force_full: bool) -> FileOutcome {
        let key = path_key(path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => return FileOutcome::Skipped(format!("read failed: {}", e)),
        };
        let content_hash = format!("{:x}", Sha256::digest(&bytes));

        if !force_full {
            if let Some(record) = current.state.get(&key) {
                if record.content_hash == content_hash && current.corpus.document(&record.doc_id).is_some() {
                    return FileOutcome::Unchanged;
                }
            }
        }

        let modified_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let pages = match self.extractor.extract(path, &bytes) {
            Ok(pages) => pages,
            Err(e) => return FileOutcome::Skipped(e.to_string()),
        };
        let raw = RawDocument {
            file_path: key.clone(),
            content_hash: content_hash.clone(),
            modified_at,
            pages,
        };
        let doc = match self.parser.parse(&raw) {
            Ok(doc) => doc,
            Err(e) => return FileOutcome::Skipped(e.to_string()),
        };

        let mut chunks: Vec<Chunk> = self.chunker.chunks(&doc).collect();
        let embedding_failures = self.embed_chunks(&mut chunks);
        debug!(
            file = %key,
            doctype = %doc.doctype,
            jurisdiction = %doc.jurisdiction,
            sections = doc.sections.len(),
            chunks = chunks.len(),
            "file parsed"
        );

        let record = FileRecord {
            file_path: key,
            doc_id: doc.doc_id.clone(),
            content_hash,
            last_indexed_at: Utc::now(),
            chunk_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
        };
        FileOutcome::Indexed {
            doc: Box::new(doc),
            chunks,
            record,
            embedding_failures,
        }
    }

    /// Attach embeddings in batches; returns how many chunks failed.
    fn embed_chunks(&self, chunks: &mut [Chunk]) -> usize {
        let dims = self.embedder.dims();
        let mut failures = 0;
        for batch in chunks.chunks_mut(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let mut vectors = self.embedder.embed_batch(&texts).into_iter();
            for chunk in batch.iter_mut() {
                let outcome = match vectors.next() {
                    Some(Ok(v)) if v.len() == dims => Ok(v),
                    Some(Ok(v)) => Err(format!("got {} dimensions, expected {}", v.len(), dims)),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Err("embedder returned too few vectors".to_string()),
                };
                match outcome {
                    Ok(v) => {
                        chunk.embedding = Some(v);
                        chunk.embedding_failed = false;
                    }
                    Err(reason) => {
                        warn!(chunk_id = %chunk.chunk_id, reason = %reason, "embedding failed, chunk kept lexical-only");
                        chunk.embedding = None;
                        chunk.embedding_failed = true;
                        failures += 1;
                    }
                }
            }
        }
        failures
    }

    /// Remove every indexed file under `folder` and unregister the folder.
    ///
    /// The folder need not exist on disk any more.
    #[instrument(skip(self, folder), fields(folder = %folder.display()))]
    pub fn remove_folder(&self, folder: &Path) -> Result<RemoveReport, IndexError> {
        let _slot = WriterSlot::acquire(&self.writer)?;
        let folder_key = path_key(&absolute(folder));
        let mut next: IndexSnapshot = (*self.snapshot()).clone();

        let records: Vec<FileRecord> = next.state.files_under(&folder_key).cloned().collect();
        let unregistered = next.folders.remove_under(&folder_key);
        if records.is_empty() && unregistered == 0 {
            return Err(IndexError::FolderNotIndexed(folder.to_path_buf()));
        }

        let mut report = RemoveReport {
            folder: folder_key.clone(),
            ..RemoveReport::default()
        };
        for record in &records {
            report.chunks_removed += next.corpus.remove_document(&record.doc_id);
            next.state.remove(&record.file_path);
            report.documents_removed += 1;
        }

        self.storage.save(&next.corpus, &next.state, &next.folders)?;
        self.publish(next);
        info!(
            documents = report.documents_removed,
            chunks = report.chunks_removed,
            "folder removed"
        );
        self.audit.record(AuditEvent::new("folder_removed", json!(report)));
        Ok(report)
    }

    /// Write the current state to disk.
    pub fn persist(&self) -> Result<(), IndexError> {
        let _slot = WriterSlot::acquire(&self.writer)?;
        let snapshot = self.snapshot();
        let generation = self
            .storage
            .save(&snapshot.corpus, &snapshot.state, &snapshot.folders)?;
        debug!(generation, "index persisted on request");
        Ok(())
    }

    /// Replace the in-memory state with what is on disk, rebuilding derived
    /// indexes from the chunk records when they are missing, unreadable, or
    /// inconsistent. Repairs are persisted immediately.
    pub fn load(&self) -> Result<LoadReport, IndexError> {
        let _slot = WriterSlot::acquire(&self.writer)?;
        let dims = self.embedder.dims();
        let stored = self.storage.load(dims)?;

        let mut report = LoadReport {
            reset: stored.reset,
            ..LoadReport::default()
        };
        let (mut corpus, restore) = Corpus::assemble(
            stored.documents,
            stored.chunks,
            stored.lexical,
            stored.vector,
            dims,
        );
        report.restore = restore;

        let mut state = stored.state;
        report.ledger_entries_dropped = state.retain(|r| {
            corpus
                .document(&r.doc_id)
                .is_some_and(|d| d.content_hash == r.content_hash)
                && corpus.chunk_ids_for(&r.doc_id) == r.chunk_ids.as_slice()
        });
        let tracked: HashSet<&str> = state.records().map(|r| r.doc_id.as_str()).collect();
        let untracked: Vec<String> = corpus
            .documents()
            .filter(|d| !tracked.contains(d.doc_id.as_str()))
            .map(|d| d.doc_id.clone())
            .collect();
        for doc_id in &untracked {
            corpus.remove_document(doc_id);
        }
        report.untracked_documents = untracked.len();

        let stale_dims = corpus
            .chunks()
            .filter(|c| c.embedding.as_ref().is_some_and(|e| e.len() != dims))
            .count();
        if stale_dims > 0 {
            warn!(
                chunks = stale_dims,
                dims, "stored embeddings have other dimensions; run a full re-index to re-embed"
            );
        }

        let snapshot = IndexSnapshot {
            corpus,
            state,
            folders: stored.folders,
        };
        if !report.is_clean() {
            warn!(
                lexical_rebuilt = report.restore.lexical_rebuilt,
                vector_rebuilt = report.restore.vector_rebuilt,
                orphan_chunks = report.restore.orphan_chunks,
                ledger_entries_dropped = report.ledger_entries_dropped,
                untracked_documents = report.untracked_documents,
                reset = report.reset,
                "index repaired on load"
            );
            self.audit.record(AuditEvent::new(
                "index_recovered",
                json!({
                    "lexical_rebuilt": report.restore.lexical_rebuilt,
                    "vector_rebuilt": report.restore.vector_rebuilt,
                    "orphan_chunks": report.restore.orphan_chunks,
                    "empty_documents": report.restore.empty_documents,
                    "ledger_entries_dropped": report.ledger_entries_dropped,
                    "untracked_documents": report.untracked_documents,
                    "reset": report.reset,
                }),
            ));
            self.storage
                .save(&snapshot.corpus, &snapshot.state, &snapshot.folders)?;
        }
        info!(
            documents = snapshot.corpus.document_count(),
            chunks = snapshot.corpus.chunk_count(),
            "index loaded"
        );
        self.publish(snapshot);
        Ok(report)
    }

    pub fn get_stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        let corpus = &snapshot.corpus;
        let lexical_only = corpus.chunks().filter(|c| c.embedding_failed).count();
        IndexStats {
            total_documents: corpus.document_count(),
            total_chunks: corpus.chunk_count(),
            embedded_chunks: corpus.vector().len(),
            lexical_only_chunks: lexical_only,
            folders: snapshot.folders.len(),
            embedding_model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
            index_root: self.storage.root().to_path_buf(),
            disk_bytes: self.storage.disk_usage(),
        }
    }

    pub fn list_folders(&self) -> Vec<FolderSummary> {
        let snapshot = self.snapshot();
        snapshot.folders.summaries(&snapshot.state)
    }
}
