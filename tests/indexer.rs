use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use docket::config::Config;
use docket::error::IndexError;
use docket::extract::{FileExtractor, TextExtractor};
use docket::indexer::{CancelToken, IndexOptions, KnowledgeIndexer};
use docket::library::Library;
use docket::storage::{Storage, CHUNKS_FILE, STATE_FILE, VECTOR_FILE};
use docket_core::embedding::{Embedder, HashEmbedder};
use docket_core::error::{EmbeddingError, ParseError};
use docket_core::models::{DocType, Jurisdiction, QueryFilters};
use docket_core::search::HybridSearchEngine;
use tempfile::TempDir;

const NON_COMPETE: &str = "NON-COMPETE AGREEMENT\n\
This Agreement is made effective as of January 15, 2024 by and between Acme Corp (the \"Company\") and John Smith (the \"Employee\").\n\
1. Definitions\n\
\"Territory\" means the State of California.\n\
4.2 Non-Compete\n\
The Employee shall not compete with the Company within the Territory for 12 months following termination of employment.\n\
5. Governing Law\n\
This Agreement is governed by the laws of the State of California.\n";

const TRAVEL_POLICY: &str = "TRAVEL POLICY\n\
1. Scope\n\
This policy applies to all employees of the Company located in Texas.\n\
2. Reimbursement\n\
Employees are reimbursed for economy airfare and reasonable lodging.\n";

const SOFTWARE_LICENSE: &str = "SOFTWARE LICENSE\n\
1. Grant\n\
Licensor grants Licensee a non-exclusive license to use the Software.\n\
2. Governing Law\n\
This license is governed by the laws of the State of Delaware.\n";

struct TestEnv {
    _tmp: TempDir,
    config: Config,
    docs: PathBuf,
}

fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("non_compete.txt"), NON_COMPETE).unwrap();
    fs::write(docs.join("travel_policy.txt"), TRAVEL_POLICY).unwrap();
    fs::write(docs.join("license.md"), SOFTWARE_LICENSE).unwrap();

    let mut config = Config::default();
    config.index.root = tmp.path().join("index");
    config.audit.enabled = false;

    TestEnv {
        _tmp: tmp,
        config,
        docs,
    }
}

fn open(config: &Config) -> Arc<KnowledgeIndexer> {
    Arc::new(KnowledgeIndexer::builder(config).open().unwrap())
}

/// Path of an artifact in the committed generation.
fn artifact(config: &Config, name: &str) -> PathBuf {
    Storage::new(&config.index.root).artifact_path(name).unwrap()
}

fn library(config: &Config, indexer: Arc<KnowledgeIndexer>) -> Library {
    let engine = HybridSearchEngine::new(config.search_params(), indexer.embedder());
    Library::from_parts(indexer, engine)
}

/// Counts extraction calls, delegating to the real extractor.
#[derive(Default)]
struct CountingExtractor {
    calls: AtomicUsize,
}

impl TextExtractor for CountingExtractor {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<Vec<(u32, String)>, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FileExtractor.extract(path, bytes)
    }
}

struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text)
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        384
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Failed("model unavailable".to_string()))
    }
}

/// Blocks inside the first extraction until released.
struct GateExtractor {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl TextExtractor for GateExtractor {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<Vec<(u32, String)>, ParseError> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        FileExtractor.extract(path, bytes)
    }
}

#[test]
fn test_index_folder_processes_every_document() {
    let env = setup();
    let indexer = open(&env.config);

    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 3);
    assert_eq!(report.documents_unchanged, 0);
    assert!(report.skipped.is_empty());
    assert!(!report.cancelled);

    let stats = indexer.get_stats();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.total_chunks, report.chunks_added);
    assert_eq!(stats.embedded_chunks, stats.total_chunks);
    assert_eq!(stats.folders, 1);
    assert!(stats.disk_bytes > 0);

    let folders = indexer.list_folders();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].document_count, 3);
    assert!(folders[0].last_indexed.is_some());
}

#[test]
fn test_unchanged_files_are_not_reparsed() {
    let env = setup();
    let extractor = Arc::new(CountingExtractor::default());
    let embedder = Arc::new(CountingEmbedder {
        inner: HashEmbedder::new(384),
        calls: AtomicUsize::new(0),
    });
    let indexer = KnowledgeIndexer::builder(&env.config)
        .extractor(extractor.clone())
        .embedder(embedder.clone())
        .open()
        .unwrap();

    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let extracted = extractor.calls.load(Ordering::SeqCst);
    let embedded = embedder.calls.load(Ordering::SeqCst);
    assert_eq!(extracted, 3);
    assert!(embedded > 0);

    let second = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(second.documents_processed, 0);
    assert_eq!(second.documents_unchanged, 3);
    assert_eq!(second.chunks_added, 0);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), extracted);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), embedded);
}

#[test]
fn test_noop_reindex_leaves_ledger_bytes_identical() {
    let env = setup();
    let indexer = open(&env.config);

    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let before = fs::read(artifact(&env.config, STATE_FILE)).unwrap();
    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let after = fs::read(artifact(&env.config, STATE_FILE)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_full_reindex_reprocesses_unchanged_files() {
    let env = setup();
    let indexer = open(&env.config);
    let first = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();

    let full = indexer.index_folder(&env.docs, &IndexOptions::full()).unwrap();
    assert_eq!(full.documents_processed, 3);
    assert_eq!(full.documents_unchanged, 0);
    assert_eq!(full.chunks_removed, first.chunks_added);
    assert_eq!(indexer.get_stats().total_chunks, first.chunks_added);
}

#[test]
fn test_modified_and_deleted_files_are_picked_up() {
    let env = setup();
    let indexer = open(&env.config);
    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();

    fs::write(
        env.docs.join("travel_policy.txt"),
        format!("{}3. Per Diem\nMeals are covered up to fifty dollars per day.\n", TRAVEL_POLICY),
    )
    .unwrap();
    fs::remove_file(env.docs.join("license.md")).unwrap();

    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.documents_unchanged, 1);
    assert_eq!(report.documents_removed, 1);
    assert_eq!(indexer.get_stats().total_documents, 2);

    let lib = library(&env.config, indexer);
    let response = lib.search("per diem meals", None, None).unwrap();
    assert!(response.results[0].chunk.text.contains("fifty dollars"));
    let gone = lib.search("licensor grants licensee", None, None).unwrap();
    assert!(gone
        .results
        .iter()
        .all(|r| !r.document.file_path.ends_with("license.md")));
}

#[test]
fn test_non_compete_question_finds_the_clause() {
    let env = setup();
    let indexer = open(&env.config);
    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let lib = library(&env.config, indexer);

    let response = lib
        .search("non-compete duration in California", None, None)
        .unwrap();
    assert_eq!(response.query.filters.jurisdictions, vec![Jurisdiction::California]);
    assert!(response.lookup);
    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.document.jurisdiction == Jurisdiction::California));
    assert!(response
        .results
        .iter()
        .any(|r| r.chunk.text.contains("12 months")));
    assert!(response.confidence > 0.0 && response.confidence <= 1.0);

    for pair in response.results.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score);
    }
}

#[test]
fn test_single_non_compete_document_returns_section_above_floor() {
    let env = setup();
    let only = env.docs.parent().unwrap().join("single");
    fs::create_dir_all(&only).unwrap();
    fs::write(only.join("non_compete.txt"), NON_COMPETE).unwrap();
    let indexer = open(&env.config);
    indexer.index_folder(&only, &IndexOptions::default()).unwrap();
    let lib = library(&env.config, indexer);

    let response = lib.search("non-compete duration", None, None).unwrap();
    let hit = response
        .results
        .iter()
        .find(|r| r.chunk.section_path.iter().any(|s| s == "4.2 Non-Compete"))
        .expect("non-compete section returned");
    assert!(hit.chunk.text.contains("12 months"));
    assert!(hit.final_score >= env.config.retrieval.score_threshold);
}

#[test]
fn test_explicit_filters_and_limit() {
    let env = setup();
    let indexer = open(&env.config);
    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let lib = library(&env.config, indexer);

    let filters = QueryFilters {
        doctypes: vec![DocType::Policy],
        ..QueryFilters::default()
    };
    let response = lib.search("employees", Some(filters), Some(1)).unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].document.doctype, DocType::Policy);
}

#[test]
fn test_query_without_terms_is_rejected() {
    let env = setup();
    let lib = library(&env.config, open(&env.config));
    assert!(lib.search("   ", None, None).is_err());
}

#[test]
fn test_empty_folder_yields_empty_index() {
    let env = setup();
    let empty = env.docs.parent().unwrap().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let indexer = open(&env.config);

    let report = indexer.index_folder(&empty, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 0);
    assert_eq!(indexer.get_stats().total_documents, 0);

    let lib = library(&env.config, indexer);
    let response = lib.search("termination", None, None).unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.confidence, 0.0);
}

#[test]
fn test_missing_folder_is_an_error() {
    let env = setup();
    let indexer = open(&env.config);
    let err = indexer
        .index_folder(&env.docs.join("nope"), &IndexOptions::default())
        .unwrap_err();
    assert!(matches!(err, IndexError::FolderNotFound(_)));
}

#[test]
fn test_remove_folder_clears_both_indexes() {
    let env = setup();
    let indexer = open(&env.config);
    let indexed = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();

    let removed = indexer.remove_folder(&env.docs).unwrap();
    assert_eq!(removed.documents_removed, 3);
    assert_eq!(removed.chunks_removed, indexed.chunks_added);

    let snapshot = indexer.snapshot();
    assert_eq!(snapshot.corpus.chunk_count(), 0);
    assert!(snapshot.corpus.lexical().is_empty());
    assert!(snapshot.corpus.vector().is_empty());
    assert!(snapshot.state.is_empty());
    assert!(indexer.list_folders().is_empty());

    let err = indexer.remove_folder(&env.docs).unwrap_err();
    assert!(matches!(err, IndexError::FolderNotIndexed(_)));

    // The removal is durable.
    drop(snapshot);
    let reopened = open(&env.config);
    assert_eq!(reopened.get_stats().total_documents, 0);
}

#[test]
fn test_unparseable_file_is_skipped() {
    let env = setup();
    fs::write(env.docs.join("blank.txt"), "   \n\t\n").unwrap();
    let indexer = open(&env.config);

    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 3);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("blank.txt"));
    assert!(report.skipped[0].reason.contains("no extractable text"));
}

#[test]
fn test_embedding_failure_keeps_chunks_searchable() {
    let env = setup();
    let indexer = Arc::new(
        KnowledgeIndexer::builder(&env.config)
            .embedder(Arc::new(FailingEmbedder))
            .open()
            .unwrap(),
    );

    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 3);
    assert_eq!(report.embedding_failures, report.chunks_added);

    let stats = indexer.get_stats();
    assert_eq!(stats.embedded_chunks, 0);
    assert_eq!(stats.lexical_only_chunks, stats.total_chunks);

    let lib = library(&env.config, indexer);
    let response = lib.search("economy airfare lodging", None, None).unwrap();
    assert!(response.results[0].chunk.text.contains("economy airfare"));
    assert_eq!(response.results[0].vector_score, 0.0);
}

#[test]
fn test_cancelled_run_indexes_nothing_and_leaves_folder_unfinished() {
    let env = setup();
    let indexer = open(&env.config);
    let cancel = CancelToken::new();
    cancel.cancel();
    let options = IndexOptions {
        cancel,
        ..IndexOptions::default()
    };

    let report = indexer.index_folder(&env.docs, &options).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.documents_processed, 0);

    let folders = indexer.list_folders();
    assert_eq!(folders.len(), 1);
    assert!(folders[0].last_indexed.is_none());

    let resumed = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(resumed.documents_processed, 3);
    assert!(indexer.list_folders()[0].last_indexed.is_some());
}

#[test]
fn test_second_writer_is_rejected_while_readers_continue() {
    let env = setup();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(GateExtractor {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let indexer = Arc::new(
        KnowledgeIndexer::builder(&env.config)
            .extractor(gate)
            .open()
            .unwrap(),
    );

    let writer = {
        let indexer = Arc::clone(&indexer);
        let docs = env.docs.clone();
        std::thread::spawn(move || indexer.index_folder(&docs, &IndexOptions::default()))
    };
    entered_rx.recv().unwrap();

    assert!(indexer.is_busy());
    let err = indexer
        .index_folder(&env.docs, &IndexOptions::default())
        .unwrap_err();
    assert!(matches!(err, IndexError::ConcurrentWriteRejected));
    assert!(matches!(
        indexer.remove_folder(&env.docs),
        Err(IndexError::ConcurrentWriteRejected)
    ));
    // Readers see the last published state without waiting.
    assert_eq!(indexer.snapshot().corpus.document_count(), 0);

    release_tx.send(()).unwrap();
    let report = writer.join().unwrap().unwrap();
    assert_eq!(report.documents_processed, 3);
    assert!(!indexer.is_busy());
    assert_eq!(indexer.snapshot().corpus.document_count(), 3);
}

#[test]
fn test_index_survives_restart() {
    let env = setup();
    let before = {
        let indexer = open(&env.config);
        indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
        indexer.get_stats()
    };

    let indexer = open(&env.config);
    let report = indexer.load().unwrap();
    assert!(report.is_clean(), "unexpected repair: {:?}", report);
    let after = indexer.get_stats();
    assert_eq!(after.total_documents, before.total_documents);
    assert_eq!(after.total_chunks, before.total_chunks);
    assert_eq!(after.embedded_chunks, before.embedded_chunks);
}

#[test]
fn test_corrupt_vector_index_is_rebuilt_from_chunks() {
    let env = setup();
    let before = {
        let indexer = open(&env.config);
        indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
        indexer.get_stats()
    };
    fs::write(artifact(&env.config, VECTOR_FILE), b"not a vector index").unwrap();

    let indexer = open(&env.config);
    let after = indexer.get_stats();
    assert_eq!(after.total_chunks, before.total_chunks);
    assert_eq!(after.embedded_chunks, before.embedded_chunks);

    // The repair was persisted, so the next load is clean.
    assert!(indexer.load().unwrap().is_clean());

    let lib = library(&env.config, indexer);
    let response = lib.search("governing law Delaware", None, None).unwrap();
    assert!(!response.results.is_empty());
}

#[test]
fn test_lost_chunk_records_force_reprocessing() {
    let env = setup();
    {
        let indexer = open(&env.config);
        indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    }
    fs::remove_file(artifact(&env.config, CHUNKS_FILE)).unwrap();

    let indexer = open(&env.config);
    assert_eq!(indexer.get_stats().total_chunks, 0);
    assert_eq!(indexer.get_stats().total_documents, 0);

    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 3);
    assert_eq!(report.documents_unchanged, 0);
}

#[test]
fn test_failed_save_keeps_last_committed_index() {
    let env = setup();
    let indexer = open(&env.config);
    indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    let storage = Storage::new(&env.config.index.root);
    let committed = storage.current_generation().unwrap().unwrap();
    let ledger = fs::read(artifact(&env.config, STATE_FILE)).unwrap();

    fs::write(
        env.docs.join("travel_policy.txt"),
        format!("{}3. Per Diem\nMeals are covered up to fifty dollars per day.\n", TRAVEL_POLICY),
    )
    .unwrap();
    fs::remove_file(env.docs.join("license.md")).unwrap();
    // Occupy the next generation's directory name so the save fails.
    let blocker = storage.generation_dir(committed + 1);
    fs::write(&blocker, b"not a directory").unwrap();

    let err = indexer
        .index_folder(&env.docs, &IndexOptions::default())
        .unwrap_err();
    assert!(matches!(err, IndexError::Storage { .. }), "got {:?}", err);

    // Readers still see the committed index, and disk still holds it.
    assert_eq!(indexer.get_stats().total_documents, 3);
    assert_eq!(storage.current_generation().unwrap(), Some(committed));
    assert_eq!(fs::read(artifact(&env.config, STATE_FILE)).unwrap(), ledger);
    let lib = library(&env.config, Arc::clone(&indexer));
    let response = lib.search("licensor grants licensee", None, None).unwrap();
    assert!(response.results[0].document.file_path.ends_with("license.md"));
    let reopened = open(&env.config);
    assert_eq!(reopened.get_stats().total_documents, 3);
    drop(reopened);

    fs::remove_file(&blocker).unwrap();
    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.documents_removed, 1);
    assert_eq!(indexer.get_stats().total_documents, 2);
}

#[cfg(unix)]
#[test]
fn test_unreadable_subtree_is_not_treated_as_deleted() {
    let mut env = setup();
    env.config.ingest.follow_symlinks = true;
    let archive = env.docs.parent().unwrap().join("archive");
    fs::create_dir_all(&archive).unwrap();
    fs::write(
        archive.join("memo.txt"),
        "SEVERANCE MEMO\n1. Severance\nDeparting staff receive eight weeks of severance pay.\n",
    )
    .unwrap();
    std::os::unix::fs::symlink(&archive, env.docs.join("archive")).unwrap();

    let indexer = open(&env.config);
    let first = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(first.documents_processed, 4);

    // The link now dangles, so the walk cannot see behind it.
    fs::rename(&archive, env.docs.parent().unwrap().join("archive-offline")).unwrap();
    let report = indexer.index_folder(&env.docs, &IndexOptions::default()).unwrap();
    assert_eq!(report.documents_removed, 0);
    assert_eq!(report.documents_unchanged, 3);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("/archive"));
    assert!(report.skipped[0].reason.starts_with("unreadable"));
    assert_eq!(indexer.get_stats().total_documents, 4);

    let lib = library(&env.config, indexer);
    let response = lib.search("severance pay", None, None).unwrap();
    assert!(response.results[0].document.file_path.ends_with("archive/memo.txt"));
}

#[test]
fn test_audit_trail_records_operations() {
    let env = setup();
    let mut config = env.config.clone();
    config.audit.enabled = true;
    config.audit.path = env.docs.parent().unwrap().join("audit.jsonl");

    {
        let lib = Library::open(&config).unwrap();
        lib.index_folder(&env.docs, &IndexOptions::default()).unwrap();
        lib.search("non-compete", None, None).unwrap();
    }

    let log = fs::read_to_string(&config.audit.path).unwrap();
    let kinds: Vec<String> = log
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).unwrap();
            event["kind"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds, vec!["index_started", "index_completed", "search"]);
}

#[tokio::test]
async fn test_background_indexing_does_not_block_searches() {
    let env = setup();
    let indexer = open(&env.config);
    let lib = library(&env.config, Arc::clone(&indexer));

    let handle = indexer.spawn_index_folder(env.docs.clone(), IndexOptions::default());
    lib.search("reimbursement", None, None).unwrap();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.documents_processed, 3);

    let report = lib
        .index_folder_in_background(env.docs.clone(), IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(report.documents_unchanged, 3);
}
