//! Durable index artifacts.
//!
//! Each save writes a complete generation directory under the index root,
//! then switches the `CURRENT` pointer to it:
//!
//! ```text
//! CURRENT                              generation number of the live set
//! gen-000042/
//!     structured_documents.json        document metadata, section text stripped
//!     enriched_chunks.json             chunk records with embeddings (source of truth)
//!     vector_index.bin                 binary vector index
//!     lexical/corpus.json              BM25 term statistics
//!     index_state.json                 per-file hash ledger
//!     indexed_folders.json             folder registry
//! ```
//!
//! The pointer is replaced with write-to-temp, fsync, rename, so readers see
//! either the previous generation or the new one, never a mix. Superseded
//! generations are removed after the switch.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use docket_core::corpus::Corpus;
use docket_core::lexical::LexicalIndex;
use docket_core::models::{Chunk, StructuredDocument};
use docket_core::vector::VectorIndex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::folders::FolderRegistry;
use crate::state::IndexState;

pub const CURRENT_FILE: &str = "CURRENT";
pub const DOCUMENTS_FILE: &str = "structured_documents.json";
pub const CHUNKS_FILE: &str = "enriched_chunks.json";
pub const VECTOR_FILE: &str = "vector_index.bin";
pub const LEXICAL_FILE: &str = "lexical/corpus.json";
pub const STATE_FILE: &str = "index_state.json";
pub const FOLDERS_FILE: &str = "indexed_folders.json";

const ARTIFACTS: [&str; 6] = [
    DOCUMENTS_FILE,
    CHUNKS_FILE,
    VECTOR_FILE,
    LEXICAL_FILE,
    STATE_FILE,
    FOLDERS_FILE,
];
const GENERATION_PREFIX: &str = "gen-";

/// Replace `path` atomically with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp", file_name));

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }

    // Persist the rename itself; not supported on every platform.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

/// Everything read back from disk, before consistency checks.
#[derive(Debug, Default)]
pub struct StoredIndex {
    pub documents: Vec<StructuredDocument>,
    pub chunks: Vec<Chunk>,
    /// `None` when missing or undecodable.
    pub lexical: Option<LexicalIndex>,
    /// `None` when missing, undecodable, or built for other dimensions.
    pub vector: Option<VectorIndex>,
    pub state: IndexState,
    pub folders: FolderRegistry,
    /// Set when the source-of-truth records were unreadable and the index
    /// starts over empty.
    pub reset: bool,
}

/// Reads and writes the artifacts under one index root.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{}{:06}", GENERATION_PREFIX, generation))
    }

    /// The committed generation, or `None` before the first save.
    pub fn current_generation(&self) -> Result<Option<u64>, IndexError> {
        let path = self.root.join(CURRENT_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexError::Storage { path, source }),
        };
        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| IndexError::Corruption(format!("{} holds {:?}", path.display(), text.trim())))
    }

    /// Path of `name` inside the committed generation.
    pub fn artifact_path(&self, name: &str) -> Option<PathBuf> {
        match self.current_generation() {
            Ok(Some(generation)) => Some(self.generation_dir(generation).join(name)),
            _ => None,
        }
    }

    /// Total bytes of the committed artifacts.
    pub fn disk_usage(&self) -> u64 {
        ARTIFACTS
            .iter()
            .filter_map(|name| self.artifact_path(name))
            .filter_map(|path| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum()
    }

    fn write_bytes(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<(), IndexError> {
        let path = dir.join(name);
        write_atomic(&path, bytes).map_err(|source| IndexError::Storage { path, source })
    }

    fn write_json<T: Serialize + ?Sized>(&self, dir: &Path, name: &str, value: &T) -> Result<(), IndexError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| IndexError::Serialization {
            path: dir.join(name),
            source,
        })?;
        self.write_bytes(dir, name, &bytes)
    }

    fn read_bytes(&self, dir: &Path, name: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let path = dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IndexError::Storage { path, source }),
        }
    }

    /// Read a JSON artifact; `Ok(None)` when the file does not exist.
    fn read_json<T: DeserializeOwned>(&self, dir: &Path, name: &str) -> Result<Option<T>, IndexError> {
        let Some(bytes) = self.read_bytes(dir, name)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| IndexError::Serialization {
                path: dir.join(name),
                source,
            })
    }

    /// Read an optional artifact, downgrading decode failures to `None`.
    fn read_json_lenient<T: DeserializeOwned>(&self, dir: &Path, name: &str) -> Result<Option<T>, IndexError> {
        match self.read_json(dir, name) {
            Err(IndexError::Serialization { path, source }) => {
                warn!(path = %path.display(), error = %source, "artifact unreadable, ignoring it");
                Ok(None)
            }
            other => other,
        }
    }

    /// Write the corpus and ledgers as a new generation and commit it.
    ///
    /// Nothing the committed generation holds is touched until every
    /// artifact of the new one is on disk. On error the previous generation
    /// stays current.
    pub fn save(
        &self,
        corpus: &Corpus,
        state: &IndexState,
        folders: &FolderRegistry,
    ) -> Result<u64, IndexError> {
        let previous = match self.current_generation() {
            Ok(generation) => generation,
            Err(IndexError::Corruption(msg)) => {
                warn!(%msg, "replacing unreadable generation pointer");
                None
            }
            Err(e) => return Err(e),
        };
        let generation = previous.unwrap_or(0) + 1;
        let dir = self.generation_dir(generation);

        // Left over from a save that never committed.
        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(|source| IndexError::Storage {
                path: dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&self.root).map_err(|source| IndexError::Storage {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir(&dir).map_err(|source| IndexError::Storage {
            path: dir.clone(),
            source,
        })?;

        let documents: Vec<StructuredDocument> = corpus.documents().map(|d| d.without_text()).collect();
        let chunks: Vec<&Chunk> = corpus.chunks().collect();
        let written = (|| {
            self.write_bytes(&dir, VECTOR_FILE, &corpus.vector().to_bytes())?;
            self.write_json(&dir, LEXICAL_FILE, corpus.lexical())?;
            self.write_json(&dir, CHUNKS_FILE, &chunks)?;
            self.write_json(&dir, DOCUMENTS_FILE, &documents)?;
            self.write_json(&dir, FOLDERS_FILE, folders)?;
            self.write_json(&dir, STATE_FILE, state)
        })();
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        self.write_bytes(&self.root, CURRENT_FILE, format!("{}\n", generation).as_bytes())?;
        debug!(
            root = %self.root.display(),
            generation,
            documents = documents.len(),
            chunks = chunks.len(),
            "index persisted"
        );
        self.collect_garbage(generation);
        Ok(generation)
    }

    /// Remove every generation directory except `keep`.
    fn collect_garbage(&self, keep: u64) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let Some(generation) = name
                .to_str()
                .and_then(|n| n.strip_prefix(GENERATION_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if generation == keep || !entry.path().is_dir() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!(generation, error = %e, "could not remove superseded generation");
            }
        }
    }

    /// Read every artifact of the committed generation.
    ///
    /// Only I/O errors other than "not found" fail. Undecodable derived
    /// indexes come back as `None`. Undecodable source records, a missing
    /// generation directory or an unreadable pointer reset the index.
    pub fn load(&self, dims: usize) -> Result<StoredIndex, IndexError> {
        let mut stored = StoredIndex::default();

        let generation = match self.current_generation() {
            Ok(Some(generation)) => generation,
            Ok(None) => return Ok(stored),
            Err(IndexError::Corruption(msg)) => {
                warn!(%msg, "generation pointer unreadable, starting from an empty index");
                stored.reset = true;
                return Ok(stored);
            }
            Err(e) => return Err(e),
        };
        let dir = self.generation_dir(generation);
        if !dir.is_dir() {
            warn!(generation, "committed generation is missing, starting from an empty index");
            stored.reset = true;
            return Ok(stored);
        }

        let documents = self.read_json::<Vec<StructuredDocument>>(&dir, DOCUMENTS_FILE);
        let chunks = self.read_json::<Vec<Chunk>>(&dir, CHUNKS_FILE);
        match (documents, chunks) {
            (Ok(documents), Ok(chunks)) => {
                stored.documents = documents.unwrap_or_default();
                stored.chunks = chunks.unwrap_or_default();
            }
            (Err(IndexError::Serialization { path, source }), _)
            | (_, Err(IndexError::Serialization { path, source })) => {
                warn!(path = %path.display(), error = %source, "index records unreadable, starting from an empty index");
                stored.reset = true;
            }
            (Err(e), _) | (_, Err(e)) => return Err(e),
        }

        if !stored.reset {
            stored.lexical = self.read_json_lenient(&dir, LEXICAL_FILE)?;
            stored.vector = match self.read_bytes(&dir, VECTOR_FILE)? {
                None => None,
                Some(bytes) => match VectorIndex::from_bytes(&bytes) {
                    Ok(index) if index.dims() == dims => Some(index),
                    Ok(index) => {
                        warn!(stored = index.dims(), configured = dims, "vector index dimensions differ from configuration");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "vector index unreadable");
                        None
                    }
                },
            };
            stored.state = self.read_json_lenient(&dir, STATE_FILE)?.unwrap_or_default();
        }
        stored.folders = self.read_json_lenient(&dir, FOLDERS_FILE)?.unwrap_or_default();
        Ok(stored)
    }
}
