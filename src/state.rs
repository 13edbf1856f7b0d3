//! Per-file hash ledger.
//!
//! [`IndexState`] records, for every indexed file, the content hash it was
//! indexed at and the chunk IDs it produced. The indexer consults it to skip
//! unchanged files and to know which chunks to retire when a file changes or
//! disappears.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub doc_id: String,
    pub content_hash: String,
    pub last_indexed_at: DateTime<Utc>,
    pub chunk_ids: Vec<String>,
}

/// Keyed by normalized absolute file path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
}

/// Whether `path` is `folder` itself or lies beneath it.
pub fn is_under(path: &str, folder: &str) -> bool {
    let folder = folder.trim_end_matches('/');
    if folder.is_empty() {
        return path.starts_with('/');
    }
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl IndexState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn get(&self, file_path: &str) -> Option<&FileRecord> {
        self.files.get(file_path)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn upsert(&mut self, record: FileRecord) {
        self.files.insert(record.file_path.clone(), record);
    }

    pub fn remove(&mut self, file_path: &str) -> Option<FileRecord> {
        self.files.remove(file_path)
    }

    /// Records for files under `folder`, in path order.
    pub fn files_under<'a>(&'a self, folder: &'a str) -> impl Iterator<Item = &'a FileRecord> + 'a {
        self.files
            .values()
            .filter(move |r| is_under(&r.file_path, folder))
    }

    /// Drop records the predicate rejects, returning how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&FileRecord) -> bool) -> usize {
        let before = self.files.len();
        self.files.retain(|_, r| keep(r));
        before - self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            file_path: path.to_string(),
            doc_id: "d".to_string(),
            content_hash: "h".to_string(),
            last_indexed_at: Utc::now(),
            chunk_ids: vec!["d#c0000".to_string()],
        }
    }

    #[test]
    fn is_under_respects_component_boundaries() {
        assert!(is_under("/data/contracts/a.pdf", "/data/contracts"));
        assert!(is_under("/data/contracts/a.pdf", "/data/contracts/"));
        assert!(is_under("/data/contracts/deep/b.pdf", "/data"));
        assert!(!is_under("/data/contracts-old/a.pdf", "/data/contracts"));
        assert!(is_under("/data/contracts", "/data/contracts"));
        assert!(is_under("/x/y", "/"));
    }

    #[test]
    fn files_under_filters_by_folder() {
        let mut state = IndexState::default();
        state.upsert(record("/a/one.txt"));
        state.upsert(record("/a/sub/two.txt"));
        state.upsert(record("/b/three.txt"));
        let under: Vec<&str> = state.files_under("/a").map(|r| r.file_path.as_str()).collect();
        assert_eq!(under, vec!["/a/one.txt", "/a/sub/two.txt"]);
    }

    #[test]
    fn serialization_is_stable() {
        let mut state = IndexState::default();
        state.upsert(record("/b.txt"));
        state.upsert(record("/a.txt"));
        let first = serde_json::to_string(&state).unwrap();
        let back: IndexState = serde_json::from_str(&first).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), first);
        assert!(first.find("/a.txt").unwrap() < first.find("/b.txt").unwrap());
    }
}
