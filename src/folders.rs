//! Registry of folders the user has indexed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{is_under, IndexState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: String,
    pub added_at: DateTime<Utc>,
    /// Completion time of the last uncancelled index run.
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Row returned by `list_folders`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderSummary {
    pub path: String,
    pub document_count: usize,
    pub added_at: DateTime<Utc>,
    pub last_indexed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderRegistry {
    #[serde(default)]
    folders: BTreeMap<String, FolderEntry>,
}

impl FolderRegistry {
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FolderEntry> {
        self.folders.get(path)
    }

    /// Register `path` if new; returns the entry.
    pub fn touch(&mut self, path: &str, now: DateTime<Utc>) -> &mut FolderEntry {
        self.folders
            .entry(path.to_string())
            .or_insert_with(|| FolderEntry {
                path: path.to_string(),
                added_at: now,
                last_indexed: None,
            })
    }

    /// Remove `path` and every registered folder beneath it.
    pub fn remove_under(&mut self, path: &str) -> usize {
        let before = self.folders.len();
        self.folders.retain(|p, _| !is_under(p, path));
        before - self.folders.len()
    }

    /// Summaries with document counts taken from the live ledger.
    pub fn summaries(&self, state: &IndexState) -> Vec<FolderSummary> {
        self.folders
            .values()
            .map(|f| FolderSummary {
                path: f.path.clone(),
                document_count: state.files_under(&f.path).count(),
                added_at: f.added_at,
                last_indexed: f.last_indexed,
            })
            .collect()
    }
}
