//! Folder walking with include/exclude globs.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::IngestConfig;

/// Always excluded. `~$*` are Office lock files such as `~$contract.docx`.
const DEFAULT_EXCLUDES: [&str; 2] = ["**/.git/**", "**/~$*"];

/// What a walk found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    /// Matching files, sorted.
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read, with the error. Whatever lies at or
    /// under these paths is unknown, not absent.
    pub unreadable: Vec<(PathBuf, String)>,
}

/// Finds candidate documents under a folder.
#[derive(Debug, Clone)]
pub struct Scanner {
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &IngestConfig) -> Result<Self, globset::Error> {
        let include = build_globset(&config.include_globs)?;
        let excludes: Vec<String> = DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .chain(config.exclude_globs.iter().cloned())
            .collect();
        let exclude = build_globset(&excludes)?;
        Ok(Self {
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Matching files under `root`, sorted for deterministic ordering.
    /// Unreadable entries are logged and collected separately.
    pub fn scan(&self, root: &Path) -> ScanResult {
        let mut result = ScanResult::default();
        let walker = WalkDir::new(root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // No path means the walk itself failed; nothing under root is known.
                    let path = e.path().unwrap_or(root).to_path_buf();
                    warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    result.unreadable.push((path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) {
                continue;
            }
            if !self.include.is_match(&rel_str) {
                continue;
            }
            result.files.push(path.to_path_buf());
        }
        result.files.sort();
        result
    }
}

/// Case-insensitive, so `CONTRACT.PDF` matches `**/*.pdf`.
fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    builder.build()
}
