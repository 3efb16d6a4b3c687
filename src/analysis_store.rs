//! Analysis store — persisted results from analysis-mode executions.
//!
//! Layout: `<root>/agents/<key>/analyses/<stamp>.json`, where the stamp is
//! the filesystem-safe timestamp format from `time_utils` and the root
//! defaults to `~/.recursivemanager`. The scheduler core itself persists
//! nothing; this is the analytics facet layered on the orchestrator.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::constants::{ANALYSES_DIR_NAME, DATA_DIR_NAME};
use crate::error::{SchedulerError, SchedulerResult};
use crate::time_utils;

pub struct AnalysisStore {
    root: PathBuf,
}

impl AnalysisStore {
    /// Store rooted at `~/.recursivemanager`.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(DATA_DIR_NAME),
        }
    }

    /// Store rooted elsewhere. Tests point this at a temp dir.
    pub fn with_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn analyses_dir(&self, key: &str) -> PathBuf {
        self.root
            .join("agents")
            .join(sanitize_key(key))
            .join(ANALYSES_DIR_NAME)
    }

    /// Persist one analysis as a timestamp-named JSON file.
    pub fn save(&self, key: &str, analysis: &Value) -> SchedulerResult<PathBuf> {
        let dir = self.analyses_dir(key);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SchedulerError::Storage(format!("create {}: {}", dir.display(), e)))?;

        let path = dir.join(format!("{}.json", time_utils::file_stamp(&time_utils::now())));
        let json = serde_json::to_string_pretty(analysis)?;
        std::fs::write(&path, json)
            .map_err(|e| SchedulerError::Storage(format!("write {}: {}", path.display(), e)))?;

        tracing::debug!(key, path = %path.display(), "Analysis persisted");
        Ok(path)
    }

    /// All persisted analyses for a key, oldest first. Timestamp names
    /// sort chronologically as plain strings.
    pub fn list(&self, key: &str) -> SchedulerResult<Vec<PathBuf>> {
        let dir = self.analyses_dir(key);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| SchedulerError::Storage(format!("read {}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Most recent analysis, None when nothing was persisted yet.
    pub fn load_latest(&self, key: &str) -> SchedulerResult<Option<Value>> {
        let Some(path) = self.list(key)?.pop() else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SchedulerError::Storage(format!("read {}: {}", path.display(), e)))?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys are externally meaningful strings; anything path-hostile becomes
/// an underscore so a key can never escape its own directory.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
