//! Local copy of the task list, shown before the session is known.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::models::Task;

/// File name of the cached list (`app_tasks_v1` plus extension).
pub const CACHE_FILE: &str = "app_tasks_v1.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCache {
    path: PathBuf,
}

impl TaskCache {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        TaskCache {
            path: dir.as_ref().join(CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached tasks. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<Task>, CacheError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Like [`load`](Self::load), but an unreadable cache is logged and treated as empty.
    pub fn load_or_empty(&self) -> Vec<Task> {
        self.load().unwrap_or_else(|e| {
            log::warn!("Ignoring task cache {}: {}", self.path.display(), e);
            Vec::new()
        })
    }

    pub fn save(&self, tasks: &[Task]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(tasks)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
