//! Last-used directory memory for the file prompt.
//!
//! Stored as `{"last_dir": "..."}`. A file holding a bare path (plain text or
//! a JSON string) is still understood. Anything unreadable falls back to the
//! current directory.

use crate::error::Pdf2TxtError;
use crate::ledger::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default file name of the directory memory.
pub const DEFAULT_LAST_DIR_FILE: &str = "last_directory.json";

#[derive(Debug, Serialize, Deserialize)]
struct LastDirectory {
    last_dir: PathBuf,
}

/// Remembers the directory of the last chosen file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMemory {
    path: PathBuf,
}

impl Default for DirectoryMemory {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_DIR_FILE)
    }
}

impl DirectoryMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Memory file with its default name under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_LAST_DIR_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The remembered directory, if one was stored and can be parsed.
    pub fn load(&self) -> Option<PathBuf> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        if let Ok(stored) = serde_json::from_str::<LastDirectory>(content) {
            return Some(stored.last_dir);
        }
        if let Ok(bare) = serde_json::from_str::<String>(content) {
            return Some(PathBuf::from(bare));
        }
        if content.starts_with('{') || content.starts_with('[') {
            debug!("Ignoring malformed directory memory {}", self.path.display());
            return None;
        }
        Some(PathBuf::from(content))
    }

    /// The remembered directory if it still exists, otherwise the current directory.
    pub fn load_or_cwd(&self) -> PathBuf {
        self.load()
            .filter(|dir| dir.is_dir())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn remember(&self, dir: &Path) -> Result<(), Pdf2TxtError> {
        let json = serde_json::to_string_pretty(&LastDirectory {
            last_dir: dir.to_path_buf(),
        })
        .map_err(|e| Pdf2TxtError::Internal(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes()).map_err(|source| {
            Pdf2TxtError::StateWriteFailed {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Remember the directory containing `file`.
    pub fn remember_file(&self, file: &Path) -> Result<(), Pdf2TxtError> {
        let dir = match file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
        self.remember(&dir)
    }
}
