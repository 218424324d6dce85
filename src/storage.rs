//! Storage layer for the score registry
//!
//! Provides a write-through registry persisted as a single JSON document on
//! local disk.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Name → URL mapping in insertion order.
pub type Registry = IndexMap<String, String>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Writing the registry document failed
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Document path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The blocking write task did not complete
    #[error("Registry write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A single registered score
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Display title returned by the spreadsheet lookup
    pub name: String,
    /// Submitted spreadsheet link
    pub url: String,
}

/// Interface for registry backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// All entries in insertion order
    async fn entries(&self) -> Vec<RegistryEntry>;
    /// URL registered under `name`
    async fn get(&self, name: &str) -> Option<String>;
    /// Insert or replace an entry and persist the registry
    async fn put(&self, name: String, url: String) -> Result<(), StorageError>;
    /// Remove an entry and persist the registry.
    /// Returns `false` without writing if `name` is absent.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
}

/// File-backed registry
pub struct JsonFileRegistry {
    path: PathBuf,
    entries: Mutex<Registry>,
}

impl JsonFileRegistry {
    /// Open the registry stored at `path`.
    ///
    /// A missing or unreadable document yields an empty registry.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_document(&path);
        info!(
            "Registry loaded from {} ({} entries).",
            path.display(),
            entries.len()
        );
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Document path backing this registry
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `modifier` to a copy of the registry, persist it, then commit.
    ///
    /// The in-memory registry is left untouched if the write fails. The lock
    /// is held until the file is in place, so writes never interleave.
    async fn modify<F, T>(&self, modifier: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Registry) -> Option<T>,
        T: Default,
    {
        let mut guard = self.entries.lock().await;
        let mut next = guard.clone();
        let Some(result) = modifier(&mut next) else {
            return Ok(T::default());
        };
        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || save_document(&path, &next).map(|()| next))
            .await??;
        *guard = next;
        Ok(result)
    }
}

#[async_trait]
impl RegistryStore for JsonFileRegistry {
    async fn entries(&self) -> Vec<RegistryEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(name, url)| RegistryEntry {
                name: name.clone(),
                url: url.clone(),
            })
            .collect()
    }

    async fn get(&self, name: &str) -> Option<String> {
        self.entries.lock().await.get(name).cloned()
    }

    async fn put(&self, name: String, url: String) -> Result<(), StorageError> {
        debug!("Registry put: {name}");
        self.modify(|registry| {
            // Replacing keeps the original position
            registry.insert(name, url);
            Some(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        debug!("Registry delete: {name}");
        self.modify(|registry| registry.shift_remove(name).map(|_| true))
            .await
    }
}

/// Read the registry document.
///
/// Returns an empty registry if the file is absent or cannot be decoded.
#[must_use]
pub fn load_document(path: &Path) -> Registry {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Registry::new(),
        Err(e) => {
            warn!("Registry read error for {}: {e}", path.display());
            return Registry::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Registry JSON read error for {}: {e}", path.display());
            Registry::new()
        }
    }
}

/// Overwrite the registry document.
///
/// The document is written to a temporary file next to `path` and renamed
/// into place.
///
/// # Errors
///
/// Returns an error if serialization or any filesystem step fails.
pub fn save_document(path: &Path, registry: &Registry) -> Result<(), StorageError> {
    let body = serde_json::to_string_pretty(registry)?;
    let write_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.as_file_mut().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
