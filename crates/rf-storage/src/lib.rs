// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-storage
//!
//! Uniform blob-and-JSON I/O for the engine.
//!
//! The [`Storage`] trait is the seam between the engine and wherever bytes
//! actually live; [`LocalStorage`] is the filesystem backend. The
//! [`StorageContext`] layers content-addressed blob writes and typed JSON
//! helpers on top, and scopes keys to a base path so several movies can
//! share one root.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;

pub use context::StorageContext;

use rf_error::ErrorCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key does not exist.
    #[error("key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key contains an illegal component.
    #[error("invalid storage key: {key}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// An underlying I/O operation failed.
    #[error("storage I/O failed for {key}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON value could not be encoded or decoded.
    #[error("JSON codec failed for {key}")]
    Json {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageFailure
    }
}

/// Key-value byte storage with append and atomic rename.
///
/// Keys are `/`-separated relative paths; components must not be empty,
/// `.`, or `..`. All operations are synchronous — callers that need to stay
/// off the async executor wrap calls in `spawn_blocking`.
pub trait Storage: Send + Sync {
    /// Write `bytes` at `key`, replacing any existing value.
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read the full value at `key`.
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Append `bytes` to the value at `key`, creating it if absent.
    fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Whether a value exists at `key`.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Keys under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Atomically move the value at `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && key
            .split('/')
            .all(|c| !c.is_empty() && c != "." && c != "..");
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}

/// Filesystem-backed [`Storage`] rooted at a directory.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn ensure_parent(&self, path: &Path, key: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        self.ensure_parent(&path, key)?;
        std::fs::write(&path, bytes).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        use std::io::Write;
        let path = self.path_for(key)?;
        self.ensure_parent(&path, key)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })?;
        file.write_all(bytes).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })?;
        file.flush().map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(key)?.exists())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_key(prefix)?;
        let dir = self.root.join(prefix);
        let entries = match std::fs::read_dir(&dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    key: prefix.to_string(),
                    source,
                });
            }
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                key: prefix.to_string(),
                source,
            })?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(format!("{prefix}/{name}"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let from_path = self.path_for(from)?;
        let to_path = self.path_for(to)?;
        self.ensure_parent(&to_path, to)?;
        std::fs::rename(&from_path, &to_path).map_err(|source| StorageError::Io {
            key: from.to_string(),
            source,
        })
    }
}

/// Convenience constructor for an `Arc<dyn Storage>` over a local root.
pub fn local(root: impl Into<PathBuf>) -> Arc<dyn Storage> {
    Arc::new(LocalStorage::new(root))
}
