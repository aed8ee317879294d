// SPDX-License-Identifier: MIT OR Apache-2.0
//! The storage context: content-addressed blobs and typed JSON over a
//! [`Storage`](crate::Storage) backend.

use crate::{Storage, StorageError};
use rf_core::{sha256_hex, BlobRef};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Shared handle combining a [`Storage`] backend with a base path.
///
/// Blob keys are derived from content hashes, so concurrent writers of the
/// same bytes are idempotent. Cloning is cheap; all clones share the
/// backend.
#[derive(Clone)]
pub struct StorageContext {
    storage: Arc<dyn Storage>,
    base_path: String,
}

impl StorageContext {
    /// Create a context over a backend, scoping every key under
    /// `base_path`.
    pub fn new(storage: Arc<dyn Storage>, base_path: impl Into<String>) -> Self {
        Self {
            storage,
            base_path: base_path.into(),
        }
    }

    /// The base path every key is scoped under.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Absolute key for a movie-scoped relative key.
    #[must_use]
    pub fn movie_key(&self, movie_id: &str, rel: &str) -> String {
        format!("{}/movies/{movie_id}/{rel}", self.base_path)
    }

    fn scoped(&self, rel: &str) -> String {
        format!("{}/{rel}", self.base_path)
    }

    /// Store bytes content-addressed and return the blob pointer.
    ///
    /// Writing the same bytes twice is a no-op returning an equal ref.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    pub fn put_blob(&self, bytes: &[u8], mime_type: &str) -> Result<BlobRef, StorageError> {
        let hash = sha256_hex(bytes);
        let key = self.scoped(&format!("blobs/{hash}"));
        if !self.storage.exists(&key)? {
            self.storage.put_bytes(&key, bytes)?;
            debug!(target: "rf.storage", %hash, size = bytes.len(), "stored blob");
        }
        Ok(BlobRef {
            hash,
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
        })
    }

    /// Fetch blob bytes by content hash.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when no blob has that hash.
    pub fn get_blob(&self, hash: &str) -> Result<Vec<u8>, StorageError> {
        self.storage.get_bytes(&self.scoped(&format!("blobs/{hash}")))
    }

    /// Serialize a value as pretty JSON at the given relative key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on codec or I/O failure.
    pub fn put_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), StorageError> {
        let key = self.scoped(rel);
        let json = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
            key: key.clone(),
            source,
        })?;
        self.storage.put_bytes(&key, &json)
    }

    /// Read and deserialize the JSON value at the given relative key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the key is absent, or
    /// [`StorageError::Json`] when the bytes do not parse.
    pub fn get_json<T: DeserializeOwned>(&self, rel: &str) -> Result<T, StorageError> {
        let key = self.scoped(rel);
        let bytes = self.storage.get_bytes(&key)?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Json { key, source })
    }

    /// Append raw bytes to the value at the given relative key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    pub fn append(&self, rel: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.storage.append_bytes(&self.scoped(rel), bytes)
    }

    /// Read the full value at the given relative key, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure other than absence.
    pub fn read_opt(&self, rel: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.storage.get_bytes(&self.scoped(rel)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether a value exists at the given relative key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    pub fn exists(&self, rel: &str) -> Result<bool, StorageError> {
        self.storage.exists(&self.scoped(rel))
    }

    /// Keys under the given relative prefix, with the base path stripped
    /// back off.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    pub fn list(&self, rel_prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = self.scoped(rel_prefix);
        let keys = self.storage.list(&prefix)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                k.strip_prefix(&format!("{}/", self.base_path))
                    .map(str::to_string)
            })
            .collect())
    }

    /// Atomically replace the value at `rel` by writing a sibling temp key
    /// and renaming over it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on I/O failure.
    pub fn put_atomic(&self, rel: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = format!("{rel}.tmp");
        self.storage.put_bytes(&self.scoped(&tmp), bytes)?;
        self.storage.rename(&self.scoped(&tmp), &self.scoped(rel))
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}
