// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-manifest
//!
//! Materialises, reads, and writes the current manifest for a movie.
//!
//! A manifest is a snapshot view assembled from the event log at a chosen
//! revision: input events collapse per id (latest wins per revision),
//! artifact events collapse per artifact id (latest *successful* event wins
//! per revision). Snapshots are stored keyed by their content hash and are
//! immutable once written; a `current` pointer names the live one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rf_core::{
    manifest_hash, payload_digest, ArtifactStatus, Manifest, ManifestArtifact, ManifestInput,
    RevisionId, TimelineEntry,
};
use rf_error::ErrorCode;
use rf_eventlog::{EventLog, EventLogError};
use rf_storage::{StorageContext, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors from the manifest service.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// No manifest snapshot exists for the movie.
    #[error("no manifest found for movie {movie_id}")]
    NotFound {
        /// The movie that has no snapshot.
        movie_id: String,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The event log failed.
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    /// Serialization failed.
    #[error("failed to serialize manifest: {0}")]
    Encode(#[source] rf_core::ContractError),
}

impl ManifestError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::ManifestNotFound,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::EventLog(e) => e.code(),
            Self::Encode(_) => ErrorCode::Internal,
        }
    }
}

/// Summary row for [`ManifestService::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSummary {
    /// Content hash of the snapshot.
    pub hash: String,
    /// Revision the snapshot reflects.
    pub revision: RevisionId,
}

/// Reads and writes manifest snapshots for movies.
#[derive(Debug, Clone)]
pub struct ManifestService {
    ctx: StorageContext,
    log: EventLog,
}

impl ManifestService {
    /// Create a service over the given storage context and event log.
    #[must_use]
    pub fn new(ctx: StorageContext, log: EventLog) -> Self {
        Self { ctx, log }
    }

    fn snapshot_key(movie_id: &str, hash: &str) -> String {
        format!("movies/{movie_id}/manifests/{hash}.json")
    }

    fn pointer_key(movie_id: &str) -> String {
        format!("movies/{movie_id}/manifests/current")
    }

    /// Assemble a manifest from the event log at the chosen revision.
    ///
    /// Events with a revision greater than `at` are ignored. Skipped and
    /// failed artifact attempts never enter the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the event log cannot be read.
    pub fn materialize(
        &self,
        movie_id: &str,
        at: &RevisionId,
        base_revision: Option<RevisionId>,
    ) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::new(at.clone(), base_revision);
        let mut revisions_seen: Vec<RevisionId> = Vec::new();
        let mut input_revisions: std::collections::BTreeMap<String, RevisionId> =
            std::collections::BTreeMap::new();
        let mut artifact_revisions: std::collections::BTreeMap<String, RevisionId> =
            std::collections::BTreeMap::new();

        for event in self.log.load_inputs(movie_id, None)? {
            if event.revision > *at {
                continue;
            }
            if !revisions_seen.contains(&event.revision) {
                revisions_seen.push(event.revision.clone());
            }
            // Latest revision wins per id; within a revision, append order.
            if input_revisions
                .get(&event.id)
                .is_some_and(|known| *known > event.revision)
            {
                continue;
            }
            input_revisions.insert(event.id.clone(), event.revision.clone());
            manifest.inputs.insert(
                event.id,
                ManifestInput {
                    payload_digest: payload_digest(&event.hash),
                    hash: event.hash,
                    created_at: event.created_at,
                },
            );
        }

        for event in self.log.load_artifacts(movie_id, None)? {
            if event.revision > *at || event.status != ArtifactStatus::Succeeded {
                continue;
            }
            if !revisions_seen.contains(&event.revision) {
                revisions_seen.push(event.revision.clone());
            }
            if artifact_revisions
                .get(&event.artifact_id)
                .is_some_and(|known| *known > event.revision)
            {
                continue;
            }
            let Some(output) = &event.output else {
                continue;
            };
            let hash = rf_core::hash_artifact_output(output).map_err(ManifestError::Encode)?;
            artifact_revisions.insert(event.artifact_id.clone(), event.revision.clone());
            manifest.artifacts.insert(
                event.artifact_id,
                ManifestArtifact {
                    hash,
                    produced_by: event.produced_by,
                    status: event.status,
                    created_at: event.created_at,
                },
            );
        }

        revisions_seen.sort();
        manifest.timeline = revisions_seen
            .into_iter()
            .map(|revision| TimelineEntry {
                revision,
                created_at: manifest.created_at,
            })
            .collect();

        Ok(manifest)
    }

    /// Load the current manifest and its snapshot hash.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] when the movie has no snapshot.
    pub fn load_current(&self, movie_id: &str) -> Result<(Manifest, String), ManifestError> {
        let pointer = self
            .ctx
            .read_opt(&Self::pointer_key(movie_id))?
            .ok_or_else(|| ManifestError::NotFound {
                movie_id: movie_id.to_string(),
            })?;
        let hash = String::from_utf8_lossy(&pointer).trim().to_string();
        let manifest: Manifest = self.ctx.get_json(&Self::snapshot_key(movie_id, &hash))?;
        Ok((manifest, hash))
    }

    /// Write a new snapshot keyed by its content hash and point `current`
    /// at it. Snapshots are immutable: saving an identical manifest twice
    /// writes nothing new.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the write fails.
    pub fn save(&self, movie_id: &str, manifest: &Manifest) -> Result<String, ManifestError> {
        let hash = manifest_hash(manifest).map_err(ManifestError::Encode)?;
        let key = Self::snapshot_key(movie_id, &hash);
        if !self.ctx.exists(&key)? {
            self.ctx.put_json(&key, manifest)?;
            debug!(target: "rf.manifest", movie = movie_id, %hash, "wrote manifest snapshot");
        }
        self.ctx
            .put_atomic(&Self::pointer_key(movie_id), hash.as_bytes())?;
        info!(
            target: "rf.manifest",
            movie = movie_id,
            revision = %manifest.revision,
            %hash,
            "manifest current updated"
        );
        Ok(hash)
    }

    /// Enumerate stored snapshots for a movie, sorted by revision.
    ///
    /// # Errors
    ///
    /// Returns a storage error when listing fails.
    pub fn list(&self, movie_id: &str) -> Result<Vec<ManifestSummary>, ManifestError> {
        let prefix = format!("movies/{movie_id}/manifests");
        let mut summaries = Vec::new();
        for key in self.ctx.list(&prefix)? {
            let Some(name) = key.rsplit('/').next() else {
                continue;
            };
            let Some(hash) = name.strip_suffix(".json") else {
                continue; // the `current` pointer and temp files
            };
            let manifest: Manifest = self.ctx.get_json(&key)?;
            summaries.push(ManifestSummary {
                hash: hash.to_string(),
                revision: manifest.revision,
            });
        }
        summaries.sort_by(|a, b| a.revision.cmp(&b.revision));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rf_core::{ArtifactEvent, ArtifactOutput, InputEvent};
    use rf_storage::LocalStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> (tempfile::TempDir, ManifestService, EventLog) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(Arc::new(LocalStorage::new(dir.path())), "work");
        let log = EventLog::new(ctx.clone());
        (dir, ManifestService::new(ctx, log.clone()), log)
    }

    fn rev(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn input(id: &str, revision: &str, payload: serde_json::Value) -> InputEvent {
        InputEvent::new(id, rev(revision), payload, "tester").unwrap()
    }

    fn artifact(
        id: &str,
        revision: &str,
        status: ArtifactStatus,
        output: Option<serde_json::Value>,
    ) -> ArtifactEvent {
        ArtifactEvent {
            artifact_id: id.into(),
            revision: rev(revision),
            inputs_hash: "00".repeat(32),
            output: output.map(ArtifactOutput::Inline),
            status,
            skip_reason: None,
            produced_by: "Producer:P".into(),
            created_at: Utc::now(),
            diagnostics: None,
        }
    }

    #[test]
    fn materialize_collapses_latest_input_per_id() {
        let (_d, svc, log) = service();
        log.append_input("m", &input("Input:A", "rev-0001", json!("old"))).unwrap();
        log.append_input("m", &input("Input:A", "rev-0002", json!("new"))).unwrap();
        let m = svc.materialize("m", &rev("rev-0002"), None).unwrap();
        let expected = rf_core::hash_payload(&json!("new")).unwrap().hash;
        assert_eq!(m.input_hash("Input:A"), Some(expected.as_str()));
        assert_eq!(m.timeline.len(), 2);
    }

    #[test]
    fn materialize_ignores_events_after_revision() {
        let (_d, svc, log) = service();
        log.append_input("m", &input("Input:A", "rev-0001", json!("old"))).unwrap();
        log.append_input("m", &input("Input:A", "rev-0002", json!("new"))).unwrap();
        let m = svc.materialize("m", &rev("rev-0001"), None).unwrap();
        let expected = rf_core::hash_payload(&json!("old")).unwrap().hash;
        assert_eq!(m.input_hash("Input:A"), Some(expected.as_str()));
    }

    #[test]
    fn materialize_keeps_only_successful_artifacts() {
        let (_d, svc, log) = service();
        log.append_artifact(
            "m",
            &artifact("Artifact:P.X", "rev-0001", ArtifactStatus::Failed, None),
        )
        .unwrap();
        let m = svc.materialize("m", &rev("rev-0001"), None).unwrap();
        assert!(m.artifacts.is_empty());

        log.append_artifact(
            "m",
            &artifact(
                "Artifact:P.Y",
                "rev-0001",
                ArtifactStatus::Succeeded,
                Some(json!("clip")),
            ),
        )
        .unwrap();
        let m = svc.materialize("m", &rev("rev-0001"), None).unwrap();
        assert_eq!(m.artifacts.len(), 1);
        let entry = &m.artifacts["Artifact:P.Y"];
        assert_eq!(entry.produced_by, "Producer:P");
        assert_eq!(
            entry.hash,
            rf_core::hash_artifact_output(&ArtifactOutput::Inline(json!("clip"))).unwrap()
        );
    }

    #[test]
    fn save_then_load_current_round_trips() {
        let (_d, svc, _log) = service();
        let manifest = Manifest::new(rev("rev-0001"), None);
        let hash = svc.save("m", &manifest).unwrap();
        let (loaded, loaded_hash) = svc.load_current("m").unwrap();
        assert_eq!(loaded_hash, hash);
        assert_eq!(loaded.revision, manifest.revision);
    }

    #[test]
    fn load_current_without_snapshot_is_not_found() {
        let (_d, svc, _log) = service();
        let err = svc.load_current("ghost").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound { .. }), "{err:?}");
        assert_eq!(err.code(), ErrorCode::ManifestNotFound);
    }

    #[test]
    fn list_enumerates_snapshots_in_revision_order() {
        let (_d, svc, _log) = service();
        let m1 = Manifest::new(rev("rev-0001"), None);
        let m2 = Manifest::new(rev("rev-0002"), Some(rev("rev-0001")));
        svc.save("m", &m1).unwrap();
        svc.save("m", &m2).unwrap();
        let listed = svc.list("m").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].revision, rev("rev-0001"));
        assert_eq!(listed[1].revision, rev("rev-0002"));
    }

    #[test]
    fn current_pointer_moves_to_latest_save() {
        let (_d, svc, _log) = service();
        let m1 = Manifest::new(rev("rev-0001"), None);
        let m2 = Manifest::new(rev("rev-0002"), Some(rev("rev-0001")));
        svc.save("m", &m1).unwrap();
        let h2 = svc.save("m", &m2).unwrap();
        let (_, current) = svc.load_current("m").unwrap();
        assert_eq!(current, h2);
    }
}
