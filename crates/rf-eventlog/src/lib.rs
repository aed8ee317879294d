// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-eventlog
//!
//! Append-only record of input edits and artifact results per movie.
//!
//! Two streams exist under each movie's storage root: `events/inputs.log`
//! and `events/artifacts.log`. Records are length-prefixed JSON lines
//! (`"<decimal byte length> <json>\n"`), which makes the log tolerant of a
//! crash between write and flush: a truncated trailing record is simply
//! ignored on read. Readers observe entries in append order.
//!
//! Duplicate detection is by `(id, revision, hash)` on inputs — an append
//! that matches an existing triple is a no-op, while the same `(id,
//! revision)` with a *different* hash is a [`EventLogError::ConflictingRevision`] —
//! and by `(artifact_id, revision, produced_by)` on artifacts.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rf_core::{ArtifactEvent, InputEvent, RevisionId};
use rf_error::ErrorCode;
use rf_storage::{StorageContext, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

const INPUTS_LOG: &str = "events/inputs.log";
const ARTIFACTS_LOG: &str = "events/artifacts.log";

/// Errors from the event log.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// An event with the same `(id, revision)` exists with a different
    /// hash.
    #[error("conflicting revision for {id} at {revision}: {existing} != {incoming}")]
    ConflictingRevision {
        /// Canonical input id.
        id: String,
        /// The contested revision.
        revision: RevisionId,
        /// Hash already in the log.
        existing: String,
        /// Hash of the rejected append.
        incoming: String,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A record could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EventLogError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConflictingRevision { .. } => ErrorCode::ConflictingRevision,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Encode(_) => ErrorCode::Internal,
        }
    }
}

/// Append-only event log over a [`StorageContext`].
///
/// The append path must be serialised per movie by the caller (the runner
/// holds a per-run mutex); reads may happen concurrently.
#[derive(Debug, Clone)]
pub struct EventLog {
    ctx: StorageContext,
}

impl EventLog {
    /// Create a log over the given storage context.
    #[must_use]
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    fn stream_key(movie_id: &str, stream: &str) -> String {
        format!("movies/{movie_id}/{stream}")
    }

    /// Persist one input edit.
    ///
    /// Appending an identical `(id, revision, hash)` triple again is a
    /// no-op, so the call is safe to re-drive after a crash.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConflictingRevision`] when the same
    /// `(id, revision)` exists with a different hash, or a storage error.
    pub fn append_input(&self, movie_id: &str, event: &InputEvent) -> Result<(), EventLogError> {
        let existing = self.load_inputs(movie_id, None)?;
        for prior in &existing {
            if prior.id == event.id && prior.revision == event.revision {
                if prior.hash == event.hash {
                    debug!(
                        target: "rf.eventlog",
                        id = %event.id,
                        revision = %event.revision,
                        "duplicate input event ignored"
                    );
                    return Ok(());
                }
                return Err(EventLogError::ConflictingRevision {
                    id: event.id.clone(),
                    revision: event.revision.clone(),
                    existing: prior.hash.clone(),
                    incoming: event.hash.clone(),
                });
            }
        }
        self.append_record(&Self::stream_key(movie_id, INPUTS_LOG), event)
    }

    /// Persist one artifact outcome.
    ///
    /// Duplicate `(artifact_id, revision, produced_by)` triples are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the append fails.
    pub fn append_artifact(
        &self,
        movie_id: &str,
        event: &ArtifactEvent,
    ) -> Result<(), EventLogError> {
        let existing = self.load_artifacts(movie_id, None)?;
        let duplicate = existing.iter().any(|prior| {
            prior.artifact_id == event.artifact_id
                && prior.revision == event.revision
                && prior.produced_by == event.produced_by
        });
        if duplicate {
            debug!(
                target: "rf.eventlog",
                artifact = %event.artifact_id,
                revision = %event.revision,
                "duplicate artifact event ignored"
            );
            return Ok(());
        }
        self.append_record(&Self::stream_key(movie_id, ARTIFACTS_LOG), event)
    }

    /// Input events in append order, optionally only those after
    /// `since_revision`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the stream cannot be read.
    pub fn load_inputs(
        &self,
        movie_id: &str,
        since_revision: Option<&RevisionId>,
    ) -> Result<Vec<InputEvent>, EventLogError> {
        let events: Vec<InputEvent> =
            self.read_stream(&Self::stream_key(movie_id, INPUTS_LOG))?;
        Ok(match since_revision {
            Some(since) => events.into_iter().filter(|e| e.revision > *since).collect(),
            None => events,
        })
    }

    /// Artifact events in append order, optionally only those after
    /// `since_revision`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the stream cannot be read.
    pub fn load_artifacts(
        &self,
        movie_id: &str,
        since_revision: Option<&RevisionId>,
    ) -> Result<Vec<ArtifactEvent>, EventLogError> {
        let events: Vec<ArtifactEvent> =
            self.read_stream(&Self::stream_key(movie_id, ARTIFACTS_LOG))?;
        Ok(match since_revision {
            Some(since) => events.into_iter().filter(|e| e.revision > *since).collect(),
            None => events,
        })
    }

    fn append_record<T: Serialize>(&self, key: &str, record: &T) -> Result<(), EventLogError> {
        let json = serde_json::to_string(record).map_err(EventLogError::Encode)?;
        let framed = format!("{} {}\n", json.len(), json);
        self.ctx.append(key, framed.as_bytes())?;
        Ok(())
    }

    fn read_stream<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, EventLogError> {
        let Some(bytes) = self.ctx.read_opt(key)? else {
            return Ok(Vec::new());
        };
        Ok(decode_frames(&bytes, key))
    }
}

/// Decode length-prefixed JSON line frames, stopping at the first truncated
/// or malformed tail.
fn decode_frames<T: DeserializeOwned>(bytes: &[u8], key: &str) -> Vec<T> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let Some(space) = bytes[pos..].iter().position(|&b| b == b' ') else {
            warn!(target: "rf.eventlog", %key, offset = pos, "truncated length prefix; stopping");
            break;
        };
        let Ok(len_str) = std::str::from_utf8(&bytes[pos..pos + space]) else {
            warn!(target: "rf.eventlog", %key, offset = pos, "non-utf8 length prefix; stopping");
            break;
        };
        let Ok(len) = len_str.parse::<usize>() else {
            warn!(target: "rf.eventlog", %key, offset = pos, "bad length prefix; stopping");
            break;
        };
        let body_start = pos + space + 1;
        let body_end = body_start + len;
        if body_end > bytes.len() {
            warn!(target: "rf.eventlog", %key, offset = pos, "truncated record; stopping");
            break;
        }
        match serde_json::from_slice(&bytes[body_start..body_end]) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(target: "rf.eventlog", %key, offset = pos, error = %e, "undecodable record; stopping");
                break;
            }
        }
        // Skip the trailing newline when present.
        pos = if bytes.get(body_end) == Some(&b'\n') {
            body_end + 1
        } else {
            body_end
        };
    }
    records
}
