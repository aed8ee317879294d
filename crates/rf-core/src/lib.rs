// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-core
//!
//! The stable contract for the Reelforge engine.
//!
//! Everything the planning-and-execution pipeline agrees on lives here:
//! canonical identifiers, revision ids, payload hashing, blob references,
//! input/artifact events, the manifest snapshot, job descriptors, and the
//! execution plan. If you only take one dependency, take this one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical identifier parsing and formatting.
pub mod canonical;
/// Job descriptors and per-job context (bindings, conditions, schemas).
pub mod job;
/// Layered execution plans.
pub mod plan;

pub use canonical::{CanonicalId, IdKind, IndexSelector};
pub use job::{
    ConditionOp, FanInEnvelope, InputBinding, InputCondition, JobContext, JobDescriptor,
    JobSchemas,
};
pub use plan::ExecutionPlan;

use chrono::{DateTime, Utc};
use rf_error::{EngineError, ErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Errors from contract-level operations (serialization, hashing, parsing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A revision identifier did not match the `rev-NNNN` form.
    #[error("invalid revision id: {value}")]
    InvalidRevision {
        /// The rejected value.
        value: String,
    },

    /// A canonical identifier could not be parsed.
    #[error("invalid canonical id '{value}': {reason}")]
    InvalidCanonicalId {
        /// The rejected value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ContractError {
    /// Map this error to its stable [`ErrorCode`].
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Json(_) => ErrorCode::Internal,
            Self::InvalidRevision { .. } | Self::InvalidCanonicalId { .. } => ErrorCode::UserInput,
        }
    }

    /// Convert into a classified [`EngineError`].
    #[must_use]
    pub fn into_engine_error(self) -> EngineError {
        let code = self.code();
        let message = self.to_string();
        EngineError::new(code, message).with_source(self)
    }
}

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

/// Ordered revision identifier of the form `rev-NNNN`.
///
/// Revisions compare lexicographically, which matches numeric order as long
/// as widths are equal; [`RevisionId::next`] preserves the width of its input
/// (growing it only when the counter overflows the width).
///
/// # Examples
///
/// ```
/// use rf_core::RevisionId;
///
/// let r1 = RevisionId::first();
/// assert_eq!(r1.as_str(), "rev-0001");
///
/// let r2 = r1.next();
/// assert_eq!(r2.as_str(), "rev-0002");
/// assert!(r1 < r2);
///
/// let wide = RevisionId::parse("rev-9999").unwrap();
/// assert_eq!(wide.next().as_str(), "rev-10000");
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// The first revision of any movie: `rev-0001`.
    #[must_use]
    pub fn first() -> Self {
        Self("rev-0001".to_string())
    }

    /// Parse and validate a `rev-NNNN` string.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidRevision`] when the value is not of
    /// the form `rev-` followed by one or more ASCII digits.
    pub fn parse(value: &str) -> Result<Self, ContractError> {
        let digits = value.strip_prefix("rev-").ok_or_else(|| {
            ContractError::InvalidRevision {
                value: value.to_string(),
            }
        })?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ContractError::InvalidRevision {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// The next revision, with the numeric suffix incremented and the width
    /// preserved.
    #[must_use]
    pub fn next(&self) -> Self {
        let digits = &self.0["rev-".len()..];
        let width = digits.len();
        let n: u64 = digits.parse().unwrap_or(0);
        Self(format!("rev-{:0width$}", n + 1, width = width))
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Produce a deterministic JSON string for hashing.
///
/// This is not a full JCS implementation, but it is stable for our types:
/// keys are sorted (serde_json `Map` is a `BTreeMap` by default) and numbers
/// are serialized consistently by serde_json. Binary never appears directly
/// in payloads — bytes enter the data model only as [`BlobRef`] objects whose
/// `hash` field already carries the content SHA-256.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Canonical form and digest of a JSON-shaped payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PayloadHash {
    /// The canonical (sorted-key) JSON string.
    pub canonical: String,
    /// Hex SHA-256 of the canonical string.
    pub hash: String,
}

/// Canonicalise and digest any JSON-shaped value.
///
/// Two payloads hash equal iff their canonical forms are byte-equal.
///
/// # Examples
///
/// ```
/// use rf_core::hash_payload;
/// use serde_json::json;
///
/// let a = hash_payload(&json!({"b": 1, "a": 2})).unwrap();
/// let b = hash_payload(&json!({"a": 2, "b": 1})).unwrap();
/// assert_eq!(a.hash, b.hash); // key order is canonicalised away
/// ```
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn hash_payload<T: Serialize>(value: &T) -> Result<PayloadHash, ContractError> {
    let canonical = canonical_json(value)?;
    let hash = sha256_hex(canonical.as_bytes());
    Ok(PayloadHash { canonical, hash })
}

/// Compute a stable digest over an artifact output envelope.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the output cannot be serialized.
pub fn hash_artifact_output(output: &ArtifactOutput) -> Result<String, ContractError> {
    let canonical = canonical_json(output)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Compute the content hash of a manifest snapshot.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the manifest cannot be serialized.
pub fn manifest_hash(manifest: &Manifest) -> Result<String, ContractError> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

// ---------------------------------------------------------------------------
// Blobs and outputs
// ---------------------------------------------------------------------------

/// Pointer to content-addressed bytes in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BlobRef {
    /// Hex SHA-256 of the content.
    pub hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// MIME type of the content.
    pub mime_type: String,
}

/// The materialised output of one artifact: a blob pointer or an inlined
/// small value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ArtifactOutput {
    /// Content-addressed bytes in storage.
    Blob {
        /// The blob pointer.
        blob: BlobRef,
    },
    /// A small value carried inline.
    Inline(serde_json::Value),
}

impl ArtifactOutput {
    /// Returns the blob reference when this output is blob-backed.
    #[must_use]
    pub fn blob(&self) -> Option<&BlobRef> {
        match self {
            Self::Blob { blob } => Some(blob),
            Self::Inline(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Terminal status of one artifact production attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// The artifact was produced.
    Succeeded,
    /// Production failed.
    Failed,
    /// Production was skipped (condition false or upstream failure).
    Skipped,
}

/// Status of a job over its lifetime. Closed variant — there is no class
/// hierarchy behind this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet dequeued.
    Queued,
    /// An attempt is in flight.
    Running,
    /// The job completed and all its outputs were recorded.
    Succeeded,
    /// The job failed terminally.
    Failed,
    /// The job was skipped without calling the provider.
    Skipped,
}

/// Why a job or artifact was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A required input condition evaluated false.
    ConditionFalse,
    /// An ancestor job failed.
    UpstreamFailed,
    /// The run was cancelled before the job was dequeued.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Structured diagnostics attached to events and job results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostics {
    /// Stable error code string, when the diagnostic stems from an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Arbitrary structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl Diagnostics {
    /// Build diagnostics with just a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Build diagnostics from a classified engine error.
    #[must_use]
    pub fn from_engine_error(err: &EngineError) -> Self {
        Self {
            code: Some(err.code.as_str().to_string()),
            message: err.message.clone(),
            context: err.context.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One edit to a single canonical input id at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputEvent {
    /// Canonical input id (`Input:…`).
    pub id: String,
    /// Revision the edit belongs to.
    pub revision: RevisionId,
    /// The new payload value.
    pub payload: serde_json::Value,
    /// Hash of the canonical payload form.
    pub hash: String,
    /// Who made the edit (user id, `cli`, …).
    pub edited_by: String,
    /// When the edit was appended.
    pub created_at: DateTime<Utc>,
}

impl InputEvent {
    /// Build an event, computing the payload hash.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Json`] if the payload cannot be serialized.
    pub fn new(
        id: impl Into<String>,
        revision: RevisionId,
        payload: serde_json::Value,
        edited_by: impl Into<String>,
    ) -> Result<Self, ContractError> {
        let hash = hash_payload(&payload)?.hash;
        Ok(Self {
            id: id.into(),
            revision,
            payload,
            hash,
            edited_by: edited_by.into(),
            created_at: Utc::now(),
        })
    }
}

/// One production attempt for a single artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactEvent {
    /// Canonical artifact id (`Artifact:…`).
    pub artifact_id: String,
    /// Revision the attempt belongs to.
    pub revision: RevisionId,
    /// Hash over the job's resolved inputs at production time.
    pub inputs_hash: String,
    /// The produced output; absent for failed/skipped attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactOutput>,
    /// Terminal status of the attempt.
    pub status: ArtifactStatus,
    /// Why the attempt was skipped, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Job id (`Producer:…`) that produced the artifact.
    pub produced_by: String,
    /// When the result was appended.
    pub created_at: DateTime<Utc>,
    /// Structured diagnostics for failed/skipped attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// State of one input in a manifest snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestInput {
    /// Hash of the canonical payload form.
    pub hash: String,
    /// Short display digest (first 12 hex chars of the hash).
    pub payload_digest: String,
    /// When the underlying edit was made.
    pub created_at: DateTime<Utc>,
}

/// State of one artifact in a manifest snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestArtifact {
    /// Digest of the artifact output envelope.
    pub hash: String,
    /// Job id that produced it.
    pub produced_by: String,
    /// Status of the winning production attempt.
    pub status: ArtifactStatus,
    /// When it was produced.
    pub created_at: DateTime<Utc>,
}

/// One revision marker in a manifest's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineEntry {
    /// The revision.
    pub revision: RevisionId,
    /// When the revision was materialised.
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a movie's inputs and last-known artifact states at one
/// revision.
///
/// Invariants: every artifact entry references a producer that existed in
/// the graph that produced it; every input entry was appended to the event
/// log at `revision` or earlier. Manifests only ever record succeeded
/// outputs — skipped and failed attempts live in the event log alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Revision this snapshot reflects.
    pub revision: RevisionId,
    /// Revision of the snapshot this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<RevisionId>,
    /// When the snapshot was materialised.
    pub created_at: DateTime<Utc>,
    /// Per-input state, keyed by canonical input id.
    pub inputs: BTreeMap<String, ManifestInput>,
    /// Per-artifact state, keyed by canonical artifact id.
    pub artifacts: BTreeMap<String, ManifestArtifact>,
    /// Revision history, oldest first.
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl Manifest {
    /// Create an empty manifest at the given revision.
    #[must_use]
    pub fn new(revision: RevisionId, base_revision: Option<RevisionId>) -> Self {
        Self {
            revision,
            base_revision,
            created_at: Utc::now(),
            inputs: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            timeline: Vec::new(),
        }
    }

    /// Hash recorded for an input id, if present.
    #[must_use]
    pub fn input_hash(&self, id: &str) -> Option<&str> {
        self.inputs.get(id).map(|i| i.hash.as_str())
    }

    /// Hash recorded for an artifact id, if present.
    #[must_use]
    pub fn artifact_hash(&self, id: &str) -> Option<&str> {
        self.artifacts.get(id).map(|a| a.hash.as_str())
    }
}

/// Short display digest for a payload hash.
#[must_use]
pub fn payload_digest(hash: &str) -> String {
    hash.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_revision_is_rev_0001() {
        assert_eq!(RevisionId::first().as_str(), "rev-0001");
    }

    #[test]
    fn next_preserves_width() {
        let r = RevisionId::parse("rev-0041").unwrap();
        assert_eq!(r.next().as_str(), "rev-0042");
    }

    #[test]
    fn next_grows_past_width() {
        let r = RevisionId::parse("rev-99").unwrap();
        assert_eq!(r.next().as_str(), "rev-100");
    }

    #[test]
    fn revisions_compare_lexicographically() {
        let a = RevisionId::parse("rev-0004").unwrap();
        let b = RevisionId::parse("rev-0017").unwrap();
        assert!(a < b);
    }

    #[test]
    fn parse_rejects_malformed_revisions() {
        for bad in ["rev-", "rev-12a", "r-0001", "0001", "REV-0001"] {
            assert!(RevisionId::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn payload_hash_is_key_order_independent() {
        let a = hash_payload(&json!({"x": [1, 2, 3], "y": {"b": 1, "a": 2}})).unwrap();
        let b = hash_payload(&json!({"y": {"a": 2, "b": 1}, "x": [1, 2, 3]})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn payload_hash_preserves_array_order() {
        let a = hash_payload(&json!([1, 2])).unwrap();
        let b = hash_payload(&json!([2, 1])).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn artifact_output_untagged_shapes() {
        let blob = ArtifactOutput::Blob {
            blob: BlobRef {
                hash: "ab".repeat(32),
                size: 4,
                mime_type: "audio/mpeg".into(),
            },
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert!(json.get("blob").is_some());

        let inline = ArtifactOutput::Inline(json!({"text": "hello"}));
        let json = serde_json::to_value(&inline).unwrap();
        assert_eq!(json, json!({"text": "hello"}));
    }

    #[test]
    fn artifact_output_hash_distinguishes_blob_and_inline() {
        let blob = ArtifactOutput::Blob {
            blob: BlobRef {
                hash: "00".repeat(32),
                size: 1,
                mime_type: "image/png".into(),
            },
        };
        let inline = ArtifactOutput::Inline(json!("png"));
        assert_ne!(
            hash_artifact_output(&blob).unwrap(),
            hash_artifact_output(&inline).unwrap()
        );
    }

    #[test]
    fn input_event_hash_matches_payload_hash() {
        let payload = json!({"prompt": "Tell me a story"});
        let ev = InputEvent::new(
            "Input:InquiryPrompt",
            RevisionId::first(),
            payload.clone(),
            "tester",
        )
        .unwrap();
        assert_eq!(ev.hash, hash_payload(&payload).unwrap().hash);
    }

    #[test]
    fn manifest_hash_is_deterministic() {
        let m = Manifest::new(RevisionId::first(), None);
        assert_eq!(manifest_hash(&m).unwrap(), manifest_hash(&m).unwrap());
    }

    #[test]
    fn payload_digest_is_a_prefix() {
        let h = sha256_hex(b"abc");
        assert_eq!(payload_digest(&h), &h[..12]);
    }
}
