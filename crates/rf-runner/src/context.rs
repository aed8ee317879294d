// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job context preparation.
//!
//! Gathers a job's resolved inputs from canonical ids into the view handed
//! to the provider: logical names map to values, fan-in envelopes keep
//! their grouped shape, element-keyed bindings (`ReferenceImages[0]`)
//! reassemble into collections, `file:` references and blob outputs resolve
//! to `{data, mime_type}` envelopes, and the system inputs
//! (`Input:StorageRoot`, `Input:StorageBasePath`, `Input:MovieId`) are
//! injected unconditionally.

use rf_blueprint::{expr::parse_binding_key, ResolvedInputs};
use rf_core::{ArtifactOutput, InputBinding, JobDescriptor};
use rf_error::ErrorCode;
use rf_storage::{StorageContext, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;

/// Errors from context preparation.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A `file:` reference could not be read.
    #[error("failed to read file reference {path}")]
    FileRef {
        /// The referenced path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Blob storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A binding key was malformed.
    #[error(transparent)]
    Blueprint(#[from] rf_blueprint::BlueprintError),
}

impl ContextError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FileRef { .. } | Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Blueprint(e) => e.code(),
        }
    }
}

/// One resolved input value as seen by a handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedInput {
    /// A plain JSON value.
    Value(serde_json::Value),
    /// Resolved binary content.
    Blob {
        /// The bytes.
        data: Vec<u8>,
        /// MIME type.
        mime_type: String,
    },
    /// A grouped fan-in, members resolved in group order.
    Envelope {
        /// Grouping dimension.
        group_by: String,
        /// Ordering field, when declared.
        order_by: Option<String>,
        /// Resolved members per group. Members whose upstream was skipped
        /// are dropped, not placeholdered.
        groups: Vec<Vec<ResolvedInput>>,
    },
    /// An ordered collection assembled from element-keyed bindings.
    Collection(Vec<ResolvedInput>),
}

impl ResolvedInput {
    /// The plain JSON value, when this input is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// The per-job view passed to the provider handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreparedContext {
    /// Logical input name → resolved value.
    pub values: BTreeMap<String, ResolvedInput>,
}

impl PreparedContext {
    /// Look up a resolved input by logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedInput> {
        self.values.get(name)
    }

    /// The plain JSON value under a logical name, when present.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name).and_then(ResolvedInput::as_value)
    }

    /// Drop a logical input (used when a non-required condition excludes
    /// it).
    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}

/// Resolve artifact outputs by canonical id. Returns `None` for artifacts
/// that were never produced (e.g. upstream condition skips).
pub trait OutputLookup {
    /// Look up an artifact output by canonical id.
    fn output(&self, artifact_id: &str) -> Option<ArtifactOutput>;
}

impl OutputLookup for BTreeMap<String, ArtifactOutput> {
    fn output(&self, artifact_id: &str) -> Option<ArtifactOutput> {
        self.get(artifact_id).cloned()
    }
}

/// Prepare the per-job context (§ job context preparation).
///
/// # Errors
///
/// Returns [`ContextError`] when a `file:` reference or blob cannot be
/// read, or a binding key is malformed.
pub fn prepare_job_context(
    job: &JobDescriptor,
    inputs: &ResolvedInputs,
    outputs: &dyn OutputLookup,
    storage: &StorageContext,
    movie_id: &str,
) -> Result<PreparedContext, ContextError> {
    let mut prepared = PreparedContext::default();
    // Element-keyed bindings accumulate here before assembly.
    let mut elements: BTreeMap<String, Vec<(usize, ResolvedInput)>> = BTreeMap::new();

    for (binding_key, binding) in &job.context.input_bindings {
        let (base, element) = parse_binding_key(binding_key)?;
        let resolved = match binding {
            InputBinding::Source { id } => resolve_source(id, inputs, outputs, storage)?,
            InputBinding::FanIn(envelope) => {
                let mut groups = Vec::with_capacity(envelope.groups.len());
                for group in &envelope.groups {
                    let mut members = Vec::new();
                    for member in group {
                        if let Some(value) = resolve_source(member, inputs, outputs, storage)? {
                            members.push(value);
                        }
                    }
                    groups.push(members);
                }
                Some(ResolvedInput::Envelope {
                    group_by: envelope.group_by.clone(),
                    order_by: envelope.order_by.clone(),
                    groups,
                })
            }
        };
        let Some(resolved) = resolved else {
            continue;
        };
        match element {
            Some(index) => elements.entry(base).or_default().push((index, resolved)),
            None => {
                prepared.values.insert(base, resolved);
            }
        }
    }

    for (base, mut parts) in elements {
        parts.sort_by_key(|(i, _)| *i);
        prepared.values.insert(
            base,
            ResolvedInput::Collection(parts.into_iter().map(|(_, v)| v).collect()),
        );
    }

    // System inputs are always present.
    prepared.values.insert(
        "StorageRoot".into(),
        ResolvedInput::Value(serde_json::Value::String(storage.base_path().to_string())),
    );
    prepared.values.insert(
        "StorageBasePath".into(),
        ResolvedInput::Value(serde_json::Value::String(format!(
            "{}/movies/{movie_id}",
            storage.base_path()
        ))),
    );
    prepared.values.insert(
        "MovieId".into(),
        ResolvedInput::Value(serde_json::Value::String(movie_id.to_string())),
    );

    Ok(prepared)
}

fn resolve_source(
    id: &str,
    inputs: &ResolvedInputs,
    outputs: &dyn OutputLookup,
    storage: &StorageContext,
) -> Result<Option<ResolvedInput>, ContextError> {
    if id.starts_with("Input:") {
        let Some(value) = inputs.get(id) else {
            return Ok(None);
        };
        return Ok(Some(resolve_value(value, storage)?));
    }
    match outputs.output(id) {
        Some(ArtifactOutput::Inline(value)) => Ok(Some(ResolvedInput::Value(value))),
        Some(ArtifactOutput::Blob { blob }) => {
            let data = storage.get_blob(&blob.hash)?;
            Ok(Some(ResolvedInput::Blob {
                data,
                mime_type: blob.mime_type,
            }))
        }
        None => Ok(None),
    }
}

fn resolve_value(
    value: &serde_json::Value,
    storage: &StorageContext,
) -> Result<ResolvedInput, ContextError> {
    match value {
        serde_json::Value::String(s) if s.starts_with("file:") => {
            let path = &s["file:".len()..];
            let data = std::fs::read(path).map_err(|source| ContextError::FileRef {
                path: path.to_string(),
                source,
            })?;
            Ok(ResolvedInput::Blob {
                data,
                mime_type: guess_mime(path).to_string(),
            })
        }
        serde_json::Value::Array(items) if items.iter().any(is_file_ref_str) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, storage)?);
            }
            Ok(ResolvedInput::Collection(resolved))
        }
        other => Ok(ResolvedInput::Value(other.clone())),
    }
}

fn is_file_ref_str(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::String(s) if s.starts_with("file:"))
}

fn guess_mime(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}
