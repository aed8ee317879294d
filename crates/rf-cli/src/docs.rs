// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blueprint and inputs-document loading.
//!
//! Documents are YAML or JSON by extension; schema validation is a
//! collaborator's job, so loading stops at serde.

use anyhow::{Context, Result};
use rf_blueprint::{Blueprint, InputsDocument};
use std::path::Path;

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Load a blueprint document.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed.
pub fn load_blueprint(path: &Path) -> Result<Blueprint> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read blueprint {}", path.display()))?;
    if is_json(path) {
        serde_json::from_str(&text)
            .with_context(|| format!("parse blueprint {}", path.display()))
    } else {
        serde_yml::from_str(&text)
            .with_context(|| format!("parse blueprint {}", path.display()))
    }
}

/// Load an inputs document.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed.
pub fn load_inputs(path: &Path) -> Result<InputsDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read inputs {}", path.display()))?;
    if is_json(path) {
        serde_json::from_str(&text).with_context(|| format!("parse inputs {}", path.display()))
    } else {
        serde_yml::from_str(&text).with_context(|| format!("parse inputs {}", path.display()))
    }
}
