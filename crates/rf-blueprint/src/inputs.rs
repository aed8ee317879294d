// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inputs documents and their resolution to canonical input values.
//!
//! The inputs document carries two top-level keys: `inputs` (logical input
//! name → value, where strings of the form `file:<path>` reference external
//! content) and `models` (per-producer model/provider overrides). Resolution
//! flattens both — plus blueprint defaults and each producer's declared
//! model/provider — into a map keyed by canonical input id, which is what
//! the graph builder, planner, and runner consume.

use crate::{Blueprint, BlueprintError};
use rf_core::{hash_payload, CanonicalId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-producer model/provider override from the inputs document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelOverride {
    /// Producer id (or dotted alias path) the override applies to.
    pub producer_id: String,
    /// Override for the provider family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Override for the model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The user-supplied inputs document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputsDocument {
    /// Logical input name (or `Alias.field` for producer-scoped config
    /// values) → value.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Model/provider overrides.
    #[serde(default)]
    pub models: Vec<ModelOverride>,
}

impl InputsDocument {
    /// Build a document from plain input pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            inputs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
            models: Vec::new(),
        }
    }
}

/// `true` when a value is a `file:<path>` reference (or an array of them).
#[must_use]
pub fn is_file_ref(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.starts_with("file:"),
        serde_json::Value::Array(items) => items.iter().any(is_file_ref),
        _ => false,
    }
}

/// Root input values keyed by canonical input id.
///
/// This is the single read-only view of "what the user said" that the graph
/// builder (extents), the planner (hash diffing), and the runner (context
/// preparation) all share.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    values: BTreeMap<String, serde_json::Value>,
}

impl ResolvedInputs {
    /// Resolve an inputs document against a blueprint.
    ///
    /// Declared inputs take the document value, else their default;
    /// required inputs with neither fail. Undeclared document keys pass
    /// through (keys containing a dot become producer-scoped config
    /// inputs). Every producer's declared `provider`/`model` — overridden
    /// by the document's `models` section — seeds the synthetic
    /// `Input:<Producer>.provider` / `.model` selectors.
    ///
    /// # Errors
    ///
    /// Returns [`BlueprintError::MissingInput`] for a required input with
    /// no value.
    pub fn from_document(
        blueprint: &Blueprint,
        doc: &InputsDocument,
    ) -> Result<Self, BlueprintError> {
        let mut values = BTreeMap::new();

        for decl in &blueprint.inputs {
            let value = doc
                .inputs
                .get(&decl.name)
                .cloned()
                .or_else(|| decl.default.clone());
            match value {
                Some(v) => {
                    values.insert(CanonicalId::input(&decl.name).to_string(), v);
                }
                None if decl.required => {
                    return Err(BlueprintError::MissingInput {
                        name: decl.name.clone(),
                    });
                }
                None => {}
            }
        }

        for (name, value) in &doc.inputs {
            let id = match name.split_once('.') {
                Some((alias, field)) => CanonicalId::scoped_input(alias, field),
                None => CanonicalId::input(name),
            }
            .to_string();
            values.entry(id).or_insert_with(|| value.clone());
        }

        seed_model_selectors(blueprint, doc, &mut Vec::new(), &mut values);

        Ok(Self { values })
    }

    /// Look up a value by canonical input id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&serde_json::Value> {
        self.values.get(id)
    }

    /// Insert or replace a value.
    pub fn set(&mut self, id: impl Into<String>, value: serde_json::Value) {
        self.values.insert(id.into(), value);
    }

    /// Iterate `(canonical id, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Canonical payload hash per input id.
    ///
    /// # Errors
    ///
    /// Returns a contract error if any value fails to serialize.
    pub fn hashes(&self) -> Result<BTreeMap<String, String>, rf_core::ContractError> {
        let mut out = BTreeMap::new();
        for (id, value) in &self.values {
            out.insert(id.clone(), hash_payload(value)?.hash);
        }
        Ok(out)
    }
}

fn seed_model_selectors(
    blueprint: &Blueprint,
    doc: &InputsDocument,
    path: &mut Vec<String>,
    values: &mut BTreeMap<String, serde_json::Value>,
) {
    for decl in &blueprint.models {
        path.push(decl.id.clone());
        let alias_path = path.join(".");
        path.pop();

        let overrides: Option<&ModelOverride> = doc
            .models
            .iter()
            .find(|o| o.producer_id == alias_path || o.producer_id == decl.id);
        let provider = overrides
            .and_then(|o| o.provider.clone())
            .unwrap_or_else(|| decl.provider.clone());
        let model = overrides
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| decl.model.clone());

        let provider_id = CanonicalId::scoped_input(&alias_path, "provider").to_string();
        let model_id = CanonicalId::scoped_input(&alias_path, "model").to_string();
        values
            .entry(provider_id)
            .or_insert_with(|| serde_json::Value::String(provider));
        values
            .entry(model_id)
            .or_insert_with(|| serde_json::Value::String(model));
    }

    for import in &blueprint.producers {
        path.push(import.effective_alias().to_string());
        seed_model_selectors(&import.blueprint, doc, path, values);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProducerDecl;
    use serde_json::json;

    fn blueprint() -> Blueprint {
        Blueprint::new("demo")
            .required_input("InquiryPrompt")
            .optional_input("Style", json!("storybook"))
            .producer(
                ProducerDecl::new("ScriptProducer", "openai", "gpt-5")
                    .input("InquiryPrompt", "Inputs.InquiryPrompt")
                    .output("Script"),
            )
    }

    #[test]
    fn resolves_declared_values_and_defaults() {
        let doc = InputsDocument::from_pairs([("InquiryPrompt", json!("Tell me a story"))]);
        let resolved = ResolvedInputs::from_document(&blueprint(), &doc).unwrap();
        assert_eq!(
            resolved.get("Input:InquiryPrompt"),
            Some(&json!("Tell me a story"))
        );
        assert_eq!(resolved.get("Input:Style"), Some(&json!("storybook")));
    }

    #[test]
    fn missing_required_input_fails() {
        let doc = InputsDocument::default();
        let err = ResolvedInputs::from_document(&blueprint(), &doc).unwrap_err();
        assert!(matches!(err, BlueprintError::MissingInput { .. }), "{err:?}");
    }

    #[test]
    fn dotted_keys_become_scoped_config_inputs() {
        let mut doc = InputsDocument::from_pairs([("InquiryPrompt", json!("x"))]);
        doc.inputs.insert("AudioProducer.volume".into(), json!(0.5));
        let resolved = ResolvedInputs::from_document(&blueprint(), &doc).unwrap();
        assert_eq!(resolved.get("Input:AudioProducer.volume"), Some(&json!(0.5)));
    }

    #[test]
    fn producer_decls_seed_model_selectors() {
        let doc = InputsDocument::from_pairs([("InquiryPrompt", json!("x"))]);
        let resolved = ResolvedInputs::from_document(&blueprint(), &doc).unwrap();
        assert_eq!(
            resolved.get("Input:ScriptProducer.provider"),
            Some(&json!("openai"))
        );
        assert_eq!(
            resolved.get("Input:ScriptProducer.model"),
            Some(&json!("gpt-5"))
        );
    }

    #[test]
    fn model_overrides_beat_declared_models() {
        let mut doc = InputsDocument::from_pairs([("InquiryPrompt", json!("x"))]);
        doc.models.push(ModelOverride {
            producer_id: "ScriptProducer".into(),
            provider: None,
            model: Some("gpt-5-mini".into()),
        });
        let resolved = ResolvedInputs::from_document(&blueprint(), &doc).unwrap();
        assert_eq!(
            resolved.get("Input:ScriptProducer.model"),
            Some(&json!("gpt-5-mini"))
        );
        // Provider falls back to the declaration.
        assert_eq!(
            resolved.get("Input:ScriptProducer.provider"),
            Some(&json!("openai"))
        );
    }

    #[test]
    fn file_refs_are_detected() {
        assert!(is_file_ref(&json!("file:assets/voice.mp3")));
        assert!(is_file_ref(&json!(["file:a.png", "file:b.png"])));
        assert!(!is_file_ref(&json!("https://example.com")));
        assert!(!is_file_ref(&json!(42)));
    }

    #[test]
    fn hashes_cover_every_value() {
        let doc = InputsDocument::from_pairs([("InquiryPrompt", json!("x"))]);
        let resolved = ResolvedInputs::from_document(&blueprint(), &doc).unwrap();
        let hashes = resolved.hashes().unwrap();
        assert!(hashes.contains_key("Input:InquiryPrompt"));
        assert!(hashes.contains_key("Input:ScriptProducer.model"));
        assert_eq!(
            hashes["Input:InquiryPrompt"],
            hash_payload(&json!("x")).unwrap().hash
        );
    }
}
