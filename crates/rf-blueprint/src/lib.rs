// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-blueprint
//!
//! The parsed blueprint tree and the inputs document.
//!
//! Parsing YAML and validating documents against a schema happen outside the
//! engine; this crate defines the shapes those collaborators hand over —
//! producer declarations with typed inputs/outputs, loop dimensions,
//! conditions, nested producer imports — plus the small binding-expression
//! grammar (`Inputs.X`, `Alias.Output[*] group by segment`) and the
//! resolution of an inputs document into canonical input values.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Binding-expression grammar.
pub mod expr;
/// Inputs documents and resolved root inputs.
pub mod inputs;

pub use expr::{ElementSel, SourceExpr, SourceScope};
pub use inputs::{InputsDocument, ModelOverride, ResolvedInputs};

use rf_error::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors from blueprint and inputs-document handling.
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    /// A required root input has no value, no default, and no binding.
    #[error("missing required input: {name}")]
    MissingInput {
        /// The input name.
        name: String,
    },

    /// A binding expression could not be parsed.
    #[error("invalid binding expression '{expr}': {reason}")]
    InvalidExpr {
        /// The rejected expression.
        expr: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A value in the inputs document has an unusable shape.
    #[error("invalid value for input '{name}': {reason}")]
    InvalidValue {
        /// The input name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl BlueprintError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingInput { .. } => ErrorCode::MissingRequiredInput,
            Self::InvalidExpr { .. } | Self::InvalidValue { .. } => ErrorCode::UserInput,
        }
    }
}

/// Name, id, and version of a blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BlueprintMeta {
    /// Human-readable name.
    pub name: String,
    /// Stable identifier.
    pub id: String,
    /// Version string.
    pub version: String,
}

/// One declared root input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputDecl {
    /// Logical input name.
    pub name: String,
    /// Whether the inputs document must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Fallback value when the document is silent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One exported artifact of the blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDecl {
    /// Export name.
    pub name: String,
    /// Source expression (`Alias.Output`).
    pub source: String,
}

/// Right-hand side of an input mapping: one source expression, or several
/// merged into a single collection input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum BindingDecl {
    /// A single source expression.
    One(String),
    /// Several source expressions merged in order.
    Many(Vec<String>),
}

impl BindingDecl {
    /// The expressions, one or many.
    #[must_use]
    pub fn exprs(&self) -> Vec<&str> {
        match self {
            Self::One(e) => vec![e.as_str()],
            Self::Many(es) => es.iter().map(String::as_str).collect(),
        }
    }
}

/// A loop dimension a producer expands over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoopSpec {
    /// Dimension name (`segment`, `image`, `character`, …).
    pub dimension: String,
    /// Source expression whose collection length (or integer value) drives
    /// the extent.
    pub over: String,
}

/// Declared comparison operator for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOpDecl {
    /// Equal.
    #[default]
    Eq,
    /// Not equal.
    Ne,
}

fn default_true() -> bool {
    true
}

/// A declared input condition, keyed in [`ProducerDecl::conditions`] by the
/// input it gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConditionDecl {
    /// Logical input whose resolved value is tested.
    pub input: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: ConditionOpDecl,
    /// Value to compare against.
    pub value: serde_json::Value,
    /// Whether a false predicate skips the whole job (true) or only drops
    /// the gated input (false).
    #[serde(default = "default_true")]
    pub required: bool,
}

/// One producer recipe: a model bound to a provider, with typed inputs and
/// outputs and optional loop dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProducerDecl {
    /// Producer identifier within the blueprint.
    pub id: String,
    /// Provider family (`openai`, `elevenlabs`, `compose`, …).
    pub provider: String,
    /// Concrete model identifier.
    pub model: String,
    /// Rate-limiting key; defaults to the provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_key: Option<String>,
    /// JSON Schema for handler input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// JSON Schema for handler output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Logical input name (optionally with an element selector such as
    /// `ReferenceImages[0]`) → source expression(s).
    #[serde(default)]
    pub inputs: BTreeMap<String, BindingDecl>,
    /// Artifact names this producer emits.
    pub outputs: Vec<String>,
    /// Loop dimensions.
    #[serde(default)]
    pub loops: Vec<LoopSpec>,
    /// Gated input name → presence predicate.
    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionDecl>,
    /// Handler field name → logical input name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_mapping: Option<BTreeMap<String, String>>,
}

impl ProducerDecl {
    /// Start a declaration with the required fields.
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            rate_key: None,
            input_schema: None,
            output_schema: None,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            loops: Vec::new(),
            conditions: BTreeMap::new(),
            sdk_mapping: None,
        }
    }

    /// Map a logical input to a source expression.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.inputs
            .insert(name.into(), BindingDecl::One(expr.into()));
        self
    }

    /// Map a logical input to several merged source expressions.
    #[must_use]
    pub fn input_many(mut self, name: impl Into<String>, exprs: Vec<String>) -> Self {
        self.inputs.insert(name.into(), BindingDecl::Many(exprs));
        self
    }

    /// Declare an output artifact name.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Declare a loop dimension driven by the given expression.
    #[must_use]
    pub fn loop_over(mut self, dimension: impl Into<String>, over: impl Into<String>) -> Self {
        self.loops.push(LoopSpec {
            dimension: dimension.into(),
            over: over.into(),
        });
        self
    }

    /// Gate an input behind a condition.
    #[must_use]
    pub fn condition(mut self, gated_input: impl Into<String>, decl: ConditionDecl) -> Self {
        self.conditions.insert(gated_input.into(), decl);
        self
    }

    /// Override the rate-limiting key.
    #[must_use]
    pub fn rate_key(mut self, key: impl Into<String>) -> Self {
        self.rate_key = Some(key.into());
        self
    }
}

/// A nested blueprint imported under an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProducerImport {
    /// Alias for the import; falls back to the nested blueprint's
    /// `meta.id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// The imported blueprint.
    pub blueprint: Blueprint,
    /// Nested root input name → source expression in the importing scope.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl ProducerImport {
    /// The effective alias: the import's alias when present, else the
    /// nested blueprint's `meta.id`.
    #[must_use]
    pub fn effective_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.blueprint.meta.id)
    }
}

/// The declarative pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Blueprint {
    /// Name, id, version.
    pub meta: BlueprintMeta,
    /// Declared root inputs.
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    /// Exported artifacts.
    #[serde(default)]
    pub artifacts: Vec<ArtifactDecl>,
    /// Producer recipes.
    #[serde(default)]
    pub models: Vec<ProducerDecl>,
    /// Nested blueprint imports.
    #[serde(default)]
    pub producers: Vec<ProducerImport>,
}

impl Blueprint {
    /// Start an empty blueprint with the given meta id (doubling as name).
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            meta: BlueprintMeta {
                name: id.clone(),
                id,
                version: "1".into(),
            },
            inputs: Vec::new(),
            artifacts: Vec::new(),
            models: Vec::new(),
            producers: Vec::new(),
        }
    }

    /// Declare a root input.
    #[must_use]
    pub fn input(mut self, decl: InputDecl) -> Self {
        self.inputs.push(decl);
        self
    }

    /// Declare a required root input by name.
    #[must_use]
    pub fn required_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputDecl {
            name: name.into(),
            required: true,
            default: None,
            description: None,
        });
        self
    }

    /// Declare an optional root input with a default.
    #[must_use]
    pub fn optional_input(
        mut self,
        name: impl Into<String>,
        default: serde_json::Value,
    ) -> Self {
        self.inputs.push(InputDecl {
            name: name.into(),
            required: false,
            default: Some(default),
            description: None,
        });
        self
    }

    /// Add a producer recipe.
    #[must_use]
    pub fn producer(mut self, decl: ProducerDecl) -> Self {
        self.models.push(decl);
        self
    }

    /// Import a nested blueprint under an alias.
    #[must_use]
    pub fn import(mut self, import: ProducerImport) -> Self {
        self.producers.push(import);
        self
    }

    /// Find a producer recipe by id.
    #[must_use]
    pub fn find_producer(&self, id: &str) -> Option<&ProducerDecl> {
        self.models.iter().find(|p| p.id == id)
    }
}
