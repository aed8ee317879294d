// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job descriptors — the nodes of the producer graph.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grouped view of upstream members feeding a single downstream input.
///
/// When many upstream indices feed one input, the graph builder records an
/// envelope instead of a flat list so handlers can preserve grouping
/// semantics. `groups` is ordered by the `group_by` dimension index; members
/// within a group are ordered by `order_by` (or by their remaining indices).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FanInEnvelope {
    /// Dimension whose indices form the groups.
    pub group_by: String,
    /// Optional ordering field within each group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    /// Canonical artifact ids, one inner vec per group.
    pub groups: Vec<Vec<String>>,
}

impl FanInEnvelope {
    /// All member ids across groups, in group order.
    #[must_use]
    pub fn members(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.iter().map(String::as_str))
            .collect()
    }
}

/// How one logical input of a job is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputBinding {
    /// A single canonical source id (root input or upstream artifact).
    Source {
        /// Canonical id of the source.
        id: String,
    },
    /// A grouped fan-in of many upstream artifact instances.
    FanIn(FanInEnvelope),
}

impl InputBinding {
    /// Canonical ids this binding draws from.
    #[must_use]
    pub fn source_ids(&self) -> Vec<&str> {
        match self {
            Self::Source { id } => vec![id.as_str()],
            Self::FanIn(envelope) => envelope.members(),
        }
    }
}

/// Comparison operator for input conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// Values must be equal.
    Eq,
    /// Values must differ.
    Ne,
}

/// Predicate over resolved inputs determining whether an input (and with it,
/// a required job) is present.
///
/// When `required` is true and the predicate evaluates false, the runner
/// records the job as skipped with reason `condition_false` without calling
/// the provider. When `required` is false, only the gated input is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputCondition {
    /// Logical input name whose resolved value is tested.
    pub input: String,
    /// Comparison operator.
    pub op: ConditionOp,
    /// Value to compare against.
    pub value: serde_json::Value,
    /// Whether a false predicate skips the whole job.
    pub required: bool,
}

impl InputCondition {
    /// Evaluate the predicate against the resolved value of [`Self::input`].
    ///
    /// A missing value never satisfies `Eq` and always satisfies `Ne`.
    #[must_use]
    pub fn evaluate(&self, resolved: Option<&serde_json::Value>) -> bool {
        match (self.op, resolved) {
            (ConditionOp::Eq, Some(v)) => *v == self.value,
            (ConditionOp::Eq, None) => false,
            (ConditionOp::Ne, Some(v)) => *v != self.value,
            (ConditionOp::Ne, None) => true,
        }
    }
}

/// Input/output schema references carried through to the handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSchemas {
    /// JSON Schema for the handler's input, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// JSON Schema for the handler's output, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Per-job context assembled by the graph builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobContext {
    /// Ordered aliases from the blueprint root to this producer.
    pub namespace_path: Vec<String>,
    /// Dimension name → index for this expansion.
    pub indices: BTreeMap<String, usize>,
    /// Alias of the producer this job instantiates.
    pub producer_alias: String,
    /// Logical input name (possibly with an element selector such as
    /// `ReferenceImages[0]`) → canonical source binding.
    pub input_bindings: BTreeMap<String, InputBinding>,
    /// Gated input name → presence predicate.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_conditions: BTreeMap<String, InputCondition>,
    /// Handler field name → logical input name, when the provider SDK uses
    /// different names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_mapping: Option<BTreeMap<String, String>>,
    /// Declared handler schemas.
    #[serde(default)]
    pub schema: JobSchemas,
}

/// One fully-indexed producer instance — a node of the producer graph and
/// exactly one call to the runner's `produce` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobDescriptor {
    /// Canonical job id (`Producer:<Alias>[i][j]…`).
    pub job_id: String,
    /// Producer alias.
    pub producer: String,
    /// Canonical ids of everything the job consumes.
    pub inputs: Vec<String>,
    /// Canonical ids of everything the job produces.
    pub produces: Vec<String>,
    /// Provider family (`openai`, `elevenlabs`, `compose`, …).
    pub provider: String,
    /// Concrete model identifier within the provider.
    pub provider_model: String,
    /// Rate-limiting key; jobs sharing a key share an in-flight budget.
    pub rate_key: String,
    /// Expansion context: indices, bindings, conditions, schemas.
    pub context: JobContext,
}

impl JobDescriptor {
    /// Whether this job consumes the given canonical id.
    #[must_use]
    pub fn consumes(&self, id: &str) -> bool {
        self.inputs.iter().any(|i| i == id)
    }

    /// Whether this job produces the given canonical id.
    #[must_use]
    pub fn produces_artifact(&self, id: &str) -> bool {
        self.produces.iter().any(|p| p == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(op: ConditionOp, value: serde_json::Value) -> InputCondition {
        InputCondition {
            input: "NarrationType".into(),
            op,
            value,
            required: true,
        }
    }

    #[test]
    fn eq_condition_matches_equal_values() {
        let c = cond(ConditionOp::Eq, json!("TalkingHead"));
        assert!(c.evaluate(Some(&json!("TalkingHead"))));
        assert!(!c.evaluate(Some(&json!("ImageNarration"))));
        assert!(!c.evaluate(None));
    }

    #[test]
    fn ne_condition_matches_differing_values() {
        let c = cond(ConditionOp::Ne, json!("TalkingHead"));
        assert!(!c.evaluate(Some(&json!("TalkingHead"))));
        assert!(c.evaluate(Some(&json!("ImageNarration"))));
        assert!(c.evaluate(None));
    }

    #[test]
    fn envelope_members_flatten_in_group_order() {
        let env = FanInEnvelope {
            group_by: "segment".into(),
            order_by: None,
            groups: vec![
                vec!["Artifact:A.X[segment=0]".into()],
                vec!["Artifact:A.X[segment=1]".into()],
            ],
        };
        assert_eq!(
            env.members(),
            ["Artifact:A.X[segment=0]", "Artifact:A.X[segment=1]"]
        );
    }

    #[test]
    fn binding_source_ids_cover_both_shapes() {
        let single = InputBinding::Source {
            id: "Input:Style".into(),
        };
        assert_eq!(single.source_ids(), ["Input:Style"]);

        let fan = InputBinding::FanIn(FanInEnvelope {
            group_by: "segment".into(),
            order_by: Some("image".into()),
            groups: vec![vec!["Artifact:P.I[segment=0][image=0]".into()]],
        });
        assert_eq!(fan.source_ids(), ["Artifact:P.I[segment=0][image=0]"]);
    }
}
