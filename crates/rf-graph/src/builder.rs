// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blueprint → producer-graph expansion.
//!
//! Expansion proceeds in four passes:
//!
//! 1. **Flatten** the blueprint tree into producers with namespace paths,
//!    collecting per-namespace alias tables, import bindings, and exports.
//! 2. **Resolve** every binding and loop expression to a concrete source
//!    (root input or upstream artifact), following import bindings upward
//!    and export declarations downward.
//! 3. **Order and dimension** producers: producer-level topological order
//!    (rejecting cycles), then per-producer dimension lists — explicit
//!    loops first, dimensions inherited from element-wise consumed parents
//!    after. Two parents driving one dimension name must agree on extent
//!    (dimension unification); fan-in and element-indexed references do not
//!    inherit.
//! 4. **Expand** each producer once per combined index, emitting job
//!    descriptors with input bindings (fan-in envelopes included), auto-
//!    attached config inputs, conditions, and finally deriving edges from
//!    artifact consumption.

use crate::{GraphEdge, GraphError, ProducerGraph};
use rf_blueprint::{
    expr::parse_binding_key, Blueprint, ConditionOpDecl, ElementSel, ProducerDecl,
    ResolvedInputs, SourceExpr, SourceScope,
};
use rf_core::{
    CanonicalId, ConditionOp, FanInEnvelope, IndexSelector, InputBinding, InputCondition,
    JobContext, JobDescriptor, JobSchemas,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Expands a blueprint plus resolved root inputs into a [`ProducerGraph`].
pub struct GraphBuilder<'a> {
    blueprint: &'a Blueprint,
    inputs: &'a ResolvedInputs,
}

// -- internal model ---------------------------------------------------------

#[derive(Debug)]
struct NsNode {
    parent: Option<usize>,
    ns: Vec<String>,
    model_ids: BTreeSet<String>,
    imports: BTreeMap<String, usize>,
    import_bindings: BTreeMap<String, String>,
    exports: BTreeMap<String, String>,
    declared_inputs: BTreeSet<String>,
}

#[derive(Debug)]
struct FlatProducer {
    ns_idx: usize,
    path: Vec<String>,
    decl: ProducerDecl,
}

impl FlatProducer {
    fn key(&self) -> String {
        self.path.join(".")
    }
}

/// A binding or loop expression resolved to a concrete source.
#[derive(Debug, Clone)]
enum Source {
    RootInput {
        id: String,
    },
    Artifact {
        path: Vec<String>,
        output: String,
        element: Option<ElementSel>,
        group_by: Option<String>,
        order_by: Option<String>,
    },
}

type Dims = Vec<(String, usize)>;

impl<'a> GraphBuilder<'a> {
    /// Create a builder over a blueprint and its resolved root inputs.
    #[must_use]
    pub fn new(blueprint: &'a Blueprint, inputs: &'a ResolvedInputs) -> Self {
        Self { blueprint, inputs }
    }

    /// Run the expansion.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] for unknown producers, unresolved inputs,
    /// conflicting dimensions, unresolvable element indices, and cycles.
    pub fn build(&self) -> Result<ProducerGraph, GraphError> {
        let mut arena: Vec<NsNode> = Vec::new();
        let mut flats: Vec<FlatProducer> = Vec::new();
        collect(
            self.blueprint,
            None,
            Vec::new(),
            BTreeMap::new(),
            &mut arena,
            &mut flats,
        );

        // Pass 2: resolve every producer's bindings and loop drivers.
        let mut bindings: BTreeMap<String, Vec<(String, Vec<Source>)>> = BTreeMap::new();
        let mut loop_sources: BTreeMap<String, Vec<(String, Source)>> = BTreeMap::new();
        for flat in &flats {
            let key = flat.key();
            let mut resolved = Vec::new();
            for (binding_key, decl) in &flat.decl.inputs {
                let mut sources = Vec::new();
                for expr in decl.exprs() {
                    sources.push(self.resolve_expr(&arena, flat.ns_idx, expr, &key)?);
                }
                resolved.push((binding_key.clone(), sources));
            }
            let mut loops = Vec::new();
            for spec in &flat.decl.loops {
                let source = self.resolve_expr(&arena, flat.ns_idx, &spec.over, &key)?;
                loops.push((spec.dimension.clone(), source));
            }
            bindings.insert(key.clone(), resolved);
            loop_sources.insert(key, loops);
        }

        // Pass 3: producer-level order, then dimensions.
        let order = producer_order(&flats, &bindings, &loop_sources)?;
        let mut dims_by_key: BTreeMap<String, Dims> = BTreeMap::new();
        let flat_by_key: BTreeMap<String, &FlatProducer> =
            flats.iter().map(|f| (f.key(), f)).collect();
        for key in &order {
            let flat = flat_by_key[key.as_str()];
            let dims = self.resolve_dims(flat, &bindings[key], &loop_sources[key], &dims_by_key)?;
            debug!(target: "rf.graph", producer = %key, ?dims, "resolved dimensions");
            dims_by_key.insert(key.clone(), dims);
        }

        // Pass 4: expand jobs and derive edges.
        let mut nodes: Vec<JobDescriptor> = Vec::new();
        for key in &order {
            let flat = flat_by_key[key.as_str()];
            self.expand_jobs(flat, &bindings[key], &dims_by_key, &mut nodes)?;
        }

        let mut artifact_producer: BTreeMap<String, String> = BTreeMap::new();
        for node in &nodes {
            for artifact in &node.produces {
                artifact_producer.insert(artifact.clone(), node.job_id.clone());
            }
        }
        let mut edge_set: BTreeSet<(String, String)> = BTreeSet::new();
        for node in &nodes {
            for input in &node.inputs {
                if let Some(from) = artifact_producer.get(input) {
                    edge_set.insert((from.clone(), node.job_id.clone()));
                }
            }
        }
        let edges = edge_set
            .into_iter()
            .map(|(from, to)| GraphEdge { from, to })
            .collect();

        Ok(ProducerGraph::new(nodes, edges))
    }

    // -- expression resolution ----------------------------------------------

    fn resolve_expr(
        &self,
        arena: &[NsNode],
        ns_idx: usize,
        expr: &str,
        referenced_by: &str,
    ) -> Result<Source, GraphError> {
        let parsed = SourceExpr::parse(expr)?;
        self.resolve_parsed(arena, ns_idx, parsed, referenced_by)
    }

    fn resolve_parsed(
        &self,
        arena: &[NsNode],
        ns_idx: usize,
        expr: SourceExpr,
        referenced_by: &str,
    ) -> Result<Source, GraphError> {
        let node = &arena[ns_idx];
        match &expr.scope {
            SourceScope::Inputs => {
                if expr.element.is_some() {
                    return Err(GraphError::UnresolvedInput {
                        input: expr.to_string(),
                        producer: referenced_by.to_string(),
                        reason: "element selection on root inputs is not supported; \
                                 bind the element key instead"
                            .into(),
                    });
                }
                match node.parent {
                    None => {
                        let id = CanonicalId::input(&expr.name).to_string();
                        if !node.declared_inputs.contains(&expr.name)
                            && self.inputs.get(&id).is_none()
                        {
                            return Err(GraphError::UnresolvedInput {
                                input: expr.name.clone(),
                                producer: referenced_by.to_string(),
                                reason: "not declared and absent from the inputs document".into(),
                            });
                        }
                        Ok(Source::RootInput { id })
                    }
                    Some(parent) => {
                        if let Some(outer) = node.import_bindings.get(&expr.name) {
                            let inner = SourceExpr::parse(outer)?;
                            return self.resolve_parsed(arena, parent, inner, referenced_by);
                        }
                        if node.declared_inputs.contains(&expr.name) {
                            let id = CanonicalId::scoped_input(node.ns.join("."), &expr.name)
                                .to_string();
                            return Ok(Source::RootInput { id });
                        }
                        Err(GraphError::UnresolvedInput {
                            input: expr.name.clone(),
                            producer: referenced_by.to_string(),
                            reason: format!(
                                "nested blueprint '{}' neither binds nor declares it",
                                node.ns.join(".")
                            ),
                        })
                    }
                }
            }
            SourceScope::Producer(alias) => {
                if node.model_ids.contains(alias) {
                    let mut path = node.ns.clone();
                    path.push(alias.clone());
                    return Ok(Source::Artifact {
                        path,
                        output: expr.name.clone(),
                        element: expr.element,
                        group_by: expr.group_by.clone(),
                        order_by: expr.order_by.clone(),
                    });
                }
                if let Some(&child) = node.imports.get(alias) {
                    let export =
                        arena[child].exports.get(&expr.name).ok_or_else(|| {
                            GraphError::UnresolvedInput {
                                input: expr.to_string(),
                                producer: referenced_by.to_string(),
                                reason: format!("'{alias}' exports no artifact '{}'", expr.name),
                            }
                        })?;
                    let inner = SourceExpr::parse(export)?;
                    if inner.element.is_some() && expr.element.is_some() {
                        return Err(GraphError::UnresolvedInput {
                            input: expr.to_string(),
                            producer: referenced_by.to_string(),
                            reason: "element selectors on both the import and its export".into(),
                        });
                    }
                    let merged = SourceExpr {
                        scope: inner.scope,
                        name: inner.name,
                        element: expr.element.or(inner.element),
                        group_by: expr.group_by.or(inner.group_by),
                        order_by: expr.order_by.or(inner.order_by),
                    };
                    return self.resolve_parsed(arena, child, merged, referenced_by);
                }
                Err(GraphError::UnknownProducer {
                    name: alias.clone(),
                    referenced_by: referenced_by.to_string(),
                })
            }
        }
    }

    // -- dimensions ---------------------------------------------------------

    fn resolve_dims(
        &self,
        flat: &FlatProducer,
        bindings: &[(String, Vec<Source>)],
        loops: &[(String, Source)],
        dims_by_key: &BTreeMap<String, Dims>,
    ) -> Result<Dims, GraphError> {
        let producer = flat.key();
        let mut dims: Dims = Vec::new();

        for (dimension, source) in loops {
            let extent = self.loop_extent(&producer, dimension, source, dims_by_key)?;
            unify(&mut dims, dimension, extent, &producer)?;
        }

        // Element-wise consumed parents contribute their dimensions; fan-in
        // and indexed references collapse instead.
        let mut inherited: Dims = Vec::new();
        for (_, sources) in bindings {
            for source in sources {
                let Source::Artifact {
                    path,
                    element: None,
                    group_by: None,
                    ..
                } = source
                else {
                    continue;
                };
                for (dim, extent) in &dims_by_key[&path.join(".")] {
                    unify(&mut inherited, dim, *extent, &producer)?;
                }
            }
        }
        inherited.sort_by(|a, b| a.0.cmp(&b.0));
        for (dim, extent) in inherited {
            unify(&mut dims, &dim, extent, &producer)?;
        }

        Ok(dims)
    }

    fn loop_extent(
        &self,
        producer: &str,
        dimension: &str,
        source: &Source,
        dims_by_key: &BTreeMap<String, Dims>,
    ) -> Result<usize, GraphError> {
        match source {
            Source::RootInput { id } => match self.inputs.get(id) {
                Some(serde_json::Value::Array(items)) => Ok(items.len()),
                Some(serde_json::Value::Number(n)) => {
                    n.as_u64()
                        .map(|v| v as usize)
                        .ok_or_else(|| GraphError::UnresolvedInput {
                            input: id.clone(),
                            producer: producer.to_string(),
                            reason: "count input must be a non-negative integer".into(),
                        })
                }
                Some(_) => Err(GraphError::UnresolvedInput {
                    input: id.clone(),
                    producer: producer.to_string(),
                    reason: "loop driver must be a collection or an integer count".into(),
                }),
                None => Err(GraphError::UnresolvedInput {
                    input: id.clone(),
                    producer: producer.to_string(),
                    reason: "loop driver has no value".into(),
                }),
            },
            Source::Artifact { path, .. } => {
                let updims = &dims_by_key[&path.join(".")];
                updims
                    .iter()
                    .find(|(d, _)| d == dimension)
                    .map(|(_, e)| *e)
                    .ok_or_else(|| GraphError::UnresolvedInput {
                        input: format!("{}.{dimension}", path.join(".")),
                        producer: producer.to_string(),
                        reason: format!(
                            "upstream carries no dimension '{dimension}'; \
                             extents from artifact content are not statically known"
                        ),
                    })
            }
        }
    }

    // -- expansion ----------------------------------------------------------

    fn expand_jobs(
        &self,
        flat: &FlatProducer,
        bindings: &[(String, Vec<Source>)],
        dims_by_key: &BTreeMap<String, Dims>,
        nodes: &mut Vec<JobDescriptor>,
    ) -> Result<(), GraphError> {
        let key = flat.key();
        let dims = &dims_by_key[&key];

        // Provider and model come from the synthetic config selectors when
        // present, so inputs-document overrides take effect.
        let provider = self
            .config_string(&key, "provider")
            .unwrap_or_else(|| flat.decl.provider.clone());
        let provider_model = self
            .config_string(&key, "model")
            .unwrap_or_else(|| flat.decl.model.clone());
        let rate_key = flat
            .decl
            .rate_key
            .clone()
            .unwrap_or_else(|| provider.clone());

        for combo in index_combos(dims) {
            let ordinals: Vec<usize> = dims.iter().map(|(d, _)| combo[d.as_str()]).collect();
            let job_id = CanonicalId::producer(flat.path.clone(), &ordinals).to_string();

            let mut input_bindings: BTreeMap<String, InputBinding> = BTreeMap::new();
            for (binding_key, sources) in bindings {
                self.bind_input(
                    &key,
                    binding_key,
                    sources,
                    &combo,
                    dims_by_key,
                    &mut input_bindings,
                )?;
            }

            // Auto-attach producer-scoped config inputs (model, provider,
            // volume, …) under their field names.
            let config_prefix = format!("Input:{key}.");
            for (id, _) in self.inputs.iter() {
                if let Some(field) = id.strip_prefix(&config_prefix) {
                    if !field.contains('.') {
                        input_bindings
                            .entry(field.to_string())
                            .or_insert_with(|| InputBinding::Source { id: id.to_string() });
                    }
                }
            }

            let mut inputs: BTreeSet<String> = BTreeSet::new();
            for binding in input_bindings.values() {
                for id in binding.source_ids() {
                    inputs.insert(id.to_string());
                }
            }

            let produces: Vec<String> = flat
                .decl
                .outputs
                .iter()
                .map(|output| {
                    let mut segments = flat.path.clone();
                    segments.push(output.clone());
                    let selectors = dims
                        .iter()
                        .map(|(d, _)| IndexSelector::Named {
                            dim: d.clone(),
                            index: combo[d.as_str()],
                        })
                        .collect();
                    CanonicalId::artifact(segments, selectors).to_string()
                })
                .collect();

            let input_conditions: BTreeMap<String, InputCondition> = flat
                .decl
                .conditions
                .iter()
                .map(|(gated, decl)| {
                    (
                        gated.clone(),
                        InputCondition {
                            input: decl.input.clone(),
                            op: match decl.op {
                                ConditionOpDecl::Eq => ConditionOp::Eq,
                                ConditionOpDecl::Ne => ConditionOp::Ne,
                            },
                            value: decl.value.clone(),
                            required: decl.required,
                        },
                    )
                })
                .collect();

            nodes.push(JobDescriptor {
                job_id,
                producer: flat.path.last().cloned().unwrap_or_default(),
                inputs: inputs.into_iter().collect(),
                produces,
                provider: provider.clone(),
                provider_model: provider_model.clone(),
                rate_key: rate_key.clone(),
                context: JobContext {
                    namespace_path: flat.path.clone(),
                    indices: combo.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
                    producer_alias: flat.path.last().cloned().unwrap_or_default(),
                    input_bindings,
                    input_conditions,
                    sdk_mapping: flat.decl.sdk_mapping.clone(),
                    schema: JobSchemas {
                        input: flat.decl.input_schema.clone(),
                        output: flat.decl.output_schema.clone(),
                    },
                },
            });
        }
        Ok(())
    }

    fn config_string(&self, key: &str, field: &str) -> Option<String> {
        self.inputs
            .get(&format!("Input:{key}.{field}"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_input(
        &self,
        producer: &str,
        binding_key: &str,
        sources: &[Source],
        combo: &BTreeMap<&str, usize>,
        dims_by_key: &BTreeMap<String, Dims>,
        out: &mut BTreeMap<String, InputBinding>,
    ) -> Result<(), GraphError> {
        let fan_in_count = sources
            .iter()
            .filter(|s| {
                matches!(
                    s,
                    Source::Artifact {
                        element: Some(ElementSel::All),
                        ..
                    }
                )
            })
            .count();

        if fan_in_count > 0 && fan_in_count != sources.len() {
            return Err(GraphError::UnresolvedInput {
                input: binding_key.to_string(),
                producer: producer.to_string(),
                reason: "cannot merge fan-in and single-element sources".into(),
            });
        }

        if fan_in_count > 0 {
            let mut merged: Option<FanInEnvelope> = None;
            for source in sources {
                let envelope = self.fan_in_envelope(producer, binding_key, source, dims_by_key)?;
                merged = Some(match merged {
                    None => envelope,
                    Some(existing) => {
                        merge_envelopes(existing, envelope, producer, binding_key)?
                    }
                });
            }
            if let Some(envelope) = merged {
                out.insert(binding_key.to_string(), InputBinding::FanIn(envelope));
            }
            return Ok(());
        }

        if sources.len() == 1 {
            let id = self.single_source_id(producer, binding_key, &sources[0], combo, dims_by_key)?;
            out.insert(binding_key.to_string(), InputBinding::Source { id });
            return Ok(());
        }

        // Several single sources merge into element-keyed entries.
        let (base, explicit) = parse_binding_key(binding_key)?;
        if explicit.is_some() {
            return Err(GraphError::UnresolvedInput {
                input: binding_key.to_string(),
                producer: producer.to_string(),
                reason: "an element-keyed binding takes a single source".into(),
            });
        }
        for (i, source) in sources.iter().enumerate() {
            let id = self.single_source_id(producer, binding_key, source, combo, dims_by_key)?;
            out.insert(format!("{base}[{i}]"), InputBinding::Source { id });
        }
        Ok(())
    }

    fn single_source_id(
        &self,
        producer: &str,
        binding_key: &str,
        source: &Source,
        combo: &BTreeMap<&str, usize>,
        dims_by_key: &BTreeMap<String, Dims>,
    ) -> Result<String, GraphError> {
        match source {
            Source::RootInput { id } => Ok(id.clone()),
            Source::Artifact {
                path,
                output,
                element,
                ..
            } => {
                let updims = &dims_by_key[&path.join(".")];
                let mut segments = path.clone();
                segments.push(output.clone());
                let selectors = match element {
                    None => updims
                        .iter()
                        .map(|(d, _)| IndexSelector::Named {
                            dim: d.clone(),
                            index: combo[d.as_str()],
                        })
                        .collect(),
                    Some(ElementSel::Index(n)) => {
                        let (dim, extent) = match updims.as_slice() {
                            [one] => one,
                            _ => {
                                return Err(GraphError::UnresolvableElementIndex {
                                    expr: binding_key.to_string(),
                                    index: *n,
                                    extent: updims.len(),
                                    producer: producer.to_string(),
                                });
                            }
                        };
                        if n >= extent {
                            return Err(GraphError::UnresolvableElementIndex {
                                expr: binding_key.to_string(),
                                index: *n,
                                extent: *extent,
                                producer: producer.to_string(),
                            });
                        }
                        vec![IndexSelector::Named {
                            dim: dim.clone(),
                            index: *n,
                        }]
                    }
                    Some(ElementSel::All) => unreachable!("fan-in handled by caller"),
                };
                Ok(CanonicalId::artifact(segments, selectors).to_string())
            }
        }
    }

    fn fan_in_envelope(
        &self,
        producer: &str,
        binding_key: &str,
        source: &Source,
        dims_by_key: &BTreeMap<String, Dims>,
    ) -> Result<FanInEnvelope, GraphError> {
        let Source::Artifact {
            path,
            output,
            group_by,
            order_by,
            ..
        } = source
        else {
            return Err(GraphError::UnresolvedInput {
                input: binding_key.to_string(),
                producer: producer.to_string(),
                reason: "fan-in requires an upstream artifact".into(),
            });
        };
        let upkey = path.join(".");
        let updims = &dims_by_key[&upkey];
        if updims.is_empty() {
            return Err(GraphError::UnresolvedInput {
                input: binding_key.to_string(),
                producer: producer.to_string(),
                reason: format!("'{upkey}' has no dimensions to fan in over"),
            });
        }

        let group_dim = match group_by {
            Some(d) => d.clone(),
            None => updims[0].0.clone(),
        };
        let group_extent = updims
            .iter()
            .find(|(d, _)| *d == group_dim)
            .map(|(_, e)| *e)
            .ok_or_else(|| GraphError::UnresolvedInput {
                input: binding_key.to_string(),
                producer: producer.to_string(),
                reason: format!("'{upkey}' has no dimension '{group_dim}' to group by"),
            })?;

        // Member ordering within a group: the order-by dimension is the
        // primary key, remaining dimensions keep declaration order.
        let mut rest: Vec<(String, usize)> = updims
            .iter()
            .filter(|(d, _)| *d != group_dim)
            .cloned()
            .collect();
        if let Some(field) = order_by {
            let pos = rest.iter().position(|(d, _)| d == field).ok_or_else(|| {
                GraphError::UnresolvedInput {
                    input: binding_key.to_string(),
                    producer: producer.to_string(),
                    reason: format!("'{upkey}' has no dimension '{field}' to order by"),
                }
            })?;
            let field_dim = rest.remove(pos);
            rest.insert(0, field_dim);
        }

        let mut groups = Vec::with_capacity(group_extent);
        for g in 0..group_extent {
            let mut members = Vec::new();
            for rest_combo in index_combos(&rest) {
                let mut segments = path.clone();
                segments.push(output.clone());
                let selectors = updims
                    .iter()
                    .map(|(d, _)| IndexSelector::Named {
                        dim: d.clone(),
                        index: if *d == group_dim {
                            g
                        } else {
                            rest_combo[d.as_str()]
                        },
                    })
                    .collect();
                members.push(CanonicalId::artifact(segments, selectors).to_string());
            }
            groups.push(members);
        }

        Ok(FanInEnvelope {
            group_by: group_dim,
            order_by: order_by.clone(),
            groups,
        })
    }
}

fn merge_envelopes(
    left: FanInEnvelope,
    right: FanInEnvelope,
    producer: &str,
    binding_key: &str,
) -> Result<FanInEnvelope, GraphError> {
    if left.group_by != right.group_by {
        return Err(GraphError::ConflictingDimensions {
            dimension: binding_key.to_string(),
            left: left.group_by,
            right: right.group_by,
            producer: producer.to_string(),
        });
    }
    if left.order_by != right.order_by {
        return Err(GraphError::ConflictingDimensions {
            dimension: format!("{binding_key} order by"),
            left: left.order_by.unwrap_or_else(|| "(none)".into()),
            right: right.order_by.unwrap_or_else(|| "(none)".into()),
            producer: producer.to_string(),
        });
    }
    if left.groups.len() != right.groups.len() {
        return Err(GraphError::ConflictingDimensions {
            dimension: left.group_by,
            left: left.groups.len().to_string(),
            right: right.groups.len().to_string(),
            producer: producer.to_string(),
        });
    }
    let groups = left
        .groups
        .into_iter()
        .zip(right.groups)
        .map(|(mut l, r)| {
            l.extend(r);
            l
        })
        .collect();
    Ok(FanInEnvelope {
        group_by: left.group_by,
        order_by: left.order_by,
        groups,
    })
}

// -- helpers ----------------------------------------------------------------

fn collect(
    bp: &Blueprint,
    parent: Option<usize>,
    ns: Vec<String>,
    import_bindings: BTreeMap<String, String>,
    arena: &mut Vec<NsNode>,
    flats: &mut Vec<FlatProducer>,
) -> usize {
    let idx = arena.len();
    arena.push(NsNode {
        parent,
        ns: ns.clone(),
        model_ids: bp.models.iter().map(|m| m.id.clone()).collect(),
        imports: BTreeMap::new(),
        import_bindings,
        exports: bp
            .artifacts
            .iter()
            .map(|a| (a.name.clone(), a.source.clone()))
            .collect(),
        declared_inputs: bp.inputs.iter().map(|i| i.name.clone()).collect(),
    });

    for decl in &bp.models {
        let mut path = ns.clone();
        path.push(decl.id.clone());
        flats.push(FlatProducer {
            ns_idx: idx,
            path,
            decl: decl.clone(),
        });
    }

    for import in &bp.producers {
        let alias = import.effective_alias().to_string();
        let mut child_ns = ns.clone();
        child_ns.push(alias.clone());
        let child = collect(
            &import.blueprint,
            Some(idx),
            child_ns,
            import.inputs.clone(),
            arena,
            flats,
        );
        arena[idx].imports.insert(alias, child);
    }

    idx
}

/// Producer-level topological order via the job-graph layering service.
fn producer_order(
    flats: &[FlatProducer],
    bindings: &BTreeMap<String, Vec<(String, Vec<Source>)>>,
    loops: &BTreeMap<String, Vec<(String, Source)>>,
) -> Result<Vec<String>, GraphError> {
    let nodes: Vec<String> = flats.iter().map(FlatProducer::key).collect();
    let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
    for flat in flats {
        let key = flat.key();
        let mut deps: Vec<&Source> = Vec::new();
        for (_, sources) in &bindings[&key] {
            deps.extend(sources.iter());
        }
        for (_, source) in &loops[&key] {
            deps.push(source);
        }
        for source in deps {
            if let Source::Artifact { path, .. } = source {
                edges.insert((path.join("."), key.clone()));
            }
        }
    }
    let edges: Vec<(String, String)> = edges.into_iter().collect();
    let topo = rf_topo::compute_topology_layers(&nodes, &edges).map_err(|e| match e {
        rf_topo::TopologyError::CycleDetected { from, to } => GraphError::CycleDetected {
            from: format!("Producer:{from}"),
            to: format!("Producer:{to}"),
        },
        rf_topo::TopologyError::UnknownNode { node } => GraphError::UnknownProducer {
            name: node,
            referenced_by: "(edge derivation)".into(),
        },
    })?;

    let mut order: Vec<String> = nodes;
    order.sort_by_key(|k| (topo.layer_of(k).unwrap_or(0), k.clone()));
    order.dedup();
    Ok(order)
}

fn unify(dims: &mut Dims, dimension: &str, extent: usize, producer: &str) -> Result<(), GraphError> {
    match dims.iter().find(|(d, _)| d == dimension) {
        Some((_, existing)) if *existing != extent => Err(GraphError::ConflictingDimensions {
            dimension: dimension.to_string(),
            left: existing.to_string(),
            right: extent.to_string(),
            producer: producer.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            dims.push((dimension.to_string(), extent));
            Ok(())
        }
    }
}

/// Cartesian product of dimension indices, last dimension varying fastest.
fn index_combos<'d>(dims: &'d [(String, usize)]) -> Vec<BTreeMap<&'d str, usize>> {
    let mut combos: Vec<BTreeMap<&str, usize>> = vec![BTreeMap::new()];
    for (dim, extent) in dims {
        let mut next = Vec::with_capacity(combos.len() * extent.max(&1));
        for combo in &combos {
            for i in 0..*extent {
                let mut c = combo.clone();
                c.insert(dim.as_str(), i);
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}
