//! Per-execution context construction and the edge-walk.
//!
//! The context is built once at `start` from a linked workflow: the node list
//! is filtered to executable kinds (editor-only kinds are skipped while node
//! ids stay stable through a translation table), dependency and fanout maps
//! are derived from the surviving edges, and every node is instantiated
//! through the kind registry with its backend handle injected.
//!
//! All frontier mutation happens on the scheduler task that owns the context.

use crate::engine::DEFAULT_USER_INPUT_TIMEOUT_SECS;
use crate::error::EngineError;
use crate::node_exec::{CtorDeps, ExecutableNode, NodeRegistry};
use crate::script::ScriptEngine;
use cascade_workflow::{Backend, Edge, NodeCatalog, NodeKind, NodeResource, Workflow, split_dotted};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// An instantiated executable node with its scheduling metadata.
pub struct ExecNode {
    /// Index in the original workflow node list.
    pub original_index: usize,
    /// Effective id (declared id or original index as a string).
    pub id: String,
    /// The kind tag.
    pub kind_tag: String,
    /// True for user-input nodes, which the scheduler drives directly.
    pub is_user_input: bool,
    /// Prompt payload for user-input nodes.
    pub query: JsonValue,
    /// User-input wait bound, in seconds.
    pub timeout_secs: u64,
    /// The executable instance.
    pub instance: Arc<dyn ExecutableNode>,
}

/// Per-execution state: dependency maps, frontier sets, and outputs.
pub struct ExecutionContext {
    /// The workflow name this execution runs.
    pub workflow_id: String,
    /// Executable nodes, indexed by executable index.
    pub nodes: Vec<ExecNode>,
    /// `deps[n]` = upstream executable indices of `n`.
    pub deps: Vec<BTreeSet<usize>>,
    /// `fanout[n]` = downstream executable indices of `n`.
    pub fanout: Vec<BTreeSet<usize>>,
    /// Edges restricted to the executable subgraph, endpoints remapped.
    pub edges: Vec<Edge>,
    /// Global variables (workflow variables + seed, overridden by initial
    /// data).
    pub variables: Map<String, JsonValue>,
    /// Nodes waiting on dependencies.
    pub pending: BTreeSet<usize>,
    /// Nodes eligible to run.
    pub ready: BTreeSet<usize>,
    /// Nodes currently running.
    pub running: BTreeSet<usize>,
    /// Nodes that completed successfully.
    pub completed: BTreeSet<usize>,
    /// Nodes that failed; disjoint from every other set.
    pub failed: BTreeSet<usize>,
    /// Written at most once per node, on successful completion.
    pub outputs: HashMap<usize, Map<String, JsonValue>>,
}

impl ExecutionContext {
    /// Builds the context for one execution.
    ///
    /// Initial data overrides workflow variables on key collisions; the
    /// workflow seed is merged under `"seed"` when that key is otherwise
    /// unset.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkflow`] when an executable kind has
    /// no registered constructor.
    pub fn build(
        workflow: &Workflow,
        initial_data: Map<String, JsonValue>,
        catalog: &NodeCatalog,
        registry: &NodeRegistry,
        script: Arc<dyn ScriptEngine>,
        backend: Arc<dyn Backend>,
        handles: &[NodeResource],
    ) -> Result<Self, EngineError> {
        // Executable subset, with a translation table keeping ids stable.
        let mut translation: HashMap<usize, usize> = HashMap::new();
        let mut nodes = Vec::new();
        for (original_index, spec) in workflow.nodes.iter().enumerate() {
            if !catalog.is_executable(&spec.kind_tag) {
                continue;
            }
            let deps = CtorDeps {
                script: script.clone(),
                backend: backend.clone(),
                resource: handles
                    .get(original_index)
                    .copied()
                    .unwrap_or(NodeResource::None),
            };
            let instance =
                registry
                    .instantiate(spec, &deps)
                    .ok_or_else(|| EngineError::InvalidWorkflow {
                        reason: format!(
                            "no constructor registered for kind '{}'",
                            spec.kind_tag
                        ),
                    })?;

            translation.insert(original_index, nodes.len());
            nodes.push(ExecNode {
                original_index,
                id: spec.effective_id(original_index),
                kind_tag: spec.kind_tag.clone(),
                is_user_input: spec.kind_tag == NodeKind::UserInput.tag(),
                query: spec
                    .fields
                    .get("query")
                    .cloned()
                    .unwrap_or(JsonValue::Null),
                timeout_secs: spec
                    .fields
                    .get("timeout")
                    .and_then(JsonValue::as_u64)
                    .unwrap_or(DEFAULT_USER_INPUT_TIMEOUT_SECS),
                instance,
            });
        }

        // Edges restricted to the executable subgraph.
        let mut edges = Vec::new();
        for edge in &workflow.edges {
            let (Some(&source), Some(&target)) = (
                translation.get(&(edge.source as usize)),
                translation.get(&(edge.target as usize)),
            ) else {
                continue;
            };
            let mut remapped = edge.clone();
            remapped.source = source as u32;
            remapped.target = target as u32;
            edges.push(remapped);
        }

        let mut deps = vec![BTreeSet::new(); nodes.len()];
        let mut fanout = vec![BTreeSet::new(); nodes.len()];
        for edge in &edges {
            deps[edge.target as usize].insert(edge.source as usize);
            fanout[edge.source as usize].insert(edge.target as usize);
        }

        let mut pending = BTreeSet::new();
        let mut ready = BTreeSet::new();
        for index in 0..nodes.len() {
            if deps[index].is_empty() {
                ready.insert(index);
            } else {
                pending.insert(index);
            }
        }

        let mut variables = workflow.variables.clone();
        if let Some(options) = &workflow.options
            && let Some(seed) = options.seed
            && !variables.contains_key("seed")
        {
            variables.insert("seed".to_string(), JsonValue::from(seed));
        }
        for (key, value) in initial_data {
            variables.insert(key, value);
        }

        Ok(Self {
            workflow_id: workflow.name().unwrap_or("workflow").to_string(),
            nodes,
            deps,
            fanout,
            edges,
            variables,
            pending,
            ready,
            running: BTreeSet::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            outputs: HashMap::new(),
        })
    }

    /// Assembles a node's inputs by walking its incoming edges.
    ///
    /// For dotted source slots the full key wins over the base map; an edge
    /// whose filter predicate evaluates to false is dropped, and a filter
    /// that fails to evaluate passes the value through.
    #[must_use]
    pub fn gather_inputs(
        &self,
        index: usize,
        script: &dyn ScriptEngine,
    ) -> BTreeMap<String, JsonValue> {
        let mut inputs = BTreeMap::new();

        for edge in &self.edges {
            if edge.target as usize != index {
                continue;
            }
            let Some(source_outputs) = self.outputs.get(&(edge.source as usize)) else {
                continue;
            };

            let value = lookup_slot(source_outputs, &edge.source_slot);

            if let Some(filter) = &edge.filter {
                match script.eval_predicate(filter, &value) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::warn!(
                            filter,
                            error = %e,
                            "edge filter failed to evaluate; passing value through"
                        );
                    }
                }
            }

            inputs.insert(edge.target_slot.clone(), value);
        }

        inputs
    }

    /// After `completed_index` completes, moves every dependent whose
    /// dependencies are all completed from `pending` to `ready`.
    pub fn promote_dependents(&mut self, completed_index: usize) {
        let dependents: Vec<usize> = self.fanout[completed_index].iter().copied().collect();
        for dependent in dependents {
            if self.pending.contains(&dependent) && self.deps[dependent].is_subset(&self.completed)
            {
                self.pending.remove(&dependent);
                self.ready.insert(dependent);
            }
        }
    }

    /// Returns all node outputs keyed by effective node id.
    #[must_use]
    pub fn outputs_by_node_id(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for (index, outputs) in &self.outputs {
            map.insert(
                self.nodes[*index].id.clone(),
                JsonValue::Object(outputs.clone()),
            );
        }
        map
    }
}

/// Reads a slot from an output map: exact key first, then one dotted level
/// into a nested map.
fn lookup_slot(outputs: &Map<String, JsonValue>, slot: &str) -> JsonValue {
    if let Some(value) = outputs.get(slot) {
        return value.clone();
    }
    let (base, sub) = split_dotted(slot);
    match (outputs.get(base), sub) {
        (Some(JsonValue::Object(map)), Some(sub)) => map.get(sub).cloned().unwrap_or(JsonValue::Null),
        (Some(value), None) => value.clone(),
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::LuaScriptEngine;
    use cascade_workflow::{EchoBackend, NodeSpec, node_resources};

    fn build(workflow: &Workflow, initial_data: Map<String, JsonValue>) -> ExecutionContext {
        let catalog = NodeCatalog::builtin();
        let registry = NodeRegistry::builtin();
        let handles = node_resources(workflow);
        ExecutionContext::build(
            workflow,
            initial_data,
            &catalog,
            &registry,
            Arc::new(LuaScriptEngine),
            Arc::new(EchoBackend),
            &handles,
        )
        .expect("context")
    }

    fn linear_workflow() -> Workflow {
        let mut workflow = Workflow::named("linear");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(
            NodeSpec::new(NodeKind::Transform)
                .field("script", serde_json::json!("return source.x * 2")),
        );
        workflow.add_node(NodeSpec::new(NodeKind::End));
        workflow.add_edge(Edge::new(0, "start", 1, "source"));
        workflow.add_edge(Edge::new(1, "target", 2, "end"));
        workflow.link(&NodeCatalog::builtin()).expect("link");
        workflow
    }

    #[test]
    fn frontier_seeds_from_dependencies() {
        let ctx = build(&linear_workflow(), Map::new());

        assert_eq!(ctx.ready, BTreeSet::from([0]));
        assert_eq!(ctx.pending, BTreeSet::from([1, 2]));
        assert_eq!(ctx.deps[1], BTreeSet::from([0]));
        assert_eq!(ctx.deps[2], BTreeSet::from([1]));
        assert_eq!(ctx.fanout[0], BTreeSet::from([1]));
    }

    #[test]
    fn interactive_nodes_are_filtered_with_stable_ids() {
        let mut workflow = Workflow::named("editor");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::new(NodeKind::AgentChat));
        workflow.add_node(NodeSpec::new(NodeKind::End));
        workflow.add_edge(Edge::new(0, "start", 2, "end"));
        workflow.link(&NodeCatalog::builtin()).expect("link");

        let ctx = build(&workflow, Map::new());
        assert_eq!(ctx.nodes.len(), 2);
        // The end node keeps its original index as id.
        assert_eq!(ctx.nodes[1].id, "2");
        assert_eq!(ctx.deps[1], BTreeSet::from([0]));
    }

    #[test]
    fn initial_data_overrides_workflow_variables() {
        let mut workflow = linear_workflow();
        workflow.set_variable("x", serde_json::json!(3));
        workflow.set_variable("kept", serde_json::json!("original"));

        let mut initial = Map::new();
        initial.insert("x".to_string(), serde_json::json!(11));
        let ctx = build(&workflow, initial);

        assert_eq!(ctx.variables["x"], 11);
        assert_eq!(ctx.variables["kept"], "original");
    }

    #[test]
    fn seed_merges_without_clobbering() {
        let mut workflow = linear_workflow();
        workflow.options = Some(cascade_workflow::WorkflowOptions {
            seed: Some(42),
            tag: 0,
        });
        let ctx = build(&workflow, Map::new());
        assert_eq!(ctx.variables["seed"], 42);

        workflow.set_variable("seed", serde_json::json!(7));
        let ctx = build(&workflow, Map::new());
        assert_eq!(ctx.variables["seed"], 7);
    }

    #[test]
    fn gather_inputs_walks_edges() {
        let mut ctx = build(&linear_workflow(), Map::new());
        let mut outputs = Map::new();
        outputs.insert("start".to_string(), serde_json::json!({"x": 3}));
        ctx.outputs.insert(0, outputs);

        let inputs = ctx.gather_inputs(1, &LuaScriptEngine);
        assert_eq!(inputs["source"], serde_json::json!({"x": 3}));
    }

    #[test]
    fn gather_inputs_skips_unfinished_producers() {
        let ctx = build(&linear_workflow(), Map::new());
        let inputs = ctx.gather_inputs(1, &LuaScriptEngine);
        assert!(inputs.is_empty());
    }

    #[test]
    fn dotted_slot_falls_back_to_nested_map() {
        let mut outputs = Map::new();
        outputs.insert("cases".to_string(), serde_json::json!({"ok": 5}));
        assert_eq!(lookup_slot(&outputs, "cases.ok"), serde_json::json!(5));

        // The exact dotted key wins when present.
        outputs.insert("cases.ok".to_string(), serde_json::json!(9));
        assert_eq!(lookup_slot(&outputs, "cases.ok"), serde_json::json!(9));

        // A missing slot on a finished producer yields null.
        assert_eq!(lookup_slot(&outputs, "cases.no"), JsonValue::Null);
    }

    #[test]
    fn edge_filters_drop_values() {
        let mut workflow = Workflow::named("filtered");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::new(NodeKind::End));
        workflow.add_edge(Edge::new(0, "start", 1, "end").with_filter("return data.x > 3"));
        workflow.link(&NodeCatalog::builtin()).expect("link");

        let mut ctx = build(&workflow, Map::new());
        let mut outputs = Map::new();
        outputs.insert("start".to_string(), serde_json::json!({"x": 1}));
        ctx.outputs.insert(0, outputs);

        let inputs = ctx.gather_inputs(1, &LuaScriptEngine);
        assert!(inputs.is_empty());

        ctx.outputs.get_mut(&0).expect("outputs")["start"] = serde_json::json!({"x": 5});
        let inputs = ctx.gather_inputs(1, &LuaScriptEngine);
        assert_eq!(inputs["end"], serde_json::json!({"x": 5}));
    }

    #[test]
    fn broken_filter_passes_value_through() {
        let mut workflow = Workflow::named("broken-filter");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::new(NodeKind::End));
        workflow.add_edge(Edge::new(0, "start", 1, "end").with_filter("return (("));
        workflow.link(&NodeCatalog::builtin()).expect("link");

        let mut ctx = build(&workflow, Map::new());
        ctx.outputs.insert(0, {
            let mut outputs = Map::new();
            outputs.insert("start".to_string(), serde_json::json!(1));
            outputs
        });

        let inputs = ctx.gather_inputs(1, &LuaScriptEngine);
        assert_eq!(inputs["end"], serde_json::json!(1));
    }

    #[test]
    fn promote_dependents_requires_all_deps() {
        let mut workflow = Workflow::named("join");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::new(NodeKind::PassThrough));
        workflow.add_node(NodeSpec::new(NodeKind::PassThrough));
        workflow.add_node(
            NodeSpec::new(NodeKind::Merge).field("sources", serde_json::json!(["a", "b"])),
        );
        workflow.add_edge(Edge::new(0, "start", 1, "input"));
        workflow.add_edge(Edge::new(0, "start", 2, "input"));
        workflow.add_edge(Edge::new(1, "output", 3, "sources.a"));
        workflow.add_edge(Edge::new(2, "output", 3, "sources.b"));
        workflow.link(&NodeCatalog::builtin()).expect("link");

        let mut ctx = build(&workflow, Map::new());
        ctx.ready.remove(&0);
        ctx.completed.insert(0);
        ctx.promote_dependents(0);
        assert_eq!(ctx.ready, BTreeSet::from([1, 2]));

        ctx.ready.remove(&1);
        ctx.completed.insert(1);
        ctx.promote_dependents(1);
        // The merge still waits on node 2.
        assert!(ctx.pending.contains(&3));

        ctx.ready.remove(&2);
        ctx.completed.insert(2);
        ctx.promote_dependents(2);
        assert!(ctx.ready.contains(&3));
    }

    #[test]
    fn user_input_metadata_is_captured() {
        let mut workflow = Workflow::named("interactive");
        workflow.add_node(
            NodeSpec::new(NodeKind::UserInput)
                .field("query", serde_json::json!("Pick a number"))
                .field("timeout", serde_json::json!(60)),
        );
        workflow.link(&NodeCatalog::builtin()).expect("link");

        let ctx = build(&workflow, Map::new());
        assert!(ctx.nodes[0].is_user_input);
        assert_eq!(ctx.nodes[0].query, serde_json::json!("Pick a number"));
        assert_eq!(ctx.nodes[0].timeout_secs, 60);
    }

    #[test]
    fn unregistered_executable_kind_is_invalid() {
        use cascade_workflow::{KindDecl, SlotDecl, SlotRole};

        let mut catalog = NodeCatalog::builtin();
        catalog.register(
            "custom_node",
            KindDecl {
                executable: true,
                slots: vec![SlotDecl::new("output", SlotRole::Output)],
            },
        );

        let mut workflow = Workflow::named("custom");
        workflow.add_node(NodeSpec::with_tag("custom_node"));
        workflow.link(&catalog).expect("link");

        let registry = NodeRegistry::builtin();
        let result = ExecutionContext::build(
            &workflow,
            Map::new(),
            &catalog,
            &registry,
            Arc::new(LuaScriptEngine),
            Arc::new(EchoBackend),
            &node_resources(&workflow),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidWorkflow { .. })
        ));
    }
}
