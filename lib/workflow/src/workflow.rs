//! Workflow definition and linking.
//!
//! A workflow is descriptive info, options, a variable map, an ordered node
//! list, and an edge list. Before execution it goes through `link`, which:
//!
//! 1. rejects unknown node kinds, bad edge indices, undeclared slots, invalid
//!    merge strategies, and unsupported script languages;
//! 2. flattens multi-slot sub-name lists into `{sub: null}` placeholder maps;
//! 3. propagates compile-time constants: when a producer slot already holds a
//!    config value (not a runtime result), the value is copied into the
//!    consumer's slot field, partially evaluating the config graph.

use crate::edge::Edge;
use crate::error::LinkError;
use crate::node::{MERGE_STRATEGIES, NodeCatalog, NodeKind, NodeSpec, SCRIPT_LANGS};
use crate::slot::split_dotted;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Descriptive information about a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    /// Human-readable name; used as the registry key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What this workflow does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Definition version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Author attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl WorkflowInfo {
    /// Creates info with just a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Execution options carried by a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Seed merged into the execution variables under `"seed"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Opaque grouping tag.
    #[serde(default)]
    pub tag: i64,
}

/// A workflow definition. Immutable after linking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Descriptive info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<WorkflowInfo>,
    /// Execution options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<WorkflowOptions>,
    /// Global variables made available to every node.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, JsonValue>,
    /// The ordered node list; edges address nodes by index into it.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// The edge list.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Creates an empty workflow with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            info: Some(WorkflowInfo::named(name)),
            options: Some(WorkflowOptions::default()),
            ..Default::default()
        }
    }

    /// Returns the workflow name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.info.as_ref()?.name.as_deref()
    }

    /// Appends a node, returning its index.
    pub fn add_node(&mut self, node: NodeSpec) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    /// Appends an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Sets a global variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: JsonValue) {
        self.variables.insert(name.into(), value);
    }

    /// Links the workflow against a kind catalog.
    ///
    /// # Errors
    ///
    /// Returns the first [`LinkError`] encountered; a workflow that fails to
    /// link must not be executed.
    pub fn link(&mut self, catalog: &NodeCatalog) -> Result<(), LinkError> {
        self.check_kinds(catalog)?;
        self.flatten_multi_slots(catalog);
        self.check_node_configs()?;
        self.link_edges(catalog)?;
        Ok(())
    }

    fn check_kinds(&self, catalog: &NodeCatalog) -> Result<(), LinkError> {
        for (index, node) in self.nodes.iter().enumerate() {
            if !catalog.contains(&node.kind_tag) {
                return Err(LinkError::UnknownKind {
                    index,
                    tag: node.kind_tag.clone(),
                });
            }
        }
        Ok(())
    }

    /// Converts multi-slot fields declared as `["a", "b"]` into the
    /// `{"a": null, "b": null}` placeholder form.
    fn flatten_multi_slots(&mut self, catalog: &NodeCatalog) {
        for node in &mut self.nodes {
            let Some(slots) = catalog.slots(&node.kind_tag) else {
                continue;
            };
            for decl in slots.iter().filter(|decl| decl.role.is_multi()) {
                let Some(JsonValue::Array(items)) = node.fields.get(&decl.name) else {
                    continue;
                };
                if !items.iter().all(JsonValue::is_string) {
                    continue;
                }
                let mut map = Map::new();
                for item in items {
                    if let Some(sub) = item.as_str() {
                        map.insert(sub.to_string(), JsonValue::Null);
                    }
                }
                node.fields.insert(decl.name.clone(), JsonValue::Object(map));
            }
        }
    }

    fn check_node_configs(&self) -> Result<(), LinkError> {
        for (index, node) in self.nodes.iter().enumerate() {
            match node.kind() {
                Some(NodeKind::Merge) => {
                    if let Some(strategy) = node.fields.get("strategy").and_then(JsonValue::as_str)
                        && !MERGE_STRATEGIES.contains(&strategy)
                    {
                        return Err(LinkError::InvalidMergeStrategy {
                            node: index,
                            strategy: strategy.to_string(),
                        });
                    }
                }
                Some(NodeKind::Transform | NodeKind::Switch | NodeKind::Split) => {
                    if let Some(lang) = node.fields.get("lang").and_then(JsonValue::as_str)
                        && !SCRIPT_LANGS.contains(&lang)
                    {
                        return Err(LinkError::UnsupportedScriptLang {
                            node: index,
                            lang: lang.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn link_edges(&mut self, catalog: &NodeCatalog) -> Result<(), LinkError> {
        let node_count = self.nodes.len() as u32;
        let mut propagations: Vec<(usize, String, JsonValue)> = Vec::new();

        for (edge_index, edge) in self.edges.iter().enumerate() {
            for index in [edge.source, edge.target] {
                if index >= node_count {
                    return Err(LinkError::EdgeEndpointOutOfRange {
                        edge: edge_index,
                        index,
                    });
                }
            }

            let source = &self.nodes[edge.source as usize];
            let target = &self.nodes[edge.target as usize];

            let (source_base, _) = split_dotted(&edge.source_slot);
            let source_ok = catalog
                .slots(&source.kind_tag)
                .unwrap_or_default()
                .iter()
                .any(|decl| decl.name == source_base && decl.role.produces_output());
            if !source_ok {
                return Err(LinkError::UnknownSourceSlot {
                    edge: edge_index,
                    node: edge.source as usize,
                    slot: edge.source_slot.clone(),
                });
            }

            let (target_base, _) = split_dotted(&edge.target_slot);
            let target_ok = catalog
                .slots(&target.kind_tag)
                .unwrap_or_default()
                .iter()
                .any(|decl| decl.name == target_base && decl.role.accepts_input());
            if !target_ok {
                return Err(LinkError::UnknownTargetSlot {
                    edge: edge_index,
                    node: edge.target as usize,
                    slot: edge.target_slot.clone(),
                });
            }

            if let Some(value) = constant_value(source, &edge.source_slot) {
                propagations.push((edge.target as usize, edge.target_slot.clone(), value));
            }
        }

        for (target, slot, value) in propagations {
            self.nodes[target].set_slot_value(&slot, value);
        }
        Ok(())
    }
}

/// Returns the config value a slot holds before execution, if any.
///
/// Config-passthrough nodes expose their whole field map on `get`; for other
/// nodes a non-null field is a configured constant, an absent or null field a
/// runtime result.
fn constant_value(node: &NodeSpec, slot: &str) -> Option<JsonValue> {
    if let Some(kind) = node.kind()
        && kind.is_config()
        && slot == "get"
    {
        return Some(JsonValue::Object(node.fields.clone()));
    }
    node.slot_value(slot)
        .filter(|value| !value.is_null())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

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
        workflow
    }

    #[test]
    fn linking_a_valid_workflow_succeeds() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = linear_workflow();
        assert!(workflow.link(&catalog).is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("bad");
        workflow.add_node(NodeSpec::with_tag("mystery_node"));

        let err = workflow.link(&catalog).unwrap_err();
        assert_eq!(
            err,
            LinkError::UnknownKind {
                index: 0,
                tag: "mystery_node".to_string()
            }
        );
    }

    #[test]
    fn edge_index_out_of_range_is_rejected() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("bad");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_edge(Edge::new(0, "start", 7, "end"));

        let err = workflow.link(&catalog).unwrap_err();
        assert_eq!(err, LinkError::EdgeEndpointOutOfRange { edge: 0, index: 7 });
    }

    #[test]
    fn undeclared_slots_are_rejected() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("bad");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::new(NodeKind::End));
        workflow.add_edge(Edge::new(0, "bogus", 1, "end"));

        match workflow.link(&catalog).unwrap_err() {
            LinkError::UnknownSourceSlot { slot, .. } => assert_eq!(slot, "bogus"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_merge_strategy_is_rejected() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("bad");
        workflow
            .add_node(NodeSpec::new(NodeKind::Merge).field("strategy", serde_json::json!("vote")));

        match workflow.link(&catalog).unwrap_err() {
            LinkError::InvalidMergeStrategy { strategy, .. } => assert_eq!(strategy, "vote"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unsupported_script_lang_is_rejected() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("bad");
        workflow.add_node(
            NodeSpec::new(NodeKind::Transform).field("lang", serde_json::json!("python")),
        );

        match workflow.link(&catalog).unwrap_err() {
            LinkError::UnsupportedScriptLang { lang, .. } => assert_eq!(lang, "python"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn multi_slot_lists_flatten_to_placeholder_maps() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("fanin");
        workflow.add_node(
            NodeSpec::new(NodeKind::Merge).field("sources", serde_json::json!(["a", "b"])),
        );

        workflow.link(&catalog).expect("link");
        assert_eq!(
            workflow.nodes[0].fields.get("sources"),
            Some(&serde_json::json!({"a": null, "b": null}))
        );
    }

    #[test]
    fn config_values_propagate_along_edges() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = Workflow::named("wired");
        workflow.add_node(
            NodeSpec::new(NodeKind::ToolConfig)
                .field("name", serde_json::json!("search"))
                .field("ref", serde_json::json!("web.search")),
        );
        workflow.add_node(NodeSpec::new(NodeKind::Tool));
        workflow.add_edge(Edge::new(0, "get", 1, "config"));

        workflow.link(&catalog).expect("link");
        let config = workflow.nodes[1].fields.get("config").expect("propagated");
        assert_eq!(config["name"], "search");
        assert_eq!(config["ref"], "web.search");
    }

    #[test]
    fn runtime_slots_do_not_propagate() {
        let catalog = NodeCatalog::builtin();
        let mut workflow = linear_workflow();
        workflow.link(&catalog).expect("link");

        // start's output is produced at runtime, so the transform's source
        // field must stay unset.
        assert!(workflow.nodes[1].fields.get("source").is_none());
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let mut workflow = linear_workflow();
        workflow.set_variable("x", serde_json::json!(3));

        let json = serde_json::to_string(&workflow).expect("serialize");
        let parsed: Workflow = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(workflow, parsed);
    }

    #[test]
    fn extension_kind_links_through_catalog() {
        use crate::node::KindDecl;
        use crate::slot::{SlotDecl, SlotRole};

        let mut catalog = NodeCatalog::builtin();
        catalog.register(
            "barrier_node",
            KindDecl {
                executable: true,
                slots: vec![
                    SlotDecl::new("input", SlotRole::Input),
                    SlotDecl::new("output", SlotRole::Output),
                ],
            },
        );

        let mut workflow = Workflow::named("extended");
        workflow.add_node(NodeSpec::new(NodeKind::Start));
        workflow.add_node(NodeSpec::with_tag("barrier_node"));
        workflow.add_edge(Edge::new(0, "start", 1, "input"));

        assert!(workflow.link(&catalog).is_ok());
    }
}
