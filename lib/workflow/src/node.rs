//! Workflow node kinds and serialized node records.
//!
//! The core kind set is a closed tagged enum; each kind declares its slots.
//! A [`NodeCatalog`] wraps the builtin table and carries user-registered
//! extension kinds so the engine can be extended without touching the enum.
//!
//! Nodes serialize as a `type` tag, an optional stable string `id`, and a
//! flat map of configuration fields. Edges address nodes by their zero-based
//! index in the workflow node list; the effective id of an unnamed node is
//! its index rendered as a string.

use crate::slot::{SlotDecl, SlotRole, split_dotted};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// The builtin node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Entry node; emits the workflow variables on its `start` slot.
    Start,
    /// Terminal node; collects its `end` slot.
    End,
    /// Terminal node; discards its input.
    Sink,
    /// Identity node; `input` to `output`.
    PassThrough,
    /// Script node; evaluates a configured expression over `source`.
    Transform,
    /// Script router; fans `value` out to one of its `cases.*` or `default`.
    Switch,
    /// Record router; maps `source` sub-names onto `targets.*`.
    Split,
    /// Fan-in node; merges `sources.*` by strategy into `target`.
    Merge,
    /// Suspends until a value is supplied out-of-band.
    UserInput,
    /// Pass-through that surfaces its payload via events.
    UserOutput,
    /// Delegates to the injected `run_tool` handle.
    Tool,
    /// Delegates to the injected `run_agent` handle.
    Agent,
    /// Config passthrough: descriptive info.
    InfoConfig,
    /// Config passthrough: backend selection.
    BackendConfig,
    /// Config passthrough: model reference.
    ModelConfig,
    /// Config passthrough: embedding reference.
    EmbeddingConfig,
    /// Config passthrough: prompt definition.
    PromptConfig,
    /// Config passthrough: content database.
    ContentDbConfig,
    /// Config passthrough: index database.
    IndexDbConfig,
    /// Config passthrough: tool definition.
    ToolConfig,
    /// Config passthrough: agent definition.
    AgentConfig,
    /// Config passthrough: workflow options.
    WorkflowOptionsConfig,
    /// Interactive editor surface; never executed.
    ToolCall,
    /// Interactive editor surface; never executed.
    AgentChat,
}

/// Valid merge strategies; anything else is rejected at link time.
pub const MERGE_STRATEGIES: [&str; 4] = ["first", "last", "concat", "all"];

/// Script languages the engine evaluates.
pub const SCRIPT_LANGS: [&str; 1] = ["lua"];

impl NodeKind {
    /// All builtin kinds, in declaration order.
    #[must_use]
    pub fn all() -> &'static [NodeKind] {
        &[
            Self::Start,
            Self::End,
            Self::Sink,
            Self::PassThrough,
            Self::Transform,
            Self::Switch,
            Self::Split,
            Self::Merge,
            Self::UserInput,
            Self::UserOutput,
            Self::Tool,
            Self::Agent,
            Self::InfoConfig,
            Self::BackendConfig,
            Self::ModelConfig,
            Self::EmbeddingConfig,
            Self::PromptConfig,
            Self::ContentDbConfig,
            Self::IndexDbConfig,
            Self::ToolConfig,
            Self::AgentConfig,
            Self::WorkflowOptionsConfig,
            Self::ToolCall,
            Self::AgentChat,
        ]
    }

    /// Returns the wire tag for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Start => "start_node",
            Self::End => "end_node",
            Self::Sink => "sink_node",
            Self::PassThrough => "pass_through_node",
            Self::Transform => "transform_node",
            Self::Switch => "switch_node",
            Self::Split => "split_node",
            Self::Merge => "merge_node",
            Self::UserInput => "user_input_node",
            Self::UserOutput => "user_output_node",
            Self::Tool => "tool_node",
            Self::Agent => "agent_node",
            Self::InfoConfig => "info_config",
            Self::BackendConfig => "backend_config",
            Self::ModelConfig => "model_config",
            Self::EmbeddingConfig => "embedding_config",
            Self::PromptConfig => "prompt_config",
            Self::ContentDbConfig => "content_db_config",
            Self::IndexDbConfig => "index_db_config",
            Self::ToolConfig => "tool_config",
            Self::AgentConfig => "agent_config",
            Self::WorkflowOptionsConfig => "workflow_options_config",
            Self::ToolCall => "tool_call",
            Self::AgentChat => "agent_chat",
        }
    }

    /// Looks a kind up by its wire tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Returns true for the config-passthrough family.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InfoConfig
                | Self::BackendConfig
                | Self::ModelConfig
                | Self::EmbeddingConfig
                | Self::PromptConfig
                | Self::ContentDbConfig
                | Self::IndexDbConfig
                | Self::ToolConfig
                | Self::AgentConfig
                | Self::WorkflowOptionsConfig
        )
    }

    /// Returns true for editor-only kinds the engine never executes.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::ToolCall | Self::AgentChat)
    }

    /// Returns true if the engine schedules this kind.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        !self.is_interactive()
    }

    /// Returns the declared slots for this kind.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotDecl> {
        use SlotRole::{Input, MultiInput, MultiOutput, Output};

        match self {
            Self::Start => vec![SlotDecl::new("start", Output)],
            Self::End => vec![SlotDecl::new("end", Input)],
            Self::Sink => vec![SlotDecl::new("sink", Input)],
            Self::PassThrough => vec![
                SlotDecl::new("input", Input),
                SlotDecl::new("output", Output),
            ],
            Self::Transform => vec![
                SlotDecl::new("lang", Input),
                SlotDecl::new("script", Input),
                SlotDecl::new("source", Input),
                SlotDecl::new("target", Output),
            ],
            Self::Switch => vec![
                SlotDecl::new("lang", Input),
                SlotDecl::new("script", Input),
                SlotDecl::new("value", Input),
                SlotDecl::new("cases", MultiOutput),
                SlotDecl::new("default", Output),
            ],
            Self::Split => vec![
                SlotDecl::new("mapping", Input),
                SlotDecl::new("source", Input),
                SlotDecl::new("targets", MultiOutput),
            ],
            Self::Merge => vec![
                SlotDecl::new("strategy", Input),
                SlotDecl::new("sources", MultiInput),
                SlotDecl::new("target", Output),
            ],
            Self::UserInput => vec![
                SlotDecl::new("query", Input),
                SlotDecl::new("timeout", Input),
                SlotDecl::new("message", Output),
            ],
            Self::UserOutput => vec![
                SlotDecl::new("message", Input),
                SlotDecl::new("get", Output),
            ],
            Self::Tool => vec![
                SlotDecl::new("config", Input),
                SlotDecl::new("args", Input),
                SlotDecl::new("source", Input),
                SlotDecl::new("target", Output),
            ],
            Self::Agent => vec![
                SlotDecl::new("config", Input),
                SlotDecl::new("request", Input),
                SlotDecl::new("response", Output),
            ],
            kind if kind.is_config() => vec![SlotDecl::new("get", Output)],
            _ => Vec::new(),
        }
    }

    /// Returns the declared slot with the given base name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<SlotDecl> {
        self.slots().into_iter().find(|decl| decl.name == name)
    }
}

/// Declaration of an extension node kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindDecl {
    /// Whether the engine schedules this kind.
    pub executable: bool,
    /// Declared slots.
    pub slots: Vec<SlotDecl>,
}

/// The set of node kinds known at link time: builtins plus extensions.
#[derive(Default)]
pub struct NodeCatalog {
    extra: HashMap<String, KindDecl>,
}

impl NodeCatalog {
    /// Creates a catalog covering exactly the builtin kinds.
    #[must_use]
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Registers an extension kind. Replaces any previous registration with
    /// the same tag; builtin tags cannot be shadowed.
    pub fn register(&mut self, tag: impl Into<String>, decl: KindDecl) {
        let tag = tag.into();
        if NodeKind::from_tag(&tag).is_none() {
            self.extra.insert(tag, decl);
        }
    }

    /// Returns true if the tag names a known kind.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        NodeKind::from_tag(tag).is_some() || self.extra.contains_key(tag)
    }

    /// Returns the declared slots for a tag.
    #[must_use]
    pub fn slots(&self, tag: &str) -> Option<Vec<SlotDecl>> {
        if let Some(kind) = NodeKind::from_tag(tag) {
            return Some(kind.slots());
        }
        self.extra.get(tag).map(|decl| decl.slots.clone())
    }

    /// Returns whether the tag names an executable kind.
    #[must_use]
    pub fn is_executable(&self, tag: &str) -> bool {
        if let Some(kind) = NodeKind::from_tag(tag) {
            return kind.is_executable();
        }
        self.extra.get(tag).is_some_and(|decl| decl.executable)
    }

    /// Returns the registered extension tags.
    #[must_use]
    pub fn extension_tags(&self) -> Vec<&str> {
        self.extra.keys().map(String::as_str).collect()
    }

    /// Describes every known kind as `{tag: {executable, slots}}`.
    ///
    /// This is the payload of the `schema` control verb.
    #[must_use]
    pub fn describe(&self) -> JsonValue {
        let mut kinds = Map::new();
        for kind in NodeKind::all() {
            kinds.insert(
                kind.tag().to_string(),
                serde_json::json!({
                    "executable": kind.is_executable(),
                    "slots": kind.slots(),
                }),
            );
        }
        for (tag, decl) in &self.extra {
            kinds.insert(
                tag.clone(),
                serde_json::json!({
                    "executable": decl.executable,
                    "slots": decl.slots,
                }),
            );
        }
        JsonValue::Object(kinds)
    }
}

/// A serialized workflow node: type tag, optional stable id, and a flat map
/// of configuration fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// The kind tag.
    #[serde(rename = "type")]
    pub kind_tag: String,
    /// Stable string identifier; defaults to the node index when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Configuration fields, including slot placeholders.
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl NodeSpec {
    /// Creates a node of the given builtin kind with no fields.
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind_tag: kind.tag().to_string(),
            id: None,
            fields: Map::new(),
        }
    }

    /// Creates a node from a raw tag.
    #[must_use]
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            kind_tag: tag.into(),
            id: None,
            fields: Map::new(),
        }
    }

    /// Sets the stable id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets a configuration field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Returns the builtin kind, if the tag names one.
    #[must_use]
    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::from_tag(&self.kind_tag)
    }

    /// Returns the effective id: the declared id, or the index as a string.
    #[must_use]
    pub fn effective_id(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| index.to_string())
    }

    /// Reads a slot value from the fields, following one dotted level into
    /// map-valued fields.
    #[must_use]
    pub fn slot_value(&self, slot: &str) -> Option<&JsonValue> {
        if let Some(value) = self.fields.get(slot) {
            return Some(value);
        }
        let (base, sub) = split_dotted(slot);
        let sub = sub?;
        self.fields.get(base)?.as_object()?.get(sub)
    }

    /// Writes a slot value into the fields, creating the containing map for
    /// dotted slots.
    pub fn set_slot_value(&mut self, slot: &str, value: JsonValue) {
        let (base, sub) = split_dotted(slot);
        match sub {
            None => {
                self.fields.insert(base.to_string(), value);
            }
            Some(sub) => {
                let entry = self
                    .fields
                    .entry(base.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                if !entry.is_object() {
                    *entry = JsonValue::Object(Map::new());
                }
                if let Some(map) = entry.as_object_mut() {
                    map.insert(sub.to_string(), value);
                }
            }
        }
    }
}
