//! Executable node objects and the kind registry.
//!
//! Each node kind maps to a constructor producing an object with a pure
//! `execute` contract: the result is a function of the gathered inputs, the
//! workflow variables, the node's configuration, and any injected handles.
//! Nodes never observe other nodes' outputs except through the edge-walk.

use crate::error::NodeError;
use crate::script::ScriptEngine;
use async_trait::async_trait;
use cascade_workflow::{Backend, NodeKind, NodeResource, NodeSpec};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Inputs and environment handed to a node execution.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    /// Input values gathered by the edge-walk, keyed by target slot
    /// (dotted for multi-input slots).
    pub inputs: BTreeMap<String, JsonValue>,
    /// Global workflow variables.
    pub variables: Map<String, JsonValue>,
    /// The node's executable index.
    pub node_index: usize,
}

impl NodeContext {
    /// Returns the input wired into a slot, if any.
    #[must_use]
    pub fn input(&self, slot: &str) -> Option<&JsonValue> {
        self.inputs.get(slot)
    }

    /// Returns the values wired into a multi-input slot, in sub-name order.
    #[must_use]
    pub fn multi_inputs(&self, base: &str) -> Vec<JsonValue> {
        let prefix = format!("{base}.");
        self.inputs
            .iter()
            .filter(|(slot, _)| slot.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .collect()
    }
}

/// The result of one node execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// Values keyed by output slot (dotted for multi-output slots).
    pub outputs: Map<String, JsonValue>,
    /// Routing hint from switch-style nodes; passed through to events only.
    pub next_target: Option<String>,
}

impl NodeOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an output with a single slot value.
    #[must_use]
    pub fn single(slot: impl Into<String>, value: JsonValue) -> Self {
        let mut outputs = Map::new();
        outputs.insert(slot.into(), value);
        Self {
            outputs,
            next_target: None,
        }
    }
}

/// An instantiated, executable workflow node.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Executes the node over its gathered inputs.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Dependencies injected into node constructors.
pub struct CtorDeps {
    /// The script evaluator shared by script kinds.
    pub script: Arc<dyn ScriptEngine>,
    /// The backend handles for agent/tool kinds.
    pub backend: Arc<dyn Backend>,
    /// The per-node resource from the prepared workflow.
    pub resource: NodeResource,
}

type NodeCtor = Box<dyn Fn(&NodeSpec, &CtorDeps) -> Arc<dyn ExecutableNode> + Send + Sync>;

/// Maps node kind tags to constructors. `builtin()` covers the core set;
/// `register` is the extension hook for user-defined kinds.
pub struct NodeRegistry {
    ctors: HashMap<String, NodeCtor>,
}

impl NodeRegistry {
    /// Creates a registry with constructors for every builtin executable kind.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };

        registry.register(NodeKind::Start.tag(), |_spec, _deps| Arc::new(StartNode));
        registry.register(NodeKind::End.tag(), |_spec, _deps| Arc::new(EndNode));
        registry.register(NodeKind::Sink.tag(), |_spec, _deps| Arc::new(SinkNode));
        registry.register(NodeKind::PassThrough.tag(), |_spec, _deps| {
            Arc::new(PassThroughNode)
        });
        registry.register(NodeKind::UserInput.tag(), |_spec, _deps| {
            Arc::new(UserInputNode)
        });
        registry.register(NodeKind::UserOutput.tag(), |_spec, _deps| {
            Arc::new(UserOutputNode)
        });
        registry.register(NodeKind::Transform.tag(), |spec, deps| {
            Arc::new(TransformNode {
                config: spec.fields.clone(),
                script: deps.script.clone(),
            })
        });
        registry.register(NodeKind::Switch.tag(), |spec, deps| {
            Arc::new(SwitchNode {
                config: spec.fields.clone(),
                script: deps.script.clone(),
            })
        });
        registry.register(NodeKind::Split.tag(), |spec, _deps| {
            Arc::new(SplitNode {
                config: spec.fields.clone(),
            })
        });
        registry.register(NodeKind::Merge.tag(), |spec, _deps| {
            Arc::new(MergeNode {
                config: spec.fields.clone(),
            })
        });
        registry.register(NodeKind::Tool.tag(), |spec, deps| {
            Arc::new(ToolNode {
                config: spec.fields.clone(),
                backend: deps.backend.clone(),
                resource: deps.resource,
            })
        });
        registry.register(NodeKind::Agent.tag(), |spec, deps| {
            Arc::new(AgentNode {
                config: spec.fields.clone(),
                backend: deps.backend.clone(),
                resource: deps.resource,
            })
        });

        for kind in NodeKind::all().iter().filter(|kind| kind.is_config()) {
            registry.register(kind.tag(), |spec, _deps| {
                Arc::new(ConfigNode {
                    config: spec.fields.clone(),
                })
            });
        }

        registry
    }

    /// Registers a constructor for a kind tag, replacing any existing one.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        ctor: impl Fn(&NodeSpec, &CtorDeps) -> Arc<dyn ExecutableNode> + Send + Sync + 'static,
    ) {
        self.ctors.insert(tag.into(), Box::new(ctor));
    }

    /// Instantiates a node, or `None` when no constructor is registered.
    #[must_use]
    pub fn instantiate(&self, spec: &NodeSpec, deps: &CtorDeps) -> Option<Arc<dyn ExecutableNode>> {
        self.ctors.get(&spec.kind_tag).map(|ctor| ctor(spec, deps))
    }

    /// Returns true if a constructor exists for the tag.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.ctors.contains_key(tag)
    }
}

/// Resolves a slot value: the wired input wins, otherwise the configured
/// constant (propagated at link time), null config values meaning "unset".
fn resolve(ctx: &NodeContext, config: &Map<String, JsonValue>, slot: &str) -> Option<JsonValue> {
    if let Some(value) = ctx.input(slot) {
        return Some(value.clone());
    }
    config.get(slot).filter(|value| !value.is_null()).cloned()
}

struct StartNode;

#[async_trait]
impl ExecutableNode for StartNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::single(
            "start",
            JsonValue::Object(ctx.variables.clone()),
        ))
    }
}

struct EndNode;

#[async_trait]
impl ExecutableNode for EndNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.input("end").cloned().unwrap_or(JsonValue::Null);
        Ok(NodeOutput::single("end", value))
    }
}

struct SinkNode;

#[async_trait]
impl ExecutableNode for SinkNode {
    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::empty())
    }
}

struct PassThroughNode;

#[async_trait]
impl ExecutableNode for PassThroughNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.input("input").cloned().unwrap_or(JsonValue::Null);
        Ok(NodeOutput::single("output", value))
    }
}

/// The scheduler drives the actual wait for user-input nodes; executing one
/// directly yields an unresolved message.
struct UserInputNode;

#[async_trait]
impl ExecutableNode for UserInputNode {
    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::single("message", JsonValue::Null))
    }
}

struct UserOutputNode;

#[async_trait]
impl ExecutableNode for UserOutputNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.input("message").cloned().unwrap_or(JsonValue::Null);
        Ok(NodeOutput::single("get", value))
    }
}

/// Config-passthrough kinds return their own configuration on `get`.
struct ConfigNode {
    config: Map<String, JsonValue>,
}

#[async_trait]
impl ExecutableNode for ConfigNode {
    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::single(
            "get",
            JsonValue::Object(self.config.clone()),
        ))
    }
}

struct TransformNode {
    config: Map<String, JsonValue>,
    script: Arc<dyn ScriptEngine>,
}

#[async_trait]
impl ExecutableNode for TransformNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let source = resolve(&ctx, &self.config, "source").unwrap_or(JsonValue::Null);
        let script = resolve(&ctx, &self.config, "script");

        let value = match script.as_ref().and_then(JsonValue::as_str) {
            None => source,
            Some(script) => {
                let mut globals = Map::new();
                globals.insert("source".to_string(), source);
                globals.insert("variables".to_string(), JsonValue::Object(ctx.variables.clone()));
                self.script
                    .eval(script, &globals)
                    .map_err(|e| NodeError::Script { message: e.message })?
            }
        };

        Ok(NodeOutput::single("target", value))
    }
}

struct SwitchNode {
    config: Map<String, JsonValue>,
    script: Arc<dyn ScriptEngine>,
}

#[async_trait]
impl ExecutableNode for SwitchNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = resolve(&ctx, &self.config, "value").unwrap_or(JsonValue::Null);

        let target = match resolve(&ctx, &self.config, "script")
            .as_ref()
            .and_then(JsonValue::as_str)
        {
            None => "default".to_string(),
            Some(script) => {
                let mut globals = Map::new();
                globals.insert("value".to_string(), value.clone());
                globals.insert("variables".to_string(), JsonValue::Object(ctx.variables.clone()));
                let routed = self
                    .script
                    .eval(script, &globals)
                    .map_err(|e| NodeError::Script { message: e.message })?;
                routed
                    .as_str()
                    .map_or_else(|| "default".to_string(), str::to_string)
            }
        };

        let declared_cases = self
            .config
            .get("cases")
            .and_then(JsonValue::as_object)
            .is_some_and(|cases| cases.contains_key(&target));
        let target = if declared_cases {
            target
        } else {
            "default".to_string()
        };

        let slot = if target == "default" {
            "default".to_string()
        } else {
            format!("cases.{target}")
        };
        let mut output = NodeOutput::single(slot, value);
        output.next_target = Some(target);
        Ok(output)
    }
}

struct SplitNode {
    config: Map<String, JsonValue>,
}

#[async_trait]
impl ExecutableNode for SplitNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mapping = resolve(&ctx, &self.config, "mapping")
            .and_then(|value| value.as_object().cloned())
            .ok_or(NodeError::MissingInput {
                slot: "mapping".to_string(),
            })?;
        let source = resolve(&ctx, &self.config, "source")
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default();

        let mut output = NodeOutput::empty();
        for (source_sub, target_sub) in &mapping {
            let Some(target_sub) = target_sub.as_str() else {
                continue;
            };
            let value = source.get(source_sub).cloned().unwrap_or(JsonValue::Null);
            output
                .outputs
                .insert(format!("targets.{target_sub}"), value);
        }
        Ok(output)
    }
}

struct MergeNode {
    config: Map<String, JsonValue>,
}

#[async_trait]
impl ExecutableNode for MergeNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let strategy = resolve(&ctx, &self.config, "strategy")
            .as_ref()
            .and_then(JsonValue::as_str)
            .unwrap_or("first")
            .to_string();
        let values = ctx.multi_inputs("sources");

        let merged = match strategy.as_str() {
            "first" => values.first().cloned().unwrap_or(JsonValue::Null),
            "last" => values.last().cloned().unwrap_or(JsonValue::Null),
            "concat" => concat_values(values),
            "all" => JsonValue::Array(values),
            other => {
                return Err(NodeError::Failed {
                    message: format!("invalid merge strategy '{other}'"),
                });
            }
        };

        Ok(NodeOutput::single("target", merged))
    }
}

/// Strings concatenate, arrays flatten; mixed inputs collect into an array.
fn concat_values(values: Vec<JsonValue>) -> JsonValue {
    if !values.is_empty() && values.iter().all(JsonValue::is_string) {
        let joined: String = values.iter().filter_map(JsonValue::as_str).collect();
        return JsonValue::String(joined);
    }
    if !values.is_empty() && values.iter().all(JsonValue::is_array) {
        let flattened: Vec<JsonValue> = values
            .into_iter()
            .filter_map(|value| match value {
                JsonValue::Array(items) => Some(items),
                _ => None,
            })
            .flatten()
            .collect();
        return JsonValue::Array(flattened);
    }
    JsonValue::Array(values)
}

struct ToolNode {
    config: Map<String, JsonValue>,
    backend: Arc<dyn Backend>,
    resource: NodeResource,
}

#[async_trait]
impl ExecutableNode for ToolNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let NodeResource::Tool(index) = self.resource else {
            return Err(NodeError::NotConfigured { kind: "tool" });
        };

        let source = resolve(&ctx, &self.config, "source").unwrap_or(JsonValue::Null);
        let args = resolve(&ctx, &self.config, "args")
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default();

        let result = self.backend.run_tool(index, source, args).await?;
        Ok(NodeOutput::single("target", result))
    }
}

struct AgentNode {
    config: Map<String, JsonValue>,
    backend: Arc<dyn Backend>,
    resource: NodeResource,
}

#[async_trait]
impl ExecutableNode for AgentNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let NodeResource::Agent(index) = self.resource else {
            return Err(NodeError::NotConfigured { kind: "agent" });
        };

        let request = resolve(&ctx, &self.config, "request").unwrap_or(JsonValue::Null);
        let message = coerce_message(&request);

        let response = self.backend.run_agent(index, message).await?;
        Ok(NodeOutput::single(
            "response",
            serde_json::json!({"request": request, "response": response}),
        ))
    }
}

/// Pulls a message out of a structured request: the first conventional field
/// wins, anything else is rendered as a string.
fn coerce_message(request: &JsonValue) -> JsonValue {
    match request {
        JsonValue::Object(map) => ["message", "text", "value", "data", "input"]
            .iter()
            .find_map(|key| map.get(*key))
            .cloned()
            .unwrap_or_else(|| JsonValue::String(request.to_string())),
        JsonValue::String(_) => request.clone(),
        other => JsonValue::String(other.to_string()),
    }
}
