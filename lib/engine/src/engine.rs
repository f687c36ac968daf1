//! The frontier scheduler and the engine control verbs.
//!
//! One scheduler task runs per execution. It drains the ready frontier into
//! concurrent node tasks (ascending executable index), blocks on the first
//! completion, and advances the frontier as results arrive. Node failures are
//! captured locally and never cascade; independent branches keep executing
//! until the frontier drains.
//!
//! Cancellation is cooperative: the scheduler stops admitting ready nodes,
//! awaits the nodes still running, resolves pending user-input promises with
//! cancellation, and terminates as `cancelled`.

use crate::context::ExecutionContext;
use crate::error::{DEADLOCK_REASON, EngineError, NodeError};
use crate::execution::{ExecutionPhase, ExecutionState, NodeRunStatus};
use crate::node_exec::{NodeContext, NodeOutput, NodeRegistry};
use crate::script::{LuaScriptEngine, ScriptEngine};
use cascade_core::ExecutionId;
use cascade_events::{Event, EventBus, EventType};
use cascade_workflow::{Backend, NodeCatalog, NodeResource, Workflow};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default bound on a user-input wait, in seconds.
pub const DEFAULT_USER_INPUT_TIMEOUT_SECS: u64 = 300;

struct ExecutionHandle {
    state: Arc<Mutex<ExecutionState>>,
    cancel: CancellationToken,
}

struct EngineInner {
    bus: Arc<EventBus>,
    catalog: Arc<NodeCatalog>,
    registry: NodeRegistry,
    script: Arc<dyn ScriptEngine>,
    executions: Mutex<HashMap<ExecutionId, ExecutionHandle>>,
    pending_inputs: Mutex<HashMap<(ExecutionId, String), oneshot::Sender<JsonValue>>>,
}

impl EngineInner {
    fn executions(&self) -> MutexGuard<'_, HashMap<ExecutionId, ExecutionHandle>> {
        self.executions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_inputs(
        &self,
    ) -> MutexGuard<'_, HashMap<(ExecutionId, String), oneshot::Sender<JsonValue>>> {
        self.pending_inputs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_state(state: &Mutex<ExecutionState>) -> MutexGuard<'_, ExecutionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// The workflow execution engine.
///
/// Cheap to clone; clones share the same execution table and event bus.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine with the builtin kind catalog, builtin node
    /// registry, and the Lua script engine.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_parts(
            bus,
            Arc::new(NodeCatalog::builtin()),
            NodeRegistry::builtin(),
            Arc::new(LuaScriptEngine),
        )
    }

    /// Creates an engine from explicit parts; use this to register extension
    /// kinds or substitute the script evaluator.
    #[must_use]
    pub fn with_parts(
        bus: Arc<EventBus>,
        catalog: Arc<NodeCatalog>,
        registry: NodeRegistry,
        script: Arc<dyn ScriptEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                bus,
                catalog,
                registry,
                script,
                executions: Mutex::new(HashMap::new()),
                pending_inputs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the kind catalog the engine links against.
    #[must_use]
    pub fn catalog(&self) -> &NodeCatalog {
        &self.inner.catalog
    }

    /// Starts an execution and returns immediately with its id.
    ///
    /// The workflow is (re-)linked here so link-time failures surface
    /// synchronously; the scheduling loop runs on a spawned task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkflow`] on link or instantiation
    /// failure.
    pub fn start(
        &self,
        mut workflow: Workflow,
        backend: Arc<dyn Backend>,
        handles: Vec<NodeResource>,
        initial_data: Map<String, JsonValue>,
    ) -> Result<ExecutionId, EngineError> {
        workflow.link(&self.inner.catalog)?;
        let ctx = ExecutionContext::build(
            &workflow,
            initial_data.clone(),
            &self.inner.catalog,
            &self.inner.registry,
            self.inner.script.clone(),
            backend,
            &handles,
        )?;

        let execution_id = ExecutionId::new();
        let mut state = ExecutionState::new(
            ctx.workflow_id.clone(),
            execution_id,
            ctx.nodes.iter().map(|node| node.id.clone()),
        );
        for index in &ctx.ready {
            if let Some(record) = state.nodes.get_mut(&ctx.nodes[*index].id) {
                record.status = NodeRunStatus::Ready;
            }
        }
        sync_frontier(&mut state, &ctx);

        let state = Arc::new(Mutex::new(state));
        let cancel = CancellationToken::new();
        self.inner.executions().insert(
            execution_id,
            ExecutionHandle {
                state: state.clone(),
                cancel: cancel.clone(),
            },
        );

        self.inner.bus.emit(
            Event::new(EventType::WorkflowStarted)
                .workflow(ctx.workflow_id.as_str())
                .execution(execution_id)
                .data(serde_json::json!({"initial_data": initial_data})),
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_schedule(inner, ctx, execution_id, state, cancel).await;
        });

        Ok(execution_id)
    }

    /// Requests cancellation and returns the current state.
    ///
    /// Idempotent: cancelling a terminal execution changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown execution id.
    pub fn cancel(&self, execution_id: ExecutionId) -> Result<ExecutionState, EngineError> {
        let executions = self.inner.executions();
        let handle = executions
            .get(&execution_id)
            .ok_or(EngineError::NotFound { execution_id })?;

        let snapshot = lock_state(&handle.state).clone();
        if !snapshot.phase.is_terminal() {
            handle.cancel.cancel();
        }
        Ok(snapshot)
    }

    /// Returns the current state of an execution, if known.
    #[must_use]
    pub fn status(&self, execution_id: ExecutionId) -> Option<ExecutionState> {
        let executions = self.inner.executions();
        let handle = executions.get(&execution_id)?;
        Some(lock_state(&handle.state).clone())
    }

    /// Returns the states of every execution, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<ExecutionState> {
        let executions = self.inner.executions();
        let mut states: Vec<ExecutionState> = executions
            .values()
            .map(|handle| lock_state(&handle.state).clone())
            .collect();
        states.sort_by_key(|state| state.execution_id);
        states
    }

    /// Resolves a pending user-input promise.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown execution,
    /// [`EngineError::AlreadyTerminal`] when the execution has finished, and
    /// [`EngineError::NotWaiting`] when the node holds no pending promise.
    pub fn provide_user_input(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
        value: JsonValue,
    ) -> Result<(), EngineError> {
        let (workflow_id, terminal) = {
            let executions = self.inner.executions();
            let handle = executions
                .get(&execution_id)
                .ok_or(EngineError::NotFound { execution_id })?;
            let state = lock_state(&handle.state);
            (state.workflow_id.clone(), state.phase.is_terminal())
        };

        let sender = self
            .inner
            .pending_inputs()
            .remove(&(execution_id, node_id.to_string()));

        let Some(sender) = sender else {
            if terminal {
                return Err(EngineError::AlreadyTerminal { execution_id });
            }
            return Err(EngineError::NotWaiting {
                execution_id,
                node_id: node_id.to_string(),
            });
        };

        if sender.send(value.clone()).is_err() {
            return Err(EngineError::NotWaiting {
                execution_id,
                node_id: node_id.to_string(),
            });
        }

        self.inner.bus.emit(
            Event::new(EventType::UserInputReceived)
                .workflow(workflow_id)
                .execution(execution_id)
                .node(node_id)
                .data(serde_json::json!({"input": value})),
        );
        Ok(())
    }

    /// Requests cancellation of every non-terminal execution.
    pub fn cancel_all(&self) {
        let executions = self.inner.executions();
        for handle in executions.values() {
            if !lock_state(&handle.state).phase.is_terminal() {
                handle.cancel.cancel();
            }
        }
    }
}

/// Copies the live frontier sets into the observable snapshot.
fn sync_frontier(state: &mut ExecutionState, ctx: &ExecutionContext) {
    state.pending = ctx.pending.iter().copied().collect();
    state.ready = ctx.ready.iter().copied().collect();
    state.running = ctx.running.iter().copied().collect();
    state.completed = ctx.completed.iter().copied().collect();
    state.failed = ctx.failed.iter().copied().collect();
}

/// The scheduling loop for one execution.
async fn run_schedule(
    inner: Arc<EngineInner>,
    mut ctx: ExecutionContext,
    execution_id: ExecutionId,
    state: Arc<Mutex<ExecutionState>>,
    cancel: CancellationToken,
) {
    let mut tasks: JoinSet<(usize, Result<NodeOutput, NodeError>)> = JoinSet::new();
    let mut cancelled = false;
    let mut scheduler_error: Option<String> = None;

    loop {
        if !cancelled {
            let ready: Vec<usize> = ctx.ready.iter().copied().collect();
            for index in ready {
                ctx.ready.remove(&index);
                ctx.running.insert(index);
                spawn_node(&inner, &mut ctx, index, execution_id, &state, &cancel, &mut tasks);
            }
        }

        if tasks.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
            }
            joined = tasks.join_next() => {
                match joined {
                    None => break,
                    Some(Err(join_error)) => {
                        scheduler_error = Some(format!("scheduler task failed: {join_error}"));
                        tasks.abort_all();
                        break;
                    }
                    Some(Ok((index, result))) => {
                        handle_node_result(
                            &inner,
                            &mut ctx,
                            execution_id,
                            &state,
                            cancelled,
                            index,
                            result,
                        );
                    }
                }
            }
        }
    }

    // Drop any promise registrations this execution still holds; waiters
    // have already returned, this only clears the table.
    inner
        .pending_inputs()
        .retain(|(owner, _), _| *owner != execution_id);

    let (phase, reason) = if let Some(message) = scheduler_error {
        (ExecutionPhase::Failed, Some(message))
    } else if cancelled {
        (ExecutionPhase::Cancelled, None)
    } else if !ctx.pending.is_empty() {
        (ExecutionPhase::Failed, Some(DEADLOCK_REASON.to_string()))
    } else if !ctx.failed.is_empty() {
        (
            ExecutionPhase::Failed,
            Some(format!("{} node(s) failed", ctx.failed.len())),
        )
    } else {
        (ExecutionPhase::Completed, None)
    };

    {
        let mut snapshot = lock_state(&state);
        sync_frontier(&mut snapshot, &ctx);
        snapshot.finish(phase, reason.clone());
    }

    let terminal = match phase {
        ExecutionPhase::Completed => Event::new(EventType::WorkflowCompleted)
            .data(serde_json::json!({"outputs": ctx.outputs_by_node_id()})),
        ExecutionPhase::Cancelled => Event::new(EventType::WorkflowCancelled),
        _ => Event::new(EventType::WorkflowFailed).error(reason.unwrap_or_default()),
    };
    inner
        .bus
        .emit(terminal.workflow(ctx.workflow_id.as_str()).execution(execution_id));
}

/// Moves a node into `running` observably and spawns its task.
fn spawn_node(
    inner: &Arc<EngineInner>,
    ctx: &mut ExecutionContext,
    index: usize,
    execution_id: ExecutionId,
    state: &Arc<Mutex<ExecutionState>>,
    cancel: &CancellationToken,
    tasks: &mut JoinSet<(usize, Result<NodeOutput, NodeError>)>,
) {
    let node_id = ctx.nodes[index].id.clone();
    {
        let mut snapshot = lock_state(state);
        if let Some(record) = snapshot.nodes.get_mut(&node_id) {
            record.status = NodeRunStatus::Running;
        }
        sync_frontier(&mut snapshot, ctx);
    }
    inner.bus.emit(
        Event::new(EventType::NodeStarted)
            .workflow(ctx.workflow_id.as_str())
            .execution(execution_id)
            .node(node_id.as_str())
            .data(serde_json::json!({"node_type": ctx.nodes[index].kind_tag})),
    );

    let inputs = ctx.gather_inputs(index, inner.script.as_ref());

    if ctx.nodes[index].is_user_input {
        let (sender, receiver) = oneshot::channel();
        inner
            .pending_inputs()
            .insert((execution_id, node_id.clone()), sender);
        inner.bus.emit(
            Event::new(EventType::UserInputRequested)
                .workflow(ctx.workflow_id.as_str())
                .execution(execution_id)
                .node(node_id.as_str())
                .data(serde_json::json!({"query": ctx.nodes[index].query})),
        );

        let timeout_secs = ctx.nodes[index].timeout_secs;
        let cancel = cancel.clone();
        let inner = inner.clone();
        tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(NodeError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                    Err(NodeError::Timeout { seconds: timeout_secs })
                }
                received = receiver => match received {
                    Ok(value) => Ok(NodeOutput::single("message", value)),
                    Err(_) => Err(NodeError::Cancelled),
                }
            };
            inner.pending_inputs().remove(&(execution_id, node_id));
            (index, result)
        });
    } else {
        let instance = ctx.nodes[index].instance.clone();
        let node_ctx = NodeContext {
            inputs,
            variables: ctx.variables.clone(),
            node_index: index,
        };
        tasks.spawn(async move { (index, instance.execute(node_ctx).await) });
    }
}

/// Applies one finished node to the frontier and the observable state.
fn handle_node_result(
    inner: &Arc<EngineInner>,
    ctx: &mut ExecutionContext,
    execution_id: ExecutionId,
    state: &Arc<Mutex<ExecutionState>>,
    cancelled: bool,
    index: usize,
    result: Result<NodeOutput, NodeError>,
) {
    ctx.running.remove(&index);
    let node_id = ctx.nodes[index].id.clone();

    match result {
        Ok(output) => {
            ctx.outputs.insert(index, output.outputs.clone());
            ctx.completed.insert(index);
            if !cancelled {
                ctx.promote_dependents(index);
            }

            {
                let mut snapshot = lock_state(state);
                if let Some(record) = snapshot.nodes.get_mut(&node_id) {
                    record.status = NodeRunStatus::Completed;
                    record.output = Some(output.outputs.clone());
                }
                for ready_index in &ctx.ready {
                    let ready_id = &ctx.nodes[*ready_index].id;
                    if let Some(record) = snapshot.nodes.get_mut(ready_id)
                        && record.status == NodeRunStatus::Pending
                    {
                        record.status = NodeRunStatus::Ready;
                    }
                }
                sync_frontier(&mut snapshot, ctx);
            }

            let mut data = serde_json::json!({"outputs": output.outputs});
            if let Some(next_target) = &output.next_target {
                data["next_target"] = JsonValue::String(next_target.clone());
            }
            inner.bus.emit(
                Event::new(EventType::NodeCompleted)
                    .workflow(ctx.workflow_id.as_str())
                    .execution(execution_id)
                    .node(node_id.as_str())
                    .data(data),
            );
        }
        Err(NodeError::Cancelled) => {
            ctx.failed.insert(index);
            let mut snapshot = lock_state(state);
            if let Some(record) = snapshot.nodes.get_mut(&node_id) {
                record.status = NodeRunStatus::Cancelled;
                record.error = Some(NodeError::Cancelled.to_string());
            }
            sync_frontier(&mut snapshot, ctx);
        }
        Err(error) => {
            ctx.failed.insert(index);
            {
                let mut snapshot = lock_state(state);
                if let Some(record) = snapshot.nodes.get_mut(&node_id) {
                    record.status = NodeRunStatus::Failed;
                    record.error = Some(error.to_string());
                }
                sync_frontier(&mut snapshot, ctx);
            }
            inner.bus.emit(
                Event::new(EventType::NodeFailed)
                    .workflow(ctx.workflow_id.as_str())
                    .execution(execution_id)
                    .node(node_id.as_str())
                    .error(error.to_string()),
            );
        }
    }
}
