//! Shared application state.

use crate::config::ServerConfig;
use cascade_engine::Engine;
use cascade_events::EventBus;
use cascade_workflow::{Backend, EchoBackend, NodeCatalog, WorkflowRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    /// The event bus shared by the registry, the engine, and streaming
    /// clients.
    pub bus: Arc<EventBus>,
    /// Name-keyed workflow storage.
    pub registry: Arc<WorkflowRegistry>,
    /// The execution engine.
    pub engine: Engine,
    /// Cancelled by the `shutdown` verb; stops the server loop.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires up the bus, registry, and engine from configuration.
    ///
    /// Backend adapters are external collaborators; until one is injected the
    /// registry builds echo plans, which reflect agent/tool calls back.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let bus = Arc::new(EventBus::with_capacity(config.history_capacity));
        let catalog = Arc::new(NodeCatalog::builtin());
        let registry = Arc::new(WorkflowRegistry::new(
            bus.clone(),
            catalog,
            Arc::new(|_workflow| Arc::new(EchoBackend) as Arc<dyn Backend>),
        ));
        let engine = Engine::new(bus.clone());

        Self {
            bus,
            registry,
            engine,
            shutdown: CancellationToken::new(),
        }
    }
}
