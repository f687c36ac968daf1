//! Frontier-based workflow execution engine.
//!
//! The engine drives dataflow execution over a linked workflow:
//!
//! - **Context**: per-execution dependency maps, frontier sets, and the
//!   node-output store, built once at `start`
//! - **Scheduler**: a single task per execution that drains ready nodes into
//!   concurrent tasks, blocks on any-completion, and advances the frontier;
//!   node failures are isolated and never cascade
//! - **Node runtime**: executable node objects constructed through a kind
//!   registry, with agent/tool handles injected for backend kinds
//! - **User input**: promise-backed suspension resolved out-of-band, bounded
//!   by a per-node timeout and the cancellation signal
//!
//! The engine owns no global state: the event bus, kind catalog, and backend
//! handles are constructor dependencies, so tests can build isolated engines.

pub mod context;
pub mod engine;
pub mod error;
pub mod execution;
pub mod node_exec;
pub mod script;

pub use context::ExecutionContext;
pub use engine::Engine;
pub use error::{EngineError, NodeError};
pub use execution::{ExecutionPhase, ExecutionState, NodeRunRecord, NodeRunStatus};
pub use node_exec::{CtorDeps, ExecutableNode, NodeContext, NodeOutput, NodeRegistry};
pub use script::{LuaScriptEngine, ScriptEngine, ScriptError};
