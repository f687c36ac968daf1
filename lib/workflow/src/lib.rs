//! Workflow data model for the cascade engine.
//!
//! This crate provides:
//!
//! - **Node model**: a tagged node-kind set with named slots (single and
//!   multi-valued), plus an extension catalog for user-defined kinds
//! - **Edge model**: index-addressed slot-to-slot connections
//! - **Linking**: the pre-execution pass that validates the graph, flattens
//!   multi-slot declarations, and propagates constant config values
//! - **Backend contract**: the two narrow async handles (`run_agent`,
//!   `run_tool`) the engine calls out through
//! - **Registry**: name-keyed workflow storage with lazily built execution
//!   plans

pub mod backend;
pub mod edge;
pub mod error;
pub mod node;
pub mod registry;
pub mod slot;
pub mod workflow;

pub use backend::{Backend, BackendError, EchoBackend, NodeResource, node_resources};
pub use edge::Edge;
pub use error::{LinkError, RegistryError};
pub use node::{KindDecl, NodeCatalog, NodeKind, NodeSpec};
pub use registry::{BackendBuilder, Prepared, WorkflowRegistry};
pub use slot::{SlotDecl, SlotRole, split_dotted};
pub use workflow::{Workflow, WorkflowInfo, WorkflowOptions};
