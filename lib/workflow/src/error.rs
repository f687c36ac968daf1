//! Error types for the workflow crate.

use std::fmt;

/// Link-time validation failures.
///
/// Linking rejects a workflow before execution ever starts; every variant
/// names the offending node or edge by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A node carries a type tag no catalog entry matches.
    UnknownKind { index: usize, tag: String },
    /// An edge endpoint references a node index outside the node list.
    EdgeEndpointOutOfRange { edge: usize, index: u32 },
    /// An edge originates from a slot the source kind does not declare.
    UnknownSourceSlot {
        edge: usize,
        node: usize,
        slot: String,
    },
    /// An edge targets a slot the target kind does not declare.
    UnknownTargetSlot {
        edge: usize,
        node: usize,
        slot: String,
    },
    /// A merge node is configured with an unknown strategy.
    InvalidMergeStrategy { node: usize, strategy: String },
    /// A script node is configured with a language the engine cannot run.
    UnsupportedScriptLang { node: usize, lang: String },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind { index, tag } => {
                write!(f, "node {index} has unknown kind '{tag}'")
            }
            Self::EdgeEndpointOutOfRange { edge, index } => {
                write!(f, "edge {edge} references node index {index} out of range")
            }
            Self::UnknownSourceSlot { edge, node, slot } => {
                write!(f, "edge {edge}: node {node} has no output slot '{slot}'")
            }
            Self::UnknownTargetSlot { edge, node, slot } => {
                write!(f, "edge {edge}: node {node} has no input slot '{slot}'")
            }
            Self::InvalidMergeStrategy { node, strategy } => {
                write!(f, "merge node {node} has invalid strategy '{strategy}'")
            }
            Self::UnsupportedScriptLang { node, lang } => {
                write!(f, "script node {node} has unsupported lang '{lang}'")
            }
        }
    }
}

impl std::error::Error for LinkError {}

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `create` was called with a name that is already stored.
    DuplicateName { name: String },
    /// The workflow failed to link.
    Invalid(LinkError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName { name } => {
                write!(f, "workflow '{name}' already exists")
            }
            Self::Invalid(e) => write!(f, "invalid workflow: {e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<LinkError> for RegistryError {
    fn from(e: LinkError) -> Self {
        Self::Invalid(e)
    }
}
