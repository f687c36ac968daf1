//! Slot system for workflow nodes.
//!
//! Slots are named connection points on nodes. A slot is single-valued (one
//! incoming or outgoing edge) or multi-valued (arbitrary fan-in/out, keyed by
//! a sub-name after a dot, e.g. `cases.ok` or `sources.left`).

use serde::{Deserialize, Serialize};

/// The role a named field plays on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    /// Configuration only; never wired.
    Constant,
    /// Single-valued input slot.
    Input,
    /// Single-valued output slot.
    Output,
    /// Multi-valued input slot (dotted sub-names).
    MultiInput,
    /// Multi-valued output slot (dotted sub-names).
    MultiOutput,
}

impl SlotRole {
    /// Returns true if edges may target this slot.
    #[must_use]
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Input | Self::MultiInput)
    }

    /// Returns true if edges may originate from this slot.
    #[must_use]
    pub fn produces_output(&self) -> bool {
        matches!(self, Self::Output | Self::MultiOutput)
    }

    /// Returns true for the multi-valued roles.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::MultiInput | Self::MultiOutput)
    }
}

/// A declared slot on a node kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDecl {
    /// The slot name (the base name for multi-valued slots).
    pub name: String,
    /// The slot role.
    pub role: SlotRole,
}

impl SlotDecl {
    /// Creates a slot declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, role: SlotRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Splits a dotted slot name into its base and optional sub-name.
///
/// `"cases.ok"` becomes `("cases", Some("ok"))`; `"source"` becomes
/// `("source", None)`.
#[must_use]
pub fn split_dotted(slot: &str) -> (&str, Option<&str>) {
    match slot.split_once('.') {
        Some((base, sub)) => (base, Some(sub)),
        None => (slot, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple_name() {
        assert_eq!(split_dotted("source"), ("source", None));
    }

    #[test]
    fn split_dotted_name() {
        assert_eq!(split_dotted("cases.ok"), ("cases", Some("ok")));
    }

    #[test]
    fn split_keeps_extra_dots_in_sub() {
        assert_eq!(split_dotted("targets.a.b"), ("targets", Some("a.b")));
    }

    #[test]
    fn role_direction_checks() {
        assert!(SlotRole::Input.accepts_input());
        assert!(SlotRole::MultiInput.accepts_input());
        assert!(!SlotRole::Output.accepts_input());

        assert!(SlotRole::Output.produces_output());
        assert!(SlotRole::MultiOutput.produces_output());
        assert!(!SlotRole::Constant.produces_output());
    }

    #[test]
    fn multi_roles() {
        assert!(SlotRole::MultiInput.is_multi());
        assert!(SlotRole::MultiOutput.is_multi());
        assert!(!SlotRole::Input.is_multi());
    }
}
