//! Edge types for workflow graphs.
//!
//! Edges connect slots between nodes. Nodes are addressed by their zero-based
//! index in the workflow's node list, not by id; one flat vector with integer
//! references keeps the config graph cycle-free even when nodes are shared.

use serde::{Deserialize, Serialize};

/// An edge carrying one value from a producer slot to a consumer slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Index of the source node in the workflow node list.
    pub source: u32,
    /// Index of the target node in the workflow node list.
    pub target: u32,
    /// The output slot on the source node.
    pub source_slot: String,
    /// The input slot on the target node.
    pub target_slot: String,
    /// Optional predicate evaluated on the carried value; the edge is
    /// dropped when it evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Edge {
    /// Creates a new edge between slots.
    #[must_use]
    pub fn new(
        source: u32,
        source_slot: impl Into<String>,
        target: u32,
        target_slot: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            source_slot: source_slot.into(),
            target_slot: target_slot.into(),
            filter: None,
        }
    }

    /// Sets the filter predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_creation() {
        let edge = Edge::new(0, "start", 1, "source");
        assert_eq!(edge.source, 0);
        assert_eq!(edge.target, 1);
        assert_eq!(edge.source_slot, "start");
        assert_eq!(edge.target_slot, "source");
        assert!(edge.filter.is_none());
    }

    #[test]
    fn edge_with_filter() {
        let edge = Edge::new(0, "start", 1, "source").with_filter("return data > 3");
        assert_eq!(edge.filter.as_deref(), Some("return data > 3"));
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new(1, "cases.ok", 2, "source");
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }

    #[test]
    fn filter_is_omitted_when_absent() {
        let edge = Edge::new(0, "start", 1, "source");
        let json = serde_json::to_value(&edge).expect("serialize");
        assert!(json.get("filter").is_none());
    }
}
