//! Lifecycle events and the in-process event bus.
//!
//! Every observable state change in the engine and the workflow registry is
//! published as an [`Event`] on an [`EventBus`]. The bus fans events out to:
//!
//! - in-process subscribers (topic-matched handlers, `*` wildcard),
//! - streaming clients (one JSON-encoded event per message),
//! - a bounded ring history for late inspection.
//!
//! Delivery is at-most-once per subscriber per event; there is no durable
//! queue and no replay beyond the ring.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventFilter, HandlerResult};
pub use event::{Event, EventType};
