//! The in-process event bus.
//!
//! All bus state (subscriber table, ring history, streaming clients) sits
//! behind a single mutex; emission serializes every state transition, which
//! is also what makes event timestamps monotonic within the process.
//!
//! Streaming clients are unbounded senders of JSON-framed events so a slow
//! network consumer never blocks the engine; a failed send evicts the client.

use crate::event::{Event, EventType};
use cascade_core::{ClientId, ExecutionId, SubscriptionId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// The wildcard topic matching every event.
pub const WILDCARD_TOPIC: &str = "*";

/// Default capacity of the ring history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Result type returned by subscriber handlers.
///
/// A handler error is logged and isolated; it never interrupts delivery to
/// other subscribers.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Box<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Filter for querying the ring history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Match only events for this workflow.
    pub workflow_id: Option<String>,
    /// Match only events for this execution.
    pub execution_id: Option<ExecutionId>,
    /// Match only events of this type.
    pub event_type: Option<EventType>,
}

impl EventFilter {
    /// Returns true if the event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(workflow_id) = &self.workflow_id
            && event.workflow_id.as_ref() != Some(workflow_id)
        {
            return false;
        }
        if let Some(execution_id) = &self.execution_id
            && event.execution_id.as_ref() != Some(execution_id)
        {
            return false;
        }
        if let Some(event_type) = &self.event_type
            && event.event_type != *event_type
        {
            return false;
        }
        true
    }
}

struct BusState {
    subscribers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    history: VecDeque<Event>,
    history_capacity: usize,
    clients: HashMap<ClientId, StreamingClient>,
    last_timestamp: DateTime<Utc>,
}

struct StreamingClient {
    sender: mpsc::UnboundedSender<String>,
    filter: EventFilter,
}

/// Publish/subscribe bus for lifecycle events.
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    /// Creates a bus with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a bus whose ring history holds at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                subscribers: HashMap::new(),
                history: VecDeque::with_capacity(capacity),
                history_capacity: capacity,
                clients: HashMap::new(),
                last_timestamp: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // The guarded state stays consistent even if a handler panicked
        // mid-emit, so recover rather than propagate the poison.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribes a handler to a topic. The wildcard `*` matches everything.
    ///
    /// Returns the subscription handle needed to unsubscribe.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.lock()
            .subscribers
            .entry(topic.into())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Removes a subscription from a topic.
    ///
    /// Returns false if no such subscription existed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(handlers) = state.subscribers.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub_id, _)| *sub_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            state.subscribers.remove(topic);
        }
        removed
    }

    /// Emits an event: delivers it to every matching subscriber and streaming
    /// client, then appends it to the ring history.
    ///
    /// The event's timestamp is assigned here and clamped non-decreasing so
    /// that ordering by timestamp agrees with emission order.
    pub fn emit(&self, mut event: Event) {
        let mut state = self.lock();

        let now = Utc::now();
        event.timestamp = if now > state.last_timestamp {
            now
        } else {
            state.last_timestamp
        };
        state.last_timestamp = event.timestamp;

        let topic = event.topic();
        for key in [topic, WILDCARD_TOPIC] {
            if let Some(handlers) = state.subscribers.get(key) {
                for (id, handler) in handlers {
                    if let Err(e) = handler(&event) {
                        tracing::warn!(subscription = %id, topic, error = %e, "event handler failed");
                    }
                }
            }
        }

        let framed = match serde_json::to_string(&event) {
            Ok(framed) => framed,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event for streaming");
                String::new()
            }
        };
        if !framed.is_empty() {
            let mut dead = Vec::new();
            for (client_id, client) in &state.clients {
                if !client.filter.matches(&event) {
                    continue;
                }
                if client.sender.send(framed.clone()).is_err() {
                    dead.push(*client_id);
                }
            }
            for client_id in dead {
                state.clients.remove(&client_id);
                tracing::debug!(client = %client_id, "removed disconnected streaming client");
            }
        }

        if state.history_capacity > 0 {
            if state.history.len() == state.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(event);
        }
    }

    /// Registers a streaming client. Each matching event is sent as one
    /// JSON-encoded message; a failed send removes the client.
    pub fn add_streaming_client(
        &self,
        sender: mpsc::UnboundedSender<String>,
        filter: EventFilter,
    ) -> ClientId {
        let id = ClientId::new();
        self.lock()
            .clients
            .insert(id, StreamingClient { sender, filter });
        id
    }

    /// Removes a streaming client.
    ///
    /// Returns false if the client was not registered.
    pub fn remove_streaming_client(&self, id: ClientId) -> bool {
        self.lock().clients.remove(&id).is_some()
    }

    /// Returns up to `limit` history events matching the filter, oldest first.
    #[must_use]
    pub fn history(&self, filter: &EventFilter, limit: usize) -> Vec<Event> {
        self.lock()
            .history
            .iter()
            .filter(|event| filter.matches(event))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Clears the ring history.
    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    /// Returns the number of events currently held in the history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Returns the number of registered streaming clients.
    #[must_use]
    pub fn streaming_client_count(&self) -> usize {
        self.lock().clients.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> impl Fn(&Event) -> HandlerResult {
        move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn subscribe_receives_matching_topic() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("node.started", counting_handler(counter.clone()));

        bus.emit(Event::new(EventType::NodeStarted));
        bus.emit(Event::new(EventType::NodeCompleted));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_receives_everything() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(WILDCARD_TOPIC, counting_handler(counter.clone()));

        bus.emit(Event::new(EventType::WorkflowStarted));
        bus.emit(Event::new(EventType::NodeFailed));
        bus.emit(Event::new(EventType::RegistryAdded));

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe("node.started", counting_handler(counter.clone()));

        bus.emit(Event::new(EventType::NodeStarted));
        assert!(bus.unsubscribe("node.started", id));
        bus.emit(Event::new(EventType::NodeStarted));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe("node.started", id));
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("node.started", |_event| Err("handler exploded".into()));
        bus.subscribe("node.started", counting_handler(counter.clone()));

        bus.emit(Event::new(EventType::NodeStarted));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::with_capacity(2);
        bus.emit(Event::new(EventType::NodeStarted).node("0"));
        bus.emit(Event::new(EventType::NodeStarted).node("1"));
        bus.emit(Event::new(EventType::NodeStarted).node("2"));

        let events = bus.history(&EventFilter::default(), 10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source_node_id.as_deref(), Some("1"));
        assert_eq!(events[1].source_node_id.as_deref(), Some("2"));
    }

    #[test]
    fn history_filter_by_execution_and_type() {
        let bus = EventBus::new();
        let execution_id = ExecutionId::new();
        bus.emit(Event::new(EventType::NodeStarted).execution(execution_id));
        bus.emit(Event::new(EventType::NodeCompleted).execution(execution_id));
        bus.emit(Event::new(EventType::NodeStarted).execution(ExecutionId::new()));

        let filter = EventFilter {
            execution_id: Some(execution_id),
            event_type: Some(EventType::NodeStarted),
            ..Default::default()
        };
        let events = bus.history(&filter, 10);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn history_respects_limit_and_clear() {
        let bus = EventBus::new();
        for _ in 0..5 {
            bus.emit(Event::new(EventType::NodeStarted));
        }

        assert_eq!(bus.history(&EventFilter::default(), 3).len(), 3);

        bus.clear_history();
        assert_eq!(bus.history_len(), 0);
    }

    #[test]
    fn timestamps_are_non_decreasing() {
        let bus = EventBus::new();
        for _ in 0..50 {
            bus.emit(Event::new(EventType::NodeStarted));
        }

        let events = bus.history(&EventFilter::default(), 100);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn streaming_client_receives_framed_events() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_streaming_client(tx, EventFilter::default());

        bus.emit(Event::new(EventType::WorkflowStarted).workflow("pipeline"));

        let framed = rx.recv().await.expect("framed event");
        let event: Event = serde_json::from_str(&framed).expect("deserialize");
        assert_eq!(event.event_type, EventType::WorkflowStarted);
        assert_eq!(event.workflow_id.as_deref(), Some("pipeline"));
    }

    #[tokio::test]
    async fn streaming_client_filter_applies() {
        let bus = EventBus::new();
        let execution_id = ExecutionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.add_streaming_client(
            tx,
            EventFilter {
                execution_id: Some(execution_id),
                ..Default::default()
            },
        );

        bus.emit(Event::new(EventType::NodeStarted).execution(ExecutionId::new()));
        bus.emit(Event::new(EventType::NodeCompleted).execution(execution_id));

        let framed = rx.recv().await.expect("framed event");
        let event: Event = serde_json::from_str(&framed).expect("deserialize");
        assert_eq!(event.event_type, EventType::NodeCompleted);
    }

    #[test]
    fn dropped_client_is_evicted_on_next_emit() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        bus.add_streaming_client(tx, EventFilter::default());
        assert_eq!(bus.streaming_client_count(), 1);

        drop(rx);
        bus.emit(Event::new(EventType::NodeStarted));

        assert_eq!(bus.streaming_client_count(), 0);
    }

    #[test]
    fn remove_streaming_client_is_idempotent() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = bus.add_streaming_client(tx, EventFilter::default());

        assert!(bus.remove_streaming_client(id));
        assert!(!bus.remove_streaming_client(id));
    }
}
