//! Name-keyed workflow registry.
//!
//! The registry stores at most one definition per name, links workflows as
//! they are added, and hands out defensive copies so callers can never mutate
//! stored state. Each stored workflow lazily builds its backend execution
//! plan on first request and caches it until the definition is replaced.
//!
//! Every successful operation emits a registry event on the bus.

use crate::backend::{Backend, NodeResource, node_resources};
use crate::error::RegistryError;
use crate::node::NodeCatalog;
use crate::workflow::{Workflow, WorkflowInfo, WorkflowOptions};
use cascade_events::{Event, EventBus, EventType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Builds a backend execution plan for a stored workflow.
pub type BackendBuilder = Arc<dyn Fn(&Workflow) -> Arc<dyn Backend> + Send + Sync>;

/// A stored workflow prepared for execution.
pub struct Prepared {
    /// Deep copy of the linked definition.
    pub workflow: Workflow,
    /// The backend execution plan.
    pub backend: Arc<dyn Backend>,
    /// Per-node resource vector, parallel to `workflow.nodes`.
    pub handles: Vec<NodeResource>,
}

struct Entry {
    workflow: Workflow,
    backend: Option<Arc<dyn Backend>>,
}

struct RegistryState {
    counter: u64,
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

/// Name-keyed storage of workflow definitions.
pub struct WorkflowRegistry {
    bus: Arc<EventBus>,
    catalog: Arc<NodeCatalog>,
    builder: BackendBuilder,
    state: Mutex<RegistryState>,
}

impl WorkflowRegistry {
    /// Creates a registry publishing on `bus`, linking against `catalog`,
    /// and building backend plans with `builder`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>, catalog: Arc<NodeCatalog>, builder: BackendBuilder) -> Self {
        Self {
            bus,
            catalog,
            builder,
            state: Mutex::new(RegistryState {
                counter: 0,
                order: Vec::new(),
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event_type: EventType, name: &str) {
        self.bus.emit(Event::new(event_type).workflow(name));
    }

    /// Creates and stores a new empty workflow under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken.
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workflow, RegistryError> {
        let mut workflow = Workflow {
            info: Some(WorkflowInfo {
                name: Some(name.to_string()),
                description: description.map(str::to_string),
                ..Default::default()
            }),
            options: Some(WorkflowOptions::default()),
            ..Default::default()
        };
        workflow.link(&self.catalog)?;

        {
            let mut state = self.lock();
            if state.entries.contains_key(name) {
                return Err(RegistryError::DuplicateName {
                    name: name.to_string(),
                });
            }
            state.order.push(name.to_string());
            state.entries.insert(
                name.to_string(),
                Entry {
                    workflow: workflow.clone(),
                    backend: None,
                },
            );
        }

        self.emit(EventType::RegistryCreated, name);
        Ok(workflow)
    }

    /// Links and stores a workflow, returning the name it was stored under.
    ///
    /// The name is taken from the argument, then from `workflow.info.name`,
    /// and otherwise assigned as `workflow_{N}` from a monotonic counter.
    /// Adding over an existing name replaces the definition and drops its
    /// cached backend plan.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] if the workflow fails to link.
    pub fn add(&self, mut workflow: Workflow, name: Option<&str>) -> Result<String, RegistryError> {
        workflow.link(&self.catalog)?;

        let name = {
            let mut state = self.lock();
            let name = match name {
                Some(name) => name.to_string(),
                None => match workflow.name() {
                    Some(name) => name.to_string(),
                    None => {
                        state.counter += 1;
                        format!("workflow_{}", state.counter)
                    }
                },
            };
            if !state.entries.contains_key(&name) {
                state.order.push(name.clone());
            }
            state.entries.insert(
                name.clone(),
                Entry {
                    workflow,
                    backend: None,
                },
            );
            name
        };

        self.emit(EventType::RegistryAdded, &name);
        Ok(name)
    }

    /// Returns a deep copy of the stored workflow, or `None` if absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Workflow> {
        let workflow = self.lock().entries.get(name).map(|e| e.workflow.clone())?;
        self.emit(EventType::RegistryGot, name);
        Some(workflow)
    }

    /// Returns deep copies of every stored workflow, in insertion order.
    #[must_use]
    pub fn get_all(&self) -> Vec<(String, Workflow)> {
        let all: Vec<_> = {
            let state = self.lock();
            state
                .order
                .iter()
                .filter_map(|name| {
                    state
                        .entries
                        .get(name)
                        .map(|e| (name.clone(), e.workflow.clone()))
                })
                .collect()
        };
        self.emit(EventType::RegistryGot, "");
        all
    }

    /// Returns the stored names in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let names = self.lock().order.clone();
        self.emit(EventType::RegistryListed, "");
        names
    }

    /// Removes the named workflow; `None` clears the registry.
    ///
    /// Returns false if a name was given but not present.
    pub fn remove(&self, name: Option<&str>) -> bool {
        match name {
            None => {
                let mut state = self.lock();
                state.entries.clear();
                state.order.clear();
                state.counter = 0;
                drop(state);
                self.emit(EventType::RegistryCleared, "");
                true
            }
            Some(name) => {
                let removed = {
                    let mut state = self.lock();
                    let removed = state.entries.remove(name).is_some();
                    state.order.retain(|stored| stored != name);
                    removed
                };
                if removed {
                    self.emit(EventType::RegistryRemoved, name);
                }
                removed
            }
        }
    }

    /// Prepares the named workflow for execution.
    ///
    /// The backend plan is built on first request and cached until the
    /// definition is replaced. Returns `None` if the name is absent.
    #[must_use]
    pub fn implementation(&self, name: &str) -> Option<Prepared> {
        let prepared = {
            let mut state = self.lock();
            let entry = state.entries.get_mut(name)?;
            let backend = match &entry.backend {
                Some(backend) => backend.clone(),
                None => {
                    let backend = (self.builder)(&entry.workflow);
                    entry.backend = Some(backend.clone());
                    backend
                }
            };
            Prepared {
                handles: node_resources(&entry.workflow),
                workflow: entry.workflow.clone(),
                backend,
            }
        };
        self.emit(EventType::RegistryPrepared, name);
        Some(prepared)
    }

    /// Returns the number of stored workflows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
