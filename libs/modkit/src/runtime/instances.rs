//! Instance registry - the live module instances owned by the supervisor

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::contracts::Module;
use crate::registry::{ModuleName, Priority};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    /// `initialize` returned successfully; not started yet.
    Initialized,
    Running,
    /// The last `start` call failed.
    Faulted,
    Stopped,
}

/// Runtime state of an instance (guarded by RwLock for safe mutation)
#[derive(Clone, Debug)]
pub struct InstanceRuntimeState {
    pub state: InstanceState,
    pub since: Instant,
}

/// A constructed, initialized module together with its bookkeeping.
pub struct ModuleInstance {
    pub module: ModuleName,
    pub instance_id: String,
    pub priority: Priority,
    pub loaded_at: Instant,
    handle: Arc<dyn Module>,
    inner: parking_lot::RwLock<InstanceRuntimeState>,
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.module)
            .field("instance_id", &self.instance_id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ModuleInstance {
    pub fn new(module: ModuleName, priority: Priority, handle: Arc<dyn Module>) -> Self {
        let now = Instant::now();
        Self {
            module,
            instance_id: uuid::Uuid::new_v4().to_string(),
            priority,
            loaded_at: now,
            handle,
            inner: parking_lot::RwLock::new(InstanceRuntimeState {
                state: InstanceState::Initialized,
                since: now,
            }),
        }
    }

    pub fn handle(&self) -> &Arc<dyn Module> {
        &self.handle
    }

    pub fn state(&self) -> InstanceState {
        self.inner.read().state
    }

    /// When the instance entered its current state.
    pub fn state_since(&self) -> Instant {
        self.inner.read().since
    }

    pub fn set_state(&self, state: InstanceState) {
        let mut inner = self.inner.write();
        if inner.state != state {
            inner.state = state;
            inner.since = Instant::now();
        }
    }
}

/// Mapping from module name to its single live instance.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    inner: DashMap<ModuleName, Arc<ModuleInstance>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the module already has a live instance.
    /// Returns false (and keeps the existing one) on conflict.
    pub fn insert(&self, instance: Arc<ModuleInstance>) -> bool {
        match self.inner.entry(instance.module) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(instance);
                true
            }
        }
    }

    pub fn remove(&self, module: &str) -> Option<Arc<ModuleInstance>> {
        self.inner.remove(module).map(|(_, inst)| inst)
    }

    pub fn get(&self, module: &str) -> Option<Arc<ModuleInstance>> {
        self.inner.get(module).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, module: &str) -> bool {
        self.inner.contains_key(module)
    }

    pub fn names(&self) -> Vec<ModuleName> {
        self.inner.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
