//! Module descriptors and the catalog of module types the supervisor knows about.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contracts::Module;
use crate::error::SupervisorError;

/// Common module identifier
pub type ModuleName = &'static str;

/// Start/stop rank. Earlier variants start earlier and are torn down later.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Highest,
    High,
    #[default]
    Normal,
    Low,
    Lowest,
}

/// Zero-argument constructor for a module instance.
pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync>;

/// Static registration record: identity, dependencies, priority and constructor.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: ModuleName,
    pub deps: &'static [ModuleName],
    pub priority: Priority,
    factory: ModuleFactory,
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    pub fn new<F>(name: ModuleName, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            name,
            deps: &[],
            priority: Priority::default(),
            factory: Arc::new(factory),
        }
    }

    /// Descriptor for a module that is built with `Default`.
    pub fn of<M: Module + Default>(name: ModuleName) -> Self {
        Self::new(name, || Ok(Arc::new(M::default()) as Arc<dyn Module>))
    }

    pub fn with_deps(mut self, deps: &'static [ModuleName]) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Build a fresh instance. Every call produces a new object.
    pub fn construct(&self) -> anyhow::Result<Arc<dyn Module>> {
        (self.factory)()
    }
}

/// The function type submitted via `inventory::submit!` by crates that ship modules.
pub struct Registrator(pub fn() -> ModuleDescriptor);

inventory::collect!(Registrator);

/// Descriptors known to the supervisor, in discovery order.
/// Keys are module **names**; uniqueness is enforced on insert.
#[derive(Debug, Default, Clone)]
pub struct ModuleCatalog {
    entries: Vec<ModuleDescriptor>,
    index: HashMap<ModuleName, usize>,
}

impl ModuleCatalog {
    /// Build a catalog from discovery output. Later duplicates are logged and dropped.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        let mut catalog = Self::default();
        for d in descriptors {
            if let Err(e) = catalog.insert(d) {
                tracing::error!(error = %e, "Ignoring duplicate module descriptor");
            }
        }
        catalog
    }

    pub fn insert(&mut self, descriptor: ModuleDescriptor) -> Result<(), SupervisorError> {
        if self.index.contains_key(descriptor.name) {
            return Err(SupervisorError::DuplicateModule(descriptor.name.to_string()));
        }
        self.index.insert(descriptor.name, self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<ModuleName> {
        self.entries.iter().map(|d| d.name).collect()
    }

    pub fn descriptors(&self) -> &[ModuleDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
