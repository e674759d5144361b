//! Sources of candidate module types.

use crate::registry::{ModuleDescriptor, Registrator};

/// Supplies the module types present in the process.
///
/// Consulted only by a full `load_all_modules`; the supervisor treats the
/// result as opaque.
pub trait ModuleDiscovery: Send + Sync {
    fn discover(&self) -> Vec<ModuleDescriptor>;
}

/// Collects every [`Registrator`] submitted through `inventory` by linked crates.
///
/// Link order is not stable, so descriptors are sorted by name. Priority ties
/// in the loading order are therefore broken alphabetically.
#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryDiscovery;

impl ModuleDiscovery for InventoryDiscovery {
    fn discover(&self) -> Vec<ModuleDescriptor> {
        let mut found = Vec::new();
        for r in ::inventory::iter::<Registrator> {
            found.push(r.0());
        }
        found.sort_by_key(|d| d.name);
        found
    }
}

/// A fixed, caller-supplied list of descriptors, returned in the given order.
#[derive(Debug, Default, Clone)]
pub struct StaticDiscovery(Vec<ModuleDescriptor>);

impl StaticDiscovery {
    pub fn new(descriptors: Vec<ModuleDescriptor>) -> Self {
        Self(descriptors)
    }
}

impl ModuleDiscovery for StaticDiscovery {
    fn discover(&self) -> Vec<ModuleDescriptor> {
        self.0.clone()
    }
}
