//! Loading order - the start/stop sequence of loaded modules.

use crate::registry::{ModuleName, Priority};

/// Loaded modules sorted ascending by [`Priority`], ties kept in insertion order.
///
/// Governs start and stop sequencing only; dependency order is enforced
/// separately when modules are loaded.
#[derive(Debug, Default, Clone)]
pub struct LoadingOrder {
    entries: Vec<(ModuleName, Priority)>,
}

impl LoadingOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first entry with a strictly later priority, or append.
    /// Returns the position of `name`. Re-inserting a present name is a no-op.
    pub fn insert(&mut self, name: ModuleName, priority: Priority) -> usize {
        if let Some(pos) = self.position(name) {
            return pos;
        }
        let pos = self
            .entries
            .iter()
            .position(|&(_, p)| p > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (name, priority));
        pos
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|&(n, _)| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> Vec<ModuleName> {
        self.entries.iter().map(|&(n, _)| n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
