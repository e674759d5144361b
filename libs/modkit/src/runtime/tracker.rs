//! Reference lifecycle tracking for module instances.
//!
//! The registry owns instances strongly. When the supervisor tears one down it
//! calls [`ReferenceTracker::unregister`], which queues a weak handle; a later
//! [`ReferenceTracker::cleanup`] pass reports whether the object was actually
//! dropped or is still held somewhere else. Purely diagnostic: nothing here
//! reloads or otherwise reacts to a vanished instance.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::time::Instant;

use crate::contracts::Module;
use crate::registry::ModuleName;
use crate::runtime::instances::ModuleInstance;

struct Release {
    module: ModuleName,
    instance_id: String,
    released_at: Instant,
    handle: Weak<dyn Module>,
}

/// Outcome of one cleanup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Instances confirmed dropped in this pass.
    pub released: usize,
    /// Instances unregistered but still referenced elsewhere; re-queued.
    pub lingering: usize,
}

#[derive(Default)]
pub struct ReferenceTracker {
    live: DashMap<ModuleName, String>,
    released: Mutex<Vec<Release>>,
}

impl std::fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTracker")
            .field("live", &self.live.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, instance: &ModuleInstance) {
        self.live
            .insert(instance.module, instance.instance_id.clone());
        tracing::debug!(
            module = instance.module,
            instance_id = %instance.instance_id,
            "Tracking module instance"
        );
    }

    pub fn unregister(&self, instance: &ModuleInstance) {
        // A restart may already have registered a newer instance under the same name.
        self.live
            .remove_if(instance.module, |_, id| *id == instance.instance_id);
        self.released.lock().push(Release {
            module: instance.module,
            instance_id: instance.instance_id.clone(),
            released_at: Instant::now(),
            handle: Arc::downgrade(instance.handle()),
        });
    }

    /// Drain the release queue and log what happened to each instance.
    pub fn cleanup(&self) -> CleanupReport {
        let drained = std::mem::take(&mut *self.released.lock());
        let mut report = CleanupReport::default();
        let mut still_held = Vec::new();

        for release in drained {
            if release.handle.strong_count() == 0 {
                report.released += 1;
                tracing::info!(
                    module = release.module,
                    instance_id = %release.instance_id,
                    "Module instance released"
                );
            } else {
                report.lingering += 1;
                tracing::warn!(
                    module = release.module,
                    instance_id = %release.instance_id,
                    held_for_ms = release.released_at.elapsed().as_millis() as u64,
                    strong_refs = release.handle.strong_count(),
                    "Module instance still referenced after unload"
                );
                still_held.push(release);
            }
        }

        if !still_held.is_empty() {
            self.released.lock().extend(still_held);
        }
        report
    }

    /// Releases waiting for a cleanup pass to confirm them.
    pub fn pending(&self) -> usize {
        self.released.lock().len()
    }

    pub fn is_tracked(&self, module: &str) -> bool {
        self.live.contains_key(module)
    }

    pub fn tracked(&self) -> usize {
        self.live.len()
    }
}
