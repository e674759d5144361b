//! Module Supervisor - orchestrates the module lifecycle
//!
//! The supervisor owns the catalog of known module types, the live instance
//! registry and the loading order. Structural transitions (load, start, stop,
//! unload, restart) are serialized by a single async mutex; the instance
//! registry and sample windows can be read without it.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use modkit_bootstrap::SupervisorConfig;

use crate::contracts::Module;
use crate::discovery::{ModuleDiscovery, StaticDiscovery};
use crate::error::{error_chain, Phase, SupervisorError};
use crate::registry::{ModuleCatalog, ModuleDescriptor, ModuleName};
use crate::runtime::instances::{InstanceRegistry, InstanceState, ModuleInstance};
use crate::runtime::monitor::{self, MonitorHandle};
use crate::runtime::order::LoadingOrder;
use crate::runtime::sampler::ExecutionSampler;
use crate::runtime::tracker::{CleanupReport, ReferenceTracker};

/// A module that could not be brought up during a full load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadFailure {
    pub module: ModuleName,
    pub phase: Phase,
    /// The error and all of its sources, rendered.
    pub error: String,
}

/// Summary of a `load_all_modules` pass.
#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    /// Loaded modules, in loading order.
    pub loaded: Vec<ModuleName>,
    pub failed: Vec<LoadFailure>,
}

/// State only touched while holding the transition lock.
#[derive(Default)]
struct Transitions {
    catalog: ModuleCatalog,
    order: LoadingOrder,
    /// Modules currently being loaded, outermost first.
    loading: Vec<ModuleName>,
}

pub struct ModuleSupervisor {
    discovery: Arc<dyn ModuleDiscovery>,
    config: SupervisorConfig,
    instances: InstanceRegistry,
    sampler: ExecutionSampler,
    tracker: ReferenceTracker,
    restarts: DashMap<ModuleName, u32>,
    transitions: Mutex<Transitions>,
    monitor: parking_lot::Mutex<Option<MonitorHandle>>,
}

impl std::fmt::Debug for ModuleSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSupervisor")
            .field("config", &self.config)
            .field("loaded", &self.instances.names())
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl ModuleSupervisor {
    pub fn new(discovery: Arc<dyn ModuleDiscovery>, config: SupervisorConfig) -> Self {
        Self {
            sampler: ExecutionSampler::new(config.sample_window),
            discovery,
            config,
            instances: InstanceRegistry::new(),
            tracker: ReferenceTracker::new(),
            restarts: DashMap::new(),
            transitions: Mutex::new(Transitions::default()),
            monitor: parking_lot::Mutex::new(None),
        }
    }

    /// Supervisor over a fixed list of descriptors.
    pub fn from_descriptors(descriptors: Vec<ModuleDescriptor>, config: SupervisorConfig) -> Self {
        Self::new(Arc::new(StaticDiscovery::new(descriptors)), config)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Add a module type to the catalog without running discovery again.
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<(), SupervisorError> {
        let mut tx = self.transitions.lock().await;
        tracing::debug!(module = descriptor.name, "Registering module descriptor");
        tx.catalog.insert(descriptor)
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Load `name` and, first, everything it depends on.
    ///
    /// No-op when the module is already loaded. Construction and `initialize`
    /// failures are returned to the caller and leave the registry untouched
    /// for that module.
    pub async fn load_module(&self, name: &str) -> Result<(), SupervisorError> {
        let mut tx = self.transitions.lock().await;
        self.load_root(&mut tx, name).await
    }

    async fn load_root(&self, tx: &mut Transitions, name: &str) -> Result<(), SupervisorError> {
        // Only reachable under the lock, so nothing else can be loading. A load
        // cancelled mid-way (monitor shutdown) may have left entries behind.
        tx.loading.clear();
        self.load_locked(tx, name).await
    }

    fn load_locked<'a>(
        &'a self,
        tx: &'a mut Transitions,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), SupervisorError>> {
        Box::pin(async move {
            if self.instances.contains(name) {
                return Ok(());
            }

            let descriptor = tx
                .catalog
                .get(name)
                .cloned()
                .ok_or_else(|| SupervisorError::UnknownModule(name.to_string()))?;

            if let Some(start) = tx.loading.iter().position(|&n| n == descriptor.name) {
                let mut path = tx.loading[start..].to_vec();
                path.push(descriptor.name);
                return Err(SupervisorError::CycleDetected { path });
            }

            tx.loading.push(descriptor.name);
            let result = self.resolve_and_initialize(tx, &descriptor).await;
            tx.loading.pop();
            result
        })
    }

    async fn resolve_and_initialize(
        &self,
        tx: &mut Transitions,
        descriptor: &ModuleDescriptor,
    ) -> Result<(), SupervisorError> {
        let module = descriptor.name;

        for &dependency in descriptor.deps {
            self.load_locked(tx, dependency)
                .await
                .map_err(|source| SupervisorError::Dependency {
                    module,
                    dependency,
                    source: Box::new(source),
                })?;
        }

        let handle = descriptor
            .construct()
            .map_err(|source| SupervisorError::Construct { module, source })?;

        let started = Instant::now();
        handle
            .initialize()
            .await
            .map_err(|source| SupervisorError::Lifecycle {
                module,
                phase: Phase::Initialize,
                source,
            })?;
        let elapsed = started.elapsed();

        let instance = Arc::new(ModuleInstance::new(module, descriptor.priority, handle));
        // The registry is the source of truth; order, samples and tracker follow it.
        let inserted = self.instances.insert(Arc::clone(&instance));
        debug_assert!(inserted, "module '{module}' loaded twice under the transition lock");
        if !inserted {
            tracing::error!(
                module,
                instance_id = %instance.instance_id,
                "Module already has a live instance; discarding the new one"
            );
            return Ok(());
        }

        tx.order.insert(module, descriptor.priority);
        self.sampler.record(module, Phase::Initialize, elapsed);
        self.tracker.register(&instance);
        tracing::info!(
            module,
            instance_id = %instance.instance_id,
            priority = ?descriptor.priority,
            elapsed_ms = millis(elapsed),
            "Module initialized"
        );
        Ok(())
    }

    /// Tear everything down, rediscover, then load and start every module.
    ///
    /// The bootstrap module (if configured) is loaded and started before the
    /// rest. Failures are collected per module and never abort the pass.
    pub async fn load_all_modules(&self) -> LoadReport {
        let mut tx = self.transitions.lock().await;

        if !self.instances.is_empty() {
            tracing::info!("Unloading current modules before a full reload");
            self.unload_all_locked(&mut tx).await;
        }

        tx.catalog = ModuleCatalog::from_descriptors(self.discovery.discover());
        tx.order.clear();
        tx.loading.clear();
        self.sampler.clear();
        self.restarts.clear();
        tracing::info!(modules = ?tx.catalog.names(), "Modules discovered");

        let mut report = LoadReport::default();

        let bootstrap = self.bootstrap_module(&tx.catalog);
        if let Some(name) = bootstrap {
            tracing::info!(module = name, "Loading bootstrap module");
            match self.load_root(&mut tx, name).await {
                Ok(()) => {
                    if let Err(e) = self.start_locked(name).await {
                        report.failed.push(failure(name, Phase::Start, &e));
                    }
                }
                Err(e) => report.failed.push(failure(name, failed_phase(&e), &e)),
            }
        }

        for name in tx.catalog.names() {
            if Some(name) == bootstrap {
                continue;
            }
            if let Err(e) = self.load_root(&mut tx, name).await {
                report.failed.push(failure(name, failed_phase(&e), &e));
            }
        }

        report.failed.extend(self.start_in_order(&tx).await);
        report.loaded = tx.order.names();

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            order = ?report.loaded,
            "Module loading complete"
        );
        report
    }

    fn bootstrap_module(&self, catalog: &ModuleCatalog) -> Option<ModuleName> {
        let wanted = self.config.bootstrap_module.as_deref()?;
        let found = catalog.get(wanted).map(|d| d.name);
        if found.is_none() {
            tracing::warn!(module = wanted, "Configured bootstrap module was not discovered");
        }
        found
    }

    // ---------------------------------------------------------------------
    // Starting
    // ---------------------------------------------------------------------

    /// Start a single loaded module.
    pub async fn start_module(&self, name: &str) -> Result<(), SupervisorError> {
        let _tx = self.transitions.lock().await;
        self.start_locked(name).await
    }

    /// Start every loaded module that is not already running, in loading order.
    /// A failing module is logged and skipped.
    pub async fn start_modules(&self) -> Vec<LoadFailure> {
        let tx = self.transitions.lock().await;
        self.start_in_order(&tx).await
    }

    async fn start_in_order(&self, tx: &Transitions) -> Vec<LoadFailure> {
        let mut failed = Vec::new();
        for name in tx.order.names() {
            let running = self
                .instances
                .get(name)
                .is_some_and(|i| i.state() == InstanceState::Running);
            if running {
                continue;
            }
            if let Err(e) = self.start_locked(name).await {
                failed.push(failure(name, Phase::Start, &e));
            }
        }
        failed
    }

    async fn start_locked(&self, name: &str) -> Result<(), SupervisorError> {
        let instance = self
            .instances
            .get(name)
            .ok_or_else(|| SupervisorError::NotLoaded(name.to_string()))?;
        let module = instance.module;

        let started = Instant::now();
        let result = instance.handle().start().await;
        let elapsed = started.elapsed();
        self.sampler.record(module, Phase::Start, elapsed);

        match result {
            Ok(()) => {
                instance.set_state(InstanceState::Running);
                tracing::info!(
                    module,
                    instance_id = %instance.instance_id,
                    elapsed_ms = millis(elapsed),
                    "Module started"
                );
                Ok(())
            }
            Err(source) => {
                instance.set_state(InstanceState::Faulted);
                Err(SupervisorError::Lifecycle {
                    module,
                    phase: Phase::Start,
                    source,
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Stopping and unloading
    // ---------------------------------------------------------------------

    /// Stop and unload one module. Returns false when it was not loaded.
    ///
    /// `stop` and `unload` failures are logged, not returned.
    pub async fn stop_and_unload_module(&self, name: &str) -> bool {
        let mut tx = self.transitions.lock().await;
        self.stop_unload_locked(&mut tx, name).await
    }

    async fn stop_unload_locked(&self, tx: &mut Transitions, name: &str) -> bool {
        // The instance stays registered until `stop` and `unload` have returned,
        // so a teardown interrupted mid-call is still reachable by the next one.
        let Some(instance) = self.instances.get(name) else {
            return false;
        };
        let module = instance.module;

        let started = Instant::now();
        match instance.handle().stop().await {
            Ok(()) => tracing::info!(
                module,
                instance_id = %instance.instance_id,
                elapsed_ms = millis(started.elapsed()),
                "Module stopped"
            ),
            Err(e) => tracing::warn!(module, error = %error_chain(&*e), "Failed to stop module"),
        }
        instance.set_state(InstanceState::Stopped);

        let started = Instant::now();
        match instance.handle().unload().await {
            Ok(()) => tracing::info!(
                module,
                instance_id = %instance.instance_id,
                elapsed_ms = millis(started.elapsed()),
                "Module unloaded"
            ),
            Err(e) => tracing::warn!(module, error = %error_chain(&*e), "Failed to unload module"),
        }

        self.instances.remove(module);
        tx.order.remove(module);
        self.sampler.forget(module);
        self.tracker.unregister(&instance);
        drop(instance);
        self.tracker.cleanup();
        true
    }

    /// Unload every module, last in loading order first. Idempotent.
    pub async fn unload_all_modules(&self) {
        let mut tx = self.transitions.lock().await;
        self.unload_all_locked(&mut tx).await;
    }

    async fn unload_all_locked(&self, tx: &mut Transitions) {
        for name in tx.order.names().into_iter().rev() {
            self.stop_unload_locked(tx, name).await;
        }
        // Registry entries that never reached the order (should not happen).
        for name in self.instances.names() {
            tracing::warn!(module = name, "Unloading module missing from the loading order");
            self.stop_unload_locked(tx, name).await;
        }
        tx.order.clear();
        self.sampler.clear();
    }

    /// Cancel the stall monitor, then unload everything. Safe to call repeatedly.
    ///
    /// A restart already in progress is allowed to finish before teardown.
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.unload_all_modules().await;
        tracing::info!("Module supervisor shut down");
    }

    // ---------------------------------------------------------------------
    // Stall monitoring
    // ---------------------------------------------------------------------

    /// Full teardown and rebuild of one module: stop, unload, load, start.
    pub async fn restart_module(&self, name: &str) -> Result<(), SupervisorError> {
        let mut tx = self.transitions.lock().await;
        self.restart_locked(&mut tx, name).await
    }

    async fn restart_locked(&self, tx: &mut Transitions, name: &str) -> Result<(), SupervisorError> {
        let module = tx
            .catalog
            .get(name)
            .map(|d| d.name)
            .ok_or_else(|| SupervisorError::UnknownModule(name.to_string()))?;

        *self.restarts.entry(module).or_insert(0) += 1;
        tracing::info!(module, "Restarting module");

        self.stop_unload_locked(tx, module).await;
        self.load_root(tx, module).await?;
        self.start_locked(module).await
    }

    /// One monitoring pass: restart every module whose full sample window
    /// averages above the stall threshold. Returns the restarted modules.
    pub async fn check_stalls(&self) -> Vec<ModuleName> {
        self.stall_pass(&CancellationToken::new()).await
    }

    /// Monitoring pass that gives up between modules once `cancel` fires.
    pub(crate) async fn stall_pass(&self, cancel: &CancellationToken) -> Vec<ModuleName> {
        let threshold = self.config.stall_threshold;
        let mut restarted = Vec::new();

        for name in self.instances.names() {
            if cancel.is_cancelled() {
                break;
            }
            let Some(average) = self.stalled_average(name) else {
                continue;
            };

            tracing::warn!(
                module = name,
                average_ms = millis(average),
                threshold_ms = millis(threshold),
                "Module execution time above stall threshold"
            );
            if !self.config.auto_restart {
                continue;
            }

            match self.restart_if_stalled(name).await {
                Ok(true) => {
                    tracing::info!(module = name, "Module restarted after stall");
                    restarted.push(name);
                }
                Ok(false) => tracing::debug!(
                    module = name,
                    "Stall resolved by a concurrent transition; restart skipped"
                ),
                Err(e) => tracing::error!(
                    module = name,
                    error = %error_chain(&e),
                    "Module restart failed"
                ),
            }
        }
        restarted
    }

    fn stalled_average(&self, name: &str) -> Option<Duration> {
        self.sampler
            .full_average(name)
            .filter(|average| *average > self.config.stall_threshold)
    }

    /// Restart `name` only if, under the transition lock, it is still loaded
    /// and still stalled. Returns whether a restart happened.
    async fn restart_if_stalled(&self, name: &str) -> Result<bool, SupervisorError> {
        let mut tx = self.transitions.lock().await;
        if !self.instances.contains(name) || self.stalled_average(name).is_none() {
            return Ok(false);
        }
        self.restart_locked(&mut tx, name).await?;
        Ok(true)
    }

    /// Spawn the periodic stall monitor. Returns false if one is already running.
    pub fn spawn_monitor(self: &Arc<Self>) -> bool {
        let mut slot = self.monitor.lock();
        if slot.as_ref().is_some_and(|m| !m.is_finished()) {
            return false;
        }
        *slot = Some(monitor::spawn(Arc::clone(self)));
        true
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|m| !m.is_finished())
    }

    /// Drain the reference tracker's release queue.
    pub fn cleanup_references(&self) -> CleanupReport {
        self.tracker.cleanup()
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn is_loaded(&self, name: &str) -> bool {
        self.instances.contains(name)
    }

    pub fn loaded_modules(&self) -> Vec<ModuleName> {
        self.instances.names()
    }

    pub async fn loading_order(&self) -> Vec<ModuleName> {
        self.transitions.lock().await.order.names()
    }

    pub async fn known_modules(&self) -> Vec<ModuleName> {
        self.transitions.lock().await.catalog.names()
    }

    /// The live instance. Holding on to it past an unload shows up as a
    /// lingering reference in the tracker.
    pub fn instance(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.instances.get(name).map(|i| Arc::clone(i.handle()))
    }

    pub fn state(&self, name: &str) -> Option<InstanceState> {
        self.instances.get(name).map(|i| i.state())
    }

    pub fn samples(&self, name: &str) -> Vec<Duration> {
        self.sampler.samples(name)
    }

    pub fn rolling_average(&self, name: &str) -> Option<Duration> {
        self.sampler.rolling_average(name)
    }

    pub fn restart_count(&self, name: &str) -> u32 {
        self.restarts.get(name).map(|c| *c).unwrap_or(0)
    }

    pub fn pending_releases(&self) -> usize {
        self.tracker.pending()
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn failed_phase(err: &SupervisorError) -> Phase {
    match err.root() {
        SupervisorError::Lifecycle { phase, .. } => *phase,
        _ => Phase::Initialize,
    }
}

fn failure(module: ModuleName, phase: Phase, err: &SupervisorError) -> LoadFailure {
    let error = error_chain(err);
    tracing::error!(module, phase = %phase, error = %error, "Module failed to come up");
    LoadFailure {
        module,
        phase,
        error,
    }
}
