//! ModKit runtime runner.
//!
//! Phase order: **discover → load (bootstrap first) → start → monitor → wait → shutdown**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio_util::sync::CancellationToken;

use modkit_bootstrap::{wait_for_shutdown, SupervisorConfig};

use crate::discovery::{InventoryDiscovery, ModuleDiscovery};
use crate::runtime::supervisor::ModuleSupervisor;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the ModKit runner.
pub struct RunOptions {
    pub supervisor: SupervisorConfig,
    /// Where module types come from.
    pub discovery: Arc<dyn ModuleDiscovery>,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
}

impl RunOptions {
    /// Inventory discovery, stopped by OS signals.
    pub fn new(supervisor: SupervisorConfig) -> Self {
        Self {
            supervisor,
            discovery: Arc::new(InventoryDiscovery),
            shutdown: ShutdownOptions::Signals,
        }
    }
}

/// Full cycle: load → start → monitor → wait → shutdown.
///
/// Module failures during loading are logged and reported, not fatal; the
/// host keeps running with whatever came up.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let supervisor = Arc::new(ModuleSupervisor::new(opts.discovery, opts.supervisor));

    let report = supervisor.load_all_modules().await;
    if !report.failed.is_empty() {
        tracing::warn!(
            failed = ?report.failed.iter().map(|f| f.module).collect::<Vec<_>>(),
            "Some modules failed to come up"
        );
    }
    supervisor.spawn_monitor();

    cancel.cancelled().await;
    tracing::info!("Shutting down module supervisor");
    supervisor.shutdown().await;
    Ok(())
}
