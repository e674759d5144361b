//! Periodic stall monitor.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::runtime::supervisor::ModuleSupervisor;

pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the loop and wait for it to exit. A pass in flight stops before
    /// its next module; a restart already under way runs to completion.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Stall monitor task ended abnormally");
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(supervisor: Arc<ModuleSupervisor>) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(supervisor, cancel.clone()));
    MonitorHandle { cancel, task }
}

async fn run(supervisor: Arc<ModuleSupervisor>, cancel: CancellationToken) {
    let period = supervisor.config().monitor_interval;
    // First pass one full period after spawn, not immediately.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        interval_ms = period.as_millis() as u64,
        threshold_ms = supervisor.config().stall_threshold.as_millis() as u64,
        "Stall monitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let restarted = supervisor.stall_pass(&cancel).await;
        if !restarted.is_empty() {
            tracing::info!(modules = ?restarted, "Stall monitor restarted modules");
        }
        supervisor.cleanup_references();
    }

    tracing::info!("Stall monitor stopped");
}
