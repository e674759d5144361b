// Modules linked into the host. Each one submits its descriptor through
// inventory; the supervisor picks them up on `load_all_modules`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modkit::{async_trait, inventory, Module, ModuleDescriptor, Priority, Registrator};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bootstrap module: brought up before everything else so that the other
/// modules' lifecycle events land after the host banner.
#[derive(Default)]
pub struct LoggerModule {
    started_at: Mutex<Option<Instant>>,
}

#[async_trait]
impl Module for LoggerModule {
    async fn initialize(&self) -> anyhow::Result<()> {
        tracing::info!(pid = std::process::id(), "Logger module ready");
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        *self.started_at.lock() = Some(Instant::now());
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let started = self.started_at.lock().take();
        if let Some(started) = started {
            tracing::info!(
                uptime_ms = started.elapsed().as_millis() as u64,
                "Logger module stopping"
            );
        }
        Ok(())
    }
}

inventory::submit! {
    Registrator(|| ModuleDescriptor::of::<LoggerModule>("logger").with_priority(Priority::Highest))
}

/// Emits a periodic heartbeat from a background task while running.
pub struct HeartbeatModule {
    period: Duration,
    beats: Arc<AtomicU64>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Default for HeartbeatModule {
    fn default() -> Self {
        Self::with_period(Duration::from_secs(30))
    }
}

impl HeartbeatModule {
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            beats: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Module for HeartbeatModule {
    async fn initialize(&self) -> anyhow::Result<()> {
        if self.period.is_zero() {
            anyhow::bail!("heartbeat period must be greater than zero");
        }
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let beats = Arc::clone(&self.beats);
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::debug!(beat = n, "heartbeat");
                    }
                }
            }
        });

        let previous = self.worker.lock().replace((cancel, task));
        if let Some((old, _)) = previous {
            old.cancel();
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let worker = self.worker.lock().take();
        if let Some((cancel, task)) = worker {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Heartbeat task ended abnormally");
            }
        }
        tracing::info!(beats = self.beats(), "Heartbeat stopped");
        Ok(())
    }
}

inventory::submit! {
    Registrator(|| {
        ModuleDescriptor::of::<HeartbeatModule>("heartbeat")
            .with_deps(&["logger"])
            .with_priority(Priority::Low)
    })
}
