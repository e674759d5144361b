use async_trait::async_trait;

/// Lifecycle contract every pluggable subsystem implements.
///
/// The supervisor drives the calls in this order: `initialize` once after all
/// dependencies are initialized, `start` (possibly again after a restart),
/// then `stop` and `unload` on teardown. Any call may fail or take a long time;
/// the supervisor never cancels a call in flight, it only measures how long
/// `initialize` and `start` took once they return.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Wire the module up. Dependencies are already initialized at this point.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Begin normal operation.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop normal operation. Failures are logged by the supervisor, never propagated.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release everything acquired in `initialize`. Called right after `stop`.
    async fn unload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
