use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::services::InvitationManager;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Periodically transitions pending invitations past their expiry.
///
/// - Runs one sweep immediately, then every `interval`
/// - Sweep failures are logged and retried on the next tick
/// - Expiry is also applied lazily on read, so a missed sweep only delays
///   the stored status, never the behaviour
#[derive(Debug)]
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Spawn the sweeper on the current tokio runtime.
    pub fn spawn(invitations: InvitationManager, interval: Duration) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(sweep_loop(invitations, interval, shutdown_rx));

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

async fn sweep_loop(
    invitations: InvitationManager,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "invitation expiry sweeper started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                match invitations.expire_due().await {
                    Ok(expired) => debug!(expired, "expiry sweep finished"),
                    Err(err) => warn!(worker = "expiry_sweeper", error = %err, "expiry sweep failed"),
                }
            }
        }
    }

    info!("invitation expiry sweeper stopped");
}
