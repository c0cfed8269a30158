//! Periodic device-location sampling while a route leg is navigated.
//!
//! The sampler runs in its own tokio task and forwards each valid fix to
//! the controller over an mpsc channel. At most one sampler is alive per
//! monitor: [`LocationMonitor::start`] always stops the previous one first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use questwalk_shared::error::LocationError;
use questwalk_shared::types::Location;

/// Device location source (GPS / platform location services).
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Location, LocationError>;
}

/// A validated fix, tagged with the leg that was being navigated when it was
/// taken so late samples from a stopped sampler can be told apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub leg: u64,
    pub location: Location,
}

struct PollTask {
    leg: u64,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct LocationMonitor {
    interval: Duration,
    fix_timeout: Duration,
    task: Option<PollTask>,
}

impl LocationMonitor {
    pub fn new(interval: Duration, fix_timeout: Duration) -> Self {
        Self {
            interval,
            fix_timeout,
            task: None,
        }
    }

    /// Start sampling for `leg`. A sampler that is already running is
    /// stopped before the new one is spawned.
    pub fn start(
        &mut self,
        provider: Arc<dyn LocationProvider>,
        leg: u64,
        sink: mpsc::Sender<LocationSample>,
    ) {
        self.stop();

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval = self.interval;
        let fix_timeout = self.fix_timeout;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let fix = match tokio::time::timeout(fix_timeout, provider.current_location()).await {
                            Ok(Ok(location)) => location.validated(),
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(LocationError::Unavailable("location fix timed out".into())),
                        };

                        match fix {
                            Ok(location) => {
                                if sink.send(LocationSample { leg, location }).await.is_err() {
                                    debug!(leg, "Sample channel closed, stopping location polling");
                                    break;
                                }
                            }
                            Err(e) => debug!(leg, error = %e, "Skipping location sample"),
                        }
                    }
                }
            }

            debug!(leg, "Location polling loop terminated");
        });

        info!(leg, interval_ms = interval.as_millis() as u64, "Location polling started");
        self.task = Some(PollTask {
            leg,
            stop_tx,
            handle,
        });
    }

    /// Stop sampling. Calling this with nothing running is a no-op.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(());
            task.handle.abort();
            info!(leg = task.leg, "Location polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    /// Leg the running sampler belongs to.
    pub fn active_leg(&self) -> Option<u64> {
        self.task.as_ref().map(|t| t.leg)
    }
}

impl Drop for LocationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
