//! Background sweep that returns subjects with expired busy windows to
//! normal mode.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::NotificationDispatcher;
use crate::gate::BusyGate;
use crate::render::EXPIRED_NOTICE;
use crate::transport::Transport;
use crate::SubjectId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<SubjectId>,
    pub notices_failed: usize,
    pub delivered: usize,
    pub dropped: usize,
}

pub struct TimeoutWatcher {
    gate: Arc<BusyGate>,
    dispatcher: Arc<NotificationDispatcher>,
    transport: Arc<dyn Transport>,
    interval: Duration,
}

impl TimeoutWatcher {
    pub fn new(
        gate: Arc<BusyGate>,
        dispatcher: Arc<NotificationDispatcher>,
        transport: Arc<dyn Transport>,
        interval: Duration,
    ) -> Self {
        Self {
            gate,
            dispatcher,
            transport,
            interval,
        }
    }

    /// One pass: notify every expired subject, then flush its queue. The
    /// flush runs even when the notice could not be sent.
    pub async fn sweep(&self) -> SweepReport {
        let expired = self.gate.expired_ids().await;
        let mut report = SweepReport::default();

        for &subject_id in &expired {
            if let Err(err) = self
                .transport
                .send_text(subject_id, EXPIRED_NOTICE.to_string(), None)
                .await
            {
                warn!(subject_id = %subject_id, error = %err, "Failed to send expiry notice");
                report.notices_failed += 1;
            }

            let flushed = self.dispatcher.flush(subject_id).await;
            report.delivered += flushed.delivered;
            report.dropped += flushed.dropped;
        }

        if !expired.is_empty() {
            info!(expired = expired.len(), "Expired busy windows swept");
        }
        report.expired = expired;
        report
    }

    /// Sweep on every tick until `shutdown` flips to true or its sender goes
    /// away. A sweep in progress always completes.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_seconds = self.interval.as_secs(), "Timeout watcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(expired = report.expired.len(), "Sweep finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Timeout watcher stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
