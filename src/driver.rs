//! Reads inbound interactions as JSON lines and feeds them to the router.
//!
//! Each subject gets its own worker task fed through a bounded channel, so
//! one subject's interactions are handled strictly in arrival order while
//! different subjects proceed concurrently. The reader never waits on a
//! worker: a full backlog drops the line, and idle workers retire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::router::{Inbound, Router};
use crate::telemetry::{create_interaction_span, generate_correlation_id};
use crate::SubjectId;

const WORKER_BACKLOG: usize = 64;
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverReport {
    pub accepted: usize,
    pub malformed: usize,
    /// Interactions dropped because their subject's backlog was full.
    pub overflowed: usize,
    /// Workers spawned, counting respawns after an idle retirement.
    pub workers_started: usize,
}

pub struct InboundDriver {
    router: Arc<Router>,
    workers: HashMap<SubjectId, (mpsc::Sender<Inbound>, JoinHandle<()>)>,
    backlog: usize,
    idle_timeout: Duration,
    workers_started: usize,
}

impl InboundDriver {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            workers: HashMap::new(),
            backlog: WORKER_BACKLOG,
            idle_timeout: WORKER_IDLE_TIMEOUT,
            workers_started: 0,
        }
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// How long a worker waits for its next interaction before retiring.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Consume `input` until EOF or shutdown, then wait for every worker to
    /// finish what it already received.
    pub async fn run<R>(mut self, input: R, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<DriverReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut report = DriverReport::default();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, no longer reading input");
                        break;
                    }
                    continue;
                }
            };
            let Some(line) = line else {
                info!("Input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Inbound>(&line) {
                Ok(inbound) => {
                    report.accepted += 1;
                    if !self.dispatch(inbound) {
                        report.overflowed += 1;
                    }
                }
                Err(err) => {
                    report.malformed += 1;
                    warn!(error = %err, "Skipping malformed inbound line");
                }
            }
        }

        report.workers_started = self.workers_started;
        self.finish().await;
        Ok(report)
    }

    /// Hand `inbound` to its subject's worker without waiting. Returns false
    /// when the interaction was dropped.
    fn dispatch(&mut self, inbound: Inbound) -> bool {
        let subject_id = inbound.subject;
        let inbound = match self.workers.get(&subject_id) {
            Some((sender, _)) => match sender.try_send(inbound) {
                Ok(()) => return true,
                Err(TrySendError::Full(_)) => {
                    warn!(subject_id = %subject_id, backlog = self.backlog, "Subject backlog full, interaction dropped");
                    return false;
                }
                Err(TrySendError::Closed(inbound)) => inbound,
            },
            None => inbound,
        };

        let sender = self.spawn_worker(subject_id);
        match sender.try_send(inbound) {
            Ok(()) => true,
            Err(_) => {
                warn!(subject_id = %subject_id, "Fresh worker refused interaction");
                false
            }
        }
    }

    fn spawn_worker(&mut self, subject_id: SubjectId) -> mpsc::Sender<Inbound> {
        let before = self.workers.len();
        self.workers.retain(|_, (sender, _)| !sender.is_closed());
        let retired = before - self.workers.len();
        if retired > 0 {
            debug!(retired = retired, "Pruned idle workers");
        }

        let (sender, receiver) = mpsc::channel(self.backlog);
        let worker = tokio::spawn(subject_worker(
            self.router.clone(),
            receiver,
            self.idle_timeout,
        ));
        self.workers.insert(subject_id, (sender.clone(), worker));
        self.workers_started += 1;
        debug!(subject_id = %subject_id, "Worker started");
        sender
    }

    async fn finish(self) {
        let workers = self.workers.len();
        for (subject_id, (sender, worker)) in self.workers {
            drop(sender);
            if let Err(err) = worker.await {
                warn!(subject_id = %subject_id, error = %err, "Worker ended abnormally");
            }
        }
        info!(workers = workers, "All subject workers drained");
    }
}

async fn subject_worker(router: Arc<Router>, mut receiver: mpsc::Receiver<Inbound>, idle_timeout: Duration) {
    loop {
        let inbound = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(_) => {
                // Close first so the driver respawns instead of queueing here,
                // then handle anything that slipped in before the close.
                receiver.close();
                while let Ok(inbound) = receiver.try_recv() {
                    handle(&router, inbound).await;
                }
                return;
            }
        };
        handle(&router, inbound).await;
    }
}

async fn handle(router: &Router, inbound: Inbound) {
    let correlation_id = generate_correlation_id();
    let span = create_interaction_span(inbound.subject, inbound.kind(), &correlation_id);
    router.handle(inbound).instrument(span).await;
}
