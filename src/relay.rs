use std::sync::Arc;
use std::time::Duration;

use crate::access::AccessGuard;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::dispatch::NotificationDispatcher;
use crate::gate::BusyGate;
use crate::persistence::Persistence;
use crate::router::Router;
use crate::transport::Transport;
use crate::watcher::TimeoutWatcher;
use crate::workflow::{WorkflowCatalog, WorkflowEngine};

/// Every long-lived component, wired together.
pub struct Relay {
    pub gate: Arc<BusyGate>,
    pub store: Arc<dyn Persistence>,
    pub transport: Arc<dyn Transport>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub engine: Arc<WorkflowEngine>,
    pub router: Arc<Router>,
    pub watcher: Arc<TimeoutWatcher>,
}

impl Relay {
    pub fn build(
        config: &RelayConfig,
        store: Arc<dyn Persistence>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::build_with_clock(config, store, transport, Arc::new(SystemClock))
    }

    pub fn build_with_clock(
        config: &RelayConfig,
        store: Arc<dyn Persistence>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = Arc::new(BusyGate::with_clock(clock));
        let guard = AccessGuard::new(config.bot.admin_ids.iter().copied());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            gate.clone(),
            store.clone(),
            transport.clone(),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            gate.clone(),
            dispatcher.clone(),
            transport.clone(),
            store.clone(),
            WorkflowCatalog::standard(&config.gate),
            guard.clone(),
        ));
        let router = Arc::new(Router::new(
            engine.clone(),
            dispatcher.clone(),
            gate.clone(),
            store.clone(),
            transport.clone(),
            guard,
            config.gate.clone(),
        ));
        let watcher = Arc::new(TimeoutWatcher::new(
            gate.clone(),
            dispatcher.clone(),
            transport.clone(),
            Duration::from_secs(config.gate.sweep_interval_seconds.max(1)),
        ));

        Self {
            gate,
            store,
            transport,
            dispatcher,
            engine,
            router,
            watcher,
        }
    }
}
