// Supply Relay Library - busy-gated notifications for a supply-request chat bot
// This exposes the core components for testing and integration

pub mod access;
pub mod actions;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod driver;
pub mod error;
pub mod gate;
pub mod persistence;
pub mod relay;
pub mod render;
pub mod router;
pub mod shutdown;
pub mod telemetry;
pub mod transport;
pub mod watcher;
pub mod workflow;

/// Opaque chat-platform id of an end user.
pub type SubjectId = i64;

// Re-export key types for easy access
pub use access::{AccessGuard, Requirement};
pub use actions::ActionCode;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{config, init_config, GateConfig, RelayConfig};
pub use dispatch::{Delivery, FlushReport, NotificationDispatcher};
pub use driver::InboundDriver;
pub use error::RelayError;
pub use gate::{Admission, BusyGate, BusyRecord, EventKind, QueuedEvent};
pub use persistence::{InMemoryStore, Persistence};
pub use relay::Relay;
pub use router::{Inbound, InboundPayload, Router};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_interaction_span, generate_correlation_id, init_telemetry};
pub use transport::{JsonLinesTransport, Transport};
pub use watcher::{SweepReport, TimeoutWatcher};
pub use workflow::{WorkflowEngine, WorkflowInput, WorkflowKind};
