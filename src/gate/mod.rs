//! Per-subject busy gate.
//!
//! While a subject is inside a guided workflow it is marked busy for a
//! bounded window. Notifications addressed to a busy subject are queued here
//! and handed back, in order, when the window is cleared.
//!
//! All state sits behind one async mutex. Every operation holds it only for
//! in-memory bookkeeping; no delivery ever happens under the lock.

pub mod event;

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::SubjectId;

pub use event::{EventKind, QueuedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyRecord {
    pub subject_id: SubjectId,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of offering an event to the gate.
#[derive(Debug, PartialEq)]
pub enum Admission {
    /// A live window holds the subject; the event joined its queue.
    Queued,
    /// No live window. `leftovers` were queued under a window that has
    /// since lapsed and go out before `event`.
    Free {
        event: QueuedEvent,
        leftovers: Vec<QueuedEvent>,
    },
}

#[derive(Debug, Default)]
struct GateState {
    records: HashMap<SubjectId, BusyRecord>,
    pending: HashMap<SubjectId, VecDeque<QueuedEvent>>,
}

#[derive(Debug)]
pub struct BusyGate {
    clock: Arc<dyn Clock>,
    state: Mutex<GateState>,
}

impl Default for BusyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl BusyGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Install or replace the subject's busy window. A second call does not
    /// extend the first; it overwrites reason and expiry.
    pub async fn set_busy(&self, subject_id: SubjectId, reason: &str, ttl_seconds: u64) {
        let expires_at = expiry(self.clock.now(), ttl_seconds);
        let record = BusyRecord {
            subject_id,
            reason: reason.to_string(),
            expires_at,
        };

        let mut state = self.state.lock().await;
        let replaced = state.records.insert(subject_id, record);
        drop(state);

        info!(
            subject_id = %subject_id,
            reason = %reason,
            ttl_seconds = ttl_seconds,
            replaced = replaced.is_some(),
            "Subject marked busy"
        );
    }

    /// True iff an unexpired window exists. An expired record found here is
    /// removed on the spot.
    pub async fn is_busy(&self, subject_id: SubjectId) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.records.get(&subject_id) {
            None => false,
            Some(record) if record.expires_at > now => true,
            Some(_) => {
                state.records.remove(&subject_id);
                debug!(subject_id = %subject_id, "Expired busy window removed lazily");
                false
            }
        }
    }

    /// Remove the window and hand back the pending queue in insertion order.
    pub async fn clear_busy(&self, subject_id: SubjectId) -> Vec<QueuedEvent> {
        let mut state = self.state.lock().await;
        let had_record = state.records.remove(&subject_id).is_some();
        let queued: Vec<QueuedEvent> = state
            .pending
            .remove(&subject_id)
            .map(Vec::from)
            .unwrap_or_default();
        drop(state);

        debug!(
            subject_id = %subject_id,
            had_record = had_record,
            queued = queued.len(),
            "Busy window cleared"
        );
        queued
    }

    /// Queue `event` behind a live window, or hand it back together with any
    /// leftovers of a lapsed one. The check and the queue change happen under
    /// one lock, so a window installed concurrently is never cleared here.
    pub async fn admit(&self, subject_id: SubjectId, event: QueuedEvent) -> Admission {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.records.get(&subject_id) {
            Some(record) if record.expires_at > now => {
                let queue = state.pending.entry(subject_id).or_default();
                queue.push_back(event);
                let depth = queue.len();
                drop(state);
                debug!(subject_id = %subject_id, depth = depth, "Event queued behind busy window");
                return Admission::Queued;
            }
            Some(_) => {
                state.records.remove(&subject_id);
                debug!(subject_id = %subject_id, "Expired busy window removed lazily");
            }
            None => {}
        }
        let leftovers = state
            .pending
            .remove(&subject_id)
            .map(Vec::from)
            .unwrap_or_default();
        Admission::Free { event, leftovers }
    }

    /// Append an event to the subject's queue. The gate does not check that
    /// the subject is busy; callers do.
    pub async fn enqueue(&self, subject_id: SubjectId, event: QueuedEvent) {
        let mut state = self.state.lock().await;
        let queue = state.pending.entry(subject_id).or_default();
        queue.push_back(event);
        let depth = queue.len();
        drop(state);

        debug!(subject_id = %subject_id, depth = depth, "Event queued behind busy window");
    }

    /// Remove every expired window and return the affected subjects once
    /// each. Their queues stay in place for a subsequent flush.
    pub async fn expired_ids(&self) -> Vec<SubjectId> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let expired: Vec<SubjectId> = state
            .records
            .values()
            .filter(|record| record.expires_at <= now)
            .map(|record| record.subject_id)
            .collect();
        for subject_id in &expired {
            state.records.remove(subject_id);
        }
        expired
    }

    /// Snapshot of the subject's current record, if any.
    pub async fn record(&self, subject_id: SubjectId) -> Option<BusyRecord> {
        self.state.lock().await.records.get(&subject_id).cloned()
    }

    pub async fn pending_len(&self, subject_id: SubjectId) -> usize {
        self.state
            .lock()
            .await
            .pending
            .get(&subject_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: DateTime<Utc>, ttl_seconds: u64) -> DateTime<Utc> {
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
