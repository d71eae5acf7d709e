//! Per-session execution context
//!
//! Every mutating operation on a session runs while holding that session's
//! slot. Slots for different sessions are independent. Acquisition is
//! time-boxed and bounded by an in-flight event ceiling; both limits reject
//! with a retryable backpressure reason instead of queueing without bound.

use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ingest::{OrderingBuffer, RejectReason};
use crate::models::session::Session;

/// In-memory working state of one session
#[derive(Debug)]
pub struct SessionWorkspace {
    pub session: Session,
    pub buffer: OrderingBuffer,
    /// Sequence number assigned to the next stored event
    pub next_sequence: u64,
    /// Whether a feature vector was stored for this session
    pub features_computed: bool,
}

#[derive(Clone, Default)]
struct SessionSlot {
    workspace: Arc<Mutex<Option<SessionWorkspace>>>,
    in_flight: Arc<AtomicUsize>,
}

/// Releases its share of the in-flight counter on drop
struct InFlight {
    counter: Arc<AtomicUsize>,
    weight: usize,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.weight, Ordering::AcqRel);
    }
}

/// Exclusive access to one session's workspace
///
/// `None` means the workspace has not been loaded yet.
pub struct SessionLease {
    guard: OwnedMutexGuard<Option<SessionWorkspace>>,
    _in_flight: InFlight,
}

impl Deref for SessionLease {
    type Target = Option<SessionWorkspace>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[derive(Default)]
pub struct SessionContexts {
    slots: DashMap<String, SessionSlot>,
}

impl SessionContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a session's slot for `weight` events
    ///
    /// A request is refused when the session already has work in flight and
    /// admitting `weight` more events would pass `max_in_flight`, or when
    /// the lock is not obtained within `lock_timeout`.
    pub async fn acquire(
        &self,
        session_id: &str,
        weight: usize,
        max_in_flight: usize,
        lock_timeout: Duration,
    ) -> Result<SessionLease, RejectReason> {
        // clone out of the map so the shard lock is not held across the await
        let slot = self.slots.entry(session_id.to_string()).or_default().clone();
        let backpressure = || RejectReason::Backpressure {
            session_id: session_id.to_string(),
            retry_after_ms: lock_timeout.as_millis() as u64,
        };

        let previous = slot.in_flight.fetch_add(weight, Ordering::AcqRel);
        let in_flight = InFlight {
            counter: slot.in_flight.clone(),
            weight,
        };
        if previous > 0 && previous + weight > max_in_flight {
            return Err(backpressure());
        }

        let guard = tokio::time::timeout(lock_timeout, slot.workspace.lock_owned())
            .await
            .map_err(|_| backpressure())?;

        Ok(SessionLease {
            guard,
            _in_flight: in_flight,
        })
    }

    /// Drop the slot of a session that reached a terminal state
    ///
    /// Holders of an existing lease keep their workspace; later callers
    /// rebuild it from storage.
    pub fn remove(&self, session_id: &str) {
        self.slots.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
