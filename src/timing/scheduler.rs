//! One-shot retransmission timer scheduler.
//!
//! Timers are tagged with the [`FlowHandle`] of the flow that armed them and
//! the transport handler that owns it. When a timer is due the scheduler
//! calls [`RetransmissionOwner::retransmission_timer_fired`] with that handle;
//! the owner resolves the handle through the flow table, which returns
//! nothing if the flow was evicted in the meantime.
//!
//! Due timers are collected under the internal lock and dispatched after it
//! is released, so owners may re-arm timers from inside the callback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::flow::FlowHandle;

/// Transport handler attached to a flow's retransmission timing.
pub trait RetransmissionOwner: Send + Sync {
    /// An acknowledgment was signalled for `flow`.
    ///
    /// Runs while the caller holds the flow's control block; it must not
    /// access the same flow through the flow table again.
    fn signal_ack(&self, flow: FlowHandle, ack: u32);

    /// The retransmission timer of `flow` expired.
    fn retransmission_timer_fired(&self, flow: FlowHandle);
}

/// Identifier of a scheduled timer. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct Scheduled {
    flow: FlowHandle,
    owner: Arc<dyn RetransmissionOwner>,
}

#[derive(Default)]
struct SchedulerInner {
    /// Pending timers ordered by deadline
    queue: BTreeMap<(u64, TimerId), Scheduled>,
    /// Deadline of every pending timer
    deadlines: HashMap<TimerId, u64>,
}

/// Deadline-ordered queue of one-shot retransmission timers.
pub struct RetransmitScheduler {
    inner: Mutex<SchedulerInner>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    precision_ms: u64,
}

impl RetransmitScheduler {
    /// Create a scheduler reading time from `clock`.
    ///
    /// `precision_ms` is how late a timer may fire, i.e. the period at which
    /// [`run_due`](Self::run_due) is driven.
    pub fn new(clock: Arc<dyn Clock>, precision_ms: u64) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner::default()),
            next_id: AtomicU64::new(1),
            clock,
            precision_ms,
        }
    }

    /// The clock timers are scheduled against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Firing precision in milliseconds.
    pub fn precision_ms(&self) -> u64 {
        self.precision_ms
    }

    /// Arm a timer `delay_ms` from now.
    pub fn schedule_after(
        &self,
        delay_ms: u64,
        flow: FlowHandle,
        owner: Arc<dyn RetransmissionOwner>,
    ) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let deadline = self.clock.now_ms().saturating_add(delay_ms);

        let mut inner = self.inner.lock();
        inner.queue.insert((deadline, id), Scheduled { flow, owner });
        inner.deadlines.insert(id, deadline);

        id
    }

    /// Disarm a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut inner = self.inner.lock();
        match inner.deadlines.remove(&id) {
            Some(deadline) => {
                inner.queue.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    /// Check if a timer is still pending.
    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.inner.lock().deadlines.contains_key(&id)
    }

    /// Deadline of a pending timer.
    pub fn deadline_ms(&self, id: TimerId) -> Option<u64> {
        self.inner.lock().deadlines.get(&id).copied()
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        self.inner.lock().deadlines.len()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.lock().queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Fire every timer due at `now_ms`. Returns the number fired.
    pub fn run_due(&self, now_ms: u64) -> usize {
        let due: Vec<Scheduled> = {
            let mut inner = self.inner.lock();
            let mut due = Vec::new();

            while let Some(entry) = inner.queue.first_entry() {
                let (deadline, id) = *entry.key();
                if deadline > now_ms {
                    break;
                }
                due.push(entry.remove());
                inner.deadlines.remove(&id);
            }

            due
        };

        for timer in &due {
            tracing::trace!("Retransmission timer fired for flow {}", timer.flow);
            timer.owner.retransmission_timer_fired(timer.flow);
        }

        due.len()
    }
}
