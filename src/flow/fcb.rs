//! Flow control blocks and the handles that refer to them.

use std::fmt;
use std::sync::Arc;

use crate::flow::FlowKey;
use crate::timing::{RetransmissionTiming, RetransmitScheduler};

/// Tagged reference to a flow control block.
///
/// The generation changes every time the block is reset, so a handle kept
/// across an eviction no longer resolves once the slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowHandle {
    index: u32,
    generation: u32,
}

impl FlowHandle {
    /// Create a handle.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the control block arena.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot this handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Mutable per-flow state.
///
/// `S` is the caller's own per-flow data; it is reset to `S::default()`
/// whenever the block is recycled.
pub struct FlowControlBlock<S> {
    index: u32,
    generation: u32,
    key: Option<FlowKey>,
    created_ms: u64,
    last_seen_ms: u64,
    packets: u64,
    timing: RetransmissionTiming,
    state: S,
}

impl<S: Default> FlowControlBlock<S> {
    pub(crate) fn new(index: usize, scheduler: Arc<RetransmitScheduler>) -> Self {
        Self {
            index: index as u32,
            generation: 0,
            key: None,
            created_ms: 0,
            last_seen_ms: 0,
            packets: 0,
            timing: RetransmissionTiming::new(scheduler),
            state: S::default(),
        }
    }

    /// Handle for the current occupant of this block.
    pub fn handle(&self) -> FlowHandle {
        FlowHandle::new(self.index, self.generation)
    }

    /// Key of the flow occupying the block, `None` when free.
    pub fn key(&self) -> Option<&FlowKey> {
        self.key.as_ref()
    }

    /// Check if the block currently belongs to a flow.
    pub fn is_live(&self) -> bool {
        self.key.is_some()
    }

    /// Check if `handle` refers to the current occupant.
    pub fn matches(&self, handle: FlowHandle) -> bool {
        self.is_live() && handle == self.handle()
    }

    /// Time the flow was classified first.
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    /// Time the flow last received packets.
    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    /// Packets dispatched for this flow.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Check if the flow has seen no packet for `timeout_ms` at `now_ms`.
    pub fn is_idle(&self, now_ms: u64, timeout_ms: u64) -> bool {
        self.last_seen_ms.saturating_add(timeout_ms) <= now_ms
    }

    /// Retransmission timing of the flow.
    pub fn timing(&self) -> &RetransmissionTiming {
        &self.timing
    }

    /// Mutable retransmission timing of the flow.
    pub fn timing_mut(&mut self) -> &mut RetransmissionTiming {
        &mut self.timing
    }

    /// Caller-defined per-flow state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutable caller-defined per-flow state.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub(crate) fn activate(&mut self, key: FlowKey, now_ms: u64) {
        self.key = Some(key);
        self.created_ms = now_ms;
        self.last_seen_ms = now_ms;
        self.packets = 0;
    }

    pub(crate) fn touch(&mut self, now_ms: u64, packets: usize) {
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
        self.packets += packets as u64;
    }

    /// Release the block: forget the key, invalidate outstanding handles and
    /// restore default timing and user state.
    pub(crate) fn reset(&mut self) {
        self.key = None;
        self.generation = self.generation.wrapping_add(1);
        self.created_ms = 0;
        self.last_seen_ms = 0;
        self.packets = 0;
        self.timing.reset();
        self.state = S::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn block() -> FlowControlBlock<u32> {
        let scheduler = Arc::new(RetransmitScheduler::new(Arc::new(ManualClock::new(0)), 1));
        FlowControlBlock::new(7, scheduler)
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(FlowHandle::new(12, 3).to_string(), "12#3");
    }

    #[test]
    fn test_activate_and_touch() {
        let mut fcb = block();
        assert!(!fcb.is_live());

        let key = FlowKey::tcp_v4([1, 2, 3, 4], 1, [5, 6, 7, 8], 2);
        fcb.activate(key, 100);
        fcb.touch(150, 3);

        assert_eq!(fcb.key(), Some(&key));
        assert_eq!(fcb.created_ms(), 100);
        assert_eq!(fcb.last_seen_ms(), 150);
        assert_eq!(fcb.packets(), 3);
        assert!(!fcb.is_idle(200, 100));
        assert!(fcb.is_idle(250, 100));
    }

    #[test]
    fn test_reset_invalidates_handle() {
        let mut fcb = block();
        fcb.activate(FlowKey::tcp_v4([1, 1, 1, 1], 1, [2, 2, 2, 2], 2), 0);
        *fcb.state_mut() = 42;
        let handle = fcb.handle();
        assert!(fcb.matches(handle));

        fcb.reset();

        assert!(!fcb.matches(handle));
        assert_eq!(fcb.handle().index(), 7);
        assert_eq!(fcb.handle().generation(), handle.generation() + 1);
        assert_eq!(*fcb.state(), 0);
        assert_eq!(fcb.timing().rto(), crate::timing::INITIAL_RTO_MS);
    }
}
