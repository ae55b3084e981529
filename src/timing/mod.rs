//! Retransmission Timing.
//!
//! Per-flow round-trip time estimation and retransmission timeout management
//! for flows that carry a reliable transport:
//!
//! 1. **RTT/RTO Estimation**: RFC 6298 smoothing of `srtt` and `rttvar`, one
//!    sample in flight at a time
//!
//! 2. **Karn's Algorithm**: samples covered by a retransmission are discarded
//!
//! 3. **Retransmission Timer**: one reschedulable one-shot timer per flow,
//!    with exponential backoff
//!
//! ## State Machine
//!
//! ```text
//!              start_measure(seq)
//!   ┌──────┐ ─────────────────────▶ ┌───────────┐
//!   │ IDLE │                        │ MEASURING │
//!   └──────┘ ◀───────────────────── └───────────┘
//!       signal_ack(ack > seq)  /  signal_retransmission(exp > seq)
//! ```
//!
//! The retransmission timers live on a [`RetransmitScheduler`], which is
//! independent of the idle-eviction timer wheel of the flow table.

mod estimator;
mod scheduler;

pub use estimator::RetransmissionTiming;
pub use scheduler::{RetransmissionOwner, RetransmitScheduler, TimerId};

/// RTO before any measurement (RFC 1122), milliseconds.
pub const INITIAL_RTO_MS: u32 = 3000;

/// Lower RTO bound (RFC 1122), milliseconds.
pub const MIN_RTO_MS: u32 = 1000;

/// Upper RTO bound, milliseconds.
pub const MAX_RTO_MS: u32 = 60_000;

/// Gain applied to new RTT samples.
pub const ALPHA: f64 = 0.125;

/// Gain applied to new RTT deviation samples.
pub const BETA: f64 = 0.25;

/// RTT variance multiplier in the RTO formula.
pub const K: u32 = 4;

/// Wraparound-aware sequence number comparison: `a > b`.
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Read-only view of a flow's timing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSnapshot {
    /// Smoothed RTT (ms), 0 before the first sample
    pub srtt: u32,
    /// RTT variance (ms), 0 before the first sample
    pub rttvar: u32,
    /// Current retransmission timeout (ms)
    pub rto: u32,
    /// Whether an RTT sample is in flight
    pub measuring: bool,
    /// Whether the retransmission timer is armed
    pub timer_running: bool,
}
