//! Per-flow RTT/RTO estimator with its retransmission timer.

use std::sync::Arc;

use crate::flow::FlowHandle;
use crate::timing::{
    seq_gt, RetransmissionOwner, RetransmitScheduler, TimerId, TimingSnapshot, ALPHA, BETA,
    INITIAL_RTO_MS, K, MAX_RTO_MS, MIN_RTO_MS,
};

/// Flow and transport handler the timer is bound to.
struct TimerBinding {
    flow: FlowHandle,
    owner: Arc<dyn RetransmissionOwner>,
}

/// Retransmission timing state of one flow.
///
/// Not internally synchronized: it is mutated only by whoever holds the
/// flow's control block.
pub struct RetransmissionTiming {
    /// Smoothed RTT (ms)
    srtt: u32,
    /// RTT variance (ms)
    rttvar: u32,
    /// Retransmission timeout (ms)
    rto: u32,
    /// Lower bound of the variance term in the RTO (ms)
    clock_granularity: u32,
    measure_in_progress: bool,
    /// Sequence number whose acknowledgment ends the measurement
    rtt_seq: u32,
    measure_start_ms: u64,
    scheduler: Arc<RetransmitScheduler>,
    binding: Option<TimerBinding>,
    timer: Option<TimerId>,
}

impl RetransmissionTiming {
    /// Create an idle estimator whose timer runs on `scheduler`.
    ///
    /// The timer stays uninitialized until [`init_timer`](Self::init_timer).
    pub fn new(scheduler: Arc<RetransmitScheduler>) -> Self {
        let clock_granularity = scheduler
            .clock()
            .resolution_ms()
            .max(scheduler.precision_ms())
            .min(u32::MAX as u64) as u32;

        Self {
            srtt: 0,
            rttvar: 0,
            rto: INITIAL_RTO_MS,
            clock_granularity,
            measure_in_progress: false,
            rtt_seq: 0,
            measure_start_ms: 0,
            scheduler,
            binding: None,
            timer: None,
        }
    }

    /// Bind the timer to a flow and its transport handler.
    pub fn init_timer(&mut self, flow: FlowHandle, owner: Arc<dyn RetransmissionOwner>) {
        self.stop();
        self.binding = Some(TimerBinding { flow, owner });
    }

    /// Check if [`init_timer`](Self::init_timer) was called.
    pub fn is_timer_initialized(&self) -> bool {
        self.binding.is_some()
    }

    /// Start an RTT measurement ending with the acknowledgment of `seq`.
    ///
    /// Returns false if a measurement is already in progress.
    pub fn start_measure(&mut self, seq: u32) -> bool {
        if self.measure_in_progress {
            return false;
        }

        self.measure_in_progress = true;
        self.rtt_seq = seq;
        self.measure_start_ms = self.scheduler.clock().now_ms();

        true
    }

    /// Signal an acknowledgment.
    ///
    /// The owner is always notified first. Returns true if the ack completed
    /// the measurement in progress and the estimates were updated.
    pub fn signal_ack(&mut self, ack: u32) -> bool {
        if let Some(binding) = &self.binding {
            binding.owner.signal_ack(binding.flow, ack);
        }

        if !self.measure_in_progress || !seq_gt(ack, self.rtt_seq) {
            return false;
        }

        self.measure_in_progress = false;
        let now = self.scheduler.clock().now_ms();
        let rtt = now.saturating_sub(self.measure_start_ms).min(u32::MAX as u64) as u32;

        self.update(rtt);
        tracing::debug!("RTT measured: {}, RTO: {}", self.srtt, self.rto);

        true
    }

    /// Signal that data up to `expected_ack` is being retransmitted.
    ///
    /// Karn's algorithm: if the retransmission covers the measured sequence
    /// number the sample is ambiguous and is discarded. Returns true if a
    /// measurement was aborted.
    pub fn signal_retransmission(&mut self, expected_ack: u32) -> bool {
        if self.measure_in_progress && seq_gt(expected_ack, self.rtt_seq) {
            self.measure_in_progress = false;
            return true;
        }
        false
    }

    /// Check if an RTT sample is in flight.
    pub fn is_measure_in_progress(&self) -> bool {
        self.measure_in_progress
    }

    /// Arm the timer for one RTO.
    ///
    /// Returns false if the timer is uninitialized or already running.
    pub fn start(&mut self) -> bool {
        if !self.is_timer_initialized() || self.is_timer_running() {
            return false;
        }
        self.arm();
        tracing::trace!("Timer starting ({})", self.rto);
        true
    }

    /// Double the RTO (bounded by the maximum) and arm the timer.
    ///
    /// Returns false, leaving the RTO unchanged, if the timer is
    /// uninitialized or already running.
    pub fn start_with_doubled_rto(&mut self) -> bool {
        if !self.is_timer_initialized() || self.is_timer_running() {
            return false;
        }
        self.rto = self.rto.saturating_mul(2).min(MAX_RTO_MS);
        self.arm();
        tracing::trace!("Timer starting with double RTO ({})", self.rto);
        true
    }

    /// Disarm the timer. Returns false if it was not running.
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(id) => self.scheduler.cancel(id),
            None => false,
        }
    }

    /// Stop the timer if running, then start it.
    pub fn restart(&mut self) -> bool {
        self.stop();
        self.start()
    }

    /// Check if the timer is armed and has not fired yet.
    pub fn is_timer_running(&self) -> bool {
        self.timer.map_or(false, |id| self.scheduler.is_scheduled(id))
    }

    /// Smoothed RTT in milliseconds (0 before the first sample).
    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    /// RTT variance in milliseconds (0 before the first sample).
    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    /// Current retransmission timeout in milliseconds.
    pub fn rto(&self) -> u32 {
        self.rto
    }

    /// Granularity used as the floor of the variance term.
    pub fn clock_granularity(&self) -> u32 {
        self.clock_granularity
    }

    /// Copy of the current estimates.
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            srtt: self.srtt,
            rttvar: self.rttvar,
            rto: self.rto,
            measuring: self.measure_in_progress,
            timer_running: self.is_timer_running(),
        }
    }

    /// Return to the initial state: no estimates, no measurement, timer
    /// stopped and unbound.
    pub fn reset(&mut self) {
        self.stop();
        self.binding = None;
        self.srtt = 0;
        self.rttvar = 0;
        self.rto = INITIAL_RTO_MS;
        self.measure_in_progress = false;
        self.rtt_seq = 0;
        self.measure_start_ms = 0;
    }

    fn arm(&mut self) {
        if let Some(binding) = &self.binding {
            let id = self
                .scheduler
                .schedule_after(self.rto as u64, binding.flow, Arc::clone(&binding.owner));
            self.timer = Some(id);
        }
    }

    /// Fold an RTT sample into the estimates (RFC 6298).
    fn update(&mut self, rtt: u32) {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let srtt = self.srtt as f64;
            let sample = rtt as f64;
            let deviation = (srtt - sample).abs();

            // Sub-millisecond precision is not needed; truncate
            self.rttvar = ((1.0 - BETA) * self.rttvar as f64 + BETA * deviation) as u32;
            self.srtt = ((1.0 - ALPHA) * srtt + ALPHA * sample) as u32;
        }

        let variance_term = self.clock_granularity.max(K.saturating_mul(self.rttvar));
        self.rto = self
            .srtt
            .saturating_add(variance_term)
            .clamp(MIN_RTO_MS, MAX_RTO_MS);
    }
}

impl Drop for RetransmissionTiming {
    fn drop(&mut self) {
        self.stop();
    }
}
