//! # flowcore
//!
//! Per-flow state management for packet processing data planes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Downstream element (sink)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Flow Table (classification, per-flow batch dispatch)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Idle Reaper (timer wheel, generation-tagged handles)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Retransmission Timing (RFC 6298 RTO, Karn, backoff)    │
//! ├─────────────────────────────────────────────────────────┤
//! │  Clock (monotonic milliseconds, manual for tests)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Bounded memory**: all flow state is allocated once, at initialization
//! 2. **Per-flow exclusivity**: one worker at a time touches a flow's state
//! 3. **Short critical sections**: structural changes hold the table lock for
//!    a single insert or removal
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use flowcore::clock::ManualClock;
//! use flowcore::flow::{FlowKey, FlowTableConfig, FlowTableManager, PacketBatch};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let table: FlowTableManager = FlowTableManager::initialize(FlowTableConfig::new(1024), clock)?;
//!
//! let key = FlowKey::tcp_v4([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443);
//! let batch: PacketBatch<(FlowKey, u32)> = vec![(key, 1), (key, 2)].into();
//!
//! let outcome = table.process_batch(batch, 0, &|p: &(FlowKey, u32)| Some(p.0), |fcb, packets| {
//!     assert_eq!(fcb.key(), Some(&key));
//!     assert_eq!(packets.len(), 2);
//! });
//! assert_eq!(outcome.sub_batches, 1);
//! # Ok::<(), flowcore::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod clock;
pub mod error;
pub mod flow;
pub mod timing;

#[cfg(feature = "runtime")]
pub mod reaper;

pub use error::{Error, Result};

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use flow::{FlowHandle, FlowKey, FlowTableConfig, FlowTableManager};
pub use timing::RetransmissionTiming;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_default() {
        let config = FlowTableConfig::new(64);
        assert_eq!(config.timeout_ms(), flow::config::DEFAULT_TIMEOUT_MS);
        assert_eq!(config.flags, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reexports_build_a_table() {
        let table: FlowTableManager =
            FlowTableManager::initialize(FlowTableConfig::new(4), Arc::new(MonotonicClock::new()))
                .unwrap();
        assert_eq!(table.capacity(), 4);
    }
}
