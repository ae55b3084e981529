//! Flow Table.
//!
//! Per-flow state for a packet processing pipeline:
//!
//! 1. **Classification**: 5-tuple keys mapped to control blocks through a
//!    bounded cuckoo hash table
//!
//! 2. **Batch Dispatch**: incoming batches re-segmented into per-flow
//!    sub-batches, each handed downstream with its control block locked
//!
//! 3. **Idle Eviction**: a timer wheel tracks the last activity of every
//!    flow; the reaper releases flows idle for longer than the timeout
//!
//! ## Architecture
//!
//! ```text
//!   PacketBatch ──▶ KeyExtractor ──▶ ┌──────────────────────────────┐
//!                                    │       FlowTableManager       │
//!                                    │  ┌────────────────────────┐  │
//!                                    │  │ FlowHashTable (RwLock) │  │
//!                                    │  │   key ─▶ slot index    │  │
//!                                    │  └───────────┬────────────┘  │
//!                                    │              ▼               │
//!                                    │  ┌────────────────────────┐  │
//!   sink(fcb, sub-batch) ◀───────────│  │ FlowControlBlock arena │  │
//!                                    │  │  (one Mutex per slot)  │  │
//!                                    │  └───────────┬────────────┘  │
//!                                    │              ▼               │
//!                 run_reaper(now) ──▶│  ┌────────────────────────┐  │
//!                                    │  │ TimerWheel (idle)      │  │
//!                                    │  └────────────────────────┘  │
//!                                    └──────────────────────────────┘
//! ```

mod batch;
pub mod config;
mod fcb;
mod hash;
mod key;
mod manager;
pub mod metrics;
mod wheel;

pub use batch::PacketBatch;
pub use config::{flags, FlowTableConfig, FlowTableConfigFile};
pub use fcb::{FlowControlBlock, FlowHandle};
pub use hash::FlowHashTable;
pub use key::{proto, FlowKey, KeyExtractor};
pub use manager::{BatchOutcome, FlowTableManager};
pub use metrics::{FlowTableMetrics, MetricsSnapshot};
pub use wheel::TimerWheel;
