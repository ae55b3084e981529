//! Flow table manager: classification, batch dispatch and idle reaping.
//!
//! ## Locking
//!
//! | Lock                         | Guards                         | Taken by                        |
//! |------------------------------|--------------------------------|---------------------------------|
//! | `index` (`RwLock`)           | key → index table, free slots  | read: lookups; write: insert / remove / eviction |
//! | `blocks[i]` (`Mutex`)        | one flow control block         | dispatch, `with_flow`, reset    |
//! | `wheel` (`Mutex`)            | idle expiration wheel          | arm / re-arm / advance          |
//!
//! Locks are always acquired in the order index → block → wheel. The write
//! side of `index` is the owner token for structural mutation: it is held
//! for exactly one insert or one removal, never across downstream code.
//! While holding it, the block of a live flow is only ever `try_lock`ed: a
//! block can stay locked for a whole downstream call, and waiting on it
//! would stall every lookup behind the owner token.
//!
//! A block is reset only while holding both the index write lock and the
//! block lock, so a worker dispatching a sub-batch (which holds the block
//! lock) can never see its flow disappear underneath it. A worker that
//! classified a flow which is evicted before it locks the block notices the
//! generation change and classifies again.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::clock::Clock;
use crate::error::Result;
use crate::flow::config::flags;
use crate::flow::{
    FlowControlBlock, FlowHandle, FlowHashTable, FlowKey, FlowTableConfig, FlowTableMetrics,
    KeyExtractor, PacketBatch, TimerWheel,
};
use crate::timing::{RetransmitScheduler, TimingSnapshot};

/// Result of processing one batch.
#[derive(Debug)]
pub struct BatchOutcome<P> {
    /// Packets handed downstream
    pub dispatched: usize,
    /// Sub-batches handed downstream
    pub sub_batches: usize,
    /// Packets dropped because the table was full
    pub dropped: usize,
    /// Packets without a flow key
    pub unclassified: usize,
    /// Packets refused by a full table, returned for a slow path
    /// (only with [`flags::PUNT_ON_FULL`])
    pub punted: PacketBatch<P>,
}

impl<P> Default for BatchOutcome<P> {
    fn default() -> Self {
        Self {
            dispatched: 0,
            sub_batches: 0,
            dropped: 0,
            unclassified: 0,
            punted: PacketBatch::new(),
        }
    }
}

/// Shared flow table.
///
/// `S` is the caller-defined per-flow state stored in every control block.
pub struct FlowTableManager<S = ()> {
    config: FlowTableConfig,
    timeout_ms: u64,
    index: RwLock<FlowHashTable<FlowKey>>,
    blocks: Box<[Mutex<FlowControlBlock<S>>]>,
    wheel: Mutex<TimerWheel>,
    scheduler: Arc<RetransmitScheduler>,
    clock: Arc<dyn Clock>,
    metrics: FlowTableMetrics,
}

impl<S: Default + Send> FlowTableManager<S> {
    /// Validate `config` and allocate the table, the control block arena,
    /// the expiration wheel and the retransmit scheduler.
    ///
    /// The periodic reaper is not started here; drive
    /// [`run_reaper`](Self::run_reaper) from a timer or spawn
    /// [`crate::reaper::spawn_reaper`].
    pub fn initialize(config: FlowTableConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let size = config.table_size();
        let timeout_ms = config.timeout_ms();
        let now = clock.now_ms();

        let scheduler = Arc::new(RetransmitScheduler::new(
            Arc::clone(&clock),
            config.retransmit_precision_ms,
        ));
        let blocks: Box<[_]> = (0..size)
            .map(|i| Mutex::new(FlowControlBlock::new(i, Arc::clone(&scheduler))))
            .collect();
        let wheel = TimerWheel::for_timeout(size, timeout_ms, now);

        tracing::info!(
            "Flow table initialized: {} slots ({} + {} reserve), timeout {}ms, wheel tick {}ms",
            size,
            config.capacity,
            config.reserve,
            timeout_ms,
            wheel.tick_ms()
        );

        Ok(Self {
            timeout_ms,
            index: RwLock::new(FlowHashTable::new(size)),
            blocks,
            wheel: Mutex::new(wheel),
            scheduler,
            clock,
            metrics: FlowTableMetrics::new(),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &FlowTableConfig {
        &self.config
    }

    /// Total number of flow slots (capacity + reserve).
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live flows.
    pub fn flow_count(&self) -> usize {
        self.index.read().len()
    }

    /// Idle timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Period at which the reaper should run.
    pub fn reap_interval_ms(&self) -> u64 {
        self.wheel.lock().tick_ms()
    }

    /// Clock shared with the retransmission timers.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Scheduler running the per-flow retransmission timers.
    pub fn retransmit_scheduler(&self) -> &Arc<RetransmitScheduler> {
        &self.scheduler
    }

    /// Table counters.
    pub fn metrics(&self) -> &FlowTableMetrics {
        &self.metrics
    }

    /// Find the live flow for `key`.
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowHandle> {
        self.find(&self.normalize(*key))
    }

    /// Classify `key`, creating its flow if needed.
    ///
    /// Fails with [`Error::TableFull`](crate::Error::TableFull) when a new
    /// flow cannot be admitted.
    pub fn classify(&self, key: FlowKey, now_ms: u64) -> Result<FlowHandle> {
        self.classify_normalized(self.normalize(key), now_ms)
    }

    /// Classify a batch and hand it downstream grouped by flow.
    ///
    /// Consecutive packets of the same flow are coalesced into one
    /// sub-batch; `sink` is called once per sub-batch with the flow's
    /// control block locked.
    ///
    /// `sink` may read table-wide state (`flow_count`, `capacity`,
    /// `metrics`, `read_handler`). It must not call `lookup`, `classify`,
    /// `with_flow`, `timing`, `remove`, `process_batch` or `run_reaper`:
    /// those lock control blocks, including the one `sink` already holds.
    pub fn process_batch<P, E, F>(
        &self,
        batch: PacketBatch<P>,
        now_ms: u64,
        extractor: &E,
        mut sink: F,
    ) -> BatchOutcome<P>
    where
        E: KeyExtractor<P> + ?Sized,
        F: FnMut(&mut FlowControlBlock<S>, PacketBatch<P>),
    {
        let mut outcome = BatchOutcome::default();
        let mut run: Option<FlowKey> = None;
        let mut pending = PacketBatch::with_capacity(batch.len());

        for packet in batch {
            let Some(key) = extractor.extract(&packet) else {
                self.metrics.increment_unclassified();
                outcome.unclassified += 1;
                continue;
            };
            let key = self.normalize(key);

            if run != Some(key) {
                if let Some(previous) = run.replace(key) {
                    self.dispatch(previous, pending.take(), now_ms, &mut sink, &mut outcome);
                }
            }
            pending.push(packet);
        }

        if let Some(last) = run {
            self.dispatch(last, pending, now_ms, &mut sink, &mut outcome);
        }

        outcome
    }

    /// Run `f` on the block of a live flow.
    ///
    /// Returns `None` if the handle is stale (the flow was evicted).
    pub fn with_flow<R>(
        &self,
        handle: FlowHandle,
        f: impl FnOnce(&mut FlowControlBlock<S>) -> R,
    ) -> Option<R> {
        let mut block = self.blocks.get(handle.index())?.lock();
        if !block.matches(handle) {
            return None;
        }
        Some(f(&mut *block))
    }

    /// Current timing estimates of a live flow.
    pub fn timing(&self, handle: FlowHandle) -> Option<TimingSnapshot> {
        self.with_flow(handle, |fcb| fcb.timing().snapshot())
    }

    /// Remove a flow explicitly. Returns false if it was not present.
    ///
    /// Waits for a worker currently dispatching to the flow to finish,
    /// without holding the owner token meanwhile.
    pub fn remove(&self, key: &FlowKey) -> bool {
        let key = self.normalize(*key);

        loop {
            let mut table = self.index.write();
            let Some(index) = table.lookup(&key) else {
                return false;
            };

            let Some(mut block) = self.blocks[index].try_lock() else {
                drop(table);
                std::thread::yield_now();
                continue;
            };

            table.remove(&key);
            self.wheel.lock().cancel(index);
            block.reset();
            self.metrics.increment_removed();

            return true;
        }
    }

    /// Evict every flow idle for at least the timeout at `now_ms`.
    ///
    /// Returns the number of flows evicted. A `now_ms` earlier than the last
    /// reaped tick is rejected with
    /// [`Error::ClockRegression`](crate::Error::ClockRegression).
    pub fn run_reaper(&self, now_ms: u64) -> Result<usize> {
        let due = self.wheel.lock().advance(now_ms).map_err(|e| {
            tracing::warn!("Reaper rejected: {}", e);
            e
        })?;

        let mut evicted = 0;
        for index in due {
            let mut table = self.index.write();

            let Some(mut block) = self.blocks[index].try_lock() else {
                // Busy downstream or under `with_flow`; look again next tick
                let mut wheel = self.wheel.lock();
                let retry = now_ms.saturating_add(wheel.tick_ms());
                wheel.schedule(index, retry);
                continue;
            };

            let Some(key) = block.key().copied() else {
                continue;
            };
            if !block.is_idle(now_ms, self.timeout_ms) {
                let deadline = block.last_seen_ms().saturating_add(self.timeout_ms);
                self.wheel.lock().schedule(index, deadline);
                continue;
            }

            table.remove(&key);
            self.wheel.lock().cancel(index);
            if self.config.verbose > 0 {
                tracing::debug!(
                    "Evicting flow {} ({:?}) idle since {}ms",
                    block.handle(),
                    key,
                    block.last_seen_ms()
                );
            }
            block.reset();
            evicted += 1;
        }

        if evicted > 0 {
            self.metrics.add_evicted(evicted);
            tracing::debug!("Reaped {} idle flows", evicted);
        }

        Ok(evicted)
    }

    /// Fire the retransmission timers due at `now_ms`.
    pub fn run_retransmit_timers(&self, now_ms: u64) -> usize {
        self.scheduler.run_due(now_ms)
    }

    /// Named administrative read-out.
    ///
    /// Recognized names: `count`, `capacity`, `timeout`, `evicted`,
    /// `dropped`, `metrics`.
    pub fn read_handler(&self, name: &str) -> Option<String> {
        let value = match name {
            "count" => self.flow_count().to_string(),
            "capacity" => self.capacity().to_string(),
            "timeout" => self.timeout_ms.to_string(),
            "evicted" => self.metrics.flows_evicted().to_string(),
            "dropped" => self.metrics.refused_packets().to_string(),
            "metrics" => self.metrics.format_report(),
            _ => return None,
        };
        Some(value)
    }

    fn normalize(&self, key: FlowKey) -> FlowKey {
        if self.config.has_flag(flags::CANONICAL_KEYS) {
            key.canonical()
        } else {
            key
        }
    }

    fn find(&self, key: &FlowKey) -> Option<FlowHandle> {
        let index = self.index.read().lookup(key)?;
        self.handle_of(index, key)
    }

    fn handle_of(&self, index: usize, key: &FlowKey) -> Option<FlowHandle> {
        let block = self.blocks[index].lock();
        (block.key() == Some(key)).then(|| block.handle())
    }

    fn classify_normalized(&self, key: FlowKey, now_ms: u64) -> Result<FlowHandle> {
        let mut table = loop {
            if let Some(handle) = self.find(&key) {
                return Ok(handle);
            }

            let table = self.index.write();
            // Admitted by another worker since the lookup; its block may be
            // busy downstream, so resolve it with the owner token released
            if table.lookup(&key).is_none() {
                break table;
            }
        };

        let index = table.insert(key).map_err(|e| {
            if self.config.verbose > 0 {
                tracing::warn!("Refusing flow {:?}: {}", key, e);
            }
            e
        })?;

        // A free slot is only ever locked briefly, by holders of stale handles
        let mut block = self.blocks[index].lock();
        block.activate(key, now_ms);
        self.wheel.lock().schedule(index, now_ms.saturating_add(self.timeout_ms));
        self.metrics.increment_created();

        if self.config.verbose > 1 {
            tracing::debug!("New flow {} for {:?}", block.handle(), key);
        }

        Ok(block.handle())
    }

    fn dispatch<P, F>(
        &self,
        key: FlowKey,
        packets: PacketBatch<P>,
        now_ms: u64,
        sink: &mut F,
        outcome: &mut BatchOutcome<P>,
    ) where
        F: FnMut(&mut FlowControlBlock<S>, PacketBatch<P>),
    {
        // A second attempt covers an eviction between classify and lock
        for _ in 0..2 {
            let handle = match self.classify_normalized(key, now_ms) {
                Ok(handle) => handle,
                Err(_) => {
                    self.refuse(packets, outcome);
                    return;
                }
            };

            let mut block = self.blocks[handle.index()].lock();
            if !block.matches(handle) {
                self.metrics.increment_stale();
                continue;
            }

            let count = packets.len();
            block.touch(now_ms, count);
            let deadline = block.last_seen_ms().saturating_add(self.timeout_ms);
            self.wheel.lock().schedule(handle.index(), deadline);

            outcome.dispatched += count;
            outcome.sub_batches += 1;
            self.metrics.add_dispatched(count);

            sink(&mut *block, packets);
            return;
        }

        self.refuse(packets, outcome);
    }

    fn refuse<P>(&self, mut packets: PacketBatch<P>, outcome: &mut BatchOutcome<P>) {
        let count = packets.len();
        if self.config.has_flag(flags::PUNT_ON_FULL) {
            outcome.punted.append(&mut packets);
            self.metrics.add_punted_full(count);
        } else {
            outcome.dropped += count;
            self.metrics.add_dropped_full(count);
        }
    }
}
