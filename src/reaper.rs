//! Background tasks driving the flow table timers.
//!
//! Both loops run until their task is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::flow::FlowTableManager;
use crate::timing::RetransmitScheduler;

/// Spawn the idle reaper for `table` on the current tokio runtime.
///
/// The reaper wakes once per wheel tick and evicts flows whose idle timeout
/// elapsed, reading time from the table's clock.
pub fn spawn_reaper<S>(table: Arc<FlowTableManager<S>>) -> JoinHandle<()>
where
    S: Default + Send + 'static,
{
    tokio::spawn(run_reaper(table))
}

/// Reaper loop; see [`spawn_reaper`].
pub async fn run_reaper<S>(table: Arc<FlowTableManager<S>>)
where
    S: Default + Send + 'static,
{
    let interval = Duration::from_millis(table.reap_interval_ms());
    tracing::debug!("Reaper running every {:?}", interval);

    loop {
        tokio::time::sleep(interval).await;

        let now = table.clock().now_ms();
        // Regressions are logged by the table; the next round retries
        if let Ok(evicted) = table.run_reaper(now) {
            if evicted > 0 {
                tracing::trace!("Reaper round at {}ms evicted {}", now, evicted);
            }
        }
    }
}

/// Spawn a task firing due retransmission timers every `period`.
pub fn spawn_retransmit_driver(
    scheduler: Arc<RetransmitScheduler>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            scheduler.run_due(scheduler.clock().now_ms());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flow::{FlowHandle, FlowKey, FlowTableConfig};
    use crate::timing::RetransmissionOwner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> FlowKey {
        FlowKey::tcp_v4([192, 168, 0, 1], 5000, [192, 168, 0, 2], 80)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_evicts_idle_flows() {
        let clock = Arc::new(ManualClock::new(0));
        let config = FlowTableConfig::new(8).with_timeout(Duration::from_secs(1));
        let table: Arc<FlowTableManager> =
            Arc::new(FlowTableManager::initialize(config, clock.clone()).unwrap());

        table.classify(key(), 0).unwrap();
        let task = spawn_reaper(Arc::clone(&table));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.flow_count(), 1);

        clock.set(5000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.flow_count(), 0);
        assert_eq!(table.metrics().flows_evicted(), 1);

        task.abort();
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl RetransmissionOwner for Counter {
        fn signal_ack(&self, _flow: FlowHandle, _ack: u32) {}

        fn retransmission_timer_fired(&self, _flow: FlowHandle) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmit_driver_fires_timers() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = Arc::new(RetransmitScheduler::new(clock.clone(), 1));
        let owner = Arc::new(Counter::default());

        scheduler.schedule_after(100, FlowHandle::new(0, 0), owner.clone());
        let task = spawn_retransmit_driver(Arc::clone(&scheduler), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(owner.0.load(Ordering::Relaxed), 0);

        clock.advance(100);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(owner.0.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.pending(), 0);

        task.abort();
    }
}
