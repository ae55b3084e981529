//! Retransmission timing benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use flowcore::clock::{Clock, ManualClock};
use flowcore::flow::FlowHandle;
use flowcore::timing::{RetransmissionOwner, RetransmissionTiming, RetransmitScheduler};

struct NullOwner;

impl RetransmissionOwner for NullOwner {
    fn signal_ack(&self, _flow: FlowHandle, _ack: u32) {}

    fn retransmission_timer_fired(&self, _flow: FlowHandle) {}
}

fn bench_rtt_sample(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Arc::new(RetransmitScheduler::new(clock.clone(), 1));
    let mut timing = RetransmissionTiming::new(scheduler);

    c.bench_function("rtt_sample", |b| {
        let mut seq = 0u32;
        b.iter(|| {
            timing.start_measure(seq);
            clock.advance(40 + (seq % 20) as u64);
            seq = seq.wrapping_add(1000);
            black_box(timing.signal_ack(seq))
        })
    });
}

fn bench_timer_restart(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Arc::new(RetransmitScheduler::new(clock, 1));
    let mut timing = RetransmissionTiming::new(Arc::clone(&scheduler));
    timing.init_timer(FlowHandle::new(0, 0), Arc::new(NullOwner));
    timing.start();

    c.bench_function("timer_restart", |b| b.iter(|| black_box(timing.restart())));
}

fn bench_scheduler_fire(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");

    for timers in [64u64, 1024] {
        group.bench_function(format!("run_due_{}", timers), |b| {
            let clock = Arc::new(ManualClock::new(0));
            let scheduler = RetransmitScheduler::new(clock.clone(), 1);
            let owner: Arc<dyn RetransmissionOwner> = Arc::new(NullOwner);

            b.iter(|| {
                for i in 0..timers {
                    scheduler.schedule_after(i % 100, FlowHandle::new(i as u32, 0), owner.clone());
                }
                clock.advance(100);
                black_box(scheduler.run_due(clock.now_ms()))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rtt_sample, bench_timer_restart, bench_scheduler_fire);

criterion_main!(benches);
