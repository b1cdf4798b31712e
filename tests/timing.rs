//! Where a deferred write becomes visible.
//!
//! Each case writes state from a detached task the way an effect handler
//! would: once synchronously, after a timer, or after a response the test
//! resolves by hand. Assertions made before the scheduler is drained see the
//! old state.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use act_timing::{gate, Accumulator, Latency, ManualScheduler, Scheduler};
use common::setup_tracing;
use futures::FutureExt;

#[derive(Clone, Default)]
struct Count(Arc<AtomicUsize>);

impl Count {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, value: usize) {
        self.0.store(value, Ordering::SeqCst);
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn effect_write_needs_drain() {
    let scheduler = ManualScheduler::new();
    let count = Count::default();

    let effect = count.clone();
    scheduler
        .spawner()
        .spawn_detached(async move { effect.set(1) }.boxed());
    assert_eq!(count.get(), 0);

    scheduler.run_until_stalled();
    assert_eq!(count.get(), 1);
}

#[test]
fn act_settles_effect_before_returning() {
    let scheduler = ManualScheduler::new();
    let count = Count::default();

    let effect = count.clone();
    scheduler.act(async move { effect.set(1) }).unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn timer_write_needs_fake_timers_run() {
    setup_tracing();
    let scheduler = ManualScheduler::new();
    let count = Count::default();

    let effect = count.clone();
    let clock = scheduler.spawner();
    scheduler
        .act(async move {
            effect.increment();
            let later = effect.clone();
            let sleep = clock.sleep(Duration::from_millis(500));
            clock.spawn_detached(
                async move {
                    sleep.await;
                    later.increment();
                }
                .boxed(),
            );
        })
        .unwrap();
    assert_eq!(count.get(), 1);

    scheduler.run_until_stalled();
    assert_eq!(count.get(), 1);

    assert_eq!(scheduler.run_all_timers(), Ok(1));
    assert_eq!(count.get(), 2);
    assert_eq!(scheduler.now(), Duration::from_millis(500));
}

#[test]
fn resolved_fetch_is_visible_only_after_drain() {
    let scheduler = ManualScheduler::new();
    let (fetch, response) = gate();
    let acc = Accumulator::with_latency(scheduler.spawner(), fetch);

    scheduler
        .act({
            let acc = acc.clone();
            async move { acc.add_with_side_effect(1.0, 0.0) }
        })
        .unwrap();
    assert_eq!(acc.total(), 0.0);

    response.open_oldest();
    assert_eq!(acc.total(), 0.0);

    scheduler.run_until_stalled();
    assert_eq!(acc.total(), 1.0);
}

#[test]
fn abandoned_fetch_never_writes() {
    let scheduler = ManualScheduler::new();
    let (fetch, response) = gate();
    let acc = Accumulator::with_latency(scheduler.spawner(), fetch.clone());

    acc.add_with_side_effect(1.0, 0.0);
    scheduler.run_until_stalled();
    drop(response);

    scheduler.run_until_stalled();
    assert_eq!(acc.total(), 0.0);
    assert!(fetch.wait().now_or_never().unwrap().is_err());
}
