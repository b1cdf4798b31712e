mod common;

use act_timing::{block_on, init_runtime, Accumulator, Failing, ManualScheduler, TokioScheduler};
use common::setup_tracing;

#[test]
fn runtime_can_be_initialized() {
    let rt = init_runtime();
    let _ = rt.handle();
}

#[test]
fn block_on_awaits_add() {
    setup_tracing();
    init_runtime();
    let acc = Accumulator::new(ManualScheduler::new().spawner());
    assert_eq!(block_on(acc.add_async(2.0, 2.0)), Ok(4.0));
}

#[act_timing::test]
async fn attribute_runs_async_body() {
    let acc = Accumulator::new(TokioScheduler::current());
    let result = acc.add_async(2.0, 3.0).await.unwrap();
    assert_eq!(result, 5.0);
}

#[act_timing::test]
async fn attribute_injects_fresh_scheduler(scheduler: ManualScheduler) {
    assert_eq!(scheduler.pending_tasks(), 0);
    let acc = Accumulator::new(scheduler.spawner());
    acc.add_with_side_effect(2.0, 2.0);
    assert_eq!(scheduler.pending_tasks(), 1);
    scheduler.run_until_stalled();
    assert_eq!(acc.total(), 4.0);
}

#[act_timing::test]
async fn attribute_passes_through_result() -> Result<(), act_timing::Error> {
    let acc = Accumulator::new(TokioScheduler::current());
    acc.add_async(1.0, 1.0).await?;
    assert_eq!(acc.total(), 2.0);
    Ok(())
}

mod tokio_scheduler {
    use super::*;

    #[tokio::test]
    async fn detached_add_lands_after_flush() {
        setup_tracing();
        let acc = Accumulator::new(TokioScheduler::current());
        acc.add_with_side_effect(2.0, 2.0);

        acc.scheduler().flush().await;
        assert_eq!(acc.total(), 4.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn detached_failure_is_swallowed() {
        setup_tracing();
        let acc = Accumulator::with_latency(TokioScheduler::current(), Failing);
        acc.add_with_side_effect(2.0, 2.0);

        acc.scheduler().flush().await;
        assert_eq!(acc.total(), 0.0);
        assert_eq!(acc.scheduler().in_flight(), 0);
    }

    #[tokio::test]
    async fn current_thread_runtime_defers_detached_add() {
        // A current-thread runtime cannot run the detached task until this
        // task yields, so the stale total is guaranteed here.
        let acc = Accumulator::new(TokioScheduler::current());
        acc.add_with_side_effect(2.0, 2.0);
        assert_eq!(acc.total(), 0.0);

        acc.scheduler().flush().await;
        assert_eq!(acc.total(), 4.0);
    }
}
