//! The process-wide tokio runtime used by [`TokioScheduler::global`], the
//! `#[act_timing::test]` attribute and the custom test harness.
//!
//! [`TokioScheduler::global`]: crate::TokioScheduler::global

use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::Runtime;
use tracing::debug;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

pub fn init_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        debug!("starting process runtime");
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}

pub fn runtime() -> &'static Runtime {
    RUNTIME.get().expect(
        "runtime not initialized - call init_runtime() before using runtime() or block_on()",
    )
}

/// Drives `f` to completion on the process runtime.
///
/// Detached work spawned onto a [`ManualScheduler`](crate::ManualScheduler)
/// from inside `f` is not run by this; it waits for that scheduler to be
/// drained.
pub fn block_on<F: Future>(f: F) -> F::Output {
    runtime().block_on(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Accumulator, ManualScheduler, TokioScheduler};

    #[test]
    fn init_runtime_returns_same_instance() {
        let rt1 = init_runtime();
        let rt2 = init_runtime();
        assert!(std::ptr::eq(rt1, rt2));
    }

    #[test]
    fn concurrent_init_returns_same_runtime() {
        let handles: Vec<_> = (0..10)
            .map(|_| std::thread::spawn(|| init_runtime() as *const Runtime as usize))
            .collect();

        let addrs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn block_on_awaits_add() {
        init_runtime();
        let scheduler = ManualScheduler::new();
        let acc = Accumulator::new(scheduler.spawner());
        let result = block_on(acc.add_async(2.0, 2.0)).unwrap();
        assert_eq!(result, 4.0);
        assert_eq!(acc.total(), 4.0);
    }

    #[test]
    fn block_on_leaves_manual_work_queued() {
        init_runtime();
        let scheduler = ManualScheduler::new();
        let acc = Accumulator::new(scheduler.spawner());
        block_on(async {
            acc.add_with_side_effect(2.0, 2.0);
            tokio::task::yield_now().await;
        });
        assert_eq!(acc.total(), 0.0);
        assert_eq!(scheduler.pending_tasks(), 1);
    }

    #[test]
    fn global_detached_add_lands_after_flush() {
        let acc = Accumulator::new(TokioScheduler::global());
        acc.add_with_side_effect(2.0, 2.0);
        block_on(acc.scheduler().flush());
        assert_eq!(acc.total(), 4.0);
    }
}
