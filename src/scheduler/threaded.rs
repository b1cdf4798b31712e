use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::trace;

use super::Scheduler;

/// Spawns detached tasks onto a tokio runtime.
///
/// The runtime decides when they run. [`flush`](Self::flush) waits for every
/// task spawned through this scheduler (or its clones) to finish.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: Handle,
    tracker: Arc<Tracker>,
}

#[derive(Debug, Default)]
struct Tracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TokioScheduler {
    /// Uses the runtime the caller is running on.
    ///
    /// Panics when called outside a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Uses the process-wide runtime, creating it on first use.
    pub fn global() -> Self {
        Self::from_handle(crate::init_runtime().handle().clone())
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            tracker: Arc::default(),
        }
    }

    /// Detached tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight.load(Ordering::Acquire)
    }

    /// Waits until no detached task is in flight.
    pub async fn flush(&self) {
        loop {
            let notified = self.tracker.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Scheduler for TokioScheduler {
    fn spawn_detached(&self, task: BoxFuture<'static, ()>) {
        self.tracker.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.tracker));
        trace!(in_flight = self.in_flight(), "spawning detached task");
        drop(self.handle.spawn(async move {
            let _guard = guard;
            task.await;
        }));
    }
}
