//! The suspending operation an add waits on before it commits.
//!
//! [`Immediate`] gives up control for exactly one scheduling cycle, which is
//! enough to make a write invisible to anyone inspecting state synchronously.
//! The other implementations let a test decide how long the wait lasts and
//! whether it succeeds.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::trace;

use crate::{LatencyError, ManualScheduler, ManualSpawner};

/// The operation an add suspends on.
///
/// Each call to `wait` starts one independent wait. The returned future must
/// not have side effects visible to the accumulator; it only decides when,
/// and whether, the add may commit.
pub trait Latency: Send + Sync + 'static {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>>;
}

impl<L: Latency + ?Sized> Latency for Arc<L> {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>> {
        (**self).wait()
    }
}

/// Returns `Pending` once, waking itself, then completes.
#[derive(Debug, Default)]
struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspends for one scheduling cycle and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Latency for Immediate {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>> {
        YieldOnce::default().map(Ok).boxed()
    }
}

/// Suspends for one scheduling cycle and then fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Failing;

impl Latency for Failing {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>> {
        YieldOnce::default()
            .map(|()| Err(LatencyError::Failed))
            .boxed()
    }
}

/// Sleeps on a [`ManualScheduler`]'s virtual clock.
///
/// Holds the clock weakly; once the scheduler is dropped, waits never
/// complete.
#[derive(Debug, Clone)]
pub struct Delay {
    clock: ManualSpawner,
    duration: Duration,
}

impl Delay {
    pub fn new(clock: &ManualScheduler, duration: Duration) -> Self {
        Self {
            clock: clock.spawner(),
            duration,
        }
    }
}

impl Latency for Delay {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>> {
        self.clock.sleep(self.duration).map(Ok).boxed()
    }
}

type Waiter = oneshot::Sender<Result<(), LatencyError>>;

#[derive(Debug, Default)]
struct Waiters {
    queue: VecDeque<Waiter>,
    closed: bool,
}

fn lock(waiters: &Mutex<Waiters>) -> MutexGuard<'_, Waiters> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates a latency whose waits stay pending until the paired handle
/// resolves them.
pub fn gate() -> (Gate, GateHandle) {
    let waiters = Arc::new(Mutex::new(Waiters::default()));
    (
        Gate {
            waiters: Arc::clone(&waiters),
        },
        GateHandle { waiters },
    )
}

/// Latency half of [`gate`]. Every `wait` parks until the handle settles it.
#[derive(Debug, Clone)]
pub struct Gate {
    waiters: Arc<Mutex<Waiters>>,
}

impl Latency for Gate {
    fn wait(&self) -> BoxFuture<'static, Result<(), LatencyError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = lock(&self.waiters);
            if waiters.closed {
                return future::ready(Err(LatencyError::Abandoned)).boxed();
            }
            waiters.queue.push_back(tx);
            trace!(pending = waiters.queue.len(), "wait parked at gate");
        }
        rx.map(|settled| settled.unwrap_or(Err(LatencyError::Abandoned)))
            .boxed()
    }
}

/// Control half of [`gate`].
///
/// Dropping the handle abandons every wait it has not settled, and any wait
/// started afterwards fails straight away.
#[derive(Debug)]
pub struct GateHandle {
    waiters: Arc<Mutex<Waiters>>,
}

enum End {
    Oldest,
    Newest,
}

impl GateHandle {
    /// Waits parked and not yet settled.
    pub fn pending(&self) -> usize {
        lock(&self.waiters).queue.len()
    }

    /// Lets the longest-waiting operation succeed. Returns `false` if
    /// nothing was waiting.
    pub fn open_oldest(&self) -> bool {
        self.settle(End::Oldest, Ok(()))
    }

    /// Lets the most recent operation succeed, overtaking earlier ones.
    pub fn open_newest(&self) -> bool {
        self.settle(End::Newest, Ok(()))
    }

    /// Fails the longest-waiting operation.
    pub fn fail_oldest(&self) -> bool {
        self.settle(End::Oldest, Err(LatencyError::Failed))
    }

    /// Lets every parked operation succeed, oldest first.
    pub fn open_all(&self) -> usize {
        let mut opened = 0;
        while self.open_oldest() {
            opened += 1;
        }
        opened
    }

    fn settle(&self, end: End, result: Result<(), LatencyError>) -> bool {
        loop {
            let waiter = {
                let mut waiters = lock(&self.waiters);
                match end {
                    End::Oldest => waiters.queue.pop_front(),
                    End::Newest => waiters.queue.pop_back(),
                }
            };
            let Some(waiter) = waiter else {
                return false;
            };
            // Waits whose future was dropped are skipped.
            if waiter.send(result).is_ok() {
                return true;
            }
        }
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        let abandoned = {
            let mut waiters = lock(&self.waiters);
            waiters.closed = true;
            std::mem::take(&mut waiters.queue)
        };
        trace!(abandoned = abandoned.len(), "gate handle dropped");
    }
}
