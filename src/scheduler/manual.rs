use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::BoxFuture;
use futures::task::LocalSpawnExt;
use tracing::{debug, trace};

use super::Scheduler;
use crate::DrainError;

const DEFAULT_TIMER_LIMIT: usize = 100_000;

/// Configures a [`ManualScheduler`].
#[derive(Debug, Clone)]
pub struct Builder {
    timer_limit: usize,
}

impl Builder {
    fn new() -> Self {
        Self {
            timer_limit: DEFAULT_TIMER_LIMIT,
        }
    }

    /// Maximum number of timers [`ManualScheduler::run_all_timers`] fires
    /// before giving up.
    pub fn timer_limit(&mut self, limit: usize) -> &mut Self {
        self.timer_limit = limit;
        self
    }

    pub fn build(&self) -> ManualScheduler {
        ManualScheduler {
            pool: RefCell::new(LocalPool::new()),
            shared: Arc::new(Shared {
                incoming: Mutex::new(Vec::new()),
                clock: Mutex::new(Clock::default()),
                live: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                timer_limit: self.timer_limit,
            }),
        }
    }
}

/// A deterministic task queue with a virtual clock, owned by one thread.
///
/// Work reaches it through [`ManualSpawner`]s and only runs when the owner
/// drains the queue with [`run_until_stalled`](Self::run_until_stalled).
/// [`Sleep`] timers only fire when the clock is moved with
/// [`advance`](Self::advance) or [`run_all_timers`](Self::run_all_timers).
///
/// Spawners and timers refer back to the scheduler weakly. Dropping the
/// scheduler drops every task it has not finished.
pub struct ManualScheduler {
    pool: RefCell<LocalPool>,
    shared: Arc<Shared>,
}

struct Shared {
    // Detached tasks wait here until the owner moves them into its pool.
    incoming: Mutex<Vec<BoxFuture<'static, ()>>>,
    clock: Mutex<Clock>,
    live: AtomicUsize,
    finished: AtomicUsize,
    timer_limit: usize,
}

#[derive(Default)]
struct Clock {
    now: Duration,
    next_timer: u64,
    // Keyed by (deadline, registration order) so equal deadlines fire FIFO.
    timers: BTreeMap<(Duration, u64), Option<Waker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts a task as live until it is dropped, finished or not.
struct Live(Weak<Shared>);

impl Drop for Live {
    fn drop(&mut self) {
        if let Some(shared) = self.0.upgrade() {
            shared.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Shared {
    fn admit(self: &Arc<Self>) -> Live {
        self.live.fetch_add(1, Ordering::AcqRel);
        Live(Arc::downgrade(self))
    }

    fn sleep(self: &Arc<Self>, duration: Duration) -> Sleep {
        let mut clock = lock(&self.clock);
        let deadline = clock.now.saturating_add(duration);
        let id = clock.next_timer;
        clock.next_timer += 1;
        clock.timers.insert((deadline, id), None);
        Sleep {
            deadline,
            id,
            clock: Arc::downgrade(self),
        }
    }

    /// Pops the earliest timer due at or before `limit` and moves the clock
    /// to its deadline.
    fn fire_next(&self, limit: Option<Duration>) -> bool {
        let waker = {
            let mut clock = lock(&self.clock);
            let Some((&(deadline, id), _)) = clock.timers.first_key_value() else {
                return false;
            };
            if limit.is_some_and(|limit| deadline > limit) {
                return false;
            }
            let waker = clock.timers.remove(&(deadline, id)).flatten();
            clock.now = clock.now.max(deadline);
            debug!(timer = id, ?deadline, "firing timer");
            waker
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

fn tracked<F>(live: Live, future: F) -> impl Future<Output = ()> + 'static
where
    F: Future<Output = ()> + 'static,
{
    async move {
        future.await;
        if let Some(shared) = live.0.upgrade() {
            shared.finished.fetch_add(1, Ordering::AcqRel);
        }
        drop(live);
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// A handle that queues detached tasks on this scheduler.
    ///
    /// Hand this to components, not the scheduler: it does not keep the
    /// scheduler alive.
    pub fn spawner(&self) -> ManualSpawner {
        ManualSpawner {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn drain(&self) -> usize {
        let finished = self.shared.finished.load(Ordering::Acquire);
        let mut pool = self.pool.borrow_mut();
        let spawner = pool.spawner();
        loop {
            let incoming = mem::take(&mut *lock(&self.shared.incoming));
            for future in incoming {
                let live = Live(Arc::downgrade(&self.shared));
                if let Err(err) = spawner.spawn_local(tracked(live, future)) {
                    debug!(%err, "task dropped before it could run");
                }
            }
            pool.run_until_stalled();
            if lock(&self.shared.incoming).is_empty() {
                break;
            }
        }
        self.shared.finished.load(Ordering::Acquire) - finished
    }

    /// Runs queued tasks, and any tasks they wake or spawn, until nothing can
    /// make progress.
    ///
    /// Timers are left alone. Returns the number of tasks that finished.
    pub fn run_until_stalled(&self) -> usize {
        let finished = self.drain();
        debug!(finished, "drained task queue");
        finished
    }

    /// Moves the virtual clock forward by `duration`, firing every timer that
    /// falls due along the way and draining the queue after each one.
    ///
    /// The clock stops at [`Duration::MAX`]. Returns the number of timers
    /// fired.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = lock(&self.shared.clock).now.saturating_add(duration);

        self.drain();
        let mut fired = 0;
        while self.shared.fire_next(Some(target)) {
            fired += 1;
            self.drain();
        }

        let mut clock = lock(&self.shared.clock);
        clock.now = clock.now.max(target);
        fired
    }

    /// Fires timers until none remain, jumping the clock to each deadline.
    ///
    /// Timers scheduled by the tasks these timers wake are fired too, so a
    /// task that keeps rescheduling itself hits the configured timer limit.
    pub fn run_all_timers(&self) -> Result<usize, DrainError> {
        let limit = self.shared.timer_limit;

        self.drain();
        let mut fired = 0;
        loop {
            if fired >= limit && self.pending_timers() > 0 {
                return Err(DrainError::TimerLimit { limit });
            }
            if !self.shared.fire_next(None) {
                break;
            }
            fired += 1;
            self.drain();
        }
        Ok(fired)
    }

    /// Spawns `future` and drains the queue, returning its output if it
    /// settled.
    ///
    /// Timers are not advanced. A future still waiting afterwards stays
    /// queued on this scheduler but its output is discarded.
    pub fn act<F>(&self, future: F) -> Result<F::Output, DrainError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let live = self.shared.admit();
        let task = tracked(live, async move {
            let _ = tx.send(future.await);
        });
        if let Err(err) = self.pool.borrow().spawner().spawn_local(task) {
            debug!(%err, "task dropped before it could run");
        }
        self.drain();

        match rx.try_recv() {
            Ok(Some(output)) => Ok(output),
            _ => Err(DrainError::Stalled {
                pending_timers: self.pending_timers(),
            }),
        }
    }

    /// A future that completes once the virtual clock has moved `duration`
    /// past the current time.
    ///
    /// The timer counts as pending from this call, not from the first poll.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.shared.sleep(duration)
    }

    /// Virtual time elapsed since the scheduler was built.
    pub fn now(&self) -> Duration {
        lock(&self.shared.clock).now
    }

    /// Tasks spawned and not yet finished, whether queued or parked.
    pub fn pending_tasks(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.shared.clock).timers.len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ManualScheduler {
    fn drop(&mut self) {
        let incoming = mem::take(&mut *lock(&self.shared.incoming));
        let timers = mem::take(&mut lock(&self.shared.clock).timers);
        debug!(
            unfinished = self.pending_tasks(),
            timers = timers.len(),
            "dropping manual scheduler"
        );
        drop(incoming);
        drop(timers);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

/// Queues detached tasks on a [`ManualScheduler`] and reads its clock.
///
/// Once the scheduler is dropped, spawned tasks are discarded and sleeps
/// never complete.
#[derive(Clone)]
pub struct ManualSpawner {
    shared: Weak<Shared>,
}

impl ManualSpawner {
    /// See [`ManualScheduler::sleep`].
    pub fn sleep(&self, duration: Duration) -> Sleep {
        match self.shared.upgrade() {
            Some(shared) => shared.sleep(duration),
            None => Sleep {
                deadline: Duration::MAX,
                id: 0,
                clock: Weak::new(),
            },
        }
    }

    /// Whether the scheduler behind this handle has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl fmt::Debug for ManualSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSpawner")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Scheduler for ManualSpawner {
    fn spawn_detached(&self, task: BoxFuture<'static, ()>) {
        let Some(shared) = self.shared.upgrade() else {
            trace!("scheduler dropped, discarding detached task");
            return;
        };
        shared.live.fetch_add(1, Ordering::AcqRel);
        let mut incoming = lock(&shared.incoming);
        incoming.push(task);
        trace!(queued = incoming.len(), "task queued");
    }
}

/// Future returned by [`ManualScheduler::sleep`].
#[derive(Debug)]
pub struct Sleep {
    deadline: Duration,
    id: u64,
    clock: Weak<Shared>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A clock that no longer exists never advances.
        let Some(shared) = self.clock.upgrade() else {
            return Poll::Pending;
        };
        let mut clock = lock(&shared.clock);
        let key = (self.deadline, self.id);
        // Displaced wakers are dropped after the clock is unlocked; the last
        // reference to a task may be among them.
        let (poll, _displaced) = if clock.now >= self.deadline {
            (Poll::Ready(()), clock.timers.remove(&key).flatten())
        } else {
            let displaced = clock.timers.insert(key, Some(cx.waker().clone()));
            (Poll::Pending, displaced.flatten())
        };
        drop(clock);
        poll
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(shared) = self.clock.upgrade() {
            let removed = lock(&shared.clock).timers.remove(&(self.deadline, self.id));
            drop(removed);
        }
    }
}
