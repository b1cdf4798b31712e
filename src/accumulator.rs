use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::{Error, Immediate, Latency, Scheduler};

/// Holds a total that is only ever written after a suspended operation
/// completes.
///
/// Each add overwrites `total` with the sum of its own operands; it does not
/// accumulate. Two adds in flight at once race, and the one whose wait
/// resolves last wins.
///
/// Clones are handles to the same total.
pub struct Accumulator<S> {
    shared: Arc<Shared>,
    scheduler: S,
}

struct Shared {
    // f64 bit pattern, so a commit is a single store.
    total: AtomicU64,
    latency: Box<dyn Latency>,
}

impl<S: Scheduler> Accumulator<S> {
    /// An accumulator whose adds suspend for one scheduling cycle.
    pub fn new(scheduler: S) -> Self {
        Self::with_latency(scheduler, Immediate)
    }

    /// An accumulator whose adds wait on `latency` before committing.
    pub fn with_latency(scheduler: S, latency: impl Latency) -> Self {
        Self {
            shared: Arc::new(Shared {
                total: AtomicU64::new(0.0_f64.to_bits()),
                latency: Box::new(latency),
            }),
            scheduler,
        }
    }

    /// The value written by the most recently completed add, or `0`.
    pub fn total(&self) -> f64 {
        f64::from_bits(self.shared.total.load(Ordering::Acquire))
    }

    /// The scheduler detached adds are spawned on.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Waits on the latency, then sets `total` to `a + b` and returns it.
    ///
    /// Nothing is written before the wait completes. If the wait fails,
    /// `total` keeps its previous value.
    pub async fn add_async(&self, a: f64, b: f64) -> Result<f64, Error> {
        self.shared
            .latency
            .wait()
            .await
            .map_err(|source| Error::OperationFailed { a, b, source })?;

        let total = a + b;
        self.shared.total.store(total.to_bits(), Ordering::Release);
        debug!(a, b, total, "add committed");
        Ok(total)
    }

    /// Starts [`add_async`](Self::add_async) on the scheduler and returns
    /// without waiting for it.
    ///
    /// On return `total` may still hold its old value. Failures are logged
    /// and dropped; the caller never sees them.
    pub fn add_with_side_effect(&self, a: f64, b: f64) {
        let this = self.clone();
        self.scheduler.spawn_detached(
            async move {
                if let Err(err) = this.add_async(a, b).await {
                    warn!(%err, "detached add failed");
                }
            }
            .boxed(),
        );
    }
}

impl<S: Clone> Clone for Accumulator<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<S> fmt::Debug for Accumulator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("total", &f64::from_bits(self.shared.total.load(Ordering::Acquire)))
            .finish_non_exhaustive()
    }
}
