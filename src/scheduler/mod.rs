//! Where deferred work runs.
//!
//! Components that fire work without joining it take a [`Scheduler`] instead
//! of reaching for an ambient executor, so a test can hand each component a
//! spawner for its own [`ManualScheduler`] and decide exactly when that work
//! runs.

use futures::future::BoxFuture;

mod manual;
mod threaded;

pub use manual::{Builder, ManualScheduler, ManualSpawner, Sleep};
pub use threaded::TokioScheduler;

/// Accepts detached tasks.
///
/// There is no handle to join on. A caller that needs the task's effects
/// waits through whatever draining mechanism the concrete scheduler offers.
pub trait Scheduler: Clone + Send + Sync + 'static {
    fn spawn_detached(&self, task: BoxFuture<'static, ()>);
}
