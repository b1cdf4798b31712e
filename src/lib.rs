//! act-timing: observe deferred async state updates deterministically
//!
//! An [`Accumulator`] writes its total only after a suspended operation
//! completes, and can fire that write off without waiting for it. Whether a
//! test sees the new total depends on when the scheduler behind it runs the
//! deferred work:
//!
//! - awaiting [`Accumulator::add_async`] always observes the write
//! - after [`Accumulator::add_with_side_effect`] the write is only visible
//!   once the scheduler has been drained
//!
//! The scheduler is injected rather than ambient. [`ManualScheduler`] gives a
//! test its own task queue and virtual clock, reached through a
//! [`ManualSpawner`]; [`TokioScheduler`] runs the same work on a real runtime.
//!
//! ```
//! use act_timing::{Accumulator, ManualScheduler};
//!
//! let scheduler = ManualScheduler::new();
//! let acc = Accumulator::new(scheduler.spawner());
//!
//! acc.add_with_side_effect(2.0, 2.0);
//! assert_eq!(acc.total(), 0.0);
//!
//! scheduler.run_until_stalled();
//! assert_eq!(acc.total(), 4.0);
//! ```

extern crate self as act_timing;

mod accumulator;
mod error;
mod latency;
mod runtime;
mod scheduler;
mod test_harness;

pub use accumulator::Accumulator;
pub use act_timing_macros::{harness_test, test};
pub use error::{DrainError, Error, LatencyError};
pub use latency::{gate, Delay, Failing, Gate, GateHandle, Immediate, Latency};
pub use runtime::{block_on, init_runtime, runtime};
pub use scheduler::{Builder, ManualScheduler, ManualSpawner, Scheduler, Sleep, TokioScheduler};
pub use test_harness::{run_tests, TestCase};

pub use inventory;
pub use libtest_mimic;

#[cfg(feature = "criterion")]
pub use criterion;

/// Macro to generate a main function for test files with `harness = false`.
///
/// # Example
///
/// ```ignore
/// // tests/my_tests.rs (with harness = false in Cargo.toml)
///
/// #[act_timing::harness_test]
/// async fn detached_add_lands_after_drain(scheduler: act_timing::ManualScheduler) {
///     let acc = act_timing::Accumulator::new(scheduler.spawner());
///     acc.add_with_side_effect(2.0, 2.0);
///     scheduler.run_until_stalled();
///     assert_eq!(acc.total(), 4.0);
/// }
///
/// act_timing::test_main!();
/// ```
#[macro_export]
macro_rules! test_main {
    () => {
        fn main() {
            $crate::run_tests();
        }
    };
}
