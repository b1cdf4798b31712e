use std::future::Future;
use std::pin::Pin;

use crate::ManualScheduler;

/// A test case registered with the custom test harness.
///
/// Every run gets a fresh [`ManualScheduler`], created on the thread that
/// runs the test, so tests running in parallel never drain each other's
/// queues.
pub struct TestCase {
    pub name: &'static str,
    pub func: fn(ManualScheduler) -> Pin<Box<dyn Future<Output = ()>>>,
}

inventory::collect!(TestCase);

fn collect_tests() -> Vec<libtest_mimic::Trial> {
    let mut tests: Vec<_> = inventory::iter::<TestCase>
        .into_iter()
        .map(|tc| {
            let func = tc.func;
            libtest_mimic::Trial::test(tc.name, move || {
                crate::block_on(func(ManualScheduler::new()));
                Ok(())
            })
        })
        .collect();
    tests.sort_by(|a, b| a.name().cmp(b.name()));
    tests
}

/// Run all registered tests using libtest-mimic.
///
/// Tests run on the process tokio runtime. This function is called by the
/// `test_main!()` macro.
pub fn run_tests() -> ! {
    let args = libtest_mimic::Arguments::from_args();
    let tests = collect_tests();

    crate::init_runtime();
    libtest_mimic::run(&args, tests).exit();
}
