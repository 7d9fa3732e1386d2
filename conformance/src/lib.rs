//! Rowstream client conformance suite.
//!
//! Each case starts a scripted [`MockServer`](rowstream_mock::MockServer),
//! drives a client through a [`TestProxy`](rowstream_proxy::TestProxy) and
//! checks what the server recorded and what the client returned.
//!
//! # Usage
//!
//! ```bash
//! rowstream-conformance --list
//! rowstream-conformance --case read_row.point_read_deadline
//! ```
//!
//! The runner exits with:
//! - 0: the case passed
//! - 1: the case failed
//! - 2: internal error (unknown case, runtime failure)

pub mod cases;
pub mod fixture;
pub mod testcase;

use std::future::Future;
use std::pin::Pin;

use testcase::TestResult;

/// The async case function type.
pub type AsyncTestFn = fn() -> Pin<Box<dyn Future<Output = TestResult> + Send>>;

/// A registered conformance case.
///
/// Cases are registered with [`conformance_case!`].
pub struct ConformanceTest {
    /// `category.case_name`
    pub name: &'static str,
    /// One line on the behavior under test.
    pub summary: &'static str,
    pub func: AsyncTestFn,
}

impl ConformanceTest {
    pub fn category(&self) -> &'static str {
        self.name.split('.').next().unwrap_or(self.name)
    }
}

inventory::collect!(ConformanceTest);

/// Register an `async fn() -> Result<(), String>` as a case.
#[macro_export]
macro_rules! conformance_case {
    ($name:literal, $summary:literal, $func:path) => {
        const _: () = {
            fn start() -> ::std::pin::Pin<
                Box<dyn ::std::future::Future<Output = $crate::testcase::TestResult> + Send>,
            > {
                Box::pin(async { $crate::testcase::TestResult::from($func().await) })
            }

            inventory::submit! {
                $crate::ConformanceTest {
                    name: $name,
                    summary: $summary,
                    func: start,
                }
            }
        };
    };
}

/// Look up a case by name.
pub fn find(name: &str) -> Option<&'static ConformanceTest> {
    inventory::iter::<ConformanceTest>
        .into_iter()
        .find(|test| test.name == name)
}

/// Every registered case, sorted by name.
pub fn list_all() -> Vec<&'static ConformanceTest> {
    let mut tests: Vec<_> = inventory::iter::<ConformanceTest>.into_iter().collect();
    tests.sort_by_key(|test| test.name);
    tests
}

/// Cases in `category` (e.g. "read_row").
pub fn list_category(category: &str) -> Vec<&'static ConformanceTest> {
    list_all()
        .into_iter()
        .filter(|test| test.category() == category)
        .collect()
}

/// Run `test` on a fresh multi-threaded runtime.
pub fn run_blocking(test: &ConformanceTest) -> std::io::Result<TestResult> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on((test.func)()))
}
