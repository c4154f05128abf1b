//! taptree - Hierarchical Asynchronous Test Scheduler
//!
//! Runs a tree of test bodies in which any body may declare further
//! subtests, bounds how many subtests run concurrently per parent, and
//! reports results in strict declaration order even when execution
//! completes out of order.
//!
//! ## Features
//!
//! - Three body shapes: synchronous, future-returning, and legacy
//!   callback-style completion
//! - Per-parent concurrency limits with a FIFO queue for waiting subtests
//! - Declaration-order, depth-first reporting through a pluggable
//!   [`Reporter`] (TAP writer and in-memory recorder included)
//! - Cooperative cancellation of unfinished subtests when a parent's body
//!   returns
//! - Skip / todo / only directives and per-test diagnostics
//!
//! ## Usage
//!
//! ```
//! use taptree::{Runner, RunnerConfig, TapReporter, TestBody, TestOptions};
//!
//! fn main() -> anyhow::Result<()> {
//!     let runner = Runner::new(RunnerConfig::new(), TapReporter::stdout());
//!     let summary = runner.run_blocking(TestBody::future(|t| async move {
//!         t.test("arithmetic", TestOptions::new(), TestBody::sync(|_| {
//!             assert_eq!(2 + 2, 4);
//!             Ok(())
//!         }))
//!         .await;
//!         Ok(())
//!     }))?;
//!     assert!(summary.success());
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod executor;
mod models;
mod output;

pub use config::RunnerConfig;
pub use error::Failure;
pub use executor::{BodyResult, Completion, CompletionHandle, Runner, TestBody, TestContext};
pub use models::{RunSummary, TestOptions, TestRecord};
pub use output::{RecordingReporter, Reporter, ReporterEvent, TapReporter};
