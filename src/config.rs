//! Runner configuration
//!
//! Read once when the root test is constructed and threaded explicitly
//! through every descendant; never consulted ambiently after that.

use serde::{Deserialize, Serialize};

/// Process-wide configuration for a test run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// When true, tests not marked `only` are skipped.
    pub only_filter_active: bool,
    /// Concurrency limit of the root test. Inherited by descendants unless
    /// they override their own limit.
    pub root_concurrency: usize,
}

impl RunnerConfig {
    /// Configuration for a nested invocation: no only-filter, one test at a
    /// time.
    pub fn new() -> Self {
        Self {
            only_filter_active: false,
            root_concurrency: 1,
        }
    }

    /// Configuration for a top-level invocation: root concurrency follows
    /// the platform parallelism hint.
    pub fn top_level() -> Self {
        let hint = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            only_filter_active: false,
            root_concurrency: hint,
        }
    }

    pub fn with_only_filter(mut self, active: bool) -> Self {
        self.only_filter_active = active;
        self
    }

    pub fn with_root_concurrency(mut self, limit: usize) -> Self {
        self.root_concurrency = limit.max(1);
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}
