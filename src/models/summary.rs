//! Run summaries
//!
//! Aggregated outcome of a whole test run.

use serde::Serialize;
use std::fmt;

/// Final state of a single test, captured after the run completes.
#[derive(Clone, Debug, Serialize)]
pub struct TestRecord {
    pub name: String,
    /// Nesting depth; direct children of the root are at depth 1.
    pub depth: usize,
    pub passed: bool,
    pub skipped: bool,
    pub todo: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
    /// Failure label and message, when the test did not pass.
    pub failure: Option<(String, String)>,
}

/// Summary of a completed run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
    /// Whether the root itself passed, i.e. no counted failures anywhere.
    pub success: bool,
    pub records: Vec<TestRecord>,
}

impl RunSummary {
    pub fn new(records: Vec<TestRecord>, duration_ms: u64, success: bool) -> Self {
        let total = records.len();
        let passed = records.iter().filter(|r| r.passed).count();
        let failed = records.iter().filter(|r| !r.passed).count();
        let skipped = records.iter().filter(|r| r.skipped).count();
        let todo = records.iter().filter(|r| r.todo).count();
        let cancelled = records.iter().filter(|r| r.cancelled).count();

        Self {
            total,
            passed,
            failed,
            skipped,
            todo,
            cancelled,
            duration_ms,
            success,
            records,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Todo: {} | Cancelled: {}",
            self.total, self.passed, self.failed, self.skipped, self.todo, self.cancelled
        )?;
        write!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, passed: bool) -> TestRecord {
        TestRecord {
            name: name.to_string(),
            depth: 1,
            passed,
            skipped: false,
            todo: false,
            cancelled: false,
            duration_ms: 5,
            failure: None,
        }
    }

    #[test]
    fn test_counts() {
        let summary = RunSummary::new(
            vec![record("a", true), record("b", false), record("c", true)],
            42,
            false,
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.success());
    }

    #[test]
    fn test_pass_rate_empty() {
        let summary = RunSummary::new(Vec::new(), 0, true);
        assert_eq!(summary.pass_rate(), 0.0);
    }

    #[test]
    fn test_serializes() {
        let summary = RunSummary::new(vec![record("a", true)], 10, true);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["records"][0]["name"], "a");
    }
}
