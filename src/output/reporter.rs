//! Reporter interface
//!
//! Consumed by the scheduler in declaration order, depth first: a parent's
//! own lines always follow all of its children's lines, and calls for one
//! test are never interleaved with a sibling's.

use crate::error::Failure;

/// Sink for finalized test results.
pub trait Reporter {
    /// Declare how many child results to expect, once per parent with at
    /// least one child.
    fn plan(&mut self, indent: usize, count: usize);

    /// A passing test line.
    fn ok(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>);

    /// A failing test line.
    fn fail(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>);

    /// Duration and failure details for the test reported immediately
    /// before.
    fn details(&mut self, indent: usize, duration_secs: f64, error: Option<&Failure>);

    /// A free-form diagnostic message.
    fn diagnostic(&mut self, indent: usize, message: &str);

    /// Build the directive text for a skipped test.
    fn skip_directive(&self, message: Option<&str>) -> String;

    /// Build the directive text for a todo test.
    fn todo_directive(&self, message: Option<&str>) -> String;
}
