//! Per-test options
//!
//! Options accepted when declaring a test or subtest.

/// Options accepted by [`TestContext::test`](crate::TestContext::test).
///
/// Built up fluently:
///
/// ```
/// use taptree::TestOptions;
///
/// let options = TestOptions::new().concurrency(4).skip_reason("flaky on CI");
/// ```
#[derive(Clone, Debug, Default)]
pub struct TestOptions {
    concurrency: Option<usize>,
    only: bool,
    skip: Option<Option<String>>,
    todo: Option<Option<String>>,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the concurrency limit for this test's own subtests.
    /// Descendants inherit the override unless they override again.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// Mark this test as `only`. When the only-filter is active, tests
    /// without this mark are skipped.
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    /// Skip this test; the body is never invoked.
    pub fn skip(mut self) -> Self {
        self.skip = Some(None);
        self
    }

    /// Skip this test with a reason shown in the report directive.
    pub fn skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(Some(reason.into()));
        self
    }

    /// Mark this test as a todo; it runs, but a failure is expected.
    pub fn todo(mut self) -> Self {
        self.todo = Some(None);
        self
    }

    /// Mark this test as a todo with a reason shown in the report directive.
    pub fn todo_reason(mut self, reason: impl Into<String>) -> Self {
        self.todo = Some(Some(reason.into()));
        self
    }

    pub(crate) fn concurrency_override(&self) -> Option<usize> {
        self.concurrency
    }

    pub(crate) fn is_only(&self) -> bool {
        self.only
    }

    pub(crate) fn skip_flag(&self) -> Option<Option<String>> {
        self.skip.clone()
    }

    pub(crate) fn todo_flag(&self) -> Option<Option<String>> {
        self.todo.clone()
    }
}
