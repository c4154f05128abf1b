//! Test failure records
//!
//! Defines the failure kinds a test can finish with.

use thiserror::Error;

/// Why a test failed.
///
/// Recognized kinds propagate verbatim when a body returns them inside an
/// [`anyhow::Error`]; any other error value is wrapped as [`Failure::TestCode`].
#[derive(Error, Debug)]
pub enum Failure {
    /// A callback-style body also returned a future. Only one completion
    /// channel may be used; the future is still awaited so it is not dropped
    /// mid-flight.
    #[error("passed a callback but also returned a future")]
    CallbackAndFuture,

    /// The completion callback was invoked more than once.
    #[error("callback invoked multiple times")]
    MultipleCallbackInvocations,

    /// The test did not finish before its parent and was cancelled.
    #[error("test did not finish before its parent and was cancelled")]
    CancelledByParent,

    /// The test was created after its parent had already finished.
    #[error("test could not be started because its parent finished")]
    ParentAlreadyFinished,

    /// The test body passed but one or more subtests failed.
    #[error("{0} subtest(s) failed")]
    SubtestsFailed(usize),

    /// An error raised by the test body itself.
    #[error(transparent)]
    TestCode(#[from] anyhow::Error),
}

impl Failure {
    /// Short machine-readable label, used in report detail blocks.
    pub fn label(&self) -> &'static str {
        match self {
            Failure::CallbackAndFuture => "callbackAndFuture",
            Failure::MultipleCallbackInvocations => "multipleCallbackInvocations",
            Failure::CancelledByParent => "cancelledByParent",
            Failure::ParentAlreadyFinished => "parentAlreadyFinished",
            Failure::SubtestsFailed(_) => "subtestsFailed",
            Failure::TestCode(_) => "testCodeFailure",
        }
    }

    /// Recover a recognized failure kind from an arbitrary body error,
    /// wrapping anything else as [`Failure::TestCode`].
    pub fn from_body_error(err: anyhow::Error) -> Self {
        match err.downcast::<Failure>() {
            Ok(failure) => failure,
            Err(other) => Failure::TestCode(other),
        }
    }
}
