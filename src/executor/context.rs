//! Test bodies and the context facade
//!
//! A body is registered as one of three explicit shapes: synchronous,
//! future-returning, or callback-style with a legacy completion signal.
//! The [`TestContext`] handed to a running body is the only way to declare
//! subtests, diagnostics, and skip/todo state.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::error::Failure;
use crate::models::TestOptions;

use super::node::{
    create_child, fail_node, has_concurrency, Admission, NodeId, PendingChild, RunState, ROOT,
};
use super::ordering;
use super::runner;

/// What a test body resolves to.
pub type BodyResult = anyhow::Result<()>;

type SyncFn = Box<dyn FnOnce(TestContext) -> BodyResult>;
type FutureFn = Box<dyn FnOnce(TestContext) -> LocalBoxFuture<'static, BodyResult>>;
type CallbackFn =
    Box<dyn FnOnce(TestContext, Completion) -> Option<LocalBoxFuture<'static, BodyResult>>>;

pub(crate) enum BodyKind {
    Sync(SyncFn),
    Future(FutureFn),
    Callback(CallbackFn),
}

/// A registered test body. Construct through one of the shape-specific
/// builders; the shape is fixed at registration, never sniffed at runtime.
pub struct TestBody {
    kind: BodyKind,
}

impl TestBody {
    /// A body that runs to completion synchronously.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(TestContext) -> BodyResult + 'static,
    {
        Self {
            kind: BodyKind::Sync(Box::new(f)),
        }
    }

    /// A body that returns a future.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TestContext) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        Self {
            kind: BodyKind::Future(Box::new(move |context| f(context).boxed_local())),
        }
    }

    /// A body that signals completion through the legacy [`Completion`]
    /// argument instead of returning a future.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(TestContext, Completion) + 'static,
    {
        Self {
            kind: BodyKind::Callback(Box::new(move |context, completion| {
                f(context, completion);
                None
            })),
        }
    }

    /// A callback-style body that also returns a future. Mixing the two
    /// completion channels fails the test with [`Failure::CallbackAndFuture`];
    /// the returned future is still awaited so it is not dropped mid-flight.
    pub fn callback_with_future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TestContext, Completion) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        Self {
            kind: BodyKind::Callback(Box::new(move |context, completion| {
                Some(f(context, completion).boxed_local())
            })),
        }
    }

    pub(crate) fn into_kind(self) -> BodyKind {
        self.kind
    }
}

struct CompletionInner {
    sender: Option<oneshot::Sender<BodyResult>>,
    invocations: u32,
    state: Rc<RefCell<RunState>>,
    node: NodeId,
}

/// Legacy completion signal handed to callback-style bodies.
///
/// The first invocation resolves the body. A second invocation fails the
/// test with [`Failure::MultipleCallbackInvocations`]; third and later
/// invocations are dropped with a warning.
#[derive(Clone)]
pub struct Completion {
    inner: Rc<RefCell<CompletionInner>>,
}

impl Completion {
    pub(crate) fn new(
        state: Rc<RefCell<RunState>>,
        node: NodeId,
        sender: oneshot::Sender<BodyResult>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CompletionInner {
                sender: Some(sender),
                invocations: 0,
                state,
                node,
            })),
        }
    }

    /// Signal successful completion.
    pub fn pass(&self) {
        self.signal(Ok(()));
    }

    /// Signal completion with a failure.
    pub fn fail(&self, error: anyhow::Error) {
        self.signal(Err(error));
    }

    fn signal(&self, result: BodyResult) {
        let mut inner = self.inner.borrow_mut();
        inner.invocations += 1;
        match inner.invocations {
            1 => {
                if let Some(sender) = inner.sender.take() {
                    let _ = sender.send(result);
                }
            }
            2 => {
                let state = inner.state.clone();
                let node = inner.node;
                drop(inner);
                fail_node(
                    &mut state.borrow_mut(),
                    node,
                    Failure::MultipleCallbackInvocations,
                );
            }
            _ => warn!("completion signal ignored after second invocation"),
        }
    }
}

/// Handle resolving once a subtest has fully run (or was cancelled).
pub struct CompletionHandle {
    receiver: watch::Receiver<bool>,
}

impl CompletionHandle {
    /// Wait for the subtest to finish. Failures are never surfaced here;
    /// they are observable only through the reporter.
    pub async fn wait(mut self) {
        let _ = self.receiver.wait_for(|done| *done).await;
    }
}

impl IntoFuture for CompletionHandle {
    type Output = ();
    type IntoFuture = LocalBoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed_local()
    }
}

/// Facade passed into a running body.
#[derive(Clone)]
pub struct TestContext {
    state: Rc<RefCell<RunState>>,
    node: NodeId,
}

impl TestContext {
    pub(crate) fn new(state: Rc<RefCell<RunState>>, node: NodeId) -> Self {
        Self { state, node }
    }

    /// Attach a diagnostic message, emitted with this test's report.
    pub fn diagnostic(&self, message: impl Into<String>) {
        self.state.borrow_mut().nodes[self.node]
            .diagnostics
            .push(message.into());
    }

    /// Mark this test as skipped.
    pub fn skip(&self, message: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        let node = &mut state.nodes[self.node];
        node.skipped = true;
        node.skip_message = Some(message.into());
    }

    /// Mark this test as a todo.
    pub fn todo(&self, message: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        let node = &mut state.nodes[self.node];
        node.is_todo = true;
        node.todo_message = Some(message.into());
    }

    /// Require (or stop requiring) the `only` mark on this test's subtests.
    pub fn run_only(&self, value: bool) {
        self.state.borrow_mut().nodes[self.node].run_only_subtests = value;
    }

    /// Declare a subtest. The sole admission point: the subtest either
    /// starts immediately under the concurrency gate or waits in the
    /// parent's pending queue for a free slot.
    pub fn test(
        &self,
        name: impl Into<String>,
        options: TestOptions,
        body: TestBody,
    ) -> CompletionHandle {
        let name = name.into();
        let mut state = self.state.borrow_mut();

        if state.nodes[self.node].finished {
            // The intended parent is gone. The subtest still gets a sequence
            // number and a slot in the root's plan, but never runs.
            let (id, done_tx) = create_child(&mut state, ROOT, &name, &options);
            fail_node(&mut state, id, Failure::ParentAlreadyFinished);
            state.nodes[id].post_run_done = true;
            let sequence = state.nodes[id].sequence;
            state.nodes[ROOT].ready.insert(sequence, id);
            ordering::process_ready_range(&mut state, ROOT, false);
            let receiver = state.nodes[id].done_signal.clone();
            let _ = done_tx.send(true);
            return CompletionHandle { receiver };
        }

        let (id, done_tx) = create_child(&mut state, self.node, &name, &options);
        let receiver = state.nodes[id].done_signal.clone();

        if has_concurrency(&state, self.node) {
            state.nodes[id].started = true;
            state.nodes[self.node].active_children += 1;
            drop(state);
            debug!(test = %name, "subtest admitted");
            let state = self.state.clone();
            tokio::task::spawn_local(runner::run_node(state, id, body, done_tx));
        } else {
            let (admit_tx, admit_rx) = oneshot::channel();
            state.nodes[self.node].pending.push_back(PendingChild {
                id,
                admit: admit_tx,
                done: receiver.clone(),
            });
            drop(state);
            debug!(test = %name, "subtest queued");
            let state = self.state.clone();
            tokio::task::spawn_local(async move {
                match admit_rx.await {
                    Ok(Admission::Run) => runner::run_node(state, id, body, done_tx).await,
                    Ok(Admission::Cancelled) | Err(_) => {
                        let _ = done_tx.send(true);
                    }
                }
            });
        }
        CompletionHandle { receiver }
    }
}
