//! Test run driver
//!
//! Drives a whole run on a single-threaded cooperative scheduler: every
//! admitted test becomes a local task, completion is signalled through a
//! watch channel, and freed concurrency admits queued siblings one at a
//! time.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::Failure;
use crate::models::{RunSummary, TestRecord};
use crate::output::Reporter;

use super::context::{BodyKind, Completion, TestBody, TestContext};
use super::node::{
    fail_node, has_concurrency, pass_node, post_run_sync, Admission, NodeId, RunState, ROOT,
};
use super::ordering;

/// Runs a tree of tests against a reporter.
pub struct Runner {
    config: RunnerConfig,
    reporter: Box<dyn Reporter>,
}

impl Runner {
    pub fn new(config: RunnerConfig, reporter: impl Reporter + 'static) -> Self {
        Self {
            config,
            reporter: Box::new(reporter),
        }
    }

    /// Execute `body` as the root test and drive the run to completion.
    ///
    /// Must be called within a [`tokio::task::LocalSet`]; subtests are
    /// spawned as local tasks. Use [`Runner::run_blocking`] when no runtime
    /// is set up yet.
    pub async fn run(self, body: TestBody) -> RunSummary {
        let started = Instant::now();
        let state = Rc::new(RefCell::new(RunState::new(&self.config, self.reporter)));

        // Keep the receiver alive so the root's completion send has a home.
        let (done_tx, _done_rx) = watch::channel(false);
        run_node(state.clone(), ROOT, body, done_tx).await;

        {
            let mut s = state.borrow_mut();
            ordering::finalize(&mut s, ROOT);
        }

        let summary = {
            let s = state.borrow();
            summarize(&s, started.elapsed())
        };

        {
            let mut s = state.borrow_mut();
            s.reporter.diagnostic(0, &format!("tests {}", summary.total));
            s.reporter.diagnostic(0, &format!("pass {}", summary.passed));
            s.reporter.diagnostic(0, &format!("fail {}", summary.failed));
            s.reporter
                .diagnostic(0, &format!("cancelled {}", summary.cancelled));
            s.reporter
                .diagnostic(0, &format!("skipped {}", summary.skipped));
            s.reporter.diagnostic(0, &format!("todo {}", summary.todo));
            s.reporter
                .diagnostic(0, &format!("duration_ms {}", summary.duration_ms));
        }

        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            summary.duration_ms,
            summary.passed,
            summary.total,
            summary.pass_rate()
        );

        summary
    }

    /// Convenience entry point: builds a current-thread runtime and local
    /// task set, then drives [`Runner::run`] on it.
    pub fn run_blocking(self, body: TestBody) -> anyhow::Result<RunSummary> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("failed to build test runtime")?;
        let local = tokio::task::LocalSet::new();
        Ok(runtime.block_on(local.run_until(self.run(body))))
    }
}

/// Run one admitted node: invoke its body, latch the outcome, perform the
/// completion cascade, signal waiters, and admit pending siblings.
pub(crate) async fn run_node(
    state: Rc<RefCell<RunState>>,
    id: NodeId,
    body: TestBody,
    done: watch::Sender<bool>,
) {
    let (skipped, name) = {
        let mut s = state.borrow_mut();
        // Cancelled between admission and first poll: the body never runs.
        if s.nodes[id].end_time.is_some() {
            drop(s);
            let _ = done.send(true);
            return;
        }
        s.nodes[id].start_time = Some(Instant::now());
        (s.nodes[id].skipped, s.nodes[id].name.clone())
    };

    if skipped {
        pass_node(&mut state.borrow_mut(), id);
    } else {
        let context = TestContext::new(state.clone(), id);
        let outcome = match body.into_kind() {
            BodyKind::Sync(f) => f(context),
            BodyKind::Future(f) => f(context).await,
            BodyKind::Callback(f) => {
                let (sender, receiver) = tokio::sync::oneshot::channel();
                let completion = Completion::new(state.clone(), id, sender);
                match f(context, completion) {
                    Some(future) => {
                        fail_node(&mut state.borrow_mut(), id, Failure::CallbackAndFuture);
                        // Still drive the stray future so nothing async is
                        // left dangling.
                        future.await
                    }
                    None => match receiver.await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow!("completion handle dropped without signalling")),
                    },
                }
            }
        };
        match outcome {
            Ok(()) => pass_node(&mut state.borrow_mut(), id),
            Err(error) => {
                let failure = Failure::from_body_error(error);
                fail_node(&mut state.borrow_mut(), id, failure);
            }
        }
    }

    let parent = {
        let mut s = state.borrow_mut();
        post_run_sync(&mut s, id);
        s.nodes[id].parent
    };
    debug!(test = %name, "test finished");

    let _ = done.send(true);

    if let Some(parent) = parent {
        process_pending_queue(&state, parent).await;
    }
}

/// Admit queued children of `id` while the gate has room, awaiting each
/// admitted child's full run before popping the next. Draining is
/// deliberately sequential; re-entrant calls from a finishing child are
/// no-ops while a drain is in progress.
pub(crate) async fn process_pending_queue(state: &Rc<RefCell<RunState>>, id: NodeId) {
    {
        let mut s = state.borrow_mut();
        if s.nodes[id].draining {
            return;
        }
        s.nodes[id].draining = true;
    }

    loop {
        let next = {
            let mut s = state.borrow_mut();
            if has_concurrency(&s, id) {
                s.nodes[id].pending.pop_front()
            } else {
                None
            }
        };
        let Some(pending) = next else { break };

        {
            let mut s = state.borrow_mut();
            s.nodes[pending.id].started = true;
            s.nodes[id].active_children += 1;
        }
        if pending.admit.send(Admission::Run).is_err() {
            // The waiting task is gone; release the slot it will never use.
            let mut s = state.borrow_mut();
            s.nodes[pending.id].started = false;
            s.nodes[id].active_children -= 1;
            continue;
        }

        let mut done = pending.done;
        let _ = done.wait_for(|finished| *finished).await;
    }

    state.borrow_mut().nodes[id].draining = false;
}

fn summarize(state: &RunState, elapsed: Duration) -> RunSummary {
    let records = state
        .nodes
        .iter()
        .skip(1)
        .map(|node| {
            let duration_ms = match (node.start_time, node.end_time) {
                (Some(start), Some(end)) if end > start => (end - start).as_millis() as u64,
                _ => 0,
            };
            TestRecord {
                name: node.name.clone(),
                depth: node.depth,
                passed: node.passed,
                skipped: node.skipped,
                todo: node.is_todo,
                cancelled: node.cancelled,
                duration_ms,
                failure: node
                    .error
                    .as_ref()
                    .map(|error| (error.label().to_string(), error.to_string())),
            }
        })
        .collect();
    RunSummary::new(
        records,
        elapsed.as_millis() as u64,
        state.nodes[ROOT].passed,
    )
}
