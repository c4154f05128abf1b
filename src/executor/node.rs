//! Test node arena and state machine
//!
//! Every test in a run lives in a flat arena owned by [`RunState`]; parents,
//! children, and the ready set refer to nodes by index. All mutation happens
//! between suspension points on a single-threaded scheduler, so a plain
//! `RefCell` around the arena is enough.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::{oneshot, watch};

use crate::config::RunnerConfig;
use crate::error::Failure;
use crate::models::TestOptions;
use crate::output::Reporter;

use super::ordering;

pub(crate) type NodeId = usize;

/// Index of the root test in every arena.
pub(crate) const ROOT: NodeId = 0;

/// Outcome of waiting in a parent's pending queue.
pub(crate) enum Admission {
    Run,
    Cancelled,
}

/// A child waiting for a free concurrency slot on its parent.
pub(crate) struct PendingChild {
    pub id: NodeId,
    pub admit: oneshot::Sender<Admission>,
    pub done: watch::Receiver<bool>,
}

/// One test in the hierarchy.
pub(crate) struct TestNode {
    pub name: String,
    pub parent: Option<NodeId>,
    /// 1-based position among siblings, assigned at creation. The root is 0.
    pub sequence: usize,
    pub depth: usize,

    // Concurrency gate
    pub concurrency_limit: usize,
    pub active_children: usize,
    pub pending: VecDeque<PendingChild>,

    // Ordering
    pub children: Vec<NodeId>,
    /// Finished children keyed by sequence number, inserted out of order.
    pub ready: HashMap<usize, NodeId>,
    /// Next sequence number eligible to report.
    pub waiting_on: usize,

    // State
    pub run_only_subtests: bool,
    pub skipped: bool,
    pub skip_message: Option<String>,
    pub is_todo: bool,
    pub todo_message: Option<String>,
    pub cancelled: bool,
    pub passed: bool,
    pub finished: bool,
    pub reported: bool,
    /// Admission happened; the parent's slot must be released on completion.
    pub started: bool,
    pub post_run_done: bool,
    pub draining: bool,

    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub error: Option<Failure>,
    pub diagnostics: Vec<String>,

    /// Set to true once the node's task has fully completed; completion
    /// handles and the sequential pending drain both wait on it.
    pub done_signal: watch::Receiver<bool>,
}

/// Shared state of one run: the node arena plus the reporter sink.
pub(crate) struct RunState {
    pub nodes: Vec<TestNode>,
    pub reporter: Box<dyn Reporter>,
}

impl RunState {
    pub(crate) fn new(config: &RunnerConfig, reporter: Box<dyn Reporter>) -> Self {
        let (_, done_signal) = watch::channel(false);
        let root = TestNode {
            name: "root".to_string(),
            parent: None,
            sequence: 0,
            depth: 0,
            concurrency_limit: config.root_concurrency.max(1),
            active_children: 0,
            pending: VecDeque::new(),
            children: Vec::new(),
            ready: HashMap::new(),
            waiting_on: 1,
            run_only_subtests: config.only_filter_active,
            skipped: false,
            skip_message: None,
            is_todo: false,
            todo_message: None,
            cancelled: false,
            passed: false,
            finished: false,
            reported: false,
            started: true,
            post_run_done: false,
            draining: false,
            start_time: None,
            end_time: None,
            error: None,
            diagnostics: Vec::new(),
            done_signal,
        };
        Self {
            nodes: vec![root],
            reporter,
        }
    }
}

/// Create a child of `parent`, assigning the next sequence number.
///
/// Returns the new node id and the sender half of its completion signal,
/// which the node's task fires once the node has fully run.
pub(crate) fn create_child(
    state: &mut RunState,
    parent: NodeId,
    name: &str,
    options: &TestOptions,
) -> (NodeId, watch::Sender<bool>) {
    let sequence = state.nodes[parent].children.len() + 1;
    let depth = state.nodes[parent].depth + 1;
    let concurrency_limit = options
        .concurrency_override()
        .unwrap_or(state.nodes[parent].concurrency_limit);

    let filtered = state.nodes[parent].run_only_subtests && !options.is_only();
    let (skipped, skip_message) = match options.skip_flag() {
        Some(message) => (true, message),
        None if filtered => (true, Some("'only' option not set".to_string())),
        None => (false, None),
    };
    let (is_todo, todo_message) = match options.todo_flag() {
        Some(message) => (true, message),
        None => (false, None),
    };

    let (done_tx, done_signal) = watch::channel(false);
    let id = state.nodes.len();
    state.nodes.push(TestNode {
        name: name.to_string(),
        parent: Some(parent),
        sequence,
        depth,
        concurrency_limit,
        active_children: 0,
        pending: VecDeque::new(),
        children: Vec::new(),
        ready: HashMap::new(),
        waiting_on: 1,
        run_only_subtests: filtered,
        skipped,
        skip_message,
        is_todo,
        todo_message,
        cancelled: false,
        passed: false,
        finished: false,
        reported: false,
        started: false,
        post_run_done: false,
        draining: false,
        start_time: None,
        end_time: None,
        error: None,
        diagnostics: Vec::new(),
        done_signal,
    });
    state.nodes[parent].children.push(id);
    (id, done_tx)
}

pub(crate) fn has_concurrency(state: &RunState, id: NodeId) -> bool {
    state.nodes[id].active_children < state.nodes[id].concurrency_limit
}

/// Latch a pass. A no-op once the node has any terminal state.
pub(crate) fn pass_node(state: &mut RunState, id: NodeId) {
    let node = &mut state.nodes[id];
    if node.end_time.is_some() {
        return;
    }
    node.passed = true;
    node.end_time = Some(Instant::now());
}

/// Latch a failure. Checks only the failure record, so a failure may
/// override an earlier pass; the first failure wins over later ones.
pub(crate) fn fail_node(state: &mut RunState, id: NodeId, failure: Failure) {
    let node = &mut state.nodes[id];
    if node.error.is_some() {
        return;
    }
    node.passed = false;
    node.error = Some(failure);
    node.end_time = Some(Instant::now());
}

/// Cancel a node that has not reached a terminal state yet.
pub(crate) fn cancel_node(state: &mut RunState, id: NodeId) {
    if state.nodes[id].end_time.is_some() {
        return;
    }
    state.nodes[id].cancelled = true;
    fail_node(state, id, Failure::CancelledByParent);
}

/// Completion bookkeeping, run exactly once per node: cancels stragglers,
/// folds child failures into this node, releases the parent's concurrency
/// slot, and hands the node to the parent's ordering flush.
///
/// Admitting freed pending siblings is the caller's job; it requires
/// awaiting and lives in the runner.
pub(crate) fn post_run_sync(state: &mut RunState, id: NodeId) {
    if state.nodes[id].post_run_done {
        return;
    }
    state.nodes[id].post_run_done = true;

    if state.nodes[id].end_time.is_none() {
        state.nodes[id].end_time = Some(Instant::now());
    }

    // Release children still waiting for admission; the loop below records
    // their cancellation.
    while let Some(pending) = state.nodes[id].pending.pop_front() {
        let _ = pending.admit.send(Admission::Cancelled);
    }

    let children = state.nodes[id].children.clone();
    for child in children.iter().copied() {
        if !state.nodes[child].finished {
            cancel_node(state, child);
            post_run_sync(state, child);
        }
    }

    let failed_children = children
        .iter()
        .copied()
        .filter(|&child| !state.nodes[child].passed && !state.nodes[child].is_todo)
        .count();
    if state.nodes[id].passed && failed_children > 0 {
        fail_node(state, id, Failure::SubtestsFailed(failed_children));
    }

    if let Some(parent) = state.nodes[id].parent {
        if state.nodes[id].started {
            state.nodes[parent].active_children -= 1;
        }
        let sequence = state.nodes[id].sequence;
        state.nodes[parent].ready.insert(sequence, id);
        ordering::process_ready_range(state, parent, false);
    }
}
