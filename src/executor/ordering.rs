//! In-order result emission
//!
//! Children may finish in any order once a parent allows more than one in
//! flight, but the report stream must read in declaration order. Each parent
//! tracks the next sequence number it is prepared to report (`waiting_on`)
//! and a ready set of finished children; contiguous runs of ready children
//! are flushed whenever the ancestor chain is at the front of the line.

use super::node::{NodeId, RunState};

/// True when every ancestor is currently waiting on this node, i.e. the
/// whole chain up to the root is at the front of its line.
pub(crate) fn is_clear_to_send(state: &RunState, id: NodeId) -> bool {
    match state.nodes[id].parent {
        None => true,
        Some(parent) => {
            state.nodes[parent].waiting_on == state.nodes[id].sequence
                && is_clear_to_send(state, parent)
        }
    }
}

/// Flush the contiguous run of ready children starting at `waiting_on`.
///
/// Stops at the first gap. The send check is computed lazily, once per
/// call; when it comes back negative the remaining ready entries are left
/// untouched for a later flush.
pub(crate) fn process_ready_range(state: &mut RunState, id: NodeId, can_send: bool) {
    let mut clearance = if can_send { Some(true) } else { None };
    loop {
        let next = state.nodes[id].waiting_on;
        let child = match state.nodes[id].ready.get(&next) {
            Some(&child) => child,
            None => break,
        };
        let send = match clearance {
            Some(send) => send,
            None => {
                let send = is_clear_to_send(state, id);
                clearance = Some(send);
                send
            }
        };
        if !send {
            return;
        }
        state.nodes[id].ready.remove(&next);
        finalize(state, child);
    }
}

/// Emit a node's result, called exactly once when it is the node's turn.
///
/// Flushes the node's own ready children first so a subtree is always
/// complete in the stream before the subtree's own line, then writes the
/// plan sized to the direct child count, reports, and advances the parent.
pub(crate) fn finalize(state: &mut RunState, id: NodeId) {
    if state.nodes[id].finished {
        return;
    }
    process_ready_range(state, id, true);

    let child_count = state.nodes[id].children.len();
    if child_count > 0 {
        let indent = state.nodes[id].depth;
        state.reporter.plan(indent, child_count);
    }

    report(state, id);

    if let Some(parent) = state.nodes[id].parent {
        state.nodes[parent].waiting_on += 1;
    }
    state.nodes[id].finished = true;
}

/// Write one node's result lines to the reporter. Fires at most once.
fn report(state: &mut RunState, id: NodeId) {
    if state.nodes[id].reported {
        return;
    }
    state.nodes[id].reported = true;

    let RunState { nodes, reporter } = state;
    let node = &nodes[id];

    // The root has no own result line; its diagnostics still surface.
    if node.parent.is_none() {
        for message in &node.diagnostics {
            reporter.diagnostic(0, message);
        }
        return;
    }

    let indent = node.depth - 1;
    let directive = if node.skipped {
        Some(reporter.skip_directive(node.skip_message.as_deref()))
    } else if node.is_todo {
        Some(reporter.todo_directive(node.todo_message.as_deref()))
    } else {
        None
    };

    if node.passed {
        reporter.ok(indent, node.sequence, &node.name, directive.as_deref());
    } else {
        reporter.fail(indent, node.sequence, &node.name, directive.as_deref());
    }

    let duration_secs = match (node.start_time, node.end_time) {
        (Some(start), Some(end)) if end > start => (end - start).as_secs_f64(),
        _ => 0.0,
    };
    reporter.details(indent, duration_secs, node.error.as_ref());

    for message in &node.diagnostics {
        reporter.diagnostic(indent, message);
    }
}
