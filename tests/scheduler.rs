//! End-to-end scheduler tests: declaration-order reporting, concurrency
//! bounds, cancellation, and the callback body contract.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use taptree::{
    RecordingReporter, ReporterEvent, RunSummary, Runner, RunnerConfig, TapReporter, TestBody,
    TestContext, TestOptions,
};

fn run_recorded(config: RunnerConfig, body: TestBody) -> (Vec<ReporterEvent>, RunSummary) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let reporter = RecordingReporter::new();
    let log = reporter.clone();
    let summary = Runner::new(config, reporter)
        .run_blocking(body)
        .expect("run failed");
    (log.snapshot(), summary)
}

/// (label, passed, failure label) for every result line, in emission order.
fn result_lines(events: &[ReporterEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            ReporterEvent::Ok { label, .. } => Some((label.clone(), true)),
            ReporterEvent::Fail { label, .. } => Some((label.clone(), false)),
            _ => None,
        })
        .collect()
}

fn plans(events: &[ReporterEvent]) -> Vec<(usize, usize)> {
    events
        .iter()
        .filter_map(|event| match event {
            ReporterEvent::Plan { indent, count } => Some((*indent, *count)),
            _ => None,
        })
        .collect()
}

fn failure_labels(events: &[ReporterEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ReporterEvent::Details {
                failure: Some((label, _)),
                ..
            } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn sequential_siblings_report_in_order_with_failure_details() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test("A", TestOptions::new(), TestBody::sync(|_| Ok(())))
                .await;
            t.test("B", TestOptions::new(), TestBody::sync(|_| Err(anyhow!("x"))))
                .await;
            Ok(())
        }),
    );

    assert_eq!(
        result_lines(&events),
        [("A".to_string(), true), ("B".to_string(), false)]
    );

    let failure = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Details {
                failure: Some(failure),
                ..
            } => Some(failure.clone()),
            _ => None,
        })
        .expect("failure details for B");
    assert_eq!(failure, ("testCodeFailure".to_string(), "x".to_string()));

    // The root plan is sized to both children and follows their lines.
    assert_eq!(plans(&events), [(0, 2)]);
    let plan_at = events
        .iter()
        .position(|e| matches!(e, ReporterEvent::Plan { .. }))
        .unwrap();
    let b_at = events
        .iter()
        .position(|e| matches!(e, ReporterEvent::Fail { label, .. } if label == "B"))
        .unwrap();
    assert!(b_at < plan_at);

    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.success());
}

#[test]
fn out_of_order_completion_still_reports_in_declaration_order() {
    let body = TestBody::future(|t| async move {
        let mut handles = Vec::new();
        for (name, delay_ms) in [("T1", 10u64), ("T2", 60), ("T3", 10), ("T4", 60), ("T5", 10)] {
            handles.push(t.test(
                name,
                TestOptions::new(),
                TestBody::future(move |_| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(())
                }),
            ));
        }
        for handle in handles {
            handle.await;
        }
        Ok(())
    });

    let (events, summary) = run_recorded(RunnerConfig::new().with_root_concurrency(2), body);

    let labels: Vec<_> = result_lines(&events)
        .into_iter()
        .map(|(label, _)| label)
        .collect();
    assert_eq!(labels, ["T1", "T2", "T3", "T4", "T5"]);
    assert_eq!(summary.passed, 5);
    assert!(summary.success());
}

#[test]
fn active_subtests_never_exceed_the_limit() {
    let active = Rc::new(Cell::new(0usize));
    let peak = Rc::new(Cell::new(0usize));

    let body = {
        let active = active.clone();
        let peak = peak.clone();
        TestBody::future(move |t| async move {
            let mut handles = Vec::new();
            for i in 0..6 {
                let active = active.clone();
                let peak = peak.clone();
                handles.push(t.test(
                    format!("t{i}"),
                    TestOptions::new(),
                    TestBody::future(move |_| async move {
                        active.set(active.get() + 1);
                        peak.set(peak.get().max(active.get()));
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.set(active.get() - 1);
                        Ok(())
                    }),
                ));
            }
            for handle in handles {
                handle.await;
            }
            Ok(())
        })
    };

    let (_, summary) = run_recorded(RunnerConfig::new().with_root_concurrency(2), body);

    assert_eq!(summary.passed, 6);
    assert!(peak.get() >= 1);
    assert!(peak.get() <= 2, "peak concurrency was {}", peak.get());
}

#[test]
fn unfinished_children_are_cancelled_and_the_plan_stays_complete() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "parent",
                TestOptions::new(),
                TestBody::future(|p| async move {
                    for name in ["c1", "c2", "c3"] {
                        // Handles deliberately dropped: the parent returns
                        // while all three are unfinished.
                        let _ = p.test(
                            name,
                            TestOptions::new(),
                            TestBody::future(|_| async {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                Ok(())
                            }),
                        );
                    }
                    Ok(())
                }),
            )
            .await;
            Ok(())
        }),
    );

    assert_eq!(
        result_lines(&events),
        [
            ("c1".to_string(), false),
            ("c2".to_string(), false),
            ("c3".to_string(), false),
            ("parent".to_string(), false),
        ]
    );
    assert_eq!(plans(&events), [(1, 3), (0, 1)]);
    assert_eq!(
        failure_labels(&events),
        [
            "cancelledByParent",
            "cancelledByParent",
            "cancelledByParent",
            "subtestsFailed",
        ]
    );
    assert_eq!(summary.cancelled, 3);
    assert_eq!(summary.failed, 4);
}

#[test]
fn body_failing_before_any_subtest_reports_no_plan() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test("P", TestOptions::new(), TestBody::sync(|_| Err(anyhow!("early"))))
                .await;
            Ok(())
        }),
    );

    assert_eq!(result_lines(&events), [("P".to_string(), false)]);
    // Only the root's plan; the childless P emits none.
    assert_eq!(plans(&events), [(0, 1)]);
    assert_eq!(failure_labels(&events), ["testCodeFailure"]);
    assert_eq!(summary.failed, 1);
}

#[test]
fn subtest_created_after_parent_finished_attaches_to_root() {
    let stash: Rc<RefCell<Option<TestContext>>> = Rc::new(RefCell::new(None));
    let invoked = Rc::new(Cell::new(false));

    let body = {
        let stash = stash.clone();
        let invoked = invoked.clone();
        TestBody::future(move |t| async move {
            {
                let stash = stash.clone();
                t.test(
                    "P",
                    TestOptions::new(),
                    TestBody::sync(move |p| {
                        *stash.borrow_mut() = Some(p);
                        Ok(())
                    }),
                )
                .await;
            }

            let late_context = stash.borrow_mut().take().expect("context stashed");
            let invoked = invoked.clone();
            late_context
                .test(
                    "late",
                    TestOptions::new(),
                    TestBody::sync(move |_| {
                        invoked.set(true);
                        Ok(())
                    }),
                )
                .await;
            Ok(())
        })
    };

    let (events, summary) = run_recorded(RunnerConfig::new(), body);

    assert!(!invoked.get(), "late body must never run");
    let late = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Fail {
                sequence, label, ..
            } if label == "late" => Some(*sequence),
            _ => None,
        })
        .expect("late reported");
    assert_eq!(late, 2, "late is counted as the root's second child");
    assert_eq!(plans(&events), [(0, 2)]);
    assert!(failure_labels(&events)
        .iter()
        .any(|label| label == "parentAlreadyFinished"));
    assert_eq!(summary.total, 2);
}

#[test]
fn parent_with_failing_child_is_reported_failed() {
    let (events, _) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "P",
                TestOptions::new(),
                TestBody::future(|p| async move {
                    p.test("bad", TestOptions::new(), TestBody::sync(|_| Err(anyhow!("nope"))))
                        .await;
                    Ok(())
                }),
            )
            .await;
            Ok(())
        }),
    );

    assert_eq!(
        result_lines(&events),
        [("bad".to_string(), false), ("P".to_string(), false)]
    );
    let (_, message) = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Details {
                failure: Some((label, message)),
                ..
            } if label == "subtestsFailed" => Some((label.clone(), message.clone())),
            _ => None,
        })
        .expect("aggregate failure");
    assert_eq!(message, "1 subtest(s) failed");
}

#[test]
fn callback_body_completes_through_the_signal() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "cb",
                TestOptions::new(),
                TestBody::callback(|_, done| done.pass()),
            )
            .await;
            Ok(())
        }),
    );

    assert_eq!(result_lines(&events), [("cb".to_string(), true)]);
    assert!(summary.success());
}

#[test]
fn duplicate_callback_signal_fails_the_test() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "cb",
                TestOptions::new(),
                TestBody::callback(|_, done| {
                    done.pass();
                    done.pass();
                }),
            )
            .await;
            Ok(())
        }),
    );

    assert_eq!(result_lines(&events), [("cb".to_string(), false)]);
    assert!(failure_labels(&events)
        .iter()
        .any(|label| label == "multipleCallbackInvocations"));
    assert!(!summary.success());
}

#[test]
fn callback_body_returning_future_fails_but_the_future_still_runs() {
    let ran = Rc::new(Cell::new(false));
    let body = {
        let ran = ran.clone();
        TestBody::future(move |t| async move {
            let ran = ran.clone();
            t.test(
                "mixed",
                TestOptions::new(),
                TestBody::callback_with_future(move |_, _done| async move {
                    ran.set(true);
                    Ok(())
                }),
            )
            .await;
            Ok(())
        })
    };

    let (events, _) = run_recorded(RunnerConfig::new(), body);

    assert_eq!(result_lines(&events), [("mixed".to_string(), false)]);
    assert!(failure_labels(&events)
        .iter()
        .any(|label| label == "callbackAndFuture"));
    assert!(ran.get(), "the stray future must still be awaited");
}

#[test]
fn dropped_completion_fails_instead_of_hanging() {
    let (events, _) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test("cb", TestOptions::new(), TestBody::callback(|_, _done| {}))
                .await;
            Ok(())
        }),
    );

    assert_eq!(result_lines(&events), [("cb".to_string(), false)]);
    let message = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Details {
                failure: Some((_, message)),
                ..
            } => Some(message.clone()),
            _ => None,
        })
        .expect("failure details");
    assert!(message.contains("dropped"));
}

#[test]
fn only_filter_skips_unmarked_tests() {
    let ran_plain = Rc::new(Cell::new(false));
    let ran_chosen = Rc::new(Cell::new(false));

    let body = {
        let ran_plain = ran_plain.clone();
        let ran_chosen = ran_chosen.clone();
        TestBody::future(move |t| async move {
            let plain = ran_plain.clone();
            t.test(
                "plain",
                TestOptions::new(),
                TestBody::sync(move |_| {
                    plain.set(true);
                    Ok(())
                }),
            )
            .await;
            let chosen = ran_chosen.clone();
            t.test(
                "chosen",
                TestOptions::new().only(),
                TestBody::sync(move |_| {
                    chosen.set(true);
                    Ok(())
                }),
            )
            .await;
            Ok(())
        })
    };

    let (events, summary) =
        run_recorded(RunnerConfig::new().with_only_filter(true), body);

    assert!(!ran_plain.get());
    assert!(ran_chosen.get());
    assert_eq!(summary.skipped, 1);

    let plain_directive = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Ok {
                label, directive, ..
            } if label == "plain" => Some(directive.clone()),
            _ => None,
        })
        .expect("plain reported");
    assert_eq!(plain_directive.as_deref(), Some("# SKIP 'only' option not set"));
}

#[test]
fn skip_option_suppresses_the_body() {
    let ran = Rc::new(Cell::new(false));
    let body = {
        let ran = ran.clone();
        TestBody::future(move |t| async move {
            let ran = ran.clone();
            t.test(
                "later",
                TestOptions::new().skip_reason("not ported yet"),
                TestBody::sync(move |_| {
                    ran.set(true);
                    Ok(())
                }),
            )
            .await;
            Ok(())
        })
    };

    let (events, summary) = run_recorded(RunnerConfig::new(), body);

    assert!(!ran.get());
    assert_eq!(summary.skipped, 1);
    assert!(summary.success());
    let directive = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Ok { directive, .. } => directive.clone(),
            _ => None,
        })
        .expect("skipped test reported ok");
    assert_eq!(directive, "# SKIP not ported yet");
}

#[test]
fn failing_todo_does_not_fail_the_run() {
    let (events, summary) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "someday",
                TestOptions::new().todo_reason("wire this up"),
                TestBody::sync(|_| Err(anyhow!("expected for now"))),
            )
            .await;
            Ok(())
        }),
    );

    assert_eq!(result_lines(&events), [("someday".to_string(), false)]);
    assert!(summary.success(), "todo failures are expected failures");
    assert_eq!(summary.todo, 1);
    let directive = events
        .iter()
        .find_map(|event| match event {
            ReporterEvent::Fail { directive, .. } => directive.clone(),
            _ => None,
        })
        .expect("todo test reported");
    assert_eq!(directive, "# TODO wire this up");
}

#[test]
fn diagnostics_are_emitted_with_the_test() {
    let (events, _) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test(
                "noisy",
                TestOptions::new(),
                TestBody::sync(|me| {
                    me.diagnostic("checked 3 fixtures");
                    Ok(())
                }),
            )
            .await;
            Ok(())
        }),
    );

    let ok_at = events
        .iter()
        .position(|e| matches!(e, ReporterEvent::Ok { label, .. } if label == "noisy"))
        .expect("result line");
    let diag_at = events
        .iter()
        .position(|e| {
            matches!(e, ReporterEvent::Diagnostic { message, .. } if message == "checked 3 fixtures")
        })
        .expect("diagnostic line");
    assert!(diag_at > ok_at);
}

#[test]
fn summary_diagnostics_are_emitted_after_the_root_plan() {
    let (events, _) = run_recorded(
        RunnerConfig::new(),
        TestBody::future(|t| async move {
            t.test("a", TestOptions::new(), TestBody::sync(|_| Ok(())))
                .await;
            Ok(())
        }),
    );

    let messages: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ReporterEvent::Diagnostic { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert!(messages.contains(&"tests 1".to_string()));
    assert!(messages.contains(&"pass 1".to_string()));
    assert!(messages.contains(&"fail 0".to_string()));
}

#[test]
fn tap_output_written_to_a_file() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let reporter = TapReporter::new(file.reopen().expect("reopen"));

    let summary = Runner::new(RunnerConfig::new(), reporter)
        .run_blocking(TestBody::future(|t| async move {
            t.test("adds", TestOptions::new(), TestBody::sync(|_| Ok(())))
                .await;
            t.test("breaks", TestOptions::new(), TestBody::sync(|_| Err(anyhow!("boom"))))
                .await;
            Ok(())
        }))
        .expect("run failed");

    let output = std::fs::read_to_string(file.path()).expect("read tap");
    assert!(output.starts_with("TAP version 13\n"));
    assert!(output.contains("ok 1 - adds"));
    assert!(output.contains("not ok 2 - breaks"));
    assert!(output.contains("1..2"));
    assert!(output.contains("# fail 1"));
    assert!(!summary.success());
}
