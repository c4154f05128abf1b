//! In-memory reporter
//!
//! Captures every reporter call as a value for later inspection. Clones
//! share the same log, so keep a clone before handing the reporter to a
//! runner.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Failure;

use super::reporter::Reporter;

/// One recorded reporter call.
#[derive(Clone, Debug, PartialEq)]
pub enum ReporterEvent {
    Plan {
        indent: usize,
        count: usize,
    },
    Ok {
        indent: usize,
        sequence: usize,
        label: String,
        directive: Option<String>,
    },
    Fail {
        indent: usize,
        sequence: usize,
        label: String,
        directive: Option<String>,
    },
    Details {
        indent: usize,
        duration_secs: f64,
        /// Failure label and message, when present.
        failure: Option<(String, String)>,
    },
    Diagnostic {
        indent: usize,
        message: String,
    },
}

/// Reporter that records calls instead of rendering them.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Rc<RefCell<Vec<ReporterEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<ReporterEvent> {
        self.events.borrow().clone()
    }
}

impl Reporter for RecordingReporter {
    fn plan(&mut self, indent: usize, count: usize) {
        self.events
            .borrow_mut()
            .push(ReporterEvent::Plan { indent, count });
    }

    fn ok(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>) {
        self.events.borrow_mut().push(ReporterEvent::Ok {
            indent,
            sequence,
            label: label.to_string(),
            directive: directive.map(str::to_string),
        });
    }

    fn fail(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>) {
        self.events.borrow_mut().push(ReporterEvent::Fail {
            indent,
            sequence,
            label: label.to_string(),
            directive: directive.map(str::to_string),
        });
    }

    fn details(&mut self, indent: usize, duration_secs: f64, error: Option<&Failure>) {
        self.events.borrow_mut().push(ReporterEvent::Details {
            indent,
            duration_secs,
            failure: error.map(|error| (error.label().to_string(), error.to_string())),
        });
    }

    fn diagnostic(&mut self, indent: usize, message: &str) {
        self.events.borrow_mut().push(ReporterEvent::Diagnostic {
            indent,
            message: message.to_string(),
        });
    }

    fn skip_directive(&self, message: Option<&str>) -> String {
        match message {
            Some(message) => format!("# SKIP {message}"),
            None => "# SKIP".to_string(),
        }
    }

    fn todo_directive(&self, message: Option<&str>) -> String {
        match message {
            Some(message) => format!("# TODO {message}"),
            None => "# TODO".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_log() {
        let mut reporter = RecordingReporter::new();
        let log = reporter.clone();
        reporter.ok(0, 1, "a", None);
        assert_eq!(log.snapshot().len(), 1);
    }
}
