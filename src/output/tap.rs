//! TAP output
//!
//! Baseline Test Anything Protocol rendering: version header, `ok` /
//! `not ok` lines with 4-space nesting, `1..N` plans, a YAML-ish details
//! block, and `#`-prefixed diagnostics.

use std::io::{self, Write};

use crate::error::Failure;

use super::reporter::Reporter;

/// Writes TAP to any [`Write`] sink. Write errors are discarded; the
/// reporter is a best-effort stream, not a place to fail a run from.
pub struct TapReporter<W: Write> {
    out: W,
    version_written: bool,
}

impl TapReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TapReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            version_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn pad(indent: usize) -> String {
        "    ".repeat(indent)
    }

    fn line(&mut self, text: &str) {
        if !self.version_written {
            self.version_written = true;
            let _ = writeln!(self.out, "TAP version 13");
        }
        let _ = writeln!(self.out, "{text}");
    }
}

impl<W: Write> Reporter for TapReporter<W> {
    fn plan(&mut self, indent: usize, count: usize) {
        self.line(&format!("{}1..{}", Self::pad(indent), count));
    }

    fn ok(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>) {
        let suffix = directive.map(|d| format!(" {d}")).unwrap_or_default();
        self.line(&format!(
            "{}ok {} - {}{}",
            Self::pad(indent),
            sequence,
            label,
            suffix
        ));
    }

    fn fail(&mut self, indent: usize, sequence: usize, label: &str, directive: Option<&str>) {
        let suffix = directive.map(|d| format!(" {d}")).unwrap_or_default();
        self.line(&format!(
            "{}not ok {} - {}{}",
            Self::pad(indent),
            sequence,
            label,
            suffix
        ));
    }

    fn details(&mut self, indent: usize, duration_secs: f64, error: Option<&Failure>) {
        let pad = Self::pad(indent);
        self.line(&format!("{pad}  ---"));
        self.line(&format!(
            "{pad}  duration_ms: {:.6}",
            duration_secs * 1000.0
        ));
        if let Some(error) = error {
            self.line(&format!("{pad}  failureType: '{}'", error.label()));
            let message = error.to_string().replace('\'', "''");
            self.line(&format!("{pad}  error: '{message}'"));
        }
        self.line(&format!("{pad}  ..."));
    }

    fn diagnostic(&mut self, indent: usize, message: &str) {
        self.line(&format!("{}# {}", Self::pad(indent), message));
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
