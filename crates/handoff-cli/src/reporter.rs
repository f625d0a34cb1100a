//! Log rendering for the two places the binary runs.
//!
//! Under GitHub Actions messages become workflow commands on stdout so the
//! runner can annotate the job. Elsewhere they are plain `[level]` lines on
//! stderr, leaving stdout to the step outputs.

use std::io::{self, Write};

use handoff::engine::Reporter;
use handoff::environment::{CiEnvironment, workflow_command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// `::warning::` style workflow commands.
    Actions,
    /// `[warn] ...` lines.
    Plain,
}

impl Style {
    pub fn for_environment(ci: CiEnvironment) -> Self {
        match ci {
            CiEnvironment::GitHubActions => Style::Actions,
            _ => Style::Plain,
        }
    }
}

pub struct WorkflowReporter<W: Write> {
    style: Style,
    verbose: bool,
    out: W,
}

impl WorkflowReporter<Box<dyn Write>> {
    /// Reporter writing where `style` expects: stdout for workflow
    /// commands, stderr for plain lines.
    pub fn for_style(style: Style, verbose: bool) -> Self {
        let out: Box<dyn Write> = match style {
            Style::Actions => Box::new(io::stdout()),
            Style::Plain => Box::new(io::stderr()),
        };
        Self::new(style, verbose, out)
    }
}

impl<W: Write> WorkflowReporter<W> {
    pub fn new(style: Style, verbose: bool, out: W) -> Self {
        Self {
            style,
            verbose,
            out,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, command: &str, label: &str, msg: &str) {
        let line = match self.style {
            Style::Actions if command.is_empty() => msg.to_string(),
            Style::Actions => workflow_command(command, &[], msg),
            Style::Plain => format!("[{label}] {msg}"),
        };
        // Nowhere left to report a failed log write.
        let _ = writeln!(self.out, "{line}");
    }
}

impl<W: Write> Reporter for WorkflowReporter<W> {
    fn debug(&mut self, msg: &str) {
        // The runner decides whether `::debug::` lines are shown.
        if self.style == Style::Actions || self.verbose {
            self.emit("debug", "debug", msg);
        }
    }

    fn info(&mut self, msg: &str) {
        self.emit("", "info", msg);
    }

    fn warn(&mut self, msg: &str) {
        self.emit("warning", "warn", msg);
    }

    fn error(&mut self, msg: &str) {
        self.emit("error", "error", msg);
    }
}
