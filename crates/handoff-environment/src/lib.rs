//! CI environment plumbing for handoff.
//!
//! Detects which CI system the process runs under, reads the GitHub
//! Actions context variables, and writes step outputs through the
//! runner's file commands and workflow commands.
//!
//! # Example
//!
//! ```
//! use handoff_environment::{MemoryOutputs, OutputSink};
//!
//! let mut outputs = MemoryOutputs::default();
//! outputs.mask("hunter2").unwrap();
//! outputs.set_output("version", "1.2.3").unwrap();
//! assert_eq!(outputs.get("version"), Some("1.2.3"));
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default REST endpoint when `GITHUB_API_URL` is not set.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Replacement text for masked values on non-Actions consoles.
pub const REDACTED: &str = "***";

/// Detected CI environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiEnvironment {
    GitHubActions,
    GitLabCI,
    CircleCI,
    Jenkins,
    /// No CI detected
    #[default]
    Local,
}

impl std::fmt::Display for CiEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CiEnvironment::GitHubActions => write!(f, "GitHub Actions"),
            CiEnvironment::GitLabCI => write!(f, "GitLab CI"),
            CiEnvironment::CircleCI => write!(f, "CircleCI"),
            CiEnvironment::Jenkins => write!(f, "Jenkins"),
            CiEnvironment::Local => write!(f, "Local"),
        }
    }
}

/// Detect the current CI environment
pub fn detect_environment() -> CiEnvironment {
    if env::var_os("GITHUB_ACTIONS").is_some() {
        return CiEnvironment::GitHubActions;
    }
    if env::var_os("GITLAB_CI").is_some() {
        return CiEnvironment::GitLabCI;
    }
    if env::var_os("CIRCLECI").is_some() {
        return CiEnvironment::CircleCI;
    }
    if env::var_os("JENKINS_URL").is_some() {
        return CiEnvironment::Jenkins;
    }
    CiEnvironment::Local
}

/// Reads an environment variable, treating empty values as unset.
pub fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Context the GitHub runner exposes to every step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GithubContext {
    /// `owner/name`
    pub repository: Option<String>,
    pub api_url: String,
    pub token: Option<String>,
    pub sha: Option<String>,
    pub actor: Option<String>,
    pub output_file: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
}

impl GithubContext {
    pub fn from_env() -> Self {
        Self {
            repository: non_empty_var("GITHUB_REPOSITORY"),
            api_url: non_empty_var("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            token: non_empty_var("GITHUB_TOKEN"),
            sha: non_empty_var("GITHUB_SHA"),
            actor: non_empty_var("GITHUB_ACTOR"),
            output_file: non_empty_var("GITHUB_OUTPUT").map(PathBuf::from),
            state_file: non_empty_var("GITHUB_STATE").map(PathBuf::from),
        }
    }
}

/// Escapes the message part of a workflow command.
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escapes a property value of a workflow command.
pub fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

/// Formats a `::command key=value::message` line.
pub fn workflow_command(command: &str, properties: &[(&str, &str)], message: &str) -> String {
    let mut line = format!("::{command}");
    if !properties.is_empty() {
        line.push(' ');
        let props: Vec<String> = properties
            .iter()
            .map(|(k, v)| format!("{k}={}", escape_property(v)))
            .collect();
        line.push_str(&props.join(","));
    }
    line.push_str("::");
    line.push_str(&escape_data(message));
    line
}

/// Builds one heredoc entry for a runner file command (`GITHUB_OUTPUT`,
/// `GITHUB_STATE`).
pub fn file_command_entry(name: &str, value: &str, delimiter: &str) -> Result<String> {
    if name.is_empty() {
        bail!("file command name must not be empty");
    }
    if name.contains(delimiter) || value.contains(delimiter) {
        bail!("value for '{name}' contains the file command delimiter");
    }
    Ok(format!("{name}<<{delimiter}\n{value}\n{delimiter}\n"))
}

/// Appends `name=value` to a runner file command using a random delimiter.
pub fn append_file_command(path: &Path, name: &str, value: &str) -> Result<()> {
    let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
    let entry = file_command_entry(name, value, &delimiter)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open file command {}", path.display()))?;
    file.write_all(entry.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Replaces every masked value in `text` with [`REDACTED`].
pub fn redact(text: &str, masked: &[String]) -> String {
    let mut out = text.to_string();
    for secret in masked.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret.as_str(), REDACTED);
    }
    out
}

/// Destination for step outputs.
pub trait OutputSink {
    /// Publishes a named output of the current step.
    fn set_output(&mut self, name: &str, value: &str) -> Result<()>;

    /// Registers a value that must never appear in logs.
    fn mask(&mut self, value: &str) -> Result<()>;
}

/// Outputs written through the Actions runner.
///
/// Values go to the `GITHUB_OUTPUT` file; masks are issued as
/// `::add-mask::` commands on `commands` (stdout in practice).
pub struct ActionsOutputs<W: Write> {
    output_file: PathBuf,
    commands: W,
}

impl ActionsOutputs<std::io::Stdout> {
    pub fn new(output_file: impl Into<PathBuf>) -> Self {
        Self::with_writer(output_file, std::io::stdout())
    }
}

impl<W: Write> ActionsOutputs<W> {
    pub fn with_writer(output_file: impl Into<PathBuf>, commands: W) -> Self {
        Self {
            output_file: output_file.into(),
            commands,
        }
    }

    pub fn into_writer(self) -> W {
        self.commands
    }
}

impl<W: Write> OutputSink for ActionsOutputs<W> {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        append_file_command(&self.output_file, name, value)
    }

    fn mask(&mut self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        writeln!(
            self.commands,
            "{}",
            workflow_command("add-mask", &[], value)
        )
        .context("failed to write add-mask command")?;
        self.commands
            .flush()
            .context("failed to write add-mask command")
    }
}

/// Plain `name=value` lines for local runs, with masked values redacted.
pub struct ConsoleOutputs<W: Write> {
    out: W,
    masked: Vec<String>,
}

impl ConsoleOutputs<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleOutputs<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            masked: Vec::new(),
        }
    }

    pub fn into_writer(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for ConsoleOutputs<W> {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        writeln!(self.out, "{name}={}", redact(value, &self.masked))
            .context("failed to write output")?;
        Ok(())
    }

    fn mask(&mut self, value: &str) -> Result<()> {
        if !value.is_empty() && !self.masked.iter().any(|m| m == value) {
            self.masked.push(value.to_string());
        }
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutputs {
    pub outputs: BTreeMap<String, String>,
    pub masked: Vec<String>,
}

impl MemoryOutputs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    pub fn is_masked(&self, value: &str) -> bool {
        self.masked.iter().any(|m| m == value)
    }
}

impl OutputSink for MemoryOutputs {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        self.outputs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn mask(&mut self, value: &str) -> Result<()> {
        self.masked.push(value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CI_VARS: [&str; 4] = ["GITHUB_ACTIONS", "GITLAB_CI", "CIRCLECI", "JENKINS_URL"];

    #[test]
    fn ci_environment_display() {
        assert_eq!(CiEnvironment::GitHubActions.to_string(), "GitHub Actions");
        assert_eq!(CiEnvironment::Local.to_string(), "Local");
        assert_eq!(CiEnvironment::default(), CiEnvironment::Local);
    }

    #[test]
    #[serial]
    fn detects_local_without_ci_vars() {
        temp_env::with_vars_unset(CI_VARS, || {
            assert_eq!(detect_environment(), CiEnvironment::Local);
        });
    }

    #[test]
    #[serial]
    fn github_actions_wins_over_other_markers() {
        temp_env::with_vars(
            [
                ("GITHUB_ACTIONS", Some("true")),
                ("GITLAB_CI", Some("true")),
                ("CIRCLECI", None),
                ("JENKINS_URL", None),
            ],
            || assert_eq!(detect_environment(), CiEnvironment::GitHubActions),
        );
    }

    #[test]
    #[serial]
    fn github_context_defaults_api_url_and_ignores_empty_values() {
        temp_env::with_vars(
            [
                ("GITHUB_REPOSITORY", Some("acme/widgets")),
                ("GITHUB_API_URL", None),
                ("GITHUB_TOKEN", Some("")),
                ("GITHUB_SHA", Some("abc123")),
                ("GITHUB_ACTOR", None),
                ("GITHUB_OUTPUT", None),
                ("GITHUB_STATE", None),
            ],
            || {
                let ctx = GithubContext::from_env();
                assert_eq!(ctx.repository.as_deref(), Some("acme/widgets"));
                assert_eq!(ctx.api_url, DEFAULT_GITHUB_API_URL);
                assert_eq!(ctx.token, None);
                assert_eq!(ctx.sha.as_deref(), Some("abc123"));
                assert!(ctx.output_file.is_none());
            },
        );
    }

    #[test]
    fn escapes_workflow_command_parts() {
        assert_eq!(escape_data("50% done\r\nnext"), "50%25 done%0D%0Anext");
        assert_eq!(escape_property("a:b,c"), "a%3Ab%2Cc");
    }

    #[test]
    fn formats_workflow_commands() {
        assert_eq!(workflow_command("add-mask", &[], "s3cr3t"), "::add-mask::s3cr3t");
        assert_eq!(
            workflow_command("error", &[("title", "Record: failed")], "line1\nline2"),
            "::error title=Record%3A failed::line1%0Aline2"
        );
    }

    #[test]
    fn file_command_entry_uses_heredoc_form() {
        let entry = file_command_entry("notes", "line one\nline two", "EOF_1").unwrap();
        insta::assert_snapshot!(entry, @r"
        notes<<EOF_1
        line one
        line two
        EOF_1
        ");
    }

    #[test]
    fn file_command_entry_rejects_delimiter_collision() {
        let err = file_command_entry("x", "contains EOF_1 here", "EOF_1").unwrap_err();
        assert!(err.to_string().contains("delimiter"));
        assert!(file_command_entry("", "v", "EOF_1").is_err());
    }

    #[test]
    fn append_file_command_accumulates_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        append_file_command(&path, "version", "1.2.3").unwrap();
        append_file_command(&path, "tag", "v1.2.3").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("version<<ghadelimiter_"));
        assert_eq!(lines[1], "1.2.3");
        assert!(lines[3].starts_with("tag<<ghadelimiter_"));
        assert_eq!(lines[4], "v1.2.3");
    }

    #[test]
    fn actions_outputs_write_file_and_mask_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        let mut sink = ActionsOutputs::with_writer(&path, Vec::new());
        sink.mask("s3cr3t").unwrap();
        sink.mask("").unwrap();
        sink.set_output("secret_API_KEY", "s3cr3t").unwrap();

        let commands = String::from_utf8(sink.into_writer()).unwrap();
        assert_eq!(commands, "::add-mask::s3cr3t\n");
        let file = std::fs::read_to_string(&path).unwrap();
        assert!(file.contains("secret_API_KEY<<"));
        assert!(file.contains("\ns3cr3t\n"));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_mask_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ActionsOutputs::with_writer(dir.path().join("output"), BrokenPipe);
        let err = sink.mask("s3cr3t").unwrap_err();
        assert!(err.to_string().contains("add-mask"));
        assert!(sink.mask("").is_ok());
    }

    #[test]
    fn console_outputs_redact_masked_values() {
        let mut sink = ConsoleOutputs::new(Vec::new());
        sink.mask("hunter2").unwrap();
        sink.set_output("secret_DB", "hunter2").unwrap();
        sink.set_output("version", "2.0.0").unwrap();

        let text = String::from_utf8(sink.into_writer()).unwrap();
        assert_eq!(text, "secret_DB=***\nversion=2.0.0\n");
    }

    #[test]
    fn memory_outputs_track_values_and_masks() {
        let mut sink = MemoryOutputs::default();
        sink.set_output("a", "1").unwrap();
        sink.set_output("a", "2").unwrap();
        sink.mask("k").unwrap();
        assert_eq!(sink.get("a"), Some("2"));
        assert!(sink.is_masked("k"));
        assert!(!sink.is_masked("2"));
    }

    #[test]
    fn redact_skips_empty_masks() {
        let masked = vec![String::new(), "abc".to_string()];
        assert_eq!(redact("xabcx", &masked), "x***x");
    }
}
