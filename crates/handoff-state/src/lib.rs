//! Run-state channel for handoff.
//!
//! A step runs twice: once as `main` and once as `post`. Anything `main`
//! decides that `post` must act on travels through a [`RunStateChannel`].
//! Under GitHub Actions that is the runner's `GITHUB_STATE` file command,
//! which the runner replays as `STATE_<key>` variables for the post step.
//! Local runs use a small directory of files instead.
//!
//! # Example
//!
//! ```
//! use handoff_state::{MemoryRunState, RunStateChannel, load_json, save_json};
//!
//! let mut state = MemoryRunState::default();
//! save_json(&mut state, "plan", &vec!["a", "b"]).unwrap();
//! let plan: Option<Vec<String>> = load_json(&state, "plan").unwrap();
//! assert_eq!(plan.unwrap(), vec!["a", "b"]);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Overrides the directory used by [`FileRunState`].
pub const STATE_DIR_ENV: &str = "HANDOFF_STATE_DIR";

/// Directory used by [`FileRunState`] when nothing else is configured.
pub const DEFAULT_STATE_DIR: &str = ".handoff/state";

/// Key/value channel that survives from the main phase to the post phase.
pub trait RunStateChannel {
    /// Stores `value` under `key` for the post phase.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Forgets `key`. Channels scoped to a single job may ignore this.
    fn remove(&mut self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Human-readable description of where state lives.
    fn location(&self) -> String;
}

/// Keys end up in environment variable names, so keep them plain.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("state key must not be empty");
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid state key '{key}': only ASCII letters, digits and '_' are allowed");
    }
    Ok(())
}

/// Serializes `value` as JSON and stores it under `key`.
pub fn save_json<T: Serialize>(
    channel: &mut dyn RunStateChannel,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value).context("failed to serialize run state")?;
    channel.set(key, &json)
}

/// Loads and deserializes the JSON stored under `key`.
pub fn load_json<T: DeserializeOwned>(channel: &dyn RunStateChannel, key: &str) -> Result<Option<T>> {
    match channel.get(key)? {
        None => Ok(None),
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse run state '{key}'"))?;
            Ok(Some(value))
        }
    }
}

/// GitHub Actions run state.
///
/// Writes go to the `GITHUB_STATE` file; reads come from the
/// `STATE_<key>` variables the runner sets for the post step.
#[derive(Debug, Clone)]
pub struct ActionsState {
    state_file: PathBuf,
}

impl ActionsState {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Uses `GITHUB_STATE` when the runner provides it.
    pub fn from_env() -> Option<Self> {
        handoff_environment::non_empty_var("GITHUB_STATE").map(Self::new)
    }
}

impl RunStateChannel for ActionsState {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        handoff_environment::append_file_command(&self.state_file, key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(handoff_environment::non_empty_var(&format!("STATE_{key}")))
    }

    fn location(&self) -> String {
        format!("github-state://{}", self.state_file.display())
    }
}

/// Directory-backed run state for local runs, one file per key.
#[derive(Debug, Clone)]
pub struct FileRunState {
    dir: PathBuf,
}

impl FileRunState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolves the directory from [`STATE_DIR_ENV`], falling back to
    /// [`DEFAULT_STATE_DIR`].
    pub fn from_env() -> Self {
        let dir = handoff_environment::non_empty_var(STATE_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl RunStateChannel for FileRunState {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state dir: {}", self.dir.display()))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, value)
            .with_context(|| format!("failed to write file: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename file to: {}", path.display()))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read file: {}", path.display()))?;
        Ok(Some(content))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete file: {}", path.display()))?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Run state held in memory; main and post share one instance in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunState {
    values: BTreeMap<String, String>,
}

impl RunStateChannel for MemoryRunState {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Picks the Actions channel when `GITHUB_STATE` is set, else the local one.
pub fn build_run_state() -> Box<dyn RunStateChannel> {
    match ActionsState::from_env() {
        Some(state) => Box::new(state),
        None => Box::new(FileRunState::from_env()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Plan {
        bundle: String,
        files: Vec<String>,
    }

    #[test]
    fn validate_key_rejects_unsafe_names() {
        assert!(validate_key("handoff_cleanup").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a-b").is_err());
        assert!(validate_key("../escape").is_err());
    }

    #[test]
    fn memory_state_roundtrips_json() {
        let mut state = MemoryRunState::default();
        let plan = Plan {
            bundle: "handoff-session".into(),
            files: vec!["dist/app.tar.gz".into()],
        };
        save_json(&mut state, "plan", &plan).unwrap();
        assert_eq!(load_json::<Plan>(&state, "plan").unwrap(), Some(plan));

        state.remove("plan").unwrap();
        assert_eq!(load_json::<Plan>(&state, "plan").unwrap(), None);
    }

    #[test]
    fn load_json_reports_corrupt_state() {
        let mut state = MemoryRunState::default();
        state.set("plan", "{not json").unwrap();
        let err = load_json::<Plan>(&state, "plan").unwrap_err();
        assert!(err.to_string().contains("plan"));
    }

    #[test]
    fn file_state_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut main = FileRunState::new(dir.path().join("state"));
        main.set("handoff_cleanup", "{\"kind\":\"none\"}").unwrap();

        let mut post = FileRunState::new(dir.path().join("state"));
        assert_eq!(
            post.get("handoff_cleanup").unwrap().as_deref(),
            Some("{\"kind\":\"none\"}")
        );
        post.remove("handoff_cleanup").unwrap();
        assert_eq!(post.get("handoff_cleanup").unwrap(), None);
        assert!(!dir.path().join("state/handoff_cleanup.tmp").exists());
    }

    #[test]
    fn file_state_missing_dir_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let state = FileRunState::new(dir.path().join("absent"));
        assert_eq!(state.get("anything").unwrap(), None);
    }

    #[test]
    #[serial]
    fn actions_state_writes_file_command_and_reads_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let mut state = ActionsState::new(&path);
        state.set("handoff_cleanup", "{\"a\":1}").unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("handoff_cleanup<<ghadelimiter_"));
        assert!(written.contains("\n{\"a\":1}\n"));

        temp_env::with_var("STATE_handoff_cleanup", Some("{\"a\":1}"), || {
            assert_eq!(
                state.get("handoff_cleanup").unwrap().as_deref(),
                Some("{\"a\":1}")
            );
        });
        temp_env::with_var_unset("STATE_handoff_cleanup", || {
            assert_eq!(state.get("handoff_cleanup").unwrap(), None);
        });
    }

    #[test]
    #[serial]
    fn build_run_state_prefers_actions_state() {
        temp_env::with_vars(
            [
                ("GITHUB_STATE", Some("/tmp/gh-state")),
                (STATE_DIR_ENV, None),
            ],
            || assert!(build_run_state().location().starts_with("github-state://")),
        );
        temp_env::with_vars(
            [("GITHUB_STATE", None), (STATE_DIR_ENV, Some("/tmp/local-state"))],
            || assert_eq!(build_run_state().location(), "/tmp/local-state"),
        );
    }
}
