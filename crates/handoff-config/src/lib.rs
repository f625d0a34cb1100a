//! Step inputs and configuration file handling for handoff.
//!
//! [`Inputs`] is what a step invocation received, with absent and empty
//! values both represented as `None`. An optional `.handoff.toml` supplies
//! repository-wide defaults; explicit inputs always win over it.
//!
//! # Example
//!
//! ```
//! use handoff_config::{Config, Inputs, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! let inputs = Inputs {
//!     token: Some("t".into()),
//!     ..Inputs::default()
//! }
//! .with_config(&config);
//! println!("ledger: {}", inputs.api_url());
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".handoff.toml";

/// Ledger base URL used when neither the input nor the config sets one.
pub const DEFAULT_API_URL: &str = "https://api.handoff.dev";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Repository-wide defaults from `.handoff.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub storage: StorageSection,
}

/// `[api]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `[release]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_github_release: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<bool>,
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Blob store directory shared by the jobs of one run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Config {
    pub fn api_url(&self) -> Option<&str> {
        self.api.url.as_deref()
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage.dir.as_deref()
    }
}

/// Load configuration from a directory; a missing file yields defaults.
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Find configuration file by walking up the directory tree
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Parse a boolean step input. Empty means "not provided".
pub fn parse_bool_input(name: &str, value: &str) -> Result<Option<bool>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Ok(Some(true)),
        "false" => Ok(Some(false)),
        _ => bail!("input '{name}' must be true or false, got '{trimmed}'"),
    }
}

/// Inputs of one step invocation.
///
/// Booleans are tri-state: `None` when the input was not provided, so a
/// config default can fill it and an explicit `false` can override one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    pub token: Option<String>,
    pub secret_key: Option<String>,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub bump: Option<String>,
    pub dry_run: Option<bool>,
    pub get_version: Option<bool>,
    pub skip_github_release: Option<bool>,
    pub release_prefix: Option<String>,
    pub github_token: Option<String>,
    pub body: Option<String>,
    pub body_file: Option<PathBuf>,
    pub draft: Option<bool>,
    pub prerelease: Option<bool>,
    /// Newline-separated glob patterns.
    pub artifacts: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub deployed_by: Option<String>,
    pub api_url: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Inputs {
    /// Treat empty and whitespace-only string inputs as absent.
    pub fn normalized(self) -> Self {
        Self {
            token: present(self.token),
            secret_key: present(self.secret_key),
            environment: present(self.environment).map(|v| v.trim().to_string()),
            version: present(self.version).map(|v| v.trim().to_string()),
            bump: present(self.bump).map(|v| v.trim().to_string()),
            release_prefix: present(self.release_prefix).map(|v| v.trim().to_string()),
            github_token: present(self.github_token),
            body: present(self.body),
            body_file: self.body_file.filter(|p| !p.as_os_str().is_empty()),
            artifacts: present(self.artifacts),
            commit_hash: present(self.commit_hash).map(|v| v.trim().to_string()),
            commit_message: present(self.commit_message),
            deployed_by: present(self.deployed_by).map(|v| v.trim().to_string()),
            api_url: present(self.api_url).map(|v| v.trim().to_string()),
            ..self
        }
    }

    /// Fill inputs that were not provided from `.handoff.toml`.
    pub fn with_config(self, config: &Config) -> Self {
        Self {
            api_url: self.api_url.or_else(|| config.api.url.clone()),
            release_prefix: self.release_prefix.or_else(|| config.release.prefix.clone()),
            skip_github_release: self
                .skip_github_release
                .or(config.release.skip_github_release),
            draft: self.draft.or(config.release.draft),
            prerelease: self.prerelease.or(config.release.prerelease),
            ..self
        }
    }

    /// Ledger base URL, defaulting to [`DEFAULT_API_URL`].
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// The `artifacts` input split into one glob pattern per non-blank line.
    pub fn artifact_patterns(&self) -> Vec<String> {
        self.artifacts
            .as_deref()
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Release body: the `body` input, else the contents of `body-file`.
    ///
    /// An unreadable `body-file` is an error.
    pub fn resolve_body(&self) -> Result<Option<String>> {
        if let Some(body) = &self.body {
            return Ok(Some(body.clone()));
        }
        match &self.body_file {
            None => Ok(None),
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read body-file: {}", path.display()))?;
                Ok(Some(content).filter(|c| !c.trim().is_empty()))
            }
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    pub fn get_version(&self) -> bool {
        self.get_version.unwrap_or(false)
    }

    pub fn skip_github_release(&self) -> bool {
        self.skip_github_release.unwrap_or(false)
    }

    pub fn draft(&self) -> bool {
        self.draft.unwrap_or(false)
    }

    pub fn prerelease(&self) -> bool {
        self.prerelease.unwrap_or(false)
    }
}
