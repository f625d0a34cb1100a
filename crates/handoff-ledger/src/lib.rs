//! Deployment ledger API client for handoff.
//!
//! The ledger is the remote source of truth for released versions. This
//! crate wraps its webhook endpoints:
//!
//! - `POST /webhook/deploy` records a release, or previews the next version
//!   when `dryRun` is set
//! - `GET /webhook/version` reads the currently deployed version
//! - `GET /webhook/config` fetches configuration variables and sealed secrets
//!
//! Calls are never retried. A non-2xx response becomes
//! [`LedgerError::Api`] and the job fails.
//!
//! # Example
//!
//! ```no_run
//! use handoff_ledger::{LedgerClient, VersionTarget};
//! use handoff_types::{BumpType, Environment};
//!
//! let client = LedgerClient::new("https://api.handoff.dev", "token");
//! let preview = client
//!     .query_next_version(Environment::Staging, &VersionTarget::Bump(BumpType::Minor))
//!     .unwrap();
//! println!("next version: {}", preview.version);
//! ```

use handoff_types::{
    BumpType, CurrentVersion, DeploymentRecord, Environment, EnvironmentConfig, VersionPreview,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default user agent for API requests
pub const USER_AGENT: &str = concat!("handoff/", env!("CARGO_PKG_VERSION"));

/// Errors raised by ledger calls.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger answered with a non-2xx status.
    #[error("API error ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Which version a deploy call targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionTarget {
    /// Let the ledger compute the next version.
    Bump(BumpType),
    /// Use this version verbatim.
    #[serde(rename = "version")]
    Exact(String),
}

/// A release to commit to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub environment: Environment,
    pub target: VersionTarget,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub deployed_by: Option<String>,
    pub git_tag: Option<String>,
}

impl Deployment {
    /// A deployment of an exact version with no metadata attached.
    pub fn new(environment: Environment, version: impl Into<String>) -> Self {
        Self {
            environment,
            target: VersionTarget::Exact(version.into()),
            commit_hash: None,
            commit_message: None,
            deployed_by: None,
            git_tag: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployPayload<'a> {
    environment: Environment,
    #[serde(flatten)]
    target: &'a VersionTarget,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployed_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_tag: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    deployment: DeploymentRecord,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    code: Option<serde_json::Value>,
}

/// Ledger API client
#[derive(Debug, Clone)]
pub struct LedgerClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl LedgerClient {
    /// Create a client for `base_url` authenticating with `token`.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: build_http_client(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Commit a release. Exactly one deployment record is created per call.
    pub fn record(&self, deployment: &Deployment) -> Result<DeploymentRecord, LedgerError> {
        let payload = DeployPayload {
            environment: deployment.environment,
            target: &deployment.target,
            dry_run: false,
            commit_hash: non_empty(&deployment.commit_hash),
            commit_message: non_empty(&deployment.commit_message),
            deployed_by: non_empty(&deployment.deployed_by),
            git_tag: non_empty(&deployment.git_tag),
        };
        let response: DeployResponse = self.post_deploy(&payload)?;
        Ok(response.deployment)
    }

    /// Ask which version a deploy would record, without recording it.
    ///
    /// Also resolves the ledger-assigned application name.
    pub fn query_next_version(
        &self,
        environment: Environment,
        target: &VersionTarget,
    ) -> Result<VersionPreview, LedgerError> {
        let payload = DeployPayload {
            environment,
            target,
            dry_run: true,
            commit_hash: None,
            commit_message: None,
            deployed_by: None,
            git_tag: None,
        };
        self.post_deploy(&payload)
    }

    /// Read the version currently deployed to `environment`.
    pub fn query_current_version(
        &self,
        environment: Environment,
    ) -> Result<CurrentVersion, LedgerError> {
        let url = format!(
            "{}/webhook/version?environment={}",
            self.base_url,
            environment.as_str()
        );
        self.execute(self.client.get(&url), &url)
    }

    /// Fetch configuration variables and sealed secrets for `environment`.
    pub fn fetch_environment_config(
        &self,
        environment: Environment,
    ) -> Result<EnvironmentConfig, LedgerError> {
        let url = format!(
            "{}/webhook/config?environment={}",
            self.base_url,
            environment.as_str()
        );
        self.execute(self.client.get(&url), &url)
    }

    fn post_deploy<T: DeserializeOwned>(&self, payload: &DeployPayload<'_>) -> Result<T, LedgerError> {
        let url = format!("{}/webhook/deploy", self.base_url);
        self.execute(self.client.post(&url).json(payload), &url)
    }

    fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
        url: &str,
    ) -> Result<T, LedgerError> {
        let transport = |source| LedgerError::Transport {
            url: url.to_string(),
            source,
        };
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().map_err(transport)?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| LedgerError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Requests carry no timeout of their own; the CI job timeout bounds a
/// hung call.
fn build_http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn api_error(status: reqwest::StatusCode, body: &str) -> LedgerError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = match parsed.code {
        Some(serde_json::Value::String(code)) => code,
        Some(serde_json::Value::Number(code)) => code.to_string(),
        _ => status.as_u16().to_string(),
    };
    let message = parsed
        .error
        .or(parsed.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });
    LedgerError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}
