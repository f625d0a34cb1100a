//! GitHub releases client for handoff.
//!
//! Creates a tagged release and uploads asset files to it. Callers treat
//! every failure here as non-fatal; the ledger record is the authoritative
//! outcome of a run.
//!
//! # Example
//!
//! ```no_run
//! use handoff_github::{GithubClient, ReleaseRequest};
//!
//! let client = GithubClient::new("https://api.github.com", "acme/widgets", "ghp_token");
//! let release = client
//!     .create_release(&ReleaseRequest::new("v1.2.4", None, false, false))
//!     .unwrap();
//! client.upload_asset(&release, std::path::Path::new("dist/app.tar.gz")).unwrap();
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// GitHub REST API version header value.
pub const API_VERSION: &str = "2022-11-28";

pub const USER_AGENT: &str = concat!("handoff/", env!("CARGO_PKG_VERSION"));

/// Body of `POST /repos/{owner}/{repo}/releases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRequest {
    pub tag_name: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub generate_release_notes: bool,
}

impl ReleaseRequest {
    /// Release named after its tag. Notes are generated by GitHub only when
    /// no body is supplied.
    pub fn new(tag: &str, body: Option<&str>, draft: bool, prerelease: bool) -> Self {
        let body = body.filter(|b| !b.trim().is_empty()).map(str::to_string);
        Self {
            tag_name: tag.to_string(),
            name: tag.to_string(),
            generate_release_notes: body.is_none(),
            body,
            draft,
            prerelease,
        }
    }
}

/// A created release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    /// Hypermedia template, e.g. `https://uploads.github.com/.../assets{?name,label}`.
    pub upload_url: String,
}

/// An uploaded release asset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub browser_download_url: String,
}

/// Resolve a release's `upload_url` template for an asset named `name`.
pub fn asset_upload_url(template: &str, name: &str) -> Result<reqwest::Url> {
    let base = match template.find('{') {
        Some(idx) => &template[..idx],
        None => template,
    };
    let mut url = reqwest::Url::parse(base)
        .with_context(|| format!("invalid upload url: {template}"))?;
    url.query_pairs_mut().append_pair("name", name);
    Ok(url)
}

/// GitHub REST client scoped to one repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    api_url: String,
    repository: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl GithubClient {
    /// `repository` is `owner/name`.
    pub fn new(api_url: &str, repository: &str, token: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
            client,
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Create a release for `request.tag_name`.
    pub fn create_release(&self, request: &ReleaseRequest) -> Result<Release> {
        let url = format!("{}/repos/{}/releases", self.api_url, self.repository);
        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .context("failed to send create release request")?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "GitHub API error creating release {} ({}): {}",
                request.tag_name,
                status.as_u16(),
                response.text().unwrap_or_default()
            );
        }
        response.json().context("failed to parse release response")
    }

    /// Upload `path` to `release`, using the file's basename as the asset name.
    pub fn upload_asset(&self, release: &Release, path: &Path) -> Result<ReleaseAsset> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("asset path has no file name: {}", path.display()))?;
        let data =
            std::fs::read(path).with_context(|| format!("failed to read asset {}", path.display()))?;
        let url = asset_upload_url(&release.upload_url, name)?;

        let response = self
            .authorized(self.client.post(url))
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .with_context(|| format!("failed to upload asset {name}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "GitHub API error uploading asset {name} ({}): {}",
                status.as_u16(),
                response.text().unwrap_or_default()
            );
        }
        response.json().context("failed to parse asset response")
    }

    fn authorized(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}
