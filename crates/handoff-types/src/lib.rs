//! Core domain types for handoff.
//!
//! This crate provides the types shared by every job that takes part in a
//! release transaction: the deployment environment, the bump type, the
//! serialized [`Session`], the ledger's [`DeploymentRecord`], and the encrypted
//! secret envelope delivered by the ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Deployment environment a release targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    /// All accepted environments, in the order they are documented.
    pub const ALL: [Environment; 3] = [
        Environment::Production,
        Environment::Staging,
        Environment::Development,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" => Ok(Environment::Development),
            other => Err(ParseEnumError {
                kind: "environment",
                value: other.to_string(),
                expected: "production, staging, development",
            }),
        }
    }
}

/// Semantic version component to bump when no explicit version is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpType {
    Major,
    Minor,
    #[default]
    Patch,
}

impl BumpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BumpType::Major => "major",
            BumpType::Minor => "minor",
            BumpType::Patch => "patch",
        }
    }
}

impl std::fmt::Display for BumpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BumpType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "major" => Ok(BumpType::Major),
            "minor" => Ok(BumpType::Minor),
            "patch" => Ok(BumpType::Patch),
            other => Err(ParseEnumError {
                kind: "bump",
                value: other.to_string(),
                expected: "major, minor, patch",
            }),
        }
    }
}

/// Error returned when an input string is not one of the accepted values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid {} '{}' (expected one of: {})",
            self.kind, self.value, self.expected
        )
    }
}

impl std::error::Error for ParseEnumError {}

/// Build the git tag for a release.
///
/// `{prefix}-v{version}` when a release prefix is configured, `v{version}`
/// otherwise. Every call site that names a release goes through here so the
/// same version always yields the same tag.
pub fn release_tag(release_prefix: Option<&str>, version: &str) -> String {
    match release_prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}-v{version}"),
        None => format!("v{version}"),
    }
}

/// Release-transaction context handed from the job that resolved the version
/// to the job that commits it.
///
/// Once published a session is never modified; later jobs only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub environment: Environment,
    pub version: String,
    pub application_name: String,
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_prefix: Option<String>,
    #[serde(default)]
    pub skip_github_release: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub commit_hash: String,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default)]
    pub deployed_by: String,
}

impl Session {
    /// Tag this session's release will be created under.
    pub fn tag(&self) -> String {
        release_tag(self.release_prefix.as_deref(), &self.version)
    }
}

/// A recorded release as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub application_id: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
    pub version: String,
    pub environment: Environment,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub git_tag: Option<String>,
    #[serde(default)]
    pub deployed_by: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of a dry-run deploy call: the version that would be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionPreview {
    #[serde(default)]
    pub dry_run: bool,
    pub version: String,
    pub environment: Environment,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub application_id: Option<String>,
    #[serde(default)]
    pub application_name: String,
}

/// Currently deployed version of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentVersion {
    pub version: String,
    pub environment: Environment,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub deployed_by: Option<String>,
}

/// A secret value sealed for the holder of an RSA private key.
///
/// All three fields are base64. `encrypted_key` is the AES-256 content key
/// wrapped with RSA-OAEP/SHA-256; `encrypted_value` is the AES-256-GCM
/// ciphertext with the 16-byte tag appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
    pub iv: String,
    pub encrypted_key: String,
    pub encrypted_value: String,
}

/// Configuration variables and sealed secrets for one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, EncryptedSecret>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
