use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use handoff_github::{GithubClient, Release, ReleaseRequest};
use handoff_ledger::{Deployment, LedgerClient, VersionTarget};
use handoff_types::{DeploymentRecord, Session};

use crate::engine::Reporter;

/// Where GitHub releases go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GithubTarget {
    pub api_url: String,
    /// `owner/name`
    pub repository: Option<String>,
    pub token: Option<String>,
}

/// The ledger write for `session`, tagged with the session's release tag.
pub fn deployment_for(session: &Session) -> Deployment {
    let meta = |v: &str| Some(v.to_string()).filter(|v| !v.is_empty());
    Deployment {
        environment: session.environment,
        target: VersionTarget::Exact(session.version.clone()),
        commit_hash: meta(&session.commit_hash),
        commit_message: meta(&session.commit_message),
        deployed_by: meta(&session.deployed_by),
        git_tag: Some(session.tag()),
    }
}

/// Commit the release to the ledger. Errors are fatal to the run.
pub fn record_deployment(
    ledger: &LedgerClient,
    session: &Session,
    reporter: &mut dyn Reporter,
) -> Result<DeploymentRecord> {
    let deployment = deployment_for(session);
    reporter.info(&format!(
        "recording {} {} to {}",
        session.environment,
        session.version,
        ledger.base_url()
    ));
    let record = ledger.record(&deployment)?;
    reporter.info(&format!(
        "recorded deployment {} ({})",
        record.id,
        record.git_tag.as_deref().unwrap_or("untagged")
    ));
    Ok(record)
}

/// Create the GitHub release for `session` and attach `assets`.
///
/// Best effort: every failure is a warning and yields `None`. An asset
/// upload failure stops further uploads but keeps the release. Assets are
/// uploaded under their file name, so a name seen before is skipped.
pub fn publish_release(
    target: &GithubTarget,
    session: &Session,
    assets: &[PathBuf],
    reporter: &mut dyn Reporter,
) -> Option<Release> {
    if session.skip_github_release {
        reporter.info("skipping GitHub release");
        return None;
    }
    let Some(token) = target.token.as_deref() else {
        reporter.warn("no github-token available; skipping GitHub release");
        return None;
    };
    let Some(repository) = target.repository.as_deref() else {
        reporter.warn("GITHUB_REPOSITORY is not set; skipping GitHub release");
        return None;
    };

    let tag = session.tag();
    let client = GithubClient::new(&target.api_url, repository, token);
    let request = ReleaseRequest::new(
        &tag,
        session.body.as_deref(),
        session.draft,
        session.prerelease,
    );
    let release = match client.create_release(&request) {
        Ok(release) => release,
        Err(err) => {
            reporter.warn(&format!("failed to create GitHub release {tag}: {err:#}"));
            return None;
        }
    };
    reporter.info(&format!("created GitHub release {tag}"));

    let mut uploaded_names = HashSet::new();
    for asset in assets {
        let name = asset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !uploaded_names.insert(name.clone()) {
            reporter.debug(&format!(
                "release asset {name} already uploaded; skipping {}",
                asset.display()
            ));
            continue;
        }
        match client.upload_asset(&release, asset) {
            Ok(uploaded) => reporter.info(&format!("uploaded release asset {}", uploaded.name)),
            Err(err) => {
                reporter.warn(&format!(
                    "failed to upload release asset {}: {err:#}",
                    asset.display()
                ));
                break;
            }
        }
    }
    Some(release)
}
