use std::path::PathBuf;

use anyhow::{Context, Result};
use handoff_config::Inputs;
use handoff_environment::OutputSink;
use handoff_github::Release;
use handoff_ledger::{LedgerClient, VersionTarget};
use handoff_state::RunStateChannel;
use handoff_storage::BlobChannel;
use handoff_types::{DeploymentRecord, Environment, Session};

use crate::artifacts::{ArtifactAggregator, collect_local};
use crate::cleanup::{CleanupPlan, store_plan, take_plan};
use crate::delivery::deliver_environment_config;
use crate::mode::{Mode, ModeError, resolve_mode};
use crate::release::{GithubTarget, publish_release, record_deployment};
use crate::session::SessionStore;

/// Overrides where collected remote artifacts are written.
pub const DOWNLOAD_DIR_ENV: &str = "HANDOFF_DOWNLOAD_DIR";

/// Default download directory, relative to the working directory.
pub const DEFAULT_DOWNLOAD_DIR: &str = ".handoff/downloads";

pub trait Reporter {
    fn debug(&mut self, msg: &str);
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Values the CI system provides about the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiContext {
    /// Commit being built (`GITHUB_SHA`).
    pub sha: Option<String>,
    /// Who triggered the run (`GITHUB_ACTOR`).
    pub actor: Option<String>,
}

/// Everything a phase talks to besides the ledger.
pub struct Runtime<'a> {
    pub blobs: &'a dyn BlobChannel,
    pub state: &'a mut dyn RunStateChannel,
    pub outputs: &'a mut dyn OutputSink,
    pub github: GithubTarget,
    pub ci: CiContext,
    /// Checkout used for commit metadata lookups.
    pub workdir: PathBuf,
    pub download_dir: PathBuf,
}

/// What the main phase did.
#[derive(Debug, Clone, PartialEq)]
pub struct MainOutcome {
    pub mode: Mode,
    pub version: Option<String>,
    pub record: Option<DeploymentRecord>,
    pub deferred: Option<CleanupPlan>,
}

/// What the post phase did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostOutcome {
    pub bundle: Option<String>,
    pub record: Option<DeploymentRecord>,
    pub release: Option<Release>,
}

fn require_token(inputs: &Inputs) -> Result<&str, ModeError> {
    inputs
        .token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(ModeError::TokenRequired)
}

fn github_target(inputs: &Inputs, rt: &Runtime<'_>) -> GithubTarget {
    GithubTarget {
        token: inputs
            .github_token
            .clone()
            .or_else(|| rt.github.token.clone()),
        ..rt.github.clone()
    }
}

fn new_session(
    inputs: &Inputs,
    rt: &Runtime<'_>,
    environment: Environment,
    version: String,
    application_name: String,
    body: Option<String>,
) -> Session {
    let commit = handoff_git::resolve_commit(
        &rt.workdir,
        inputs.commit_hash.as_deref(),
        inputs.commit_message.as_deref(),
        rt.ci.sha.as_deref(),
    );
    Session {
        environment,
        version,
        application_name,
        api_base_url: inputs.api_url().to_string(),
        release_prefix: inputs.release_prefix.clone(),
        skip_github_release: inputs.skip_github_release(),
        body,
        draft: inputs.draft(),
        prerelease: inputs.prerelease(),
        commit_hash: commit.hash.unwrap_or_default(),
        commit_message: commit.message.unwrap_or_default(),
        deployed_by: inputs
            .deployed_by
            .clone()
            .or_else(|| rt.ci.actor.clone())
            .unwrap_or_default(),
    }
}

fn defer(rt: &mut Runtime<'_>, plan: CleanupPlan, reporter: &mut dyn Reporter) -> Result<CleanupPlan> {
    store_plan(rt.state, &plan).context("failed to store post-phase plan")?;
    reporter.debug(&format!(
        "deferred '{}' to the post phase via {}",
        plan.describe(),
        rt.state.location()
    ));
    Ok(plan)
}

/// Run the main phase: resolve the mode and do its synchronous part.
pub fn run_main(
    inputs: &Inputs,
    rt: &mut Runtime<'_>,
    reporter: &mut dyn Reporter,
) -> Result<MainOutcome> {
    let mode = resolve_mode(inputs)?;
    reporter.info(&format!("mode: {mode}"));
    let patterns = inputs.artifact_patterns();

    if mode == Mode::Upload {
        let plan = defer(rt, CleanupPlan::UploadArtifacts { patterns }, reporter)?;
        return Ok(MainOutcome {
            mode,
            version: None,
            record: None,
            deferred: Some(plan),
        });
    }

    let token = require_token(inputs)?;
    let body = inputs.resolve_body()?;
    let ledger = LedgerClient::new(inputs.api_url(), token);

    let mut outcome = MainOutcome {
        mode: mode.clone(),
        version: None,
        record: None,
        deferred: None,
    };

    match mode {
        Mode::Upload => {}
        Mode::QueryVersion { environment } => {
            let current = ledger.query_current_version(environment)?;
            reporter.info(&format!("{environment} is at {}", current.version));
            rt.outputs.set_output("version", &current.version)?;
            rt.outputs.set_output(
                "deployed-at",
                &current
                    .deployed_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            )?;
            rt.outputs
                .set_output("commit-hash", current.commit_hash.as_deref().unwrap_or(""))?;
            deliver_environment_config(
                &ledger,
                environment,
                inputs.secret_key.as_deref(),
                rt.outputs,
                reporter,
            )?;
            outcome.version = Some(current.version);
        }
        Mode::Init { environment, bump } => {
            let preview = ledger.query_next_version(environment, &VersionTarget::Bump(bump))?;
            reporter.info(&format!("next {environment} version: {}", preview.version));
            rt.outputs.set_output("version", &preview.version)?;
            deliver_environment_config(
                &ledger,
                environment,
                inputs.secret_key.as_deref(),
                rt.outputs,
                reporter,
            )?;
            let session = new_session(
                inputs,
                rt,
                environment,
                preview.version.clone(),
                preview.application_name,
                body,
            );
            outcome.version = Some(preview.version);
            outcome.deferred = Some(defer(
                rt,
                CleanupPlan::PublishSession { session, patterns },
                reporter,
            )?);
        }
        Mode::SingleJob { environment, bump } => {
            let preview = ledger.query_next_version(environment, &VersionTarget::Bump(bump))?;
            reporter.info(&format!("next {environment} version: {}", preview.version));
            rt.outputs.set_output("version", &preview.version)?;
            deliver_environment_config(
                &ledger,
                environment,
                inputs.secret_key.as_deref(),
                rt.outputs,
                reporter,
            )?;
            let session = new_session(
                inputs,
                rt,
                environment,
                preview.version.clone(),
                preview.application_name,
                body,
            );
            outcome.version = Some(preview.version);
            outcome.deferred = Some(defer(
                rt,
                CleanupPlan::RecordAndRelease {
                    session,
                    patterns,
                    collect_remote: false,
                },
                reporter,
            )?);
        }
        Mode::Explicit {
            environment,
            version,
        } => {
            let preview =
                ledger.query_next_version(environment, &VersionTarget::Exact(version.clone()))?;
            let session = new_session(
                inputs,
                rt,
                environment,
                version,
                preview.application_name,
                body,
            );
            let record = record_deployment(&ledger, &session, reporter)?;
            rt.outputs.set_output("version", &session.version)?;
            rt.outputs.set_output("id", &record.id)?;

            let files = collect_local(&patterns, reporter);
            publish_release(&github_target(inputs, rt), &session, &files, reporter);
            deliver_environment_config(
                &ledger,
                environment,
                inputs.secret_key.as_deref(),
                rt.outputs,
                reporter,
            )?;
            outcome.version = Some(session.version);
            outcome.record = Some(record);
        }
        Mode::Finalize => {
            let session = SessionStore::new(rt.blobs)
                .resume(reporter)?
                .context("no session found, run Init first")?;
            reporter.info(&format!(
                "resumed session for {} {} ({})",
                session.application_name, session.version, session.environment
            ));
            rt.outputs.set_output("version", &session.version)?;
            let session_ledger = LedgerClient::new(&session.api_base_url, token);
            deliver_environment_config(
                &session_ledger,
                session.environment,
                inputs.secret_key.as_deref(),
                rt.outputs,
                reporter,
            )?;
            outcome.version = Some(session.version.clone());
            outcome.deferred = Some(defer(
                rt,
                CleanupPlan::RecordAndRelease {
                    session,
                    patterns,
                    collect_remote: true,
                },
                reporter,
            )?);
        }
    }

    Ok(outcome)
}

/// Run the post phase: perform whatever the main phase deferred.
pub fn run_post(
    inputs: &Inputs,
    rt: &mut Runtime<'_>,
    reporter: &mut dyn Reporter,
) -> Result<PostOutcome> {
    let Some(plan) = take_plan(rt.state)? else {
        reporter.debug("no deferred work for the post phase");
        return Ok(PostOutcome::default());
    };
    reporter.info(&format!("post: {}", plan.describe()));

    let mut outcome = PostOutcome::default();
    let aggregator = ArtifactAggregator::new(rt.blobs, rt.download_dir.clone());

    match plan {
        CleanupPlan::UploadArtifacts { patterns } => {
            let files = collect_local(&patterns, reporter);
            outcome.bundle = aggregator.publish(&files, reporter)?;
        }
        CleanupPlan::PublishSession { session, patterns } => {
            SessionStore::new(rt.blobs).publish(&session)?;
            reporter.info(&format!(
                "published session for {} {} to {}",
                session.environment,
                session.version,
                rt.blobs.location()
            ));
            if !patterns.is_empty() {
                let files = collect_local(&patterns, reporter);
                outcome.bundle = aggregator.publish(&files, reporter)?;
            }
        }
        CleanupPlan::RecordAndRelease {
            session,
            patterns,
            collect_remote,
        } => {
            let token = require_token(inputs)?;
            let mut files = if collect_remote {
                aggregator.collect_remote(reporter)?
            } else {
                Vec::new()
            };
            files.extend(collect_local(&patterns, reporter));

            let ledger = LedgerClient::new(&session.api_base_url, token);
            let record = record_deployment(&ledger, &session, reporter)?;
            rt.outputs.set_output("id", &record.id)?;
            outcome.release = publish_release(&github_target(inputs, rt), &session, &files, reporter);
            outcome.record = Some(record);
        }
    }

    Ok(outcome)
}

/// Download directory from [`DOWNLOAD_DIR_ENV`], else [`DEFAULT_DOWNLOAD_DIR`].
pub fn resolve_download_dir() -> PathBuf {
    handoff_environment::non_empty_var(DOWNLOAD_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CollectingReporter, MockServer, Reply};
    use handoff_environment::MemoryOutputs;
    use handoff_state::MemoryRunState;
    use handoff_storage::MemoryBlobStore;

    struct Harness {
        blobs: MemoryBlobStore,
        state: MemoryRunState,
        outputs: MemoryOutputs,
        workdir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                blobs: MemoryBlobStore::new(),
                state: MemoryRunState::default(),
                outputs: MemoryOutputs::default(),
                workdir: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn runtime(&mut self) -> Runtime<'_> {
            Runtime {
                blobs: &self.blobs,
                state: &mut self.state,
                outputs: &mut self.outputs,
                github: GithubTarget::default(),
                ci: CiContext::default(),
                workdir: self.workdir.path().to_path_buf(),
                download_dir: self.workdir.path().join("downloads"),
            }
        }
    }

    #[test]
    fn validation_errors_surface_before_any_work() {
        let mut h = Harness::new();
        let mut reporter = CollectingReporter::default();
        let err = run_main(&Inputs::default(), &mut h.runtime(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), "token is required");

        let inputs = Inputs {
            token: Some("t".into()),
            version: Some("1.0.0".into()),
            ..Inputs::default()
        };
        let err = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), "environment is required");
        assert!(h.state.get(crate::cleanup::CLEANUP_KEY).unwrap().is_none());
    }

    #[test]
    fn unreadable_body_file_fails_before_network() {
        let server = MockServer::start(|_| Reply::json(500, "{}"));
        let mut h = Harness::new();
        let inputs = Inputs {
            token: Some("t".into()),
            environment: Some("production".into()),
            body_file: Some(h.workdir.path().join("missing.md")),
            api_url: Some(server.base_url()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();

        let err = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap_err();
        assert!(err.to_string().contains("body-file"));
        assert!(server.requests().is_empty());
    }

    #[test]
    fn upload_mode_defers_patterns() {
        let mut h = Harness::new();
        let inputs = Inputs {
            artifacts: Some("dist/*.tar.gz\nbuild/*.zip".into()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();

        let outcome = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap();
        assert_eq!(outcome.mode, Mode::Upload);
        assert_eq!(
            outcome.deferred,
            Some(CleanupPlan::UploadArtifacts {
                patterns: vec!["dist/*.tar.gz".into(), "build/*.zip".into()]
            })
        );
        assert!(h.outputs.outputs.is_empty());
    }

    #[test]
    fn post_without_plan_does_nothing() {
        let mut h = Harness::new();
        let mut reporter = CollectingReporter::default();
        let outcome = run_post(&Inputs::default(), &mut h.runtime(), &mut reporter).unwrap();
        assert_eq!(outcome, PostOutcome::default());
        assert!(h.blobs.list().unwrap().is_empty());
    }

    #[test]
    fn finalize_without_session_is_fatal() {
        let mut h = Harness::new();
        let inputs = Inputs {
            token: Some("t".into()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();
        let err = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), "no session found, run Init first");
        assert!(h.state.get(crate::cleanup::CLEANUP_KEY).unwrap().is_none());
    }

    #[test]
    fn corrupt_session_is_treated_as_absent() {
        use crate::session::{SESSION_BUNDLE, SESSION_FILE};
        use handoff_storage::BlobEntry;

        let mut h = Harness::new();
        h.blobs
            .put(
                SESSION_BUNDLE,
                &[BlobEntry::new(SESSION_FILE, b"not json".to_vec())],
            )
            .unwrap();
        let inputs = Inputs {
            token: Some("t".into()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();

        let err = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), "no session found, run Init first");
        assert!(reporter.warns.iter().any(|w| w.contains("failed to parse session")));
        assert!(h.state.get(crate::cleanup::CLEANUP_KEY).unwrap().is_none());
        assert!(h.outputs.outputs.is_empty());
    }

    #[test]
    fn query_version_sets_lookup_outputs() {
        let server = MockServer::start(|req| match req.url.split('?').next() {
            Some("/webhook/version") => Reply::json(
                200,
                r#"{"version":"1.2.3","environment":"production","deployedAt":"2026-02-03T04:05:06Z","commitHash":"cafe"}"#,
            ),
            _ => Reply::json(200, r#"{"variables":{"REGION":"us"}}"#),
        });
        let mut h = Harness::new();
        let inputs = Inputs {
            token: Some("t".into()),
            environment: Some("production".into()),
            get_version: Some(true),
            api_url: Some(server.base_url()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();

        let outcome = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap();
        assert_eq!(outcome.version.as_deref(), Some("1.2.3"));
        assert_eq!(outcome.deferred, None);
        assert_eq!(h.outputs.get("version"), Some("1.2.3"));
        assert_eq!(h.outputs.get("deployed-at"), Some("2026-02-03T04:05:06+00:00"));
        assert_eq!(h.outputs.get("commit-hash"), Some("cafe"));
        assert_eq!(h.outputs.get("var_REGION"), Some("us"));
        assert!(server.requests_to("/webhook/deploy").is_empty());
    }

    #[test]
    fn ledger_errors_are_fatal_and_verbatim() {
        let server = MockServer::start(|_| {
            Reply::json(403, r#"{"error":"token revoked","code":"FORBIDDEN"}"#)
        });
        let mut h = Harness::new();
        let inputs = Inputs {
            token: Some("t".into()),
            environment: Some("staging".into()),
            api_url: Some(server.base_url()),
            ..Inputs::default()
        };
        let mut reporter = CollectingReporter::default();

        let err = run_main(&inputs, &mut h.runtime(), &mut reporter).unwrap_err();
        assert_eq!(err.to_string(), "API error (FORBIDDEN): token revoked");
        assert_eq!(server.requests().len(), 1);
        assert!(h.outputs.get("version").is_none());
    }
}
