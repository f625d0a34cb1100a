use anyhow::Result;
use handoff_state::{RunStateChannel, load_json, save_json};
use handoff_types::Session;
use serde::{Deserialize, Serialize};

/// Run-state key the plan is stored under.
pub const CLEANUP_KEY: &str = "handoff_cleanup";

/// Work the main phase defers to the post phase of the same job.
///
/// Credentials are not part of the plan; the post phase reads them from
/// its own inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupPlan {
    /// Upload locally built files as a new artifact bundle.
    UploadArtifacts { patterns: Vec<String> },
    /// Publish the session for a later job, plus this job's artifacts.
    PublishSession {
        session: Session,
        patterns: Vec<String>,
    },
    /// Record `session` to the ledger and create its release.
    ///
    /// With `collect_remote`, bundles uploaded by other jobs are released
    /// alongside local files.
    RecordAndRelease {
        session: Session,
        patterns: Vec<String>,
        collect_remote: bool,
    },
}

impl CleanupPlan {
    pub fn describe(&self) -> &'static str {
        match self {
            CleanupPlan::UploadArtifacts { .. } => "upload artifacts",
            CleanupPlan::PublishSession { .. } => "publish session",
            CleanupPlan::RecordAndRelease { .. } => "record and release",
        }
    }
}

/// Store the plan for the post phase, replacing any earlier one.
pub fn store_plan(state: &mut dyn RunStateChannel, plan: &CleanupPlan) -> Result<()> {
    save_json(state, CLEANUP_KEY, plan)
}

/// Read the plan and clear it so it runs at most once.
pub fn take_plan(state: &mut dyn RunStateChannel) -> Result<Option<CleanupPlan>> {
    let plan = load_json(&*state, CLEANUP_KEY)?;
    if plan.is_some() {
        state.remove(CLEANUP_KEY)?;
    }
    Ok(plan)
}
