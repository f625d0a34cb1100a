use handoff_config::Inputs;
use handoff_types::{BumpType, Environment};
use thiserror::Error;

/// Input validation failures. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    #[error("token is required")]
    TokenRequired,
    #[error("environment is required")]
    EnvironmentRequired,
    #[error("invalid environment '{0}' (expected one of: production, staging, development)")]
    InvalidEnvironment(String),
    #[error("invalid bump '{0}' (expected one of: major, minor, patch)")]
    InvalidBump(String),
}

/// What one invocation of the step does.
///
/// Each variant carries exactly what its mode needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No token: contribute an artifact bundle for a later job.
    Upload,
    /// Token only: resume the published session and commit it.
    Finalize,
    /// Read the currently deployed version.
    QueryVersion { environment: Environment },
    /// Compute the next version and publish a session for a later job.
    Init {
        environment: Environment,
        bump: BumpType,
    },
    /// Record the given version and release it right away.
    Explicit {
        environment: Environment,
        version: String,
    },
    /// Compute the next version now, record it in this job's post phase.
    SingleJob {
        environment: Environment,
        bump: BumpType,
    },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Upload => "upload",
            Mode::Finalize => "finalize",
            Mode::QueryVersion { .. } => "query-version",
            Mode::Init { .. } => "init",
            Mode::Explicit { .. } => "explicit",
            Mode::SingleJob { .. } => "single-job",
        }
    }

    /// Environment the mode operates on, when known without a session.
    pub fn environment(&self) -> Option<Environment> {
        match self {
            Mode::Upload | Mode::Finalize => None,
            Mode::QueryVersion { environment }
            | Mode::Init { environment, .. }
            | Mode::Explicit { environment, .. }
            | Mode::SingleJob { environment, .. } => Some(*environment),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Classify an invocation from which inputs are present.
///
/// Rules apply in order; the first match wins. Boolean flags count as
/// present only when set to `true`.
pub fn resolve_mode(inputs: &Inputs) -> Result<Mode, ModeError> {
    let token = given(&inputs.token);
    let environment = given(&inputs.environment);
    let version = given(&inputs.version);
    let dry_run = inputs.dry_run();
    let get_version = inputs.get_version();

    if token.is_none() {
        return match given(&inputs.artifacts) {
            Some(_) => Ok(Mode::Upload),
            None => Err(ModeError::TokenRequired),
        };
    }

    if environment.is_none() && version.is_none() && !dry_run && !get_version {
        return Ok(Mode::Finalize);
    }

    let environment = environment.ok_or(ModeError::EnvironmentRequired)?;
    let environment: Environment = environment
        .parse()
        .map_err(|_| ModeError::InvalidEnvironment(environment.to_string()))?;

    if get_version {
        return Ok(Mode::QueryVersion { environment });
    }

    if let Some(version) = version {
        return Ok(Mode::Explicit {
            environment,
            version: version.to_string(),
        });
    }

    let bump = match given(&inputs.bump) {
        None => BumpType::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| ModeError::InvalidBump(raw.to_string()))?,
    };

    if dry_run {
        Ok(Mode::Init { environment, bump })
    } else {
        Ok(Mode::SingleJob { environment, bump })
    }
}
