use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use handoff::config::{Inputs, find_config, load_config_from_file, parse_bool_input};
use handoff::engine::{self, CiContext, Reporter, Runtime};
use handoff::environment::{
    ActionsOutputs, ConsoleOutputs, GithubContext, OutputSink, detect_environment,
};
use handoff::release::GithubTarget;
use handoff::state::build_run_state;
use handoff::storage::{StorageConfig, build_blob_store};

mod reporter;

use reporter::{Style, WorkflowReporter};

#[derive(Parser, Debug)]
#[command(name = "handoff", version)]
#[command(about = "Deployment versioning, cross-job release hand-off and secret delivery for CI")]
struct Cli {
    /// Print debug messages outside GitHub Actions.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the mode and run its main-step work.
    Main(InputArgs),
    /// Run the work the main step deferred to the end of the job.
    Post(InputArgs),
}

/// Step inputs. Each also reads the runner's `INPUT_<NAME>` variable.
#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Ledger API token. Without it only artifact upload is possible.
    #[arg(long, env = "INPUT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// PEM private key used to decrypt environment secrets.
    #[arg(long, env = "INPUT_SECRET-KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// production, staging or development.
    #[arg(long, env = "INPUT_ENVIRONMENT")]
    environment: Option<String>,

    /// Record exactly this version.
    #[arg(long, env = "INPUT_VERSION")]
    version: Option<String>,

    /// major, minor or patch (default patch).
    #[arg(long, env = "INPUT_BUMP")]
    bump: Option<String>,

    /// Compute the next version and hand it to a later job.
    #[arg(long, env = "INPUT_DRY-RUN", num_args = 0..=1, default_missing_value = "true")]
    dry_run: Option<String>,

    /// Report the currently deployed version.
    #[arg(long, env = "INPUT_GET-VERSION", num_args = 0..=1, default_missing_value = "true")]
    get_version: Option<String>,

    #[arg(long, env = "INPUT_SKIP-GITHUB-RELEASE", num_args = 0..=1, default_missing_value = "true")]
    skip_github_release: Option<String>,

    /// Tag prefix: `<prefix>-v<version>`.
    #[arg(long, env = "INPUT_RELEASE-PREFIX")]
    release_prefix: Option<String>,

    /// Token for the GitHub releases API (default `GITHUB_TOKEN`).
    #[arg(long, env = "INPUT_GITHUB-TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Release notes. When empty, GitHub generates them.
    #[arg(long, env = "INPUT_BODY")]
    body: Option<String>,

    /// File holding the release notes, read when `body` is empty.
    #[arg(long, env = "INPUT_BODY-FILE")]
    body_file: Option<String>,

    #[arg(long, env = "INPUT_DRAFT", num_args = 0..=1, default_missing_value = "true")]
    draft: Option<String>,

    #[arg(long, env = "INPUT_PRERELEASE", num_args = 0..=1, default_missing_value = "true")]
    prerelease: Option<String>,

    /// Newline-separated glob patterns of files to release.
    #[arg(long, env = "INPUT_ARTIFACTS")]
    artifacts: Option<String>,

    #[arg(long, env = "INPUT_COMMIT-HASH")]
    commit_hash: Option<String>,

    #[arg(long, env = "INPUT_COMMIT-MESSAGE")]
    commit_message: Option<String>,

    #[arg(long, env = "INPUT_DEPLOYED-BY")]
    deployed_by: Option<String>,

    /// Ledger base URL.
    #[arg(long, env = "INPUT_API-URL")]
    api_url: Option<String>,
}

fn flag(name: &str, value: Option<String>) -> Result<Option<bool>> {
    match value {
        Some(v) => parse_bool_input(name, &v),
        None => Ok(None),
    }
}

impl InputArgs {
    fn into_inputs(self) -> Result<Inputs> {
        Ok(Inputs {
            dry_run: flag("dry-run", self.dry_run)?,
            get_version: flag("get-version", self.get_version)?,
            skip_github_release: flag("skip-github-release", self.skip_github_release)?,
            draft: flag("draft", self.draft)?,
            prerelease: flag("prerelease", self.prerelease)?,
            token: self.token,
            secret_key: self.secret_key,
            environment: self.environment,
            version: self.version,
            bump: self.bump,
            release_prefix: self.release_prefix,
            github_token: self.github_token,
            body: self.body,
            body_file: self.body_file.map(PathBuf::from),
            artifacts: self.artifacts,
            commit_hash: self.commit_hash,
            commit_message: self.commit_message,
            deployed_by: self.deployed_by,
            api_url: self.api_url,
        }
        .normalized())
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Main,
    Post,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let ci = detect_environment();
    let mut reporter = WorkflowReporter::for_style(Style::for_environment(ci), cli.verbose);
    reporter.debug(&format!("CI environment: {ci}"));

    let (phase, args) = match cli.cmd {
        Commands::Main(args) => (Phase::Main, args),
        Commands::Post(args) => (Phase::Post, args),
    };

    match run(phase, args, &mut reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            reporter.error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(phase: Phase, args: InputArgs, reporter: &mut dyn Reporter) -> Result<()> {
    let workdir = std::env::current_dir().context("failed to determine working directory")?;
    let config = match find_config(&workdir) {
        Some(path) => {
            reporter.debug(&format!("using config {}", path.display()));
            load_config_from_file(&path)?
        }
        None => Default::default(),
    };
    let inputs = args.into_inputs()?.with_config(&config);

    let context = GithubContext::from_env();
    let storage = StorageConfig {
        dir: config.storage_dir().map(Path::to_path_buf),
    };
    let blobs = build_blob_store(&storage);
    let mut state = build_run_state();
    let mut outputs: Box<dyn OutputSink> = match &context.output_file {
        Some(path) => Box::new(ActionsOutputs::new(path.clone())),
        None => Box::new(ConsoleOutputs::stdout()),
    };
    reporter.debug(&format!(
        "bundles: {}, run state: {}",
        blobs.location(),
        state.location()
    ));

    let mut rt = Runtime {
        blobs: blobs.as_ref(),
        state: state.as_mut(),
        outputs: outputs.as_mut(),
        github: GithubTarget {
            api_url: context.api_url,
            repository: context.repository,
            token: context.token,
        },
        ci: CiContext {
            sha: context.sha,
            actor: context.actor,
        },
        workdir,
        download_dir: engine::resolve_download_dir(),
    };

    match phase {
        Phase::Main => {
            let outcome = engine::run_main(&inputs, &mut rt, reporter)?;
            match (&outcome.version, &outcome.deferred) {
                (Some(version), Some(plan)) => reporter.info(&format!(
                    "{} resolved {version}; post step will {}",
                    outcome.mode,
                    plan.describe()
                )),
                (Some(version), None) => {
                    reporter.info(&format!("{} finished at {version}", outcome.mode))
                }
                (None, Some(plan)) => reporter.info(&format!(
                    "{}: post step will {}",
                    outcome.mode,
                    plan.describe()
                )),
                (None, None) => reporter.info(&format!("{} finished", outcome.mode)),
            }
        }
        Phase::Post => {
            let outcome = engine::run_post(&inputs, &mut rt, reporter)?;
            if let Some(release) = &outcome.release {
                reporter.info(&format!("release {}: {}", release.tag_name, release.html_url));
            }
        }
    }
    Ok(())
}
