//! Commit metadata for handoff.
//!
//! A recorded release carries the commit it was built from. When the job
//! does not pass `commit-hash` / `commit-message` explicitly they are read
//! from the CI context or the local checkout. Lookup failures are not
//! errors for the caller: the field is simply left empty.
//!
//! # Example
//!
//! ```
//! use handoff_git::resolve_commit;
//! use std::path::Path;
//!
//! let commit = resolve_commit(Path::new("."), None, None, Some("abc123"));
//! assert_eq!(commit.hash.as_deref(), Some("abc123"));
//! ```

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Commit attached to a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: Option<String>,
    /// Subject line of the commit message
    pub message: Option<String>,
}

fn run_git(path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the current git commit hash
pub fn get_commit_hash(path: &Path) -> Result<String> {
    run_git(path, &["rev-parse", "HEAD"])
}

/// Get the subject line of the HEAD commit
pub fn get_commit_subject(path: &Path) -> Result<String> {
    run_git(path, &["log", "-1", "--format=%s"])
}

fn provided(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fill in commit metadata.
///
/// The hash comes from `explicit_hash`, then `ci_sha` (e.g. `GITHUB_SHA`),
/// then `git rev-parse HEAD`. The message comes from `explicit_message`,
/// then the subject of HEAD.
pub fn resolve_commit(
    path: &Path,
    explicit_hash: Option<&str>,
    explicit_message: Option<&str>,
    ci_sha: Option<&str>,
) -> CommitInfo {
    let hash = provided(explicit_hash)
        .or_else(|| provided(ci_sha))
        .or_else(|| get_commit_hash(path).ok().filter(|h| !h.is_empty()));
    let message = provided(explicit_message)
        .or_else(|| get_commit_subject(path).ok().filter(|m| !m.is_empty()));
    CommitInfo { hash, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_git_repo(dir: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .expect("git setup");
        }
    }

    fn make_commit(dir: &Path, msg: &str) {
        Command::new("git")
            .args(["commit", "--allow-empty", "-m", msg])
            .current_dir(dir)
            .output()
            .expect("git commit");
    }

    #[test]
    fn reads_hash_and_subject_of_head() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "Ship the widget\n\nLonger body");

        let hash = get_commit_hash(td.path()).expect("hash");
        assert_eq!(hash.len(), 40);
        assert_eq!(get_commit_subject(td.path()).unwrap(), "Ship the widget");
    }

    #[test]
    fn explicit_values_win() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "from git");

        let info = resolve_commit(td.path(), Some("feedface"), Some("manual"), Some("cafebabe"));
        assert_eq!(info.hash.as_deref(), Some("feedface"));
        assert_eq!(info.message.as_deref(), Some("manual"));
    }

    #[test]
    fn ci_sha_wins_over_checkout() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "from git");

        let info = resolve_commit(td.path(), Some("  "), None, Some("cafebabe"));
        assert_eq!(info.hash.as_deref(), Some("cafebabe"));
        assert_eq!(info.message.as_deref(), Some("from git"));
    }

    #[test]
    fn falls_back_to_checkout() {
        let td = tempdir().expect("tempdir");
        init_git_repo(td.path());
        make_commit(td.path(), "only commit");

        let info = resolve_commit(td.path(), None, None, None);
        assert_eq!(info.hash, get_commit_hash(td.path()).ok());
        assert_eq!(info.message.as_deref(), Some("only commit"));
    }

    #[test]
    fn outside_a_repo_fields_stay_empty() {
        let td = tempdir().expect("tempdir");
        let info = resolve_commit(td.path(), None, None, None);
        assert_eq!(info, CommitInfo::default());
        assert!(get_commit_hash(td.path()).is_err());
    }
}
