use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use handoff_storage::{BlobChannel, BlobEntry};

use crate::engine::Reporter;

/// Prefix shared by every artifact bundle; each upload appends a unique suffix.
pub const ARTIFACT_PREFIX: &str = "handoff-artifacts-";

/// Fresh collision-free bundle name.
pub fn artifact_bundle_name() -> String {
    format!("{ARTIFACT_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// Expand each glob pattern independently.
///
/// A pattern that matches nothing (or is not a valid glob) is a warning.
/// The result keeps pattern order and is not deduplicated. Directories are
/// skipped.
pub fn collect_local(patterns: &[String], reporter: &mut dyn Reporter) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(err) => {
                reporter.warn(&format!("invalid artifact pattern '{pattern}': {err}"));
                continue;
            }
        };

        let mut matched = 0usize;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    files.push(path);
                    matched += 1;
                }
                Ok(_) => {}
                Err(err) => reporter.warn(&format!("cannot read match of '{pattern}': {err}")),
            }
        }

        if matched == 0 {
            reporter.warn(&format!("no files matched artifact pattern '{pattern}'"));
        } else {
            reporter.debug(&format!("'{pattern}' matched {matched} file(s)"));
        }
    }
    files
}

/// Uploads and gathers artifact bundles contributed by the jobs of a run.
pub struct ArtifactAggregator<'a> {
    blobs: &'a dyn BlobChannel,
    download_dir: PathBuf,
}

impl<'a> ArtifactAggregator<'a> {
    pub fn new(blobs: &'a dyn BlobChannel, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            blobs,
            download_dir: download_dir.into(),
        }
    }

    /// Upload `files` as a new bundle and return its name.
    ///
    /// Nothing is uploaded for an empty list. Entries are named by basename;
    /// when two files share one the later wins.
    pub fn publish(&self, files: &[PathBuf], reporter: &mut dyn Reporter) -> Result<Option<String>> {
        if files.is_empty() {
            reporter.warn("no artifact files to upload");
            return Ok(None);
        }

        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let name = basename(path)?;
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read artifact {}", path.display()))?;
            entries.push(BlobEntry::new(name, data));
        }

        let bundle = artifact_bundle_name();
        self.blobs
            .put(&bundle, &entries)
            .with_context(|| format!("failed to upload artifact bundle {bundle}"))?;
        reporter.info(&format!(
            "uploaded {} artifact(s) as {bundle} to {}",
            entries.len(),
            self.blobs.location()
        ));
        Ok(Some(bundle))
    }

    /// Download every artifact bundle of the run and return the files.
    ///
    /// Each bundle lands in its own directory under the download dir.
    /// Bundles that cannot be fetched are skipped with a warning.
    pub fn collect_remote(&self, reporter: &mut dyn Reporter) -> Result<Vec<PathBuf>> {
        let bundles = self
            .blobs
            .list_prefixed(ARTIFACT_PREFIX)
            .with_context(|| format!("failed to list bundles in {}", self.blobs.location()))?;
        if bundles.is_empty() {
            reporter.debug("no artifact bundles to collect");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for bundle in &bundles {
            let entries = match self.blobs.get(bundle) {
                Ok(Some(entries)) => entries,
                Ok(None) => {
                    reporter.warn(&format!("artifact bundle {bundle} is missing; skipping"));
                    continue;
                }
                Err(err) => {
                    reporter.warn(&format!("failed to download {bundle}: {err:#}"));
                    continue;
                }
            };

            match self.write_bundle(bundle, &entries) {
                Ok(mut written) => files.append(&mut written),
                Err(err) => reporter.warn(&format!("failed to unpack {bundle}: {err:#}")),
            }
        }

        reporter.info(&format!(
            "collected {} file(s) from {} artifact bundle(s)",
            files.len(),
            bundles.len()
        ));
        Ok(files)
    }

    fn write_bundle(&self, bundle: &str, entries: &[BlobEntry]) -> Result<Vec<PathBuf>> {
        let dir = self.download_dir.join(bundle);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = dir.join(&entry.name);
            std::fs::write(&path, &entry.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}

fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("artifact has no usable file name: {}", path.display()))
}
