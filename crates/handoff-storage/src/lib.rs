//! Bundle storage shared by the jobs of one workflow run.
//!
//! Jobs in a release transaction share no memory or filesystem with each
//! other; the only thing they share is a run-scoped blob store. This crate
//! provides the [`BlobChannel`] trait over that store and two
//! implementations: [`FileBlobStore`], a directory per bundle, and
//! [`MemoryBlobStore`] for tests and single-process use.
//!
//! # Example
//!
//! ```
//! use handoff_storage::{BlobChannel, BlobEntry, MemoryBlobStore};
//!
//! let store = MemoryBlobStore::new();
//! store.put("handoff-session", &[BlobEntry::new("session.json", b"{}".to_vec())]).expect("put");
//!
//! assert_eq!(store.list().expect("list"), vec!["handoff-session".to_string()]);
//! let entries = store.get("handoff-session").expect("get").expect("present");
//! assert_eq!(entries[0].data, b"{}");
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Environment variable naming the bundle store directory
pub const BLOB_DIR_ENV: &str = "HANDOFF_BLOB_DIR";

/// Default bundle store directory, relative to the working directory
pub const DEFAULT_BLOB_DIR: &str = ".handoff/blobs";

/// One file inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// File name inside the bundle (a basename, never a path)
    pub name: String,
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Named put/list/get of opaque file bundles visible to later jobs.
///
/// Putting a bundle under an existing name replaces it: readers see the most
/// recently registered bundle of that name.
pub trait BlobChannel: Send + Sync {
    /// Store `entries` as the bundle `name`
    fn put(&self, name: &str, entries: &[BlobEntry]) -> Result<()>;

    /// Names of all bundles currently stored
    fn list(&self) -> Result<Vec<String>>;

    /// Fetch a bundle, or `None` when no bundle has that name
    fn get(&self, name: &str) -> Result<Option<Vec<BlobEntry>>>;

    /// Human-readable location for log messages
    fn location(&self) -> String;

    /// Names of all bundles starting with `prefix`
    fn list_prefixed(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }
}

/// Reject names that would escape the store or collide with staging dirs.
pub fn validate_bundle_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("bundle name must not be empty");
    }
    if name.starts_with('.') {
        bail!("bundle name must not start with '.': {name}");
    }
    if name.contains(['/', '\\']) {
        bail!("bundle name must not contain path separators: {name}");
    }
    Ok(())
}

fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("bundle entry must be a plain file name: {name:?}");
    }
    Ok(())
}

/// Bundle store configuration (the `[storage]` table of `.handoff.toml`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Resolve the store directory: `HANDOFF_BLOB_DIR`, then this config,
    /// then [`DEFAULT_BLOB_DIR`].
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os(BLOB_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        self.dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_DIR))
    }
}

/// Build the bundle store described by `config`.
pub fn build_blob_store(config: &StorageConfig) -> Box<dyn BlobChannel> {
    Box::new(FileBlobStore::new(config.resolve_dir()))
}

/// Filesystem-backed bundle store: `<root>/<bundle>/<entry>`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bundle_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)
                .with_context(|| format!("failed to create directory: {}", self.root.display()))?;
        }
        Ok(())
    }
}

impl BlobChannel for FileBlobStore {
    fn put(&self, name: &str, entries: &[BlobEntry]) -> Result<()> {
        validate_bundle_name(name)?;
        for entry in entries {
            validate_entry_name(&entry.name)?;
        }
        self.ensure_root()?;

        // Stage the whole bundle, then swap it in with a rename.
        let staging = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create directory: {}", staging.display()))?;
        for entry in entries {
            let path = staging.join(&entry.name);
            std::fs::write(&path, &entry.data)
                .with_context(|| format!("failed to write file: {}", path.display()))?;
        }

        let target = self.bundle_dir(name);
        if target.exists() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("failed to replace bundle: {}", target.display()))?;
        }
        std::fs::rename(&staging, &target)
            .with_context(|| format!("failed to rename bundle to: {}", target.display()))?;

        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let dir = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to read directory: {}", self.root.display()))?;
        for entry in dir {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, name: &str) -> Result<Option<Vec<BlobEntry>>> {
        validate_bundle_name(name)?;
        let dir = self.bundle_dir(name);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut entries = Vec::new();
        let listing = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read bundle: {}", dir.display()))?;
        for file in listing {
            let file = file?;
            if !file.file_type()?.is_file() {
                continue;
            }
            let path = file.path();
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read file: {}", path.display()))?;
            entries.push(BlobEntry::new(
                file.file_name().to_string_lossy().into_owned(),
                data,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

/// In-process bundle store. Clones share the same bundles.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    bundles: Arc<Mutex<BTreeMap<String, Vec<BlobEntry>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<BlobEntry>>>> {
        self.bundles
            .lock()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))
    }
}

impl BlobChannel for MemoryBlobStore {
    fn put(&self, name: &str, entries: &[BlobEntry]) -> Result<()> {
        validate_bundle_name(name)?;
        for entry in entries {
            validate_entry_name(&entry.name)?;
        }
        self.lock()?.insert(name.to_string(), entries.to_vec());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<BlobEntry>>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
