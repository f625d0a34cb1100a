use anyhow::{Context, Result};
use handoff_storage::{BlobChannel, BlobEntry};
use handoff_types::Session;

use crate::engine::Reporter;

/// Bundle the session is published under. There is only ever one.
pub const SESSION_BUNDLE: &str = "handoff-session";

/// File inside [`SESSION_BUNDLE`] holding the session JSON.
pub const SESSION_FILE: &str = "session.json";

/// Publishes and resumes the release-transaction context through the
/// run's bundle store.
pub struct SessionStore<'a> {
    blobs: &'a dyn BlobChannel,
}

impl<'a> SessionStore<'a> {
    pub fn new(blobs: &'a dyn BlobChannel) -> Self {
        Self { blobs }
    }

    /// Publish `session`. Publishing again replaces the previous session.
    pub fn publish(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_vec_pretty(session).context("failed to serialize session")?;
        self.blobs
            .put(SESSION_BUNDLE, &[BlobEntry::new(SESSION_FILE, json)])
            .with_context(|| format!("failed to publish session to {}", self.blobs.location()))
    }

    /// Look up the published session.
    ///
    /// Absence is not an error. An unreadable or unparsable session is
    /// reported as a warning and treated as absent.
    pub fn resume(&self, reporter: &mut dyn Reporter) -> Result<Option<Session>> {
        let names = self
            .blobs
            .list()
            .with_context(|| format!("failed to list bundles in {}", self.blobs.location()))?;
        if !names.iter().any(|n| n == SESSION_BUNDLE) {
            reporter.debug(&format!("no session bundle in {}", self.blobs.location()));
            return Ok(None);
        }

        let entries = match self.blobs.get(SESSION_BUNDLE) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                reporter.debug("session bundle disappeared before it could be read");
                return Ok(None);
            }
            Err(err) => {
                reporter.warn(&format!("failed to download session: {err:#}"));
                return Ok(None);
            }
        };

        let Some(entry) = entries.iter().find(|e| e.name == SESSION_FILE) else {
            reporter.warn(&format!("session bundle has no {SESSION_FILE}"));
            return Ok(None);
        };

        match serde_json::from_slice::<Session>(&entry.data) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                reporter.warn(&format!("failed to parse session: {err}"));
                Ok(None)
            }
        }
    }
}
