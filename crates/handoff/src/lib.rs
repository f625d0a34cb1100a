//! # Handoff
//!
//! Deployment version tracking and release automation for CI pipelines.
//!
//! Handoff runs as a CI step with a main phase and a post phase. It asks a
//! hosted deployment ledger for the next semantic version, commits the
//! deployment record, creates a matching GitHub release with build
//! artifacts attached and exposes per-environment configuration and
//! decrypted secrets to later steps.
//!
//! ## Features
//!
//! - **Mode resolution**: the combination of inputs selects one of six
//!   behaviors. See [`mode::resolve_mode`].
//! - **Cross-job handoff**: a version computed in one job is resumed and
//!   recorded in another through a shared blob store
//!   ([`session::SessionStore`]).
//! - **Artifact aggregation**: parallel jobs upload artifact bundles that a
//!   finalizing job collects and attaches to the release
//!   ([`artifacts::ArtifactAggregator`]).
//! - **Deferred work**: the main phase stores a [`cleanup::CleanupPlan`]
//!   that the post phase performs after the job's build steps.
//! - **Secret delivery**: secrets are sealed with RSA-OAEP + AES-256-GCM and
//!   decrypted and masked before they become step outputs
//!   ([`delivery::deliver_environment_config`]).
//!
//! ## Pipeline
//!
//! 1. [`engine::run_main`] resolves the [`mode::Mode`], queries the ledger
//!    and either finishes the work or defers it.
//! 2. [`engine::run_post`] takes the deferred plan, if any, and publishes
//!    the session or artifacts, or records the deployment and releases it.
//!
//! ## Example
//!
//! ```ignore
//! use handoff::engine::{self, CiContext, Runtime};
//! use handoff::config::Inputs;
//!
//! let inputs = Inputs {
//!     token: Some(token),
//!     environment: Some("production".into()),
//!     bump: Some("minor".into()),
//!     ..Inputs::default()
//! };
//! let mut rt = Runtime { /* stores, outputs, GitHub target */ };
//! let outcome = engine::run_main(&inputs, &mut rt, &mut reporter)?;
//! // ... build steps ...
//! engine::run_post(&inputs, &mut rt, &mut reporter)?;
//! ```
//!
//! ## Modules
//!
//! - [`mode`]: input classification
//! - [`engine`]: main and post phases
//! - [`session`]: cross-job session persistence
//! - [`artifacts`]: artifact discovery, upload and collection
//! - [`release`]: ledger recording and GitHub release creation
//! - [`delivery`]: configuration variables and secrets as outputs
//! - [`cleanup`]: work deferred from main to post
//!
//! ## Stability
//!
//! The library API is subject to change before v1.0.0.

/// Input classification into one of the six modes.
pub mod mode;

/// Main and post phases.
pub mod engine;

/// Cross-job session persistence on the blob channel.
pub mod session;

/// Artifact discovery, bundle upload and collection.
pub mod artifacts;

/// Ledger recording and GitHub release creation.
pub mod release;

/// Environment configuration and secret delivery.
pub mod delivery;

/// Work deferred from the main phase to the post phase.
pub mod cleanup;

/// Domain types shared with the ledger: sessions, records, previews.
/// Re-exported from handoff-types microcrate.
pub use handoff_types as types;

/// `.handoff.toml` loading and step inputs.
/// Re-exported from handoff-config microcrate.
pub use handoff_config as config;

/// Secret envelope decryption.
/// Re-exported from handoff-secrets microcrate.
pub use handoff_secrets as encryption;

/// Blob channel shared between jobs of one workflow run.
/// Re-exported from handoff-storage microcrate.
pub use handoff_storage as storage;

/// Run state shared between the phases of one job.
/// Re-exported from handoff-state microcrate.
pub use handoff_state as state;

/// Deployment ledger HTTP client.
/// Re-exported from handoff-ledger microcrate.
pub use handoff_ledger as ledger;

/// GitHub releases client.
/// Re-exported from handoff-github microcrate.
pub use handoff_github as github;

/// CI detection, workflow commands and step outputs.
/// Re-exported from handoff-environment microcrate.
pub use handoff_environment as environment;

/// Commit metadata lookups.
/// Re-exported from handoff-git microcrate.
pub use handoff_git as git;

#[cfg(test)]
mod test_support;
