use anyhow::{Context, Result};
use handoff_environment::OutputSink;
use handoff_ledger::LedgerClient;
use handoff_secrets::{PrivateKey, decrypt_secret};
use handoff_types::{Environment, EnvironmentConfig};

use crate::engine::Reporter;

/// Output name for a configuration variable.
pub fn variable_output(name: &str) -> String {
    format!("var_{name}")
}

/// Output name for a decrypted secret.
pub fn secret_output(name: &str) -> String {
    format!("secret_{name}")
}

/// Fetch the environment's configuration and expose it as step outputs.
///
/// Secrets are decrypted with `secret_key` and masked before they are set.
/// Without a key they are skipped with a warning; a secret that fails to
/// decrypt fails the run and is never exposed.
pub fn deliver_environment_config(
    ledger: &LedgerClient,
    environment: Environment,
    secret_key: Option<&str>,
    outputs: &mut dyn OutputSink,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let config = ledger
        .fetch_environment_config(environment)
        .with_context(|| format!("failed to fetch {environment} configuration"))?;
    apply_environment_config(&config, secret_key, outputs, reporter)
}

/// Set outputs for an already fetched configuration.
pub fn apply_environment_config(
    config: &EnvironmentConfig,
    secret_key: Option<&str>,
    outputs: &mut dyn OutputSink,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    for (name, value) in &config.variables {
        outputs.set_output(&variable_output(name), value)?;
    }
    if !config.variables.is_empty() {
        reporter.info(&format!(
            "exported {} configuration variable(s)",
            config.variables.len()
        ));
    }

    if config.secrets.is_empty() {
        return Ok(());
    }
    let Some(secret_key) = secret_key else {
        reporter.warn(&format!(
            "secret-key not provided; skipping {} secret(s)",
            config.secrets.len()
        ));
        return Ok(());
    };

    outputs.mask(secret_key)?;
    let key = PrivateKey::from_pem(secret_key).context("invalid secret-key")?;
    for (name, secret) in &config.secrets {
        let plaintext = decrypt_secret(secret, &key)
            .with_context(|| format!("failed to decrypt secret {name}"))?;
        outputs.mask(&plaintext)?;
        outputs.set_output(&secret_output(name), &plaintext)?;
    }
    reporter.info(&format!("exported {} secret(s)", config.secrets.len()));
    Ok(())
}
