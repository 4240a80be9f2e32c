//! CLI configuration: thin wrapper around `deconz_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--host, --port, --api-key, ...).

use std::time::Duration;

use secrecy::SecretString;

use deconz_core::{GatewayConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use deconz_config::{Config, Profile, config_path, load_config, load_config_or_default};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `GatewayConfig` from the config file, the active profile, and
/// CLI overrides. Flags win over profile values.
pub fn resolve_gateway_config(global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        let api_key = match global.api_key {
            Some(ref key) => SecretString::from(key.clone()),
            None => deconz_config::resolve_api_key(profile, &profile_name)?,
        };
        let base = deconz_config::build_gateway_config(profile, &cfg.defaults, api_key)?;
        return apply_overrides(base, global);
    }

    // An explicitly named profile that does not exist is an error, not a
    // silent fallback to flags.
    if global.profile.is_some() && !cfg.profiles.is_empty() {
        let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
        names.sort();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: names.join(", "),
        });
    }

    // No profile: build from flags / env alone.
    let host = global.host.clone().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let api_key = global
        .api_key
        .clone()
        .map(SecretString::from)
        .ok_or(CliError::NoCredentials {
            profile: profile_name,
        })?;

    let base = GatewayConfig {
        host,
        api_key,
        timeout: Duration::from_secs(cfg.defaults.timeout),
        polling_interval: Duration::from_secs(cfg.defaults.polling_interval),
        ..GatewayConfig::default()
    };
    apply_overrides(base, global)
}

fn apply_overrides(
    mut config: GatewayConfig,
    global: &GlobalOpts,
) -> Result<GatewayConfig, CliError> {
    if let Some(ref host) = global.host {
        let host = host.trim();
        if host.is_empty() {
            return Err(CliError::Validation {
                field: "host".into(),
                reason: "must not be empty".into(),
            });
        }
        host.clone_into(&mut config.host);
    }
    for (field, port) in [("port", global.port), ("ws-port", global.ws_port)] {
        if port == Some(0) {
            return Err(CliError::Validation {
                field: field.into(),
                reason: "must be between 1 and 65535".into(),
            });
        }
    }
    if let Some(port) = global.port {
        config.port = port;
    }
    if global.ws_port.is_some() {
        config.ws_port = global.ws_port;
    }
    if global.secure {
        config.secure = true;
    }
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    Ok(config)
}
