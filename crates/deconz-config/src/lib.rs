//! Shared configuration for deconz-bridge.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `deconz_core::GatewayConfig`. The CLI layers its
//! flag overrides on top of what this crate resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use deconz_core::{GatewayConfig, TlsVerification};

/// Keyring service name; entries are keyed `<profile>/api-key`.
pub const KEYRING_SERVICE: &str = "deconz";

/// Environment prefix for config overrides, e.g. `DECONZ_DEFAULTS__OUTPUT`.
pub const ENV_PREFIX: &str = "DECONZ_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("no API key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named gateway profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.into() })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// REST timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Discovery poll interval in seconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            polling_interval: default_polling_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_polling_interval() -> u64 {
    15
}

/// A named gateway profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Gateway hostname or IP address.
    pub host: String,

    /// REST port (default 80).
    pub port: Option<u16>,

    /// WebSocket port. Unset: use the port the gateway reports.
    pub ws_port: Option<u16>,

    /// Use https / wss.
    #[serde(default)]
    pub secure: bool,

    /// API key (plaintext; prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    pub insecure: Option<bool>,

    /// Override REST timeout (seconds).
    pub timeout: Option<u64>,

    /// Override discovery poll interval (seconds, at least 3).
    pub polling_interval: Option<u64>,

    /// Enable the push feed (default true).
    pub websocket: Option<bool>,

    /// Heartbeat ping interval (seconds).
    pub heartbeat_interval: Option<u64>,

    /// Pong deadline (seconds).
    pub heartbeat_timeout: Option<u64>,

    /// Delay between reconnect attempts (seconds).
    pub reconnect_interval: Option<u64>,

    /// Failed attempts before a warning. Reconnects continue regardless.
    pub max_retries: Option<u32>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "deconz-bridge", "deconz").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("deconz");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve an API key from the credential chain (no CLI flag step).
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's api_key_env → env var lookup
    if let Some(ref env_name) = profile.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store an API key in the system keyring for `profile_name`.
pub fn store_api_key(profile_name: &str, key: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/api-key"))
        .and_then(|entry| entry.set_password(key))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation to core config ──────────────────────────────────────

/// TLS choice for a profile. `insecure` wins over a CA file.
pub fn tls_for(profile: &Profile, insecure_flag: bool) -> TlsVerification {
    if insecure_flag || profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    }
}

/// Build a `GatewayConfig` from a profile and the global defaults, with an
/// already-resolved API key. No CLI flag overrides.
pub fn build_gateway_config(
    profile: &Profile,
    defaults: &Defaults,
    api_key: SecretString,
) -> Result<GatewayConfig, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    if profile.port == Some(0) || profile.ws_port == Some(0) {
        return Err(ConfigError::Validation {
            field: "port".into(),
            reason: "must be between 1 and 65535".into(),
        });
    }

    let base = GatewayConfig::default();
    let secs = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_secs);

    Ok(GatewayConfig {
        host: host.to_owned(),
        port: profile.port.unwrap_or(base.port),
        ws_port: profile.ws_port,
        secure: profile.secure,
        api_key,
        tls: tls_for(profile, false),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        polling_interval: Duration::from_secs(
            profile.polling_interval.unwrap_or(defaults.polling_interval),
        ),
        websocket_enabled: profile.websocket.unwrap_or(base.websocket_enabled),
        heartbeat_interval: secs(profile.heartbeat_interval, base.heartbeat_interval),
        heartbeat_timeout: secs(profile.heartbeat_timeout, base.heartbeat_timeout),
        reconnect_interval: secs(profile.reconnect_interval, base.reconnect_interval),
        reconnect_max_retries: profile.max_retries,
    })
}

/// Build a `GatewayConfig` for a named profile, resolving its API key.
pub fn profile_to_gateway_config(
    config: &Config,
    profile_name: &str,
) -> Result<GatewayConfig, ConfigError> {
    let profile = config.profile(profile_name)?;
    let api_key = resolve_api_key(profile, profile_name)?;
    build_gateway_config(profile, &config.defaults, api_key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn profile(host: &str) -> Profile {
        Profile {
            host: host.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn profile_defaults_flow_into_gateway_config() {
        let cfg =
            build_gateway_config(&profile("10.0.0.2"), &Defaults::default(), "k".into()).unwrap();
        assert_eq!(cfg.host, "10.0.0.2");
        assert_eq!(cfg.port, 80);
        assert_eq!(cfg.ws_port, None);
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.polling_interval, Duration::from_secs(15));
        assert!(cfg.websocket_enabled);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(cfg.reconnect_max_retries, None);
        assert_eq!(cfg.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn profile_overrides_win_over_defaults() {
        let p = Profile {
            port: Some(8080),
            ws_port: Some(443),
            timeout: Some(4),
            polling_interval: Some(30),
            websocket: Some(false),
            max_retries: Some(5),
            ..profile("gw.local")
        };
        let cfg = build_gateway_config(&p, &Defaults::default(), "k".into()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.ws_port, Some(443));
        assert_eq!(cfg.timeout, Duration::from_secs(4));
        assert_eq!(cfg.polling_interval, Duration::from_secs(30));
        assert!(!cfg.websocket_enabled);
        assert_eq!(cfg.reconnect_max_retries, Some(5));
    }

    #[test]
    fn empty_host_is_rejected() {
        let err = build_gateway_config(&profile("  "), &Defaults::default(), "k".into())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "host"));
    }

    #[test]
    fn zero_port_is_rejected() {
        let p = Profile {
            port: Some(0),
            ..profile("gw")
        };
        assert!(build_gateway_config(&p, &Defaults::default(), "k".into()).is_err());
    }

    #[test]
    fn insecure_beats_ca_file() {
        let p = Profile {
            insecure: Some(true),
            ca_cert: Some("/etc/ca.pem".into()),
            ..profile("gw")
        };
        assert_eq!(tls_for(&p, false), TlsVerification::DangerAcceptInvalid);

        let p = Profile {
            ca_cert: Some("/etc/ca.pem".into()),
            ..profile("gw")
        };
        assert_eq!(tls_for(&p, false), TlsVerification::CustomCa("/etc/ca.pem".into()));
        assert_eq!(tls_for(&p, true), TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn api_key_env_is_read() {
        // Cargo sets this for every test process.
        let p = Profile {
            api_key_env: Some("CARGO_MANIFEST_DIR".into()),
            api_key: Some("plaintext".into()),
            ..profile("gw")
        };
        let key = resolve_api_key(&p, "env-test").unwrap();
        assert_eq!(key.expose_secret(), env!("CARGO_MANIFEST_DIR"));
    }

    #[test]
    fn missing_key_is_no_credentials() {
        let p = Profile {
            api_key_env: Some("DECONZ_TEST_SURELY_UNSET_VARIABLE".into()),
            ..profile("gw")
        };
        let err = resolve_api_key(&p, "no-such-profile-for-tests").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
    }

    #[test]
    fn unknown_profile_is_reported() {
        let err = profile_to_gateway_config(&Config::default(), "attic").unwrap_err();
        assert!(matches!(err, ConfigError::ProfileNotFound { ref name } if name == "attic"));
    }
}
