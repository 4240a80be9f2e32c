// ── Runtime connection configuration ──
//
// These types describe *how* to connect to a deCONZ gateway. They carry
// credential data and connection tuning, but never touch disk. The CLI
// constructs a `GatewayConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Lower bound for the discovery poll.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(3);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default; most gateways speak plain HTTP.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one gateway connection.
///
/// Built by the CLI, passed to [`Gateway`](crate::Gateway). Core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Hostname or IP address of the gateway.
    pub host: String,
    /// REST port.
    pub port: u16,
    /// WebSocket port. `None` uses the `websocketport` the gateway reports.
    pub ws_port: Option<u16>,
    /// Use `https` / `wss`.
    pub secure: bool,
    pub api_key: SecretString,
    pub tls: TlsVerification,
    /// REST request timeout.
    pub timeout: Duration,
    /// Forced discovery interval; clamped to at least 3s.
    pub polling_interval: Duration,
    /// Enable the push feed.
    pub websocket_enabled: bool,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_interval: Duration,
    /// Failed socket attempts before a warning is raised. `None` never warns.
    pub reconnect_max_retries: Option<u32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 80,
            ws_port: None,
            secure: false,
            api_key: SecretString::from(String::new()),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            polling_interval: Duration::from_secs(15),
            websocket_enabled: true,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(3),
            reconnect_interval: Duration::from_secs(10),
            reconnect_max_retries: None,
        }
    }
}

impl GatewayConfig {
    /// REST base URL, e.g. `http://192.168.1.20:80/`.
    pub fn base_url(&self) -> Result<Url, CoreError> {
        let scheme = if self.secure { "https" } else { "http" };
        let raw = format!("{scheme}://{}:{}/", self.host, self.port);
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid gateway address {raw:?}: {e}"),
        })
    }

    pub fn effective_polling_interval(&self) -> Duration {
        self.polling_interval.max(MIN_POLLING_INTERVAL)
    }
}
