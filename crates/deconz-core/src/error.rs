// ── Core error types ──
//
// User-facing errors from deconz-core. Consumers never see HTTP status codes
// or JSON parse failures directly; `From<deconz_api::Error>` translates
// transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to gateway at {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Gateway disconnected")]
    GatewayDisconnected,

    #[error("Gateway request timed out")]
    Timeout,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Discovery failed: {reason}")]
    DiscoveryFailed { reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap an API error raised during discovery.
    ///
    /// Authentication stays distinct so callers can tell a bad key from a
    /// flaky network; everything else becomes `DiscoveryFailed`.
    pub(crate) fn discovery(err: deconz_api::Error) -> Self {
        if err.is_unauthorized() {
            return Self::from(err);
        }
        Self::DiscoveryFailed {
            reason: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<deconz_api::Error> for CoreError {
    fn from(err: deconz_api::Error) -> Self {
        match err {
            deconz_api::Error::Unauthorized { message } => {
                CoreError::AuthenticationFailed { message }
            }
            deconz_api::Error::Transport(e) => {
                // The request URL carries the API key; keep the host only.
                let host = e
                    .url()
                    .and_then(|u| u.host_str().map(String::from))
                    .unwrap_or_else(|| "gateway".into());
                let e = e.without_url();
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        host,
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            deconz_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid gateway URL: {e}"),
            },
            deconz_api::Error::Tls(message) => CoreError::ConnectionFailed {
                host: "<tls>".into(),
                reason: message,
            },
            deconz_api::Error::Gateway { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            deconz_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                host: "<websocket>".into(),
                reason,
            },
            deconz_api::Error::WebSocketClosed { .. } | deconz_api::Error::HeartbeatTimeout { .. } => {
                CoreError::GatewayDisconnected
            }
            deconz_api::Error::Deserialization { message, .. } => CoreError::Api {
                message: format!("malformed gateway response: {message}"),
                status: None,
            },
        }
    }
}
