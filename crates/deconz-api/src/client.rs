// Gateway REST client
//
// Wraps `reqwest::Client` with the gateway's key-scoped URL layout and its
// two response shapes: plain JSON objects for reads and the
// `[{"success": ...}, {"error": ...}]` array for writes.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{FullState, WriteResult};
use crate::transport::TransportConfig;

/// Gateway error type `1` means "unauthorized user".
const GATEWAY_ERROR_UNAUTHORIZED: u32 = 1;

/// Raw HTTP client for the gateway REST API.
///
/// Every path is scoped under `/api/{apikey}/`. The key never appears in
/// logs; URLs are logged with the key elided.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl GatewayClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the gateway root, e.g. `http://192.168.1.20:80/`.
    pub fn new(
        base_url: Url,
        api_key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, api_key))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, api_key: SecretString) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// The gateway base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/api/{apikey}/{path}`. An empty `path` yields the
    /// full-state endpoint.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let key = self.api_key.expose_secret();
        let suffix = if path.is_empty() {
            format!("api/{key}")
        } else {
            format!("api/{key}/{}", path.trim_start_matches('/'))
        };
        Ok(self.base_url.join(&suffix)?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the complete gateway state: config, lights, sensors, groups.
    pub async fn full_state(&self) -> Result<FullState, Error> {
        debug!(base = %self.base_url, "GET /api/<key>");
        let resp = self
            .http
            .get(self.api_url("")?)
            .send()
            .await
            .map_err(|e| Error::Transport(e.without_url()))?;
        parse_object(resp).await
    }

    /// Write to a resource, e.g. `lights/3/state` or `groups/1/action`.
    ///
    /// Returns the `success` entries. Any `error` entry in the response
    /// array fails the whole call.
    pub async fn put_resource(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<Vec<Value>, Error> {
        debug!(base = %self.base_url, path, "PUT /api/<key>/{path}");
        let resp = self
            .http
            .put(self.api_url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.without_url()))?;
        let results: Vec<WriteResult> = parse_object(resp).await?;
        collect_successes(results)
    }
}

// ── Response handling ────────────────────────────────────────────────

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Map status codes, then decode the body as `T`.
///
/// The gateway reports a bad key as HTTP 403 with an error array, older
/// firmware uses 401; both become [`Error::Unauthorized`].
async fn parse_object<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Unauthorized {
            message: error_description(&body).unwrap_or_else(|| format!("HTTP {status}")),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Gateway {
            status: status.as_u16(),
            message: error_description(&body).unwrap_or_else(|| preview(&body)),
        });
    }

    let body = resp.text().await.map_err(|e| Error::Transport(e.without_url()))?;
    trace!(len = body.len(), "response body received");

    // Some firmware answers a bad key with HTTP 200 and an error array.
    if let Ok(results) = serde_json::from_str::<Vec<WriteResult>>(&body) {
        if let Some(WriteResult::Error(err)) = results.first() {
            if err.error_type == Some(GATEWAY_ERROR_UNAUTHORIZED) {
                return Err(Error::Unauthorized {
                    message: err.description.clone().unwrap_or_default(),
                });
            }
        }
    }

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body,
    })
}

fn error_description(body: &str) -> Option<String> {
    let results: Vec<WriteResult> = serde_json::from_str(body).ok()?;
    results.into_iter().find_map(|r| match r {
        WriteResult::Error(err) => err.description,
        WriteResult::Success(_) => None,
    })
}

fn collect_successes(results: Vec<WriteResult>) -> Result<Vec<Value>, Error> {
    let mut successes = Vec::with_capacity(results.len());
    for result in results {
        match result {
            WriteResult::Success(value) => successes.push(value),
            WriteResult::Error(err) if err.error_type == Some(GATEWAY_ERROR_UNAUTHORIZED) => {
                return Err(Error::Unauthorized {
                    message: err.description.unwrap_or_default(),
                });
            }
            WriteResult::Error(err) => {
                return Err(Error::Gateway {
                    status: 200,
                    message: format!(
                        "{} ({})",
                        err.description.unwrap_or_else(|| "unknown error".into()),
                        err.address.unwrap_or_default()
                    ),
                });
            }
        }
    }
    Ok(successes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> GatewayClient {
        GatewayClient::with_client(
            reqwest::Client::new(),
            Url::parse("http://gateway.local:8080/").unwrap(),
            SecretString::from("ABCDEF1234"),
        )
    }

    #[test]
    fn api_url_scopes_under_key() {
        let c = client();
        assert_eq!(
            c.api_url("").unwrap().as_str(),
            "http://gateway.local:8080/api/ABCDEF1234"
        );
        assert_eq!(
            c.api_url("/lights/1/state").unwrap().as_str(),
            "http://gateway.local:8080/api/ABCDEF1234/lights/1/state"
        );
    }

    #[test]
    fn error_entry_fails_write() {
        let results = serde_json::from_str::<Vec<WriteResult>>(
            r#"[{"success":{"/lights/1/state/on":true}},{"error":{"type":7,"address":"/lights/1/state/xy","description":"invalid value"}}]"#,
        )
        .unwrap();
        let err = collect_successes(results).unwrap_err();
        assert!(matches!(err, Error::Gateway { .. }));
        assert!(err.to_string().contains("invalid value"));
    }

    #[test]
    fn unauthorized_entry_maps_to_unauthorized() {
        let results = serde_json::from_str::<Vec<WriteResult>>(
            r#"[{"error":{"type":1,"address":"/","description":"unauthorized user"}}]"#,
        )
        .unwrap();
        assert!(collect_successes(results).unwrap_err().is_unauthorized());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let body = "é".repeat(300);
        assert_eq!(preview(&body).chars().count(), 200);
    }
}
