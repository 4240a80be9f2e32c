// ── Wire models ──
//
// Raw shapes returned by the gateway's REST API and pushed over its
// WebSocket. These stay close to the JSON; `deconz-core` converts them into
// canonical domain types.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Full gateway state returned by `GET /api/{apikey}`.
///
/// Each collection is keyed by the gateway's numeric index, serialized as a
/// string (`"1"`, `"2"`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullState {
    #[serde(default)]
    pub config: GatewayConfigBlock,
    #[serde(default)]
    pub sensors: BTreeMap<String, RawResource>,
    #[serde(default)]
    pub lights: BTreeMap<String, RawResource>,
    #[serde(default)]
    pub groups: BTreeMap<String, RawResource>,
}

/// The subset of the gateway's `config` block the bridge cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfigBlock {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub apiversion: Option<String>,
    #[serde(default)]
    pub swversion: Option<String>,
    #[serde(default)]
    pub websocketport: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single light, sensor, or group entry.
///
/// Groups carry no `uniqueid`; lights and sensors always do on real
/// hardware, but CLIP sensors created over the API may not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResource {
    #[serde(default)]
    pub uniqueid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub modelid: Option<String>,
    #[serde(default)]
    pub manufacturername: Option<String>,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// All remaining fields the gateway sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A frame pushed over the gateway WebSocket.
///
/// Typical shape:
/// `{"t":"event","e":"changed","r":"lights","id":"1","uniqueid":"...","state":{...}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushMessage {
    /// Message type; `"event"` for everything the gateway emits today.
    #[serde(default, rename = "t")]
    pub message_type: Option<String>,
    /// Event kind: `"changed"`, `"added"`, `"deleted"`, `"scene-called"`.
    #[serde(default, rename = "e")]
    pub event: Option<String>,
    /// Resource collection: `"lights"`, `"sensors"`, `"groups"`, `"scenes"`.
    #[serde(default, rename = "r")]
    pub resource: Option<String>,
    /// Resource index; the gateway sends a string but numbers are accepted.
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub uniqueid: Option<String>,
    #[serde(default)]
    pub state: Option<Map<String, Value>>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
}

impl PushMessage {
    pub fn is_event(&self) -> bool {
        self.message_type.as_deref() == Some("event")
    }

    pub fn is_scene(&self) -> bool {
        self.resource.as_deref() == Some("scenes")
    }

    pub fn is_group(&self) -> bool {
        self.resource.as_deref() == Some("groups")
    }

    /// `true` for `added` / `deleted` events, which change the set of
    /// resources rather than their state.
    pub fn is_structural(&self) -> bool {
        matches!(self.event.as_deref(), Some("added" | "deleted"))
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Entry of the `[{"success": ...}, {"error": ...}]` array the gateway
/// returns from write requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteResult {
    Success(Value),
    Error(GatewayErrorBody),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default, rename = "type")]
    pub error_type: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
