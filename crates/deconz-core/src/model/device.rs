// ── Device domain types ──

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::unique_id::UniqueId;

/// Which gateway collection a device lives in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceKind {
    Sensor,
    Light,
    Group,
}

impl DeviceKind {
    /// REST collection name (`sensors`, `lights`, `groups`).
    pub fn collection(self) -> &'static str {
        match self {
            Self::Sensor => "sensors",
            Self::Light => "lights",
            Self::Group => "groups",
        }
    }

    /// Inverse of [`collection`](Self::collection).
    pub fn from_collection(name: &str) -> Option<Self> {
        match name {
            "sensors" => Some(Self::Sensor),
            "lights" => Some(Self::Light),
            "groups" => Some(Self::Group),
            _ => None,
        }
    }

    /// Sub-resource that accepts state writes.
    ///
    /// Lights take `state`, groups take `action`, sensors only accept
    /// `config` (their state is reported, not commanded).
    pub fn command_target(self) -> &'static str {
        match self {
            Self::Light => "state",
            Self::Group => "action",
            Self::Sensor => "config",
        }
    }
}

/// A light, sensor, or group as held in the catalogue.
///
/// Catalogue entries are immutable `Arc<Device>`s; a push update produces
/// a new `Device` with merged maps and swaps it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub unique_id: UniqueId,
    pub kind: DeviceKind,
    /// Index within its kind on the gateway (the REST path segment).
    pub index: u32,
    pub name: String,
    /// Gateway resource type, e.g. `"ZHASwitch"` or `"Extended color light"`.
    pub resource_type: Option<String>,
    pub model_id: Option<String>,
    pub manufacturer: Option<String>,
    pub state: Map<String, Value>,
    pub config: Map<String, Value>,
}

impl Device {
    /// Key-wise overwrite of `state`. Returns `true` if anything changed.
    pub fn merge_state(&mut self, patch: &Map<String, Value>) -> bool {
        merge_into(&mut self.state, patch)
    }

    /// Key-wise overwrite of `config`. Returns `true` if anything changed.
    pub fn merge_config(&mut self, patch: &Map<String, Value>) -> bool {
        merge_into(&mut self.config, patch)
    }

    /// REST path for a state or config write, e.g. `lights/4/state`.
    pub fn command_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.collection(),
            self.index,
            self.kind.command_target()
        )
    }

    /// Boolean `state.on` (lights) or `state.any_on` (groups).
    pub fn is_on(&self) -> Option<bool> {
        self.state
            .get("on")
            .or_else(|| self.state.get("any_on"))
            .and_then(Value::as_bool)
    }
}

fn merge_into(target: &mut Map<String, Value>, patch: &Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, value) in patch {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Delivered to every subscriber of a device when a push frame arrives.
#[derive(Debug, Clone)]
pub struct DeviceUpdate {
    pub unique_id: UniqueId,
    /// The raw frame as received from the gateway.
    pub payload: Arc<Value>,
    /// Post-merge snapshot; `None` when the device is not in the catalogue.
    pub device: Option<Arc<Device>>,
}
