// ── API-to-domain conversions ──
//
// Bridges raw `deconz_api` response types into the canonical catalogue.
// Entries the catalogue cannot key are skipped with a log line rather than
// failing the whole pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use deconz_api::models::{FullState, GatewayConfigBlock, RawResource};

use crate::model::{Device, DeviceKind, UniqueId};
use crate::store::{Catalogue, GatewayInfo};

impl From<&GatewayConfigBlock> for GatewayInfo {
    fn from(config: &GatewayConfigBlock) -> Self {
        Self {
            name: config.name.clone(),
            api_version: config.apiversion.clone(),
            software_version: config.swversion.clone(),
            websocket_port: config.websocketport,
        }
    }
}

/// Normalize a full-state response into a catalogue.
pub(crate) fn catalogue_from_state(state: FullState, fetched_at: DateTime<Utc>) -> Catalogue {
    let mut devices = HashMap::new();
    for (kind, resources) in [
        (DeviceKind::Sensor, state.sensors),
        (DeviceKind::Light, state.lights),
        (DeviceKind::Group, state.groups),
    ] {
        collect_kind(kind, resources, &mut devices);
    }
    Catalogue::new(devices, GatewayInfo::from(&state.config), fetched_at)
}

fn collect_kind(
    kind: DeviceKind,
    resources: BTreeMap<String, RawResource>,
    into: &mut HashMap<UniqueId, Arc<Device>>,
) {
    for (key, raw) in resources {
        let Ok(index) = key.parse::<u32>() else {
            debug!(collection = kind.collection(), key = %key, "skipping non-numeric key");
            continue;
        };
        let Some(device) = device_from_raw(kind, index, raw) else {
            debug!(
                collection = kind.collection(),
                index,
                "skipping entry without uniqueid"
            );
            continue;
        };
        into.insert(device.unique_id.clone(), Arc::new(device));
    }
}

fn device_from_raw(kind: DeviceKind, index: u32, raw: RawResource) -> Option<Device> {
    let unique_id = match kind {
        DeviceKind::Group => UniqueId::group(index),
        DeviceKind::Sensor | DeviceKind::Light => UniqueId::from(raw.uniqueid?),
    };
    Some(Device {
        unique_id,
        kind,
        index,
        name: raw.name.unwrap_or_default(),
        resource_type: raw.resource_type,
        model_id: raw.modelid,
        manufacturer: raw.manufacturername,
        state: raw.state,
        config: raw.config,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Catalogue {
        let state: FullState = serde_json::from_value(value).unwrap();
        catalogue_from_state(state, Utc::now())
    }

    #[test]
    fn light_with_uniqueid_is_catalogued() {
        let cat = parse(json!({
            "lights": { "0": { "uniqueid": "AA:01", "state": { "on": true } } }
        }));
        let device = cat.get(&UniqueId::from("AA:01")).unwrap();
        assert_eq!(device.state["on"], json!(true));
        assert_eq!(device.kind, DeviceKind::Light);
        assert_eq!(device.index, 0);
    }

    #[test]
    fn groups_get_synthetic_ids() {
        let cat = parse(json!({
            "groups": { "3": { "name": "Kitchen", "state": { "all_on": false } } }
        }));
        let group = cat.get(&UniqueId::from("group_3")).unwrap();
        assert_eq!(group.name, "Kitchen");
        assert_eq!(group.kind, DeviceKind::Group);
    }

    #[test]
    fn entries_without_key_material_are_skipped() {
        let cat = parse(json!({
            "sensors": {
                "1": { "name": "CLIP daylight", "state": {} },
                "x": { "uniqueid": "BB:02", "state": {} },
                "2": { "uniqueid": "BB:03", "type": "ZHAPresence", "state": { "presence": false } }
            }
        }));
        assert_eq!(cat.len(), 1);
        let sensor = cat.get(&UniqueId::from("BB:03")).unwrap();
        assert_eq!(sensor.resource_type.as_deref(), Some("ZHAPresence"));
    }

    #[test]
    fn gateway_info_is_read_from_config() {
        let cat = parse(json!({
            "config": { "name": "Phoscon-GW", "apiversion": "1.16.0", "websocketport": 443 }
        }));
        assert_eq!(cat.gateway().websocket_port, Some(443));
        assert_eq!(cat.gateway().name.as_deref(), Some("Phoscon-GW"));
        assert!(cat.is_empty());
    }
}
