// ── Selection predicates ──
//
// Used by `list_for_selection` to partition a catalogue snapshot without
// re-querying the gateway.

use crate::model::{Device, DeviceKind};

/// Filter predicate for catalogue entries.
pub enum DeviceFilter {
    All,
    ByKind(DeviceKind),
    /// Exact gateway resource type, e.g. `"ZHASwitch"`.
    ByResourceType(String),
    /// Case-insensitive substring of the display name.
    NameContains(String),
    Custom(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::All => true,
            Self::ByKind(kind) => device.kind == *kind,
            Self::ByResourceType(rt) => device.resource_type.as_deref() == Some(rt.as_str()),
            Self::NameContains(needle) => device
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Self::Custom(f) => f(device),
        }
    }
}

impl std::fmt::Debug for DeviceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::ByKind(kind) => f.debug_tuple("ByKind").field(kind).finish(),
            Self::ByResourceType(rt) => f.debug_tuple("ByResourceType").field(rt).finish(),
            Self::NameContains(s) => f.debug_tuple("NameContains").field(s).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UniqueId;
    use serde_json::Map;

    fn switch() -> Device {
        Device {
            unique_id: UniqueId::from("00:15:8d:00:01:02:03:04-01-0006"),
            kind: DeviceKind::Sensor,
            index: 7,
            name: "Hallway Switch".into(),
            resource_type: Some("ZHASwitch".into()),
            model_id: Some("lumi.sensor_switch".into()),
            manufacturer: Some("LUMI".into()),
            state: Map::new(),
            config: Map::new(),
        }
    }

    #[test]
    fn predicates_match() {
        let device = switch();
        assert!(DeviceFilter::All.matches(&device));
        assert!(DeviceFilter::ByKind(DeviceKind::Sensor).matches(&device));
        assert!(!DeviceFilter::ByKind(DeviceKind::Light).matches(&device));
        assert!(DeviceFilter::ByResourceType("ZHASwitch".into()).matches(&device));
        assert!(DeviceFilter::NameContains("hallway".into()).matches(&device));
        assert!(!DeviceFilter::NameContains("kitchen".into()).matches(&device));
        assert!(DeviceFilter::Custom(Box::new(|d| d.index > 5)).matches(&device));
    }
}
