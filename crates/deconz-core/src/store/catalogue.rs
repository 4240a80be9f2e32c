// ── Catalogue snapshots ──
//
// An immutable view of every device the gateway reported in one discovery
// pass, plus the push merges applied since. Writers build a new
// `Catalogue` and publish it; readers hold an `Arc` and never see a
// half-applied update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Device, UniqueId};

/// Gateway-level facts picked out of the `config` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub name: Option<String>,
    pub api_version: Option<String>,
    pub software_version: Option<String>,
    /// Port of the push feed, as reported by the gateway.
    pub websocket_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Catalogue {
    devices: HashMap<UniqueId, Arc<Device>>,
    gateway: GatewayInfo,
    fetched_at: DateTime<Utc>,
}

impl Catalogue {
    pub fn new(
        devices: HashMap<UniqueId, Arc<Device>>,
        gateway: GatewayInfo,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            devices,
            gateway,
            fetched_at,
        }
    }

    pub fn get(&self, id: &UniqueId) -> Option<Arc<Device>> {
        self.devices.get(id).cloned()
    }

    pub fn contains(&self, id: &UniqueId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn gateway(&self) -> &GatewayInfo {
        &self.gateway
    }

    /// When the discovery pass that produced this catalogue completed.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// All devices ordered by kind, then index.
    pub fn sorted(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            a.kind
                .collection()
                .cmp(b.kind.collection())
                .then(a.index.cmp(&b.index))
        });
        devices
    }

    /// Ids present here and absent from `previous`.
    pub fn added_since(&self, previous: &Catalogue) -> Vec<UniqueId> {
        let mut added: Vec<_> = self
            .devices
            .keys()
            .filter(|id| !previous.devices.contains_key(*id))
            .cloned()
            .collect();
        added.sort();
        added
    }

    /// Reuse `previous`'s `Arc` for every device that did not change, so
    /// consumers can detect "unchanged" with `Arc::ptr_eq`.
    pub fn reconciled_with(mut self, previous: &Catalogue) -> Self {
        for (id, device) in &mut self.devices {
            if let Some(old) = previous.devices.get(id) {
                if **old == **device {
                    *device = Arc::clone(old);
                }
            }
        }
        self
    }

    /// Copy of this catalogue with one entry replaced.
    pub fn with_device(&self, device: Device) -> Self {
        let mut devices = self.devices.clone();
        devices.insert(device.unique_id.clone(), Arc::new(device));
        Self {
            devices,
            gateway: self.gateway.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceKind;
    use serde_json::Map;

    fn device(id: &str, index: u32, kind: DeviceKind) -> Device {
        Device {
            unique_id: UniqueId::from(id),
            kind,
            index,
            name: id.to_owned(),
            resource_type: None,
            model_id: None,
            manufacturer: None,
            state: Map::new(),
            config: Map::new(),
        }
    }

    fn catalogue(devices: Vec<Device>) -> Catalogue {
        let map = devices
            .into_iter()
            .map(|d| (d.unique_id.clone(), Arc::new(d)))
            .collect();
        Catalogue::new(map, GatewayInfo::default(), Utc::now())
    }

    #[test]
    fn added_since_is_key_set_difference() {
        let p1 = catalogue(vec![device("a", 1, DeviceKind::Light)]);
        let p2 = catalogue(vec![
            device("a", 1, DeviceKind::Light),
            device("c", 3, DeviceKind::Sensor),
            device("b", 2, DeviceKind::Light),
        ]);
        assert_eq!(p2.added_since(&p1), vec![UniqueId::from("b"), UniqueId::from("c")]);
        assert!(p1.added_since(&p2).is_empty());
    }

    #[test]
    fn reconcile_reuses_unchanged_entries() {
        let p1 = catalogue(vec![
            device("a", 1, DeviceKind::Light),
            device("b", 2, DeviceKind::Light),
        ]);
        let mut renamed = device("b", 2, DeviceKind::Light);
        renamed.name = "Renamed".into();
        let p2 = catalogue(vec![device("a", 1, DeviceKind::Light), renamed]).reconciled_with(&p1);

        let a = UniqueId::from("a");
        let b = UniqueId::from("b");
        assert!(Arc::ptr_eq(&p1.get(&a).unwrap(), &p2.get(&a).unwrap()));
        assert!(!Arc::ptr_eq(&p1.get(&b).unwrap(), &p2.get(&b).unwrap()));
    }

    #[test]
    fn with_device_leaves_original_untouched() {
        let p1 = catalogue(vec![device("a", 1, DeviceKind::Light)]);
        let mut changed = device("a", 1, DeviceKind::Light);
        changed.name = "New".into();
        let p2 = p1.with_device(changed);

        let a = UniqueId::from("a");
        assert_eq!(p1.get(&a).map(|d| d.name.clone()), Some("a".into()));
        assert_eq!(p2.get(&a).map(|d| d.name.clone()), Some("New".into()));
    }

    #[test]
    fn sorted_orders_by_collection_then_index() {
        let cat = catalogue(vec![
            device("s2", 2, DeviceKind::Sensor),
            device("l5", 5, DeviceKind::Light),
            device("l1", 1, DeviceKind::Light),
        ]);
        let order: Vec<_> = cat.sorted().iter().map(|d| d.unique_id.to_string()).collect();
        assert_eq!(order, vec!["l1", "l5", "s2"]);
    }
}
