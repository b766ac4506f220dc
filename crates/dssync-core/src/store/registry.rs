// ── Structure registry ──
//
// In-memory inventory of devices, circuits and the zone/group tree.
// Pure data: no networking, no listener calls.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::model::{Circuit, Device, Dsid};

/// Name and last-called scene of one group inside a zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub last_called_scene: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneInfo {
    pub name: String,
    pub groups: BTreeMap<u16, GroupInfo>,
}

pub struct StructureRegistry {
    devices: EntityCollection<Device>,
    circuits: EntityCollection<Circuit>,
    zones: RwLock<BTreeMap<u16, ZoneInfo>>,
}

impl Default for StructureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureRegistry {
    pub fn new() -> Self {
        Self {
            devices: EntityCollection::new(),
            circuits: EntityCollection::new(),
            zones: RwLock::new(BTreeMap::new()),
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub fn device(&self, dsid: &Dsid) -> Option<Arc<Device>> {
        self.devices.get(dsid)
    }

    pub fn contains_device(&self, dsid: &Dsid) -> bool {
        self.devices.contains(dsid)
    }

    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.devices.subscribe()
    }

    pub fn device_ids(&self) -> Vec<Dsid> {
        self.devices.ids()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices addressed by a zone/group pair (zone or group `0` is a wildcard).
    pub fn devices_in(&self, zone: u16, group: u16) -> Vec<Arc<Device>> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.is_in_zone_group(zone, group))
            .cloned()
            .collect()
    }

    pub(crate) fn insert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.dsid.clone(), device)
    }

    pub(crate) fn update_device<R>(
        &self,
        dsid: &Dsid,
        f: impl FnOnce(&mut Device) -> R,
    ) -> Option<R> {
        self.devices.update(dsid, f)
    }

    pub(crate) fn remove_device(&self, dsid: &Dsid) -> Option<Device> {
        self.devices
            .remove(dsid)
            .map(|d| Arc::try_unwrap(d).unwrap_or_else(|shared| (*shared).clone()))
    }

    // ── Circuits ─────────────────────────────────────────────────────

    pub fn circuit(&self, dsid: &Dsid) -> Option<Arc<Circuit>> {
        self.circuits.get(dsid)
    }

    pub fn circuits(&self) -> Arc<Vec<Arc<Circuit>>> {
        self.circuits.snapshot()
    }

    pub(crate) fn insert_circuit(&self, circuit: Circuit) -> bool {
        self.circuits.upsert(circuit.dsid.clone(), circuit)
    }

    pub(crate) fn update_circuit<R>(
        &self,
        dsid: &Dsid,
        f: impl FnOnce(&mut Circuit) -> R,
    ) -> Option<R> {
        self.circuits.update(dsid, f)
    }

    // ── Zones ────────────────────────────────────────────────────────

    pub(crate) fn replace_zones(&self, zones: BTreeMap<u16, ZoneInfo>) {
        *self.zones.write().expect("zone lock poisoned") = zones;
    }

    pub fn zones(&self) -> BTreeMap<u16, ZoneInfo> {
        self.zones.read().expect("zone lock poisoned").clone()
    }

    pub fn zone_name(&self, zone: u16) -> Option<String> {
        let zones = self.zones.read().expect("zone lock poisoned");
        zones
            .get(&zone)
            .map(|z| z.name.clone())
            .filter(|n| !n.is_empty())
    }

    pub fn group_name(&self, zone: u16, group: u16) -> Option<String> {
        let zones = self.zones.read().expect("zone lock poisoned");
        zones
            .get(&zone)
            .and_then(|z| z.groups.get(&group))
            .map(|g| g.name.clone())
            .filter(|n| !n.is_empty())
    }
}
