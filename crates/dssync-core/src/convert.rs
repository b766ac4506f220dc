// ── Wire-to-domain conversions ──
//
// Builds domain types from `dssync_api` inventory records and merges
// later snapshots into existing entities. Merges touch only the fields
// the server owns; output state, sensor history and scene configuration
// stay with the local entity.

use std::collections::BTreeMap;

use dssync_api::{RemoteBinaryInput, RemoteCircuit, RemoteDevice, RemoteZone};

use crate::config::SensorPriorities;
use crate::model::{BinaryInput, Circuit, Device, Dsid, OutputMode, SensorType};
use crate::store::{GroupInfo, ZoneInfo};

/// Color groups (light, shade, climate, ...) occupy group ids 1 to 12.
fn color_group(groups: &[u16]) -> Option<u16> {
    groups.iter().copied().find(|g| (1..=12).contains(g))
}

// ── Device ─────────────────────────────────────────────────────────

impl From<&RemoteBinaryInput> for BinaryInput {
    fn from(raw: &RemoteBinaryInput) -> Self {
        Self {
            input_id: raw.input_id,
            input_type: raw.input_type,
            target_group: raw.target_group,
            state: raw.state,
        }
    }
}

impl From<&RemoteDevice> for Device {
    fn from(raw: &RemoteDevice) -> Self {
        let mode = OutputMode::from_wire(raw.output_mode, raw.has_slat_angle);
        let mut device = Device::new(Dsid::from(raw.dsid.as_str()), mode);
        device.name.clone_from(&raw.name);
        device.zone_id = raw.zone_id;
        device.groups.clone_from(&raw.groups);
        device.color_group = color_group(&raw.groups);
        device.is_present = raw.is_present;
        device.meter_dsid = raw.meter_dsid.as_deref().map(Dsid::from);
        device.binary_inputs = raw.binary_inputs.iter().map(BinaryInput::from).collect();
        device.sensor_types = raw.sensor_types.iter().copied().map(SensorType).collect();
        if let Some(value) = raw.output_value {
            device.set_main_output(i64::from(value));
        }
        device
    }
}

/// Merge server-owned fields of a snapshot record into a known device.
///
/// Returns `true` if anything changed. Refresh priorities are rebuilt
/// when the set of reported sensors changed.
pub(crate) fn reconcile_device(
    device: &mut Device,
    raw: &RemoteDevice,
    priorities: &SensorPriorities,
) -> bool {
    let mut changed = false;

    let mode = OutputMode::from_wire(raw.output_mode, raw.has_slat_angle);
    changed |= replace(&mut device.output_mode, mode);
    changed |= replace(&mut device.is_present, raw.is_present);
    changed |= replace(
        &mut device.meter_dsid,
        raw.meter_dsid.as_deref().map(Dsid::from),
    );
    changed |= replace(&mut device.color_group, color_group(&raw.groups));
    changed |= replace(&mut device.groups, raw.groups.clone());
    changed |= replace(&mut device.zone_id, raw.zone_id);
    changed |= replace(&mut device.name, raw.name.clone());

    let inputs: Vec<BinaryInput> = raw.binary_inputs.iter().map(BinaryInput::from).collect();
    changed |= replace(&mut device.binary_inputs, inputs);

    let sensors: Vec<SensorType> = raw.sensor_types.iter().copied().map(SensorType).collect();
    if replace(&mut device.sensor_types, sensors) {
        device.init_priorities(priorities);
        changed = true;
    }

    changed
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

// ── Circuit ────────────────────────────────────────────────────────

impl From<&RemoteCircuit> for Circuit {
    fn from(raw: &RemoteCircuit) -> Self {
        let mut circuit = Circuit::new(Dsid::from(raw.dsid.as_str()));
        circuit.name.clone_from(&raw.name);
        circuit.is_present = raw.is_present;
        circuit.is_valid = raw.is_valid;
        circuit.has_metering = raw.has_metering;
        circuit
    }
}

pub(crate) fn circuit_differs(circuit: &Circuit, raw: &RemoteCircuit) -> bool {
    circuit.name != raw.name
        || circuit.is_present != raw.is_present
        || circuit.is_valid != raw.is_valid
        || circuit.has_metering != raw.has_metering
}

/// Merge a snapshot record into a known circuit, keeping cached readings.
pub(crate) fn reconcile_circuit(circuit: &mut Circuit, raw: &RemoteCircuit) {
    circuit.name.clone_from(&raw.name);
    circuit.is_present = raw.is_present;
    circuit.is_valid = raw.is_valid;
    circuit.has_metering = raw.has_metering;
}

// ── Structure ──────────────────────────────────────────────────────

pub(crate) fn zones(raw: &[RemoteZone]) -> BTreeMap<u16, ZoneInfo> {
    raw.iter()
        .map(|zone| {
            let groups = zone
                .groups
                .iter()
                .map(|g| {
                    (
                        g.id,
                        GroupInfo {
                            name: g.name.clone(),
                            last_called_scene: g.last_called_scene,
                        },
                    )
                })
                .collect();
            (
                zone.id,
                ZoneInfo {
                    name: zone.name.clone(),
                    groups,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RefreshPriority;

    fn raw_device() -> RemoteDevice {
        RemoteDevice {
            dsid: "d1".into(),
            name: "Desk".into(),
            zone_id: 3,
            is_present: true,
            output_mode: 22,
            has_slat_angle: false,
            meter_dsid: Some("m1".into()),
            groups: vec![1, 48],
            binary_inputs: Vec::new(),
            sensor_types: vec![4],
            output_value: Some(40),
        }
    }

    #[test]
    fn new_device_takes_all_fields() {
        let device = Device::from(&raw_device());
        assert_eq!(device.output_mode, OutputMode::Dimmable);
        assert_eq!(device.color_group, Some(1));
        assert_eq!(device.meter_dsid, Some(Dsid::from("m1")));
        assert_eq!(device.output_value(), 40);
        assert_eq!(device.sensor_types, vec![SensorType::ACTIVE_POWER]);
    }

    #[test]
    fn unchanged_snapshot_reports_no_change() {
        let raw = raw_device();
        let mut device = Device::from(&raw);
        assert!(!reconcile_device(&mut device, &raw, &SensorPriorities::default()));
    }

    #[test]
    fn mode_change_is_applied_without_touching_output() {
        let mut raw = raw_device();
        let mut device = Device::from(&raw);
        raw.output_mode = 16;
        raw.output_value = Some(200);
        assert!(reconcile_device(&mut device, &raw, &SensorPriorities::default()));
        assert_eq!(device.output_mode, OutputMode::Switch);
        assert_eq!(device.output_value(), 40);
    }

    #[test]
    fn new_sensor_set_rebuilds_priorities() {
        let mut raw = raw_device();
        let mut device = Device::from(&raw);
        raw.sensor_types = vec![4, 9];
        assert!(reconcile_device(&mut device, &raw, &SensorPriorities::default()));
        assert_eq!(
            device.refresh_priority(SensorType::ROOM_TEMPERATURE),
            RefreshPriority::Low
        );
    }
}
