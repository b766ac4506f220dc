// ── Reconciliation tick ──
//
// One pass of the polling loop: verify connectivity, fetch the remote
// inventory, diff it against the registry, drain queued commands of known
// devices, move vanished devices to the trash, and schedule background
// reads for stale sensor and metering values.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use dssync_api::{RemoteCircuit, RemoteDevice};

use crate::convert;
use crate::dispatch::drain_device;
use crate::engine::EngineInner;
use crate::model::output::OUTPUT_MIN;
use crate::model::{Circuit, Device, Dsid, MeteringKind};
use crate::scene::activation::{generate_scenes, hydrate_last_called};

/// Counts describing what one tick did. `ran` is `false` when the tick
/// was skipped (another tick in progress, server unreachable, or the
/// inventory fetch failed).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub ran: bool,
    pub devices_added: usize,
    pub devices_restored: usize,
    pub devices_updated: usize,
    pub devices_removed: usize,
    pub devices_purged: usize,
    pub circuits_added: usize,
    pub circuits_updated: usize,
    pub commands_sent: usize,
    pub jobs_scheduled: usize,
}

pub(crate) async fn tick(engine: &EngineInner) -> TickReport {
    let Ok(_guard) = engine.tick_lock.try_lock() else {
        debug!("previous tick still running, skipped");
        return TickReport::default();
    };
    if !engine.connection.check_connection().await {
        debug!("server unreachable, tick skipped");
        return TickReport::default();
    }

    let client = engine.connection.client();
    let fetched = tokio::try_join!(
        engine.connection.call(|| client.get_devices()),
        engine.connection.call(|| client.get_circuits()),
        engine.connection.call(|| client.get_structure()),
    );
    let (devices, circuits, zones) = match fetched {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "inventory fetch failed, tick skipped");
            return TickReport::default();
        }
    };

    let mut report = TickReport {
        ran: true,
        ..TickReport::default()
    };
    engine.registry.replace_zones(convert::zones(&zones));
    sync_circuits(engine, &circuits, &mut report);
    sync_devices(engine, &devices, &mut report).await;
    purge_trash(engine, &mut report);

    if !engine.registry.is_empty() && !engine.hydrated.swap(true, Ordering::AcqRel) {
        generate_scenes(engine).await;
        hydrate_last_called(engine);
    }

    report.jobs_scheduled = schedule_refreshes(engine, Utc::now());
    report
}

// ── Circuits ─────────────────────────────────────────────────────────

fn sync_circuits(engine: &EngineInner, circuits: &[RemoteCircuit], report: &mut TickReport) {
    for raw in circuits {
        let dsid = Dsid::from(raw.dsid.as_str());
        match engine.registry.circuit(&dsid) {
            None => {
                let circuit = Circuit::from(raw);
                engine.registry.insert_circuit(circuit.clone());
                info!(circuit = %dsid, name = %circuit.name, "circuit discovered");
                engine.listener.on_circuit_added(&circuit);
                report.circuits_added += 1;
            }
            Some(existing) if convert::circuit_differs(&existing, raw) => {
                engine
                    .registry
                    .update_circuit(&dsid, |c| convert::reconcile_circuit(c, raw));
                if let Some(circuit) = engine.registry.circuit(&dsid) {
                    debug!(circuit = %dsid, "circuit configuration changed");
                    engine.listener.on_circuit_updated(&circuit);
                }
                report.circuits_updated += 1;
            }
            Some(_) => {}
        }
    }
}

// ── Devices ──────────────────────────────────────────────────────────

async fn sync_devices(engine: &EngineInner, devices: &[RemoteDevice], report: &mut TickReport) {
    let priorities = &engine.config.sensor_priorities;
    let mut unseen: HashSet<Dsid> = engine.registry.device_ids().into_iter().collect();

    for raw in devices {
        let dsid = Dsid::from(raw.dsid.as_str());

        if unseen.remove(&dsid) {
            let changed = engine
                .registry
                .update_device(&dsid, |d| convert::reconcile_device(d, raw, priorities))
                .unwrap_or(false);
            if changed {
                if let Some(device) = engine.registry.device(&dsid) {
                    debug!(device = %dsid, "device configuration changed");
                    engine.listener.on_device_config_changed(&device);
                }
                report.devices_updated += 1;
            }
            report.commands_sent += drain_device(engine, &dsid).await;
            continue;
        }

        if engine.registry.contains_device(&dsid) {
            debug!(device = %dsid, "duplicate record in inventory, ignored");
            continue;
        }

        if let Some(mut device) = engine.trash.take(&dsid) {
            convert::reconcile_device(&mut device, raw, priorities);
            device.init_priorities(priorities);
            admit(engine, device);
            info!(device = %dsid, "device restored from trash");
            report.devices_restored += 1;
            continue;
        }

        let mut device = Device::from(raw);
        device.init_priorities(priorities);
        if let Some(props) = engine.take_preloaded(&dsid) {
            device.import_properties(&props);
        }
        info!(device = %dsid, name = %device.name, mode = %device.output_mode, "device discovered");
        admit(engine, device);
        report.devices_added += 1;
    }

    let today = Utc::now().date_naive();
    for dsid in unseen {
        engine.registry.update_device(&dsid, Device::suspend_refresh);
        let cancelled = engine.jobs.cancel_owner(&dsid);
        engine.scenes.remove_reference(&dsid);
        if let Some(device) = engine.registry.remove_device(&dsid) {
            info!(device = %dsid, cancelled_jobs = cancelled, "device missing from inventory, moved to trash");
            engine.listener.on_device_removed(&device);
            engine.trash.put(device, today);
            report.devices_removed += 1;
        }
    }
}

/// Insert a device into the registry and announce it.
fn admit(engine: &EngineInner, device: Device) {
    engine.scenes.add_reference(&device);
    let dsid = device.dsid.clone();
    engine.registry.insert_device(device);
    if let Some(device) = engine.registry.device(&dsid) {
        engine.listener.on_device_added(&device);
    }
}

fn purge_trash(engine: &EngineInner, report: &mut TickReport) {
    let today = Utc::now().date_naive();
    for device in engine
        .trash
        .purge_expired(today, engine.config.trash_grace_days)
    {
        info!(device = %device.dsid, "trash grace period over, device deleted");
        report.devices_purged += 1;
    }
    if report.devices_purged > 0 {
        drop_orphaned_scenes(engine);
    }
}

/// Remove scenes whose zone/group has no device left, neither live nor
/// waiting in the trash.
fn drop_orphaned_scenes(engine: &EngineInner) {
    let removed = engine.scenes.remove_where(|id| {
        engine.registry.devices_in(id.zone, id.group).is_empty()
            && !engine.trash.holds_member_of(id.zone, id.group)
    });
    for scene in removed {
        info!(scene = %scene.id, name = %scene.name, "scene removed with its last device");
        engine.listener.on_scene_removed(&scene);
    }
}

// ── Background refresh ───────────────────────────────────────────────

/// Queue reads for sensor and metering values older than the refresh
/// interval. Returns the number of newly queued jobs.
fn schedule_refreshes(engine: &EngineInner, now: DateTime<Utc>) -> usize {
    let max_age = chrono::Duration::from_std(engine.config.sensor_refresh_interval)
        .unwrap_or_else(|_| chrono::Duration::days(1));
    let mut scheduled = 0;

    for device in engine.registry.devices().iter() {
        if !device.is_present {
            continue;
        }
        let switched_off = device.main_output() == OUTPUT_MIN;
        for sensor in device.sensor_types.iter().copied() {
            if sensor.follows_output() && switched_off {
                continue;
            }
            let stale = device
                .sensor(sensor)
                .is_none_or(|r| r.is_older_than(max_age, now));
            if stale && engine.schedule_sensor(&device.dsid, sensor, device.refresh_priority(sensor)) {
                scheduled += 1;
            }
        }
    }

    for circuit in engine.registry.circuits().iter() {
        if !circuit.is_present || !circuit.has_metering {
            continue;
        }
        for kind in MeteringKind::iter() {
            let stale = circuit
                .reading(kind)
                .is_none_or(|r| now - r.timestamp > max_age);
            if stale && engine.schedule_metering(&circuit.dsid, kind) {
                scheduled += 1;
            }
        }
    }

    if scheduled > 0 {
        debug!(scheduled, queued = engine.jobs.len(), "background reads scheduled");
    }
    scheduled
}
