// ── Scene activation and inbound scene events ──
//
// Local scene calls record an echo marker before the remote call and
// withdraw it if the call fails, so the feed event of a confirmed call
// is always recognised. Inbound events without a marker are external
// changes and are applied like a confirmed local call.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dssync_api::DssEvent;

use super::echo::{EchoAction, EchoTarget};
use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::model::{DeviceStateUpdate, Dsid, SceneEffect, SceneId};

/// Outcome of a local scene call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCall {
    /// Sent and confirmed by the server.
    Sent,
    /// Called too soon after the previous call; retried after the delay.
    Deferred(Duration),
}

/// Human-readable scene name from zone/group names, falling back to ids.
pub(crate) fn default_scene_name(engine: &EngineInner, id: SceneId) -> String {
    let zone = engine
        .registry
        .zone_name(id.zone)
        .unwrap_or_else(|| id.zone.to_string());
    let group = engine
        .registry
        .group_name(id.zone, id.group)
        .unwrap_or_else(|| id.group.to_string());
    format!("{zone} {group} scene {}", id.scene)
}

/// Returns `true` if the scene was created.
fn ensure_scene(engine: &EngineInner, id: SceneId, name: Option<String>) -> bool {
    let (scene, created) = engine.scenes.ensure(
        id,
        || name.unwrap_or_else(|| default_scene_name(engine, id)),
        || {
            engine
                .registry
                .devices_in(id.zone, id.group)
                .iter()
                .map(|d| d.dsid.clone())
                .collect()
        },
    );
    if created {
        engine.listener.on_scene_added(&scene);
    }
    created
}

// ── Local calls ──────────────────────────────────────────────────────

pub(crate) async fn call_internal_scene(
    engine: &Arc<EngineInner>,
    id: SceneId,
) -> Result<SceneCall, CoreError> {
    if let Err(slot) = engine.scenes.throttle.try_acquire(id) {
        let wait = slot.saturating_duration_since(Instant::now());
        debug!(scene = %id, wait_ms = wait.as_millis(), "scene called too soon, deferring");
        let deferred = Arc::clone(engine);
        let cancel = engine.session_token();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(slot) => {
                    if let Err(e) = send_scene_call(&deferred, id).await {
                        warn!(scene = %id, error = %e, "deferred scene call failed");
                    }
                }
            }
        });
        return Ok(SceneCall::Deferred(wait));
    }
    send_scene_call(engine, id).await?;
    Ok(SceneCall::Sent)
}

async fn send_scene_call(engine: &EngineInner, id: SceneId) -> Result<(), CoreError> {
    let target = EchoTarget::Zone {
        zone: id.zone,
        group: id.group,
    };
    let action = EchoAction::CallScene(id.scene);
    engine.scenes.echoes.record(target.clone(), action);

    let client = engine.connection.client();
    let result = engine
        .connection
        .call(|| client.call_zone_scene(id.zone, id.group, id.scene, true))
        .await;
    if let Err(e) = result {
        engine.scenes.echoes.withdraw(&target, action);
        return Err(e);
    }

    info!(scene = %id, "scene called");
    apply_zone_scene(engine, id, false);
    Ok(())
}

pub(crate) async fn undo_internal_scene(engine: &EngineInner, id: SceneId) -> Result<(), CoreError> {
    let target = EchoTarget::Zone {
        zone: id.zone,
        group: id.group,
    };
    let action = EchoAction::UndoScene(id.scene);
    engine.scenes.echoes.record(target.clone(), action);

    let client = engine.connection.client();
    let result = engine
        .connection
        .call(|| client.undo_zone_scene(id.zone, id.group, id.scene))
        .await;
    if let Err(e) = result {
        engine.scenes.echoes.withdraw(&target, action);
        return Err(e);
    }

    info!(scene = %id, "scene undone");
    apply_zone_scene(engine, id, true);
    Ok(())
}

/// Apply a confirmed zone/group scene call (or undo) to local state.
pub(crate) fn apply_zone_scene(engine: &EngineInner, id: SceneId, undo: bool) {
    ensure_scene(engine, id, None);
    for scene in engine.scenes.set_active(id, !undo) {
        engine.listener.on_scene_state_changed(&scene);
        engine.scenes.notify(&scene);
    }
    for device in engine.registry.devices_in(id.zone, id.group) {
        apply_device_scene(engine, &device.dsid, id.scene, undo);
    }
}

/// Apply a confirmed scene call (or undo) to one device.
pub(crate) fn apply_device_scene(engine: &EngineInner, dsid: &Dsid, scene_no: u8, undo: bool) {
    let outcome = engine.registry.update_device(dsid, |d| {
        if undo {
            (d.undo_scene(scene_no), false)
        } else {
            let needs_config = d.needs_scene_config(scene_no);
            (d.apply_scene(scene_no) == SceneEffect::Applied, needs_config)
        }
    });
    let Some((changed, needs_config)) = outcome else {
        return;
    };
    if needs_config {
        engine.schedule_scene_config(dsid, scene_no);
    }
    if changed {
        if let Some(device) = engine.registry.device(dsid) {
            let update = if undo {
                DeviceStateUpdate::UndoScene(scene_no)
            } else {
                DeviceStateUpdate::CallScene(scene_no)
            };
            engine.listener.on_device_state_changed(&device, &update);
        }
    }
}

// ── Inbound events ───────────────────────────────────────────────────

/// Handle a `callScene`/`undoScene` event from the feed.
pub(crate) fn handle_scene_event(engine: &EngineInner, event: &DssEvent, undo: bool) {
    let Some(scene_no) = event
        .property_u16("sceneID")
        .and_then(|n| u8::try_from(n).ok())
    else {
        debug!(event = %event.name, "scene event without scene number");
        return;
    };
    let action = if undo {
        EchoAction::UndoScene(scene_no)
    } else {
        EchoAction::CallScene(scene_no)
    };

    let device_source = event
        .source
        .dsid
        .as_deref()
        .filter(|_| event.source.is_device)
        .map(Dsid::from);

    if let Some(dsid) = device_source {
        let target = EchoTarget::Device(dsid.clone());
        if engine.scenes.echoes.consume(&target, action) {
            debug!(device = %dsid, ?action, "echo suppressed");
            return;
        }
        debug!(device = %dsid, ?action, "external device scene");
        apply_device_scene(engine, &dsid, scene_no, undo);
        return;
    }

    let zone = event
        .source
        .zone_id
        .or_else(|| event.property_u16("zoneID"))
        .unwrap_or(0);
    let group = event
        .source
        .group_id
        .or_else(|| event.property_u16("groupID"))
        .unwrap_or(0);
    let target = EchoTarget::Zone { zone, group };
    if engine.scenes.echoes.consume(&target, action) {
        debug!(zone, group, ?action, "echo suppressed");
        return;
    }
    let id = SceneId::new(zone, group, scene_no);
    debug!(scene = %id, ?action, "external zone scene");
    apply_zone_scene(engine, id, undo);
}

// ── Initial discovery ────────────────────────────────────────────────

/// Build the scene set from reachable scenes of every occupied zone/group.
pub(crate) async fn generate_scenes(engine: &EngineInner) {
    engine.scenes.begin_generation();

    let pairs: BTreeSet<(u16, u16)> = engine
        .registry
        .devices()
        .iter()
        .flat_map(|d| d.groups.iter().map(move |g| (d.zone_id, *g)))
        .collect();

    let client = engine.connection.client();
    let lookups = pairs.into_iter().map(|(zone, group)| async move {
        let result = engine
            .connection
            .call(|| client.get_reachable_scenes(zone, group))
            .await;
        (zone, group, result)
    });

    let mut created = 0usize;
    for (zone, group, result) in join_all(lookups).await {
        let reachable = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(zone, group, error = %e, "reachable scene lookup failed");
                continue;
            }
        };
        for scene_no in reachable.reachable_scenes {
            let id = SceneId::new(zone, group, scene_no);
            let name = reachable
                .user_scene_names
                .iter()
                .find(|n| n.scene_nr == scene_no)
                .map(|n| n.scene_name.clone())
                .filter(|n| !n.is_empty());
            if ensure_scene(engine, id, name) {
                created += 1;
            }
        }
    }

    engine.scenes.finish_generation();
    info!(created, total = engine.scenes.len(), "scene generation complete");
}

/// Mark the last-called scene of every zone/group active.
pub(crate) fn hydrate_last_called(engine: &EngineInner) {
    for (zone_id, zone) in engine.registry.zones() {
        for (group_id, group) in zone.groups {
            if let Some(scene_no) = group.last_called_scene {
                debug!(zone = zone_id, group = group_id, scene = scene_no, "hydrating last-called scene");
                apply_zone_scene(engine, SceneId::new(zone_id, group_id, scene_no), false);
            }
        }
    }
}
