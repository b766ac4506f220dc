// ── Command dispatch ──
//
// Drains a device's pending commands during a tick. Runs of redundant
// commands are coalesced first; commands without observable effect are
// dropped without a remote call. Local state changes only after the
// server confirmed the call. A connectivity failure puts the current
// and all following commands back on the queue for the next tick.

use std::future::Future;

use chrono::Utc;
use tracing::{debug, warn};

use dssync_api::{DssClient, Error as ApiError};
use dssync_api::device::{OFFSET_SLAT_ANGLE, OFFSET_SLAT_POSITION};

use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::jobs::JobKey;
use crate::model::output::{
    BRIGHTNESS_MAX, BRIGHTNESS_STEP, OUTPUT_MIN, SLAT_ANGLE_MAX, SLAT_POSITION_MAX,
    SLAT_POSITION_STEP, clamp, percent_of, scene,
};
use crate::model::update::coalesce;
use crate::model::{
    Device, DeviceStateUpdate, Dsid, OutputMode, SensorReading, SensorRefresh,
};
use crate::scene::activation::apply_device_scene;
use crate::scene::{EchoAction, EchoTarget};

/// What happened to one drained command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    /// Remote call confirmed and local state updated.
    Sent,
    /// No observable effect; nothing sent.
    Skipped,
    /// Turned into a background job (or a job cancellation).
    Scheduled,
}

/// Drain and dispatch every pending command of one device.
///
/// Returns the number of confirmed remote calls.
pub(crate) async fn drain_device(engine: &EngineInner, dsid: &Dsid) -> usize {
    let Some(pending) = engine.registry.update_device(dsid, Device::take_pending) else {
        return 0;
    };
    if pending.is_empty() {
        return 0;
    }
    let current_angle = engine.registry.device(dsid).map_or(0, |d| d.slat_angle());
    let queued = pending.len();
    let plan = coalesce(pending, current_angle);
    if plan.len() < queued {
        debug!(device = %dsid, queued, dispatching = plan.len(), "coalesced commands");
    }

    let mut sent = 0;
    let mut remaining = plan.into_iter();
    while let Some(update) = remaining.next() {
        match dispatch(engine, dsid, update).await {
            Ok(Dispatched::Sent) => sent += 1,
            Ok(Dispatched::Skipped | Dispatched::Scheduled) => {}
            Err(e) if is_connectivity(&e) => {
                let mut rest = vec![update];
                rest.extend(remaining);
                warn!(device = %dsid, error = %e, requeued = rest.len(), "dispatch interrupted, commands requeued");
                engine
                    .registry
                    .update_device(dsid, |d| d.requeue_front(rest));
                break;
            }
            Err(e) => {
                warn!(device = %dsid, ?update, error = %e, "command dropped");
            }
        }
    }
    sent
}

fn is_connectivity(err: &CoreError) -> bool {
    matches!(err, CoreError::NotConnected) || err.connection_lost_reason().is_some()
}

/// Dispatch one (already coalesced) command.
#[allow(clippy::too_many_lines)]
pub(crate) async fn dispatch(
    engine: &EngineInner,
    dsid: &Dsid,
    update: DeviceStateUpdate,
) -> Result<Dispatched, CoreError> {
    let Some(device) = engine.registry.device(dsid) else {
        debug!(device = %dsid, "device vanished before dispatch");
        return Ok(Dispatched::Skipped);
    };
    let client = engine.connection.client();
    let id = dsid.as_str();

    match update {
        // ── Brightness ──────────────────────────────────────────────
        DeviceStateUpdate::SetOutput(value) => {
            require(&device, device.output_mode.is_light(), "brightness")?;
            set_output(engine, &device, i64::from(value)).await
        }
        DeviceStateUpdate::SetOutputPercent(percent) => {
            require(&device, device.output_mode.is_light(), "brightness")?;
            let value = percent_of(BRIGHTNESS_MAX, percent);
            set_output(engine, &device, i64::from(value)).await
        }
        DeviceStateUpdate::IncreaseOutput | DeviceStateUpdate::DecreaseOutput => {
            require(&device, device.output_mode == OutputMode::Dimmable, "dimming")?;
            let up = update == DeviceStateUpdate::IncreaseOutput;
            let current = device.output_value();
            if (up && current >= BRIGHTNESS_MAX) || (!up && current <= OUTPUT_MIN) {
                return Ok(skipped(dsid, update));
            }
            let delta = signed(BRIGHTNESS_STEP, up);
            let echo = EchoAction::CallScene(if up { scene::INCREMENT } else { scene::DECREMENT });
            send(engine, dsid, Some(echo), || step(client, id, up)).await?;
            let target = clamp(i64::from(current) + delta, OUTPUT_MIN, BRIGHTNESS_MAX);
            confirm(engine, dsid, DeviceStateUpdate::SetOutput(target), |d| {
                d.set_output_value(i64::from(target));
            });
            Ok(Dispatched::Sent)
        }
        DeviceStateUpdate::OnOff(on) => {
            require(&device, device.output_mode.is_light(), "switching")?;
            if device.is_on() == on {
                return Ok(skipped(dsid, update));
            }
            let echo = EchoAction::CallScene(if on { scene::MAX } else { scene::MIN });
            send(engine, dsid, Some(echo), || switch(client, id, on)).await?;
            let target = if on { BRIGHTNESS_MAX } else { OUTPUT_MIN };
            confirm(engine, dsid, update, |d| {
                d.set_output_value(i64::from(target));
            });
            if !on {
                switched_off(engine, dsid);
            }
            Ok(Dispatched::Sent)
        }

        // ── Shades ──────────────────────────────────────────────────
        DeviceStateUpdate::OpenClose(open) => {
            require(&device, device.output_mode.is_shade(), "open/close")?;
            let target = if open { SLAT_POSITION_MAX } else { OUTPUT_MIN };
            if device.slat_position() == target {
                return Ok(skipped(dsid, update));
            }
            let echo = EchoAction::CallScene(if open { scene::MAX } else { scene::MIN });
            send(engine, dsid, Some(echo), || switch(client, id, open)).await?;
            confirm(engine, dsid, update, |d| {
                d.set_slat_position(i64::from(target));
            });
            Ok(Dispatched::Sent)
        }
        DeviceStateUpdate::SetSlatPosition(value) => {
            require(&device, device.output_mode.is_shade(), "slat position")?;
            let target = clamp(i64::from(value), OUTPUT_MIN, SLAT_POSITION_MAX);
            if device.slat_position() == target {
                return Ok(skipped(dsid, update));
            }
            send(engine, dsid, None, || {
                client.set_output_value(id, OFFSET_SLAT_POSITION, target)
            })
            .await?;
            confirm(engine, dsid, DeviceStateUpdate::SetSlatPosition(target), |d| {
                d.set_slat_position(i64::from(target));
            });
            Ok(Dispatched::Sent)
        }
        DeviceStateUpdate::IncreaseSlatPosition | DeviceStateUpdate::DecreaseSlatPosition => {
            require(&device, device.output_mode.is_shade(), "slat position")?;
            let up = update == DeviceStateUpdate::IncreaseSlatPosition;
            let current = device.slat_position();
            if (up && current >= SLAT_POSITION_MAX) || (!up && current <= OUTPUT_MIN) {
                return Ok(skipped(dsid, update));
            }
            let echo = EchoAction::CallScene(if up { scene::INCREMENT } else { scene::DECREMENT });
            send(engine, dsid, Some(echo), || step(client, id, up)).await?;
            let target = clamp(
                i64::from(current) + signed(SLAT_POSITION_STEP, up),
                OUTPUT_MIN,
                SLAT_POSITION_MAX,
            );
            confirm(engine, dsid, DeviceStateUpdate::SetSlatPosition(target), |d| {
                d.set_slat_position(i64::from(target));
            });
            Ok(Dispatched::Sent)
        }
        DeviceStateUpdate::SetSlatAngle(value) => {
            set_slat_angle(engine, &device, i64::from(value)).await
        }
        DeviceStateUpdate::StepSlatAngle(delta) => {
            set_slat_angle(engine, &device, i64::from(device.slat_angle()) + i64::from(delta))
                .await
        }

        // ── Scenes ──────────────────────────────────────────────────
        DeviceStateUpdate::CallScene(scene_no) => {
            send(engine, dsid, Some(EchoAction::CallScene(scene_no)), || {
                client.call_device_scene(id, scene_no, true)
            })
            .await?;
            apply_device_scene(engine, dsid, scene_no, false);
            Ok(Dispatched::Sent)
        }
        DeviceStateUpdate::UndoScene(scene_no) => {
            send(engine, dsid, Some(EchoAction::UndoScene(scene_no)), || {
                client.undo_device_scene(id, scene_no)
            })
            .await?;
            apply_device_scene(engine, dsid, scene_no, true);
            Ok(Dispatched::Sent)
        }

        // ── Background reads ────────────────────────────────────────
        DeviceStateUpdate::Sensor {
            sensor,
            action: SensorRefresh::Schedule,
        } => {
            let priority = device.refresh_priority(sensor);
            if !engine.schedule_sensor(dsid, sensor, priority) {
                debug!(device = %dsid, %sensor, %priority, "sensor refresh not scheduled");
            }
            Ok(Dispatched::Scheduled)
        }
        DeviceStateUpdate::Sensor {
            sensor,
            action: SensorRefresh::Cancel,
        } => {
            engine.jobs.cancel(&JobKey::Sensor {
                device: dsid.clone(),
                sensor,
            });
            Ok(Dispatched::Scheduled)
        }
        DeviceStateUpdate::RefreshSceneConfig(scene_no) => {
            engine.schedule_scene_config(dsid, scene_no);
            Ok(Dispatched::Scheduled)
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn set_output(
    engine: &EngineInner,
    device: &Device,
    value: i64,
) -> Result<Dispatched, CoreError> {
    let dsid = &device.dsid;
    let target = clamp(value, OUTPUT_MIN, BRIGHTNESS_MAX);
    if device.output_value() == target {
        return Ok(skipped(dsid, DeviceStateUpdate::SetOutput(target)));
    }
    let client = engine.connection.client();
    send(engine, dsid, None, || client.set_value(dsid.as_str(), target)).await?;
    confirm(engine, dsid, DeviceStateUpdate::SetOutput(target), |d| {
        d.set_output_value(i64::from(target));
    });
    if target == OUTPUT_MIN {
        switched_off(engine, dsid);
    }
    Ok(Dispatched::Sent)
}

async fn set_slat_angle(
    engine: &EngineInner,
    device: &Device,
    value: i64,
) -> Result<Dispatched, CoreError> {
    require(
        device,
        device.output_mode == OutputMode::ShadeWithAngle,
        "slat angle",
    )?;
    let dsid = &device.dsid;
    let target = clamp(value, OUTPUT_MIN, SLAT_ANGLE_MAX);
    if device.slat_angle() == target {
        return Ok(skipped(dsid, DeviceStateUpdate::SetSlatAngle(target)));
    }
    let client = engine.connection.client();
    send(engine, dsid, None, || {
        client.set_output_value(dsid.as_str(), OFFSET_SLAT_ANGLE, target)
    })
    .await?;
    confirm(engine, dsid, DeviceStateUpdate::SetSlatAngle(target), |d| {
        d.set_slat_angle(i64::from(target));
    });
    Ok(Dispatched::Sent)
}

async fn step(client: &DssClient, dsid: &str, up: bool) -> Result<(), ApiError> {
    if up {
        client.increase_value(dsid).await
    } else {
        client.decrease_value(dsid).await
    }
}

async fn switch(client: &DssClient, dsid: &str, on: bool) -> Result<(), ApiError> {
    if on {
        client.turn_on(dsid).await
    } else {
        client.turn_off(dsid).await
    }
}

/// Issue one remote command, recording its echo marker first and
/// withdrawing it if the command fails.
async fn send<F, Fut>(
    engine: &EngineInner,
    dsid: &Dsid,
    echo: Option<EchoAction>,
    op: F,
) -> Result<(), CoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), ApiError>>,
{
    let target = EchoTarget::Device(dsid.clone());
    if let Some(action) = echo {
        engine.scenes.echoes.record(target.clone(), action);
    }
    let result = engine.connection.call(op).await;
    if let (Err(_), Some(action)) = (&result, echo) {
        engine.scenes.echoes.withdraw(&target, action);
    }
    result
}

/// Apply a confirmed change locally and notify the host.
fn confirm(
    engine: &EngineInner,
    dsid: &Dsid,
    update: DeviceStateUpdate,
    apply: impl FnOnce(&mut Device),
) {
    engine.registry.update_device(dsid, apply);
    if let Some(device) = engine.registry.device(dsid) {
        debug!(device = %dsid, ?update, "command confirmed");
        engine.listener.on_device_state_changed(&device, &update);
    }
}

/// Output went to zero: stop polling power sensors and record zero readings.
fn switched_off(engine: &EngineInner, dsid: &Dsid) {
    let Some(device) = engine.registry.device(dsid) else {
        return;
    };
    let now = Utc::now();
    for sensor in device.sensor_types.iter().copied().filter(|s| s.follows_output()) {
        engine.jobs.cancel(&JobKey::Sensor {
            device: dsid.clone(),
            sensor,
        });
        let reading = SensorReading::new(0.0, now);
        engine
            .registry
            .update_device(dsid, |d| d.record_sensor(sensor, reading));
        if let Some(device) = engine.registry.device(dsid) {
            engine.listener.on_sensor_value(&device, sensor, &reading);
        }
    }
}

fn require(device: &Device, supported: bool, what: &str) -> Result<(), CoreError> {
    if supported {
        Ok(())
    } else {
        Err(CoreError::Unsupported {
            dsid: device.dsid.to_string(),
            message: format!("{what} on a {} output", device.output_mode),
        })
    }
}

fn skipped(dsid: &Dsid, update: DeviceStateUpdate) -> Dispatched {
    debug!(device = %dsid, ?update, "no observable effect, skipped");
    Dispatched::Skipped
}

fn signed(step: u16, up: bool) -> i64 {
    if up {
        i64::from(step)
    } else {
        -i64::from(step)
    }
}
