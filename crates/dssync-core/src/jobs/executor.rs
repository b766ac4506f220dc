// ── Background job worker ──
//
// Runs queued reads one at a time, independent of the tick cadence, with
// a pause between jobs so slow reads never crowd out command dispatch.
// Jobs only run while connected; a job interrupted by a connection loss
// goes back on the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::model::{Dsid, MeterReading, MeteringKind, SceneConfig, SensorReading, SensorType};

use super::queue::{JobKey, JobPriority};

/// Upper bound on how long the worker sleeps without a push notification,
/// so jobs queued while disconnected run soon after the connection returns.
const IDLE_RECHECK: Duration = Duration::from_secs(5);

pub(crate) async fn run(engine: Arc<EngineInner>, cancel: CancellationToken) {
    debug!("job worker started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = engine.jobs.notified() => {}
            () = tokio::time::sleep(IDLE_RECHECK) => {}
        }

        while engine.connection.is_connected() {
            let Some(job) = engine.jobs.pop() else {
                break;
            };
            trace!(?job, remaining = engine.jobs.len(), "running job");
            if let Err(e) = execute(&engine, &job).await {
                if is_retryable(&e) {
                    debug!(?job, error = %e, "job interrupted, requeued");
                    requeue(&engine, job);
                    break;
                }
                warn!(?job, error = %e, "job failed");
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(engine.config.job_spacing) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!("job worker stopped");
}

fn is_retryable(err: &CoreError) -> bool {
    matches!(err, CoreError::NotConnected) || err.connection_lost_reason().is_some()
}

/// Put an interrupted job back at the priority it would be scheduled with now.
fn requeue(engine: &EngineInner, job: JobKey) {
    if let Some(priority) = current_priority(engine, &job) {
        engine.jobs.push(job, priority);
    }
}

fn current_priority(engine: &EngineInner, job: &JobKey) -> Option<JobPriority> {
    match job {
        JobKey::Sensor { device, sensor } => engine
            .registry
            .device(device)?
            .refresh_priority(*sensor)
            .job_priority(),
        JobKey::SceneConfig { .. } => engine.config.scene_config_priority.job_priority(),
        JobKey::Metering { .. } => engine.config.metering_priority.job_priority(),
    }
}

pub(crate) async fn execute(engine: &EngineInner, job: &JobKey) -> Result<(), CoreError> {
    match job {
        JobKey::Sensor { device, sensor } => read_sensor(engine, device, *sensor).await,
        JobKey::SceneConfig { device, scene } => read_scene_config(engine, device, *scene).await,
        JobKey::Metering { circuit, kind } => read_metering(engine, circuit, *kind).await,
    }
}

async fn read_sensor(engine: &EngineInner, dsid: &Dsid, sensor: SensorType) -> Result<(), CoreError> {
    if !engine.registry.contains_device(dsid) {
        return Ok(());
    }
    let client = engine.connection.client();
    let value = engine
        .connection
        .call(|| client.get_sensor_value(dsid.as_str(), sensor.0))
        .await?;

    let reading = SensorReading::new(value.sensor_value, Utc::now());
    engine
        .registry
        .update_device(dsid, |d| d.record_sensor(sensor, reading));
    if let Some(device) = engine.registry.device(dsid) {
        debug!(device = %dsid, %sensor, value = reading.value, "sensor read");
        engine.listener.on_sensor_value(&device, sensor, &reading);
    }
    Ok(())
}

async fn read_scene_config(engine: &EngineInner, dsid: &Dsid, scene: u8) -> Result<(), CoreError> {
    if !engine.registry.contains_device(dsid) {
        return Ok(());
    }
    let client = engine.connection.client();
    let value = engine
        .connection
        .call(|| client.get_scene_value(dsid.as_str(), scene))
        .await?;

    let config = SceneConfig {
        value: value.value,
        angle: value.angle,
    };
    engine
        .registry
        .update_device(dsid, |d| d.set_scene_config(scene, config));
    if let Some(device) = engine.registry.device(dsid) {
        debug!(device = %dsid, scene, value = config.value, "scene configuration read");
        engine.listener.on_device_config_changed(&device);
    }
    Ok(())
}

async fn read_metering(
    engine: &EngineInner,
    circuit: &Dsid,
    kind: MeteringKind,
) -> Result<(), CoreError> {
    if engine.registry.circuit(circuit).is_none() {
        return Ok(());
    }
    let client = engine.connection.client();
    let latest = engine
        .connection
        .call(|| client.get_latest_metering(circuit.as_str(), kind.wire_type(), kind.unit()))
        .await?;
    let Some(latest) = latest else {
        debug!(circuit = %circuit, %kind, "no metering value reported");
        return Ok(());
    };

    let reading = MeterReading {
        value: latest.value,
        timestamp: latest.timestamp,
    };
    let updated = engine
        .registry
        .update_circuit(circuit, |c| c.record(kind, reading))
        .unwrap_or(false);
    if updated {
        if let Some(circuit) = engine.registry.circuit(circuit) {
            engine.listener.on_circuit_updated(&circuit);
        }
    }
    Ok(())
}
