// ── Event feed listener ──
//
// Long-polls the server's event queue and routes pushed events into the
// scene manager and device state. Runs only while connected; after an
// error it waits with exponential backoff and subscribes again. On
// shutdown it unsubscribes before exiting.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use dssync_api::DssEvent;
use dssync_api::event::{
    EVENT_BINARY_INPUT, EVENT_CALL_SCENE, EVENT_SENSOR_VALUE, EVENT_UNDO_SCENE, SUBSCRIBED_EVENTS,
};

use crate::connection::ConnectionState;
use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::jobs::JobKey;
use crate::model::{Dsid, SensorReading, SensorType};
use crate::scene::activation::handle_scene_event;

/// Exponential backoff for re-subscribing after a feed failure.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// `min(initial * 2^attempt, max)`, spread by a deterministic +-25% jitter.
pub(crate) fn calculate_backoff(attempt: u32, config: &Backoff) -> Duration {
    let exponent = i32::try_from(attempt.min(31)).unwrap_or(31);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

/// Subscription ids only need to differ between concurrent clients.
fn subscription_id() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    (std::process::id() ^ nanos) % 1_000_000 + 1
}

pub(crate) async fn run(engine: Arc<EngineInner>, cancel: CancellationToken) {
    let subscription = subscription_id();
    let backoff = Backoff::default();
    let mut attempt: u32 = 0;
    let mut subscribed = false;
    debug!(subscription, "event feed started");

    loop {
        if !engine.connection.is_connected() {
            let mut state = engine.connection.subscribe();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = state.wait_for(|s| *s == ConnectionState::Connected) => {
                    // The server may have dropped the subscription with the session.
                    subscribed = false;
                }
            }
            continue;
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = poll_once(&engine, subscription, &mut subscribed) => r,
        };

        match result {
            Ok(count) => {
                if count > 0 {
                    trace!(count, "events processed");
                }
                attempt = 0;
            }
            Err(e) => {
                subscribed = false;
                let delay = calculate_backoff(attempt, &backoff);
                warn!(error = %e, attempt, delay_ms = delay.as_millis(), "event feed failed, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    if subscribed && engine.connection.is_connected() {
        unsubscribe(&engine, subscription).await;
    }
    debug!("event feed stopped");
}

async fn poll_once(
    engine: &EngineInner,
    subscription: u32,
    subscribed: &mut bool,
) -> Result<usize, CoreError> {
    if !*subscribed {
        subscribe(engine, subscription).await?;
        *subscribed = true;
    }
    let client = engine.connection.client();
    let timeout = engine.config.event_poll_timeout;
    let events = engine
        .connection
        .call(|| client.poll_events(subscription, timeout))
        .await?;
    for event in &events {
        handle_event(engine, event);
    }
    Ok(events.len())
}

async fn subscribe(engine: &EngineInner, subscription: u32) -> Result<(), CoreError> {
    let client = engine.connection.client();
    for name in SUBSCRIBED_EVENTS {
        engine
            .connection
            .call(|| client.subscribe_event(name, subscription))
            .await?;
    }
    info!(subscription, "subscribed to event feed");
    Ok(())
}

async fn unsubscribe(engine: &EngineInner, subscription: u32) {
    let client = engine.connection.client();
    for name in SUBSCRIBED_EVENTS {
        if let Err(e) = engine
            .connection
            .call(|| client.unsubscribe_event(name, subscription))
            .await
        {
            debug!(event = name, error = %e, "unsubscribe failed (non-fatal)");
        }
    }
    debug!(subscription, "unsubscribed from event feed");
}

// ── Event routing ────────────────────────────────────────────────────

pub(crate) fn handle_event(engine: &EngineInner, event: &DssEvent) {
    match event.name.as_str() {
        EVENT_CALL_SCENE => handle_scene_event(engine, event, false),
        EVENT_UNDO_SCENE => handle_scene_event(engine, event, true),
        EVENT_SENSOR_VALUE => sensor_value(engine, event),
        EVENT_BINARY_INPUT => binary_input(engine, event),
        other => trace!(event = other, "unhandled event"),
    }
}

fn event_device(engine: &EngineInner, event: &DssEvent) -> Option<Dsid> {
    let dsid = Dsid::from(event.source.dsid.as_deref()?);
    if engine.registry.contains_device(&dsid) {
        Some(dsid)
    } else {
        trace!(device = %dsid, event = %event.name, "event for unknown device");
        None
    }
}

fn sensor_value(engine: &EngineInner, event: &DssEvent) {
    let Some(dsid) = event_device(engine, event) else {
        return;
    };
    let sensor = event
        .property_u16("sensorType")
        .and_then(|t| u8::try_from(t).ok())
        .map(SensorType);
    let value = event
        .property_f64("sensorValueFloat")
        .or_else(|| event.property_f64("sensorValue"));
    let (Some(sensor), Some(value)) = (sensor, value) else {
        debug!(device = %dsid, "sensor event without type or value");
        return;
    };

    let reading = SensorReading::new(value, Utc::now());
    engine
        .registry
        .update_device(&dsid, |d| d.record_sensor(sensor, reading));
    // A pushed value makes a queued read redundant.
    engine.jobs.cancel(&JobKey::Sensor {
        device: dsid.clone(),
        sensor,
    });
    if let Some(device) = engine.registry.device(&dsid) {
        trace!(device = %dsid, %sensor, value, "sensor value pushed");
        engine.listener.on_sensor_value(&device, sensor, &reading);
    }
}

fn binary_input(engine: &EngineInner, event: &DssEvent) {
    let Some(dsid) = event_device(engine, event) else {
        return;
    };
    let (Some(index), Some(state)) = (
        event.property_u16("inputIndex"),
        event.property_u16("inputState"),
    ) else {
        debug!(device = %dsid, "binary input event without index or state");
        return;
    };
    let state = state != 0;

    let changed = engine.registry.update_device(&dsid, |d| {
        let input = d.binary_inputs.iter_mut().find(|i| i.input_id == index)?;
        if input.state == Some(state) {
            return None;
        }
        input.state = Some(state);
        Some(input.clone())
    });
    if let (Some(Some(input)), Some(device)) = (changed, engine.registry.device(&dsid)) {
        debug!(device = %dsid, input = index, state, "binary input changed");
        engine.listener.on_binary_input_changed(&device, &input);
    }
}
