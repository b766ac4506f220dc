// Event feed wire calls
//
// The server's push mechanism is a subscription id plus long-poll `get`
// requests that block server-side until events arrive or the poll
// timeout elapses. Reconnect and dispatch policy live in the engine.

use std::time::Duration;

use tracing::trace;

use crate::client::DssClient;
use crate::error::Error;
use crate::models::{DssEvent, decode_events};

/// Event names the engine subscribes to.
pub const EVENT_CALL_SCENE: &str = "callScene";
pub const EVENT_UNDO_SCENE: &str = "undoScene";
pub const EVENT_SENSOR_VALUE: &str = "deviceSensorValue";
pub const EVENT_BINARY_INPUT: &str = "deviceBinaryInputEvent";

pub const SUBSCRIBED_EVENTS: [&str; 4] = [
    EVENT_CALL_SCENE,
    EVENT_UNDO_SCENE,
    EVENT_SENSOR_VALUE,
    EVENT_BINARY_INPUT,
];

impl DssClient {
    pub async fn subscribe_event(&self, name: &str, subscription_id: u32) -> Result<(), Error> {
        self.command(
            "event/subscribe",
            &[
                ("name", name.to_owned()),
                ("subscriptionID", subscription_id.to_string()),
            ],
        )
        .await
    }

    pub async fn unsubscribe_event(&self, name: &str, subscription_id: u32) -> Result<(), Error> {
        self.command(
            "event/unsubscribe",
            &[
                ("name", name.to_owned()),
                ("subscriptionID", subscription_id.to_string()),
            ],
        )
        .await
    }

    /// Long-poll for events. An empty vec means the poll timed out quietly.
    pub async fn poll_events(
        &self,
        subscription_id: u32,
        timeout: Duration,
    ) -> Result<Vec<DssEvent>, Error> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let value = self
            .call_with_timeout(
                "event/get",
                &[
                    ("subscriptionID", subscription_id.to_string()),
                    ("timeout", millis.to_string()),
                ],
                timeout,
            )
            .await?;
        let events = decode_events(&value);
        trace!(count = events.len(), "event poll returned");
        Ok(events)
    }
}
