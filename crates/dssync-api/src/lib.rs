//! Async client for the digitalSTROM server JSON API.
//!
//! [`DssClient`] wraps every endpoint the sync engine needs: session login
//! with an application token or credentials, inventory snapshots, device
//! and zone commands, sensor/scene/metering reads, and the long-poll event
//! feed. Responses are unwrapped from the `{ ok, result, message }`
//! envelope; inventory records are decoded field by field (see [`models`]).

mod apartment;
mod auth;
pub mod client;
pub mod device;
pub mod error;
pub mod event;
mod metering;
pub mod models;
pub mod transport;
mod zone;

pub use client::DssClient;
pub use error::Error;
pub use models::{
    DssEvent, EventSource, FieldIssue, MeterValue, ReachableScenes, RemoteBinaryInput,
    RemoteCircuit, RemoteDevice, RemoteGroup, RemoteZone, SceneValue, SensorValue,
};
pub use transport::{TlsMode, TransportConfig};
