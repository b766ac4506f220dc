//! Device synchronization engine for a digitalSTROM-style home-automation
//! server.
//!
//! Keeps a local model of every device, metering circuit and scene in sync
//! with the server and turns host requests into remote calls:
//!
//! - **[`Engine`]**: composition root. [`start()`](Engine::start) spawns the
//!   periodic reconciliation tick, the background job worker and the event
//!   feed listener; [`stop()`](Engine::stop) tears them down and keeps the
//!   registry for a restart.
//!
//! - **[`ConnectionManager`]**: session lifecycle and the connectivity gate
//!   every remote call passes through. Mints and reports application tokens
//!   when only credentials are configured.
//!
//! - **[`StructureRegistry`]** and **[`Trash`]**: in-memory inventory built on
//!   `DashMap` + `tokio::sync::watch` snapshots, with deferred deletion of
//!   devices that vanish from the server.
//!
//! - **[`DeviceStateUpdate`]**: typed commands queued on a device, coalesced
//!   and dispatched by the next tick. Local state changes only after the
//!   server confirmed the call.
//!
//! - **[`SceneManager`]**: scene discovery, activation state and the echo
//!   ledger that keeps the engine's own scene calls from being applied twice
//!   when the server pushes them back.
//!
//! - **[`JobQueue`]**: priority-ordered background reads (sensor values,
//!   scene configurations, circuit metering).
//!
//! The host observes everything through [`EngineListener`].

pub mod config;
pub mod connection;
mod convert;
mod dispatch;
pub mod engine;
pub mod error;
mod feed;
pub mod jobs;
pub mod listener;
pub mod model;
mod reconcile;
pub mod scene;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthCredentials, EngineConfig, SensorPriorities, TlsVerification};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use engine::Engine;
pub use error::{AuthFailure, CoreError, LostReason};
pub use jobs::{JobKey, JobPriority, JobQueue, RefreshPriority};
pub use listener::{EngineListener, NoopListener, SceneListener};
pub use reconcile::TickReport;
pub use scene::{SceneCall, SceneManager};
pub use store::{StructureRegistry, Trash};

pub use model::{
    BinaryInput, Circuit, Device, DeviceStateUpdate, Dsid, InternalScene, MeterReading,
    MeteringKind, OutputMode, SceneConfig, SceneId, SensorReading, SensorRefresh, SensorType,
};
