// ── Host callbacks ──
//
// The embedding host (UI/plugin layer) observes the engine through
// `EngineListener`. Callbacks run synchronously on whichever task
// produced the change (reconciliation tick, event feed or job worker)
// and must return quickly.

use crate::connection::ConnectionEvent;
use crate::model::{
    BinaryInput, Circuit, Device, DeviceStateUpdate, InternalScene, SensorReading, SensorType,
};

/// Engine-wide discovery and state callbacks. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait EngineListener: Send + Sync {
    fn on_device_added(&self, device: &Device) {}

    fn on_device_removed(&self, device: &Device) {}

    /// A confirmed state change, carrying the effective update.
    fn on_device_state_changed(&self, device: &Device, update: &DeviceStateUpdate) {}

    /// Presence, metering circuit, group, output mode, binary inputs or a
    /// scene configuration changed.
    fn on_device_config_changed(&self, device: &Device) {}

    fn on_sensor_value(&self, device: &Device, sensor: SensorType, reading: &SensorReading) {}

    fn on_binary_input_changed(&self, device: &Device, input: &BinaryInput) {}

    fn on_circuit_added(&self, circuit: &Circuit) {}

    fn on_circuit_updated(&self, circuit: &Circuit) {}

    fn on_scene_added(&self, scene: &InternalScene) {}

    fn on_scene_state_changed(&self, scene: &InternalScene) {}

    /// Every device of the scene's zone/group is gone for good.
    fn on_scene_removed(&self, scene: &InternalScene) {}

    fn on_connection_event(&self, event: &ConnectionEvent) {}
}

/// Listener that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EngineListener for NoopListener {}

/// Per-scene observer, registered for one scene id.
pub trait SceneListener: Send + Sync {
    fn scene_state_changed(&self, scene: &InternalScene);

    fn scene_removed(&self, scene: &InternalScene) {
        let _ = scene;
    }
}
