// Host-side engine listener: logs every callback and persists freshly
// minted application tokens through the config crate.

use std::path::PathBuf;
use std::sync::Mutex;

use secrecy::SecretString;
use tracing::{debug, error, info, warn};

use dssync_config::{Config, TokenStorage, store_application_token};
use dssync_core::{
    BinaryInput, Circuit, ConnectionEvent, Device, DeviceStateUpdate, EngineListener,
    InternalScene, SensorReading, SensorType,
};

pub struct DaemonListener {
    config: Mutex<Config>,
    config_path: PathBuf,
    profile: String,
}

impl DaemonListener {
    pub fn new(config: Config, config_path: PathBuf, profile: String) -> Self {
        Self {
            config: Mutex::new(config),
            config_path,
            profile,
        }
    }

    fn persist_token(&self, token: &SecretString) {
        let mut config = self.config.lock().expect("config lock poisoned");
        match store_application_token(&mut config, &self.config_path, &self.profile, token) {
            Ok(TokenStorage::Keyring) => {
                info!(profile = %self.profile, "application token stored in keyring");
            }
            Ok(TokenStorage::ConfigFile) => warn!(
                profile = %self.profile,
                path = %self.config_path.display(),
                "no keyring available, application token written to config file"
            ),
            Err(e) => error!(profile = %self.profile, error = %e, "failed to store application token"),
        }
    }
}

impl EngineListener for DaemonListener {
    fn on_device_added(&self, device: &Device) {
        info!(device = %device.dsid, name = %device.name, mode = %device.output_mode, "device added");
    }

    fn on_device_removed(&self, device: &Device) {
        info!(device = %device.dsid, name = %device.name, "device removed");
    }

    fn on_device_state_changed(&self, device: &Device, update: &DeviceStateUpdate) {
        info!(device = %device.dsid, ?update, output = device.main_output(), "device state changed");
    }

    fn on_device_config_changed(&self, device: &Device) {
        debug!(device = %device.dsid, present = device.is_present, "device configuration changed");
    }

    fn on_sensor_value(&self, device: &Device, sensor: SensorType, reading: &SensorReading) {
        debug!(device = %device.dsid, %sensor, value = reading.value, "sensor value");
    }

    fn on_binary_input_changed(&self, device: &Device, input: &BinaryInput) {
        info!(device = %device.dsid, input = input.input_id, state = ?input.state, "binary input changed");
    }

    fn on_circuit_added(&self, circuit: &Circuit) {
        info!(circuit = %circuit.dsid, name = %circuit.name, "circuit added");
    }

    fn on_circuit_updated(&self, circuit: &Circuit) {
        debug!(circuit = %circuit.dsid, "circuit updated");
    }

    fn on_scene_added(&self, scene: &InternalScene) {
        debug!(scene = %scene.id, name = %scene.name, "scene added");
    }

    fn on_scene_state_changed(&self, scene: &InternalScene) {
        info!(scene = %scene.id, name = %scene.name, active = scene.active, "scene state changed");
    }

    fn on_scene_removed(&self, scene: &InternalScene) {
        info!(scene = %scene.id, name = %scene.name, "scene removed");
    }

    fn on_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Lost(reason) => warn!(%reason, "connection lost"),
            ConnectionEvent::Resumed => info!("connection resumed"),
            ConnectionEvent::TokenGenerated(token) => self.persist_token(token),
        }
    }
}
