// Per-device imperative calls and reads
//
// Every command is addressed by the device dSID. Commands return `()`
// once the server confirmed them with `ok:true`; the caller applies the
// local state change only after that.

use crate::client::DssClient;
use crate::error::Error;
use crate::models::{SceneValue, SensorValue};

/// `setOutputValue` offset of the slat position channel.
pub const OFFSET_SLAT_POSITION: u16 = 2;
/// `setOutputValue` offset of the slat angle channel.
pub const OFFSET_SLAT_ANGLE: u16 = 4;

impl DssClient {
    pub async fn turn_on(&self, dsid: &str) -> Result<(), Error> {
        self.command("device/turnOn", &[("dsid", dsid.to_owned())])
            .await
    }

    pub async fn turn_off(&self, dsid: &str) -> Result<(), Error> {
        self.command("device/turnOff", &[("dsid", dsid.to_owned())])
            .await
    }

    /// Set the main output to an absolute value.
    pub async fn set_value(&self, dsid: &str, value: u16) -> Result<(), Error> {
        self.command(
            "device/setValue",
            &[("dsid", dsid.to_owned()), ("value", value.to_string())],
        )
        .await
    }

    pub async fn increase_value(&self, dsid: &str) -> Result<(), Error> {
        self.command("device/increaseValue", &[("dsid", dsid.to_owned())])
            .await
    }

    pub async fn decrease_value(&self, dsid: &str) -> Result<(), Error> {
        self.command("device/decreaseValue", &[("dsid", dsid.to_owned())])
            .await
    }

    /// Set a sub-output channel (see [`OFFSET_SLAT_POSITION`], [`OFFSET_SLAT_ANGLE`]).
    pub async fn set_output_value(&self, dsid: &str, offset: u16, value: u16) -> Result<(), Error> {
        self.command(
            "device/setOutputValue",
            &[
                ("dsid", dsid.to_owned()),
                ("offset", offset.to_string()),
                ("value", value.to_string()),
            ],
        )
        .await
    }

    pub async fn call_device_scene(&self, dsid: &str, scene: u8, force: bool) -> Result<(), Error> {
        self.command(
            "device/callScene",
            &[
                ("dsid", dsid.to_owned()),
                ("sceneNumber", scene.to_string()),
                ("force", force.to_string()),
            ],
        )
        .await
    }

    pub async fn undo_device_scene(&self, dsid: &str, scene: u8) -> Result<(), Error> {
        self.command(
            "device/undoScene",
            &[("dsid", dsid.to_owned()), ("sceneNumber", scene.to_string())],
        )
        .await
    }

    /// Read one sensor value of a device.
    pub async fn get_sensor_value(&self, dsid: &str, sensor_type: u8) -> Result<SensorValue, Error> {
        self.call_typed(
            "device/getSensorValue",
            &[
                ("dsid", dsid.to_owned()),
                ("sensorType", sensor_type.to_string()),
            ],
        )
        .await
    }

    /// Read the stored output configuration of one scene.
    pub async fn get_scene_value(&self, dsid: &str, scene: u8) -> Result<SceneValue, Error> {
        self.call_typed(
            "device/getSceneValue",
            &[("dsid", dsid.to_owned()), ("sceneID", scene.to_string())],
        )
        .await
    }
}
