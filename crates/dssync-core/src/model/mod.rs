// ── Domain model ──

pub mod circuit;
pub mod device;
pub mod ids;
pub mod output;
pub mod scene;
pub mod sensor;
pub mod update;

pub use circuit::{Circuit, MeterReading};
pub use device::{BinaryInput, Device, SceneConfig, SceneEffect};
pub use ids::{Dsid, SceneId};
pub use output::OutputMode;
pub use scene::InternalScene;
pub use sensor::{MeteringKind, SensorReading, SensorType};
pub use update::{DeviceStateUpdate, SensorRefresh};
