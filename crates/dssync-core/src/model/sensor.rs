// ── Sensors and metering ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric sensor type code as used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorType(pub u8);

impl SensorType {
    pub const ACTIVE_POWER: Self = Self(4);
    pub const OUTPUT_CURRENT: Self = Self(5);
    pub const ELECTRIC_METER: Self = Self(6);
    pub const ROOM_TEMPERATURE: Self = Self(9);
    pub const OUTDOOR_TEMPERATURE: Self = Self(10);
    pub const ROOM_HUMIDITY: Self = Self(13);

    /// Readings of these sensors drop to zero while the output is off.
    pub fn follows_output(self) -> bool {
        matches!(self, Self::ACTIVE_POWER | Self::OUTPUT_CURRENT)
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::ACTIVE_POWER => Some("active-power"),
            Self::OUTPUT_CURRENT => Some("output-current"),
            Self::ELECTRIC_METER => Some("electric-meter"),
            Self::ROOM_TEMPERATURE => Some("room-temperature"),
            Self::OUTDOOR_TEMPERATURE => Some("outdoor-temperature"),
            Self::ROOM_HUMIDITY => Some("room-humidity"),
            _ => None,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "sensor-{}", self.0),
        }
    }
}

/// One typed sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: f64,
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            valid: value.is_finite(),
            timestamp,
        }
    }

    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp >= max_age
    }
}

/// Metering quantity of a circuit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum MeteringKind {
    /// Instantaneous power in W.
    Consumption,
    /// Accumulated energy in Wh.
    Energy,
}

impl MeteringKind {
    pub fn wire_type(self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Energy => "energy",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Consumption => "W",
            Self::Energy => "Wh",
        }
    }
}
