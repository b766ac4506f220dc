// ── Output capabilities ──
//
// Value ranges, step sizes and reserved scene numbers of device outputs.

use serde::{Deserialize, Serialize};

pub const BRIGHTNESS_MAX: u16 = 255;
pub const SLAT_POSITION_MAX: u16 = u16::MAX;
pub const SLAT_ANGLE_MAX: u16 = 255;
pub const OUTPUT_MIN: u16 = 0;

/// Local step applied after a confirmed increase/decrease.
pub const BRIGHTNESS_STEP: u16 = 11;
pub const SLAT_POSITION_STEP: u16 = 983;

/// Reserved scene numbers.
pub mod scene {
    pub const OFF: u8 = 0;
    pub const DECREMENT: u8 = 11;
    pub const INCREMENT: u8 = 12;
    pub const MIN: u8 = 13;
    pub const MAX: u8 = 14;
    pub const STOP: u8 = 15;
    /// Highest scene number addressable on a zone/group.
    pub const LAST_PRESET: u8 = 63;

    /// Scenes whose effect is fixed and needs no stored configuration.
    pub fn is_reserved(scene: u8) -> bool {
        matches!(scene, OFF | DECREMENT | INCREMENT | MIN | MAX | STOP)
    }
}

/// What a device's output can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputMode {
    Disabled,
    Switch,
    Dimmable,
    Shade,
    ShadeWithAngle,
}

impl OutputMode {
    /// Map the wire `outputMode` code.
    pub fn from_wire(code: u16, has_slat_angle: bool) -> Self {
        match code {
            16 | 34..=42 => Self::Switch,
            17..=24 => Self::Dimmable,
            33 if has_slat_angle => Self::ShadeWithAngle,
            33 => Self::Shade,
            _ => Self::Disabled,
        }
    }

    pub fn is_shade(self) -> bool {
        matches!(self, Self::Shade | Self::ShadeWithAngle)
    }

    pub fn is_light(self) -> bool {
        matches!(self, Self::Switch | Self::Dimmable)
    }

    /// Upper bound of the main output (brightness or slat position).
    pub fn max_output(self) -> u16 {
        match self {
            Self::Disabled => OUTPUT_MIN,
            Self::Switch | Self::Dimmable => BRIGHTNESS_MAX,
            Self::Shade | Self::ShadeWithAngle => SLAT_POSITION_MAX,
        }
    }
}

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: i64, min: u16, max: u16) -> u16 {
    let clamped = value.clamp(i64::from(min), i64::from(max));
    u16::try_from(clamped).unwrap_or(max)
}

/// Absolute output for `percent` of `max`, rounding down.
pub fn percent_of(max: u16, percent: u8) -> u16 {
    let percent = u32::from(percent.min(100));
    u16::try_from(u32::from(max) * percent / 100).unwrap_or(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_mode_codes() {
        assert_eq!(OutputMode::from_wire(0, false), OutputMode::Disabled);
        assert_eq!(OutputMode::from_wire(16, false), OutputMode::Switch);
        assert_eq!(OutputMode::from_wire(39, false), OutputMode::Switch);
        assert_eq!(OutputMode::from_wire(22, false), OutputMode::Dimmable);
        assert_eq!(OutputMode::from_wire(33, false), OutputMode::Shade);
        assert_eq!(OutputMode::from_wire(33, true), OutputMode::ShadeWithAngle);
        assert_eq!(OutputMode::from_wire(99, false), OutputMode::Disabled);
    }

    #[test]
    fn clamp_never_overflows() {
        assert_eq!(clamp(300, 0, 255), 255);
        assert_eq!(clamp(-5, 0, 255), 0);
        assert_eq!(clamp(i64::from(u16::MAX) + 10, 0, u16::MAX), u16::MAX);
        assert_eq!(clamp(128, 0, 255), 128);
    }

    #[test]
    fn fifty_percent_of_brightness() {
        assert_eq!(percent_of(BRIGHTNESS_MAX, 50), 127);
        assert_eq!(percent_of(BRIGHTNESS_MAX, 100), 255);
        assert_eq!(percent_of(BRIGHTNESS_MAX, 150), 255);
        assert_eq!(percent_of(SLAT_POSITION_MAX, 0), 0);
    }
}
