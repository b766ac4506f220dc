// ── Device state updates ──
//
// Typed local commands queued on a device and drained by the
// reconciliation tick, plus the coalescing pass that collapses runs of
// redundant commands before dispatch.

use serde::{Deserialize, Serialize};

use super::output::{
    BRIGHTNESS_MAX, BRIGHTNESS_STEP, OUTPUT_MIN, SLAT_ANGLE_MAX, SLAT_POSITION_MAX,
    SLAT_POSITION_STEP, clamp, percent_of,
};
use super::sensor::SensorType;

/// Whether a sensor refresh request schedules or cancels a background read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorRefresh {
    Schedule,
    Cancel,
}

/// A requested change of a device's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStateUpdate {
    /// Absolute brightness, clamped to the output range.
    SetOutput(u16),
    SetOutputPercent(u8),
    IncreaseOutput,
    DecreaseOutput,
    OnOff(bool),
    /// `true` opens a shade.
    OpenClose(bool),
    SetSlatPosition(u16),
    IncreaseSlatPosition,
    DecreaseSlatPosition,
    SetSlatAngle(u16),
    /// Relative slat angle change; positive opens further.
    StepSlatAngle(i32),
    CallScene(u8),
    UndoScene(u8),
    Sensor {
        sensor: SensorType,
        action: SensorRefresh,
    },
    RefreshSceneConfig(u8),
}

/// Runs of commands within one family collapse before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Brightness,
    SlatPosition,
    SlatAngle,
    Switch,
    Shade,
}

impl DeviceStateUpdate {
    fn family(self) -> Option<Family> {
        match self {
            Self::SetOutput(_)
            | Self::SetOutputPercent(_)
            | Self::IncreaseOutput
            | Self::DecreaseOutput => Some(Family::Brightness),
            Self::SetSlatPosition(_) | Self::IncreaseSlatPosition | Self::DecreaseSlatPosition => {
                Some(Family::SlatPosition)
            }
            Self::SetSlatAngle(_) | Self::StepSlatAngle(_) => Some(Family::SlatAngle),
            Self::OnOff(_) => Some(Family::Switch),
            Self::OpenClose(_) => Some(Family::Shade),
            Self::CallScene(_)
            | Self::UndoScene(_)
            | Self::Sensor { .. }
            | Self::RefreshSceneConfig(_) => None,
        }
    }

    /// Whether this command issues a remote write when dispatched.
    pub fn is_remote_command(self) -> bool {
        !matches!(self, Self::Sensor { .. } | Self::RefreshSceneConfig(_))
    }
}

/// Collapse runs of adjacent same-family commands.
///
/// Within a run an absolute command replaces everything before it and a
/// relative command replaces a preceding relative one. A relative step
/// following an absolute brightness or slat position folds into it, so the
/// absolute target is kept and moved by one step. Slat-angle runs
/// accumulate from `current_angle` (clamped at every step) into one
/// absolute `SetSlatAngle`. Scene and sensor commands are never merged.
pub(crate) fn coalesce(
    updates: impl IntoIterator<Item = DeviceStateUpdate>,
    current_angle: u16,
) -> Vec<DeviceStateUpdate> {
    let mut out: Vec<DeviceStateUpdate> = Vec::new();
    let mut angle = current_angle;

    for update in updates {
        let family = update.family();
        let continues_run = family.is_some() && out.last().and_then(|u| u.family()) == family;

        let update = match update {
            DeviceStateUpdate::SetSlatAngle(v) => {
                angle = clamp(i64::from(v), 0, SLAT_ANGLE_MAX);
                DeviceStateUpdate::SetSlatAngle(angle)
            }
            DeviceStateUpdate::StepSlatAngle(delta) => {
                angle = clamp(i64::from(angle) + i64::from(delta), 0, SLAT_ANGLE_MAX);
                DeviceStateUpdate::SetSlatAngle(angle)
            }
            other => other,
        };

        match out.last_mut() {
            Some(last) if continues_run => *last = fold_step(*last, update).unwrap_or(update),
            _ => out.push(update),
        }
    }
    out
}

/// Move an absolute target by one relative step.
fn fold_step(absolute: DeviceStateUpdate, step: DeviceStateUpdate) -> Option<DeviceStateUpdate> {
    use DeviceStateUpdate as U;

    let brightness = match absolute {
        U::SetOutput(v) => Some(v),
        U::SetOutputPercent(p) => Some(percent_of(BRIGHTNESS_MAX, p)),
        _ => None,
    };
    let nudge =
        |value: u16, delta: i64, max: u16| clamp(i64::from(value) + delta, OUTPUT_MIN, max);
    let brightness_step = i64::from(BRIGHTNESS_STEP);
    let position_step = i64::from(SLAT_POSITION_STEP);

    match (absolute, step) {
        (_, U::IncreaseOutput) => {
            brightness.map(|v| U::SetOutput(nudge(v, brightness_step, BRIGHTNESS_MAX)))
        }
        (_, U::DecreaseOutput) => {
            brightness.map(|v| U::SetOutput(nudge(v, -brightness_step, BRIGHTNESS_MAX)))
        }
        (U::SetSlatPosition(v), U::IncreaseSlatPosition) => {
            Some(U::SetSlatPosition(nudge(v, position_step, SLAT_POSITION_MAX)))
        }
        (U::SetSlatPosition(v), U::DecreaseSlatPosition) => {
            Some(U::SetSlatPosition(nudge(v, -position_step, SLAT_POSITION_MAX)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use DeviceStateUpdate as U;

    #[test]
    fn brightness_run_keeps_last() {
        let plan = coalesce(
            [
                U::IncreaseOutput,
                U::IncreaseOutput,
                U::IncreaseOutput,
                U::SetOutputPercent(50),
            ],
            0,
        );
        assert_eq!(plan, vec![U::SetOutputPercent(50)]);
    }

    #[test]
    fn scene_calls_are_never_merged() {
        let plan = coalesce([U::CallScene(5), U::CallScene(5), U::UndoScene(5)], 0);
        assert_eq!(plan, vec![U::CallScene(5), U::CallScene(5), U::UndoScene(5)]);
    }

    #[test]
    fn sensor_requests_are_never_merged() {
        let req = U::Sensor {
            sensor: SensorType::ACTIVE_POWER,
            action: SensorRefresh::Schedule,
        };
        assert_eq!(coalesce([req, req], 0), vec![req, req]);
    }

    #[test]
    fn only_adjacent_commands_collapse() {
        let plan = coalesce(
            [
                U::IncreaseOutput,
                U::CallScene(5),
                U::IncreaseOutput,
                U::DecreaseOutput,
            ],
            0,
        );
        assert_eq!(
            plan,
            vec![U::IncreaseOutput, U::CallScene(5), U::DecreaseOutput]
        );
    }

    #[test]
    fn slat_angle_steps_accumulate_with_clamping() {
        let plan = coalesce(
            [U::StepSlatAngle(100), U::StepSlatAngle(100), U::StepSlatAngle(-30)],
            100,
        );
        // 100 -> 200 -> 255 (clamped) -> 225
        assert_eq!(plan, vec![U::SetSlatAngle(225)]);
    }

    #[test]
    fn slat_angle_step_after_absolute_builds_on_it() {
        let plan = coalesce([U::SetSlatAngle(20), U::StepSlatAngle(-50)], 200);
        assert_eq!(plan, vec![U::SetSlatAngle(0)]);
    }

    #[test]
    fn separate_angle_runs_chain_projected_angle() {
        let plan = coalesce(
            [U::StepSlatAngle(10), U::CallScene(5), U::StepSlatAngle(10)],
            0,
        );
        assert_eq!(
            plan,
            vec![U::SetSlatAngle(10), U::CallScene(5), U::SetSlatAngle(20)]
        );
    }

    #[test]
    fn on_off_run_keeps_last() {
        assert_eq!(
            coalesce([U::OnOff(true), U::OnOff(false), U::OnOff(true)], 0),
            vec![U::OnOff(true)]
        );
    }

    #[test]
    fn increase_after_absolute_moves_the_target() {
        assert_eq!(
            coalesce([U::SetOutput(200), U::IncreaseOutput], 0),
            vec![U::SetOutput(211)]
        );
    }

    #[test]
    fn decrease_after_percent_moves_the_target() {
        // 50% of 255 is 127
        assert_eq!(
            coalesce([U::SetOutputPercent(50), U::DecreaseOutput, U::DecreaseOutput], 0),
            vec![U::SetOutput(105)]
        );
    }

    #[test]
    fn folded_step_is_clamped() {
        assert_eq!(
            coalesce([U::SetOutput(250), U::IncreaseOutput], 0),
            vec![U::SetOutput(255)]
        );
        assert_eq!(
            coalesce([U::SetOutput(4), U::DecreaseOutput], 0),
            vec![U::SetOutput(0)]
        );
    }

    #[test]
    fn absolute_after_step_replaces_it() {
        assert_eq!(
            coalesce([U::IncreaseOutput, U::SetOutput(40)], 0),
            vec![U::SetOutput(40)]
        );
    }

    #[test]
    fn relative_steps_keep_last() {
        assert_eq!(
            coalesce([U::IncreaseOutput, U::DecreaseOutput], 0),
            vec![U::DecreaseOutput]
        );
    }

    #[test]
    fn slat_position_step_after_absolute_moves_the_target() {
        assert_eq!(
            coalesce([U::SetSlatPosition(1000), U::IncreaseSlatPosition], 0),
            vec![U::SetSlatPosition(1983)]
        );
        assert_eq!(
            coalesce([U::SetSlatPosition(500), U::DecreaseSlatPosition], 0),
            vec![U::SetSlatPosition(0)]
        );
        assert_eq!(
            coalesce([U::DecreaseSlatPosition, U::SetSlatPosition(7)], 0),
            vec![U::SetSlatPosition(7)]
        );
    }
}
