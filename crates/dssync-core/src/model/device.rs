// ── Device domain types ──

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ids::Dsid;
use super::output::{
    BRIGHTNESS_MAX, BRIGHTNESS_STEP, OUTPUT_MIN, OutputMode, SLAT_ANGLE_MAX, SLAT_POSITION_MAX,
    SLAT_POSITION_STEP, clamp, scene,
};
use super::sensor::{SensorReading, SensorType};
use super::update::DeviceStateUpdate;
use crate::config::SensorPriorities;
use crate::jobs::RefreshPriority;

/// A binary input (contact, button, presence detector) wired to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInput {
    pub input_id: u16,
    pub input_type: u16,
    pub target_group: u16,
    pub state: Option<bool>,
}

/// Stored output of a device for one scene number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub value: u16,
    pub angle: Option<u16>,
}

/// How a scene call changed the local output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEffect {
    /// Output updated from a reserved scene or a known configuration.
    Applied,
    /// No configuration is known for the scene; output left unchanged.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputSnapshot {
    scene: u8,
    output_value: u16,
    slat_position: u16,
    slat_angle: u16,
}

/// One physical actuator/sensor endpoint.
///
/// Output values are always kept inside their ranges. The pending-command
/// queue is filled by callers and drained only by the reconciliation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub dsid: Dsid,
    pub name: String,
    pub zone_id: u16,
    pub groups: Vec<u16>,
    /// Primary functional group (light, shade, climate, ...).
    pub color_group: Option<u16>,
    pub is_present: bool,
    /// Circuit this device is metered on.
    pub meter_dsid: Option<Dsid>,
    pub output_mode: OutputMode,
    pub binary_inputs: Vec<BinaryInput>,
    pub sensor_types: Vec<SensorType>,
    pub last_called_scene: Option<u8>,

    output_value: u16,
    slat_position: u16,
    slat_angle: u16,
    sensors: BTreeMap<SensorType, SensorReading>,
    refresh_priorities: BTreeMap<SensorType, RefreshPriority>,
    scene_configs: BTreeMap<u8, SceneConfig>,
    pending: VecDeque<DeviceStateUpdate>,
    undo: Option<OutputSnapshot>,
}

impl Device {
    pub fn new(dsid: Dsid, output_mode: OutputMode) -> Self {
        Self {
            dsid,
            name: String::new(),
            zone_id: 0,
            groups: Vec::new(),
            color_group: None,
            is_present: true,
            meter_dsid: None,
            output_mode,
            binary_inputs: Vec::new(),
            sensor_types: Vec::new(),
            last_called_scene: None,
            output_value: OUTPUT_MIN,
            slat_position: OUTPUT_MIN,
            slat_angle: OUTPUT_MIN,
            sensors: BTreeMap::new(),
            refresh_priorities: BTreeMap::new(),
            scene_configs: BTreeMap::new(),
            pending: VecDeque::new(),
            undo: None,
        }
    }

    // ── Output state ─────────────────────────────────────────────────

    /// Brightness of a light output.
    pub fn output_value(&self) -> u16 {
        self.output_value
    }

    pub fn slat_position(&self) -> u16 {
        self.slat_position
    }

    pub fn slat_angle(&self) -> u16 {
        self.slat_angle
    }

    /// Brightness for lights, slat position for shades.
    pub fn main_output(&self) -> u16 {
        if self.output_mode.is_shade() {
            self.slat_position
        } else {
            self.output_value
        }
    }

    pub fn max_output(&self) -> u16 {
        self.output_mode.max_output()
    }

    pub fn is_on(&self) -> bool {
        self.output_value > OUTPUT_MIN
    }

    pub fn is_open(&self) -> bool {
        self.slat_position > OUTPUT_MIN
    }

    pub fn is_in_zone_group(&self, zone: u16, group: u16) -> bool {
        (zone == 0 || self.zone_id == zone) && (group == 0 || self.groups.contains(&group))
    }

    pub(crate) fn set_output_value(&mut self, value: i64) -> u16 {
        self.output_value = clamp(value, OUTPUT_MIN, BRIGHTNESS_MAX);
        self.output_value
    }

    pub(crate) fn set_slat_position(&mut self, value: i64) -> u16 {
        self.slat_position = clamp(value, OUTPUT_MIN, SLAT_POSITION_MAX);
        self.slat_position
    }

    pub(crate) fn set_slat_angle(&mut self, value: i64) -> u16 {
        self.slat_angle = clamp(value, OUTPUT_MIN, SLAT_ANGLE_MAX);
        self.slat_angle
    }

    pub(crate) fn set_main_output(&mut self, value: i64) -> u16 {
        if self.output_mode.is_shade() {
            self.set_slat_position(value)
        } else {
            self.set_output_value(value)
        }
    }

    // ── Pending commands ─────────────────────────────────────────────

    pub(crate) fn enqueue(&mut self, update: DeviceStateUpdate) {
        self.pending.push_back(update);
    }

    /// Take every queued command, oldest first.
    pub(crate) fn take_pending(&mut self) -> Vec<DeviceStateUpdate> {
        self.pending.drain(..).collect()
    }

    /// Put undispatched commands back ahead of anything queued meanwhile.
    pub(crate) fn requeue_front(&mut self, updates: Vec<DeviceStateUpdate>) {
        for update in updates.into_iter().rev() {
            self.pending.push_front(update);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ── Sensors ──────────────────────────────────────────────────────

    pub fn sensor(&self, sensor: SensorType) -> Option<&SensorReading> {
        self.sensors.get(&sensor)
    }

    pub fn sensors(&self) -> impl Iterator<Item = (SensorType, &SensorReading)> {
        self.sensors.iter().map(|(t, r)| (*t, r))
    }

    pub(crate) fn record_sensor(&mut self, sensor: SensorType, reading: SensorReading) {
        self.sensors.insert(sensor, reading);
    }

    pub fn refresh_priority(&self, sensor: SensorType) -> RefreshPriority {
        self.refresh_priorities
            .get(&sensor)
            .copied()
            .unwrap_or(RefreshPriority::Never)
    }

    /// Assign configured priorities to every sensor the device reports.
    pub(crate) fn init_priorities(&mut self, priorities: &SensorPriorities) {
        self.refresh_priorities = self
            .sensor_types
            .iter()
            .map(|t| (*t, priorities.for_sensor(*t)))
            .collect();
    }

    /// Stop all background polling of this device.
    pub(crate) fn suspend_refresh(&mut self) {
        for priority in self.refresh_priorities.values_mut() {
            *priority = RefreshPriority::Never;
        }
    }

    // ── Scenes ───────────────────────────────────────────────────────

    pub fn scene_config(&self, scene: u8) -> Option<SceneConfig> {
        self.scene_configs.get(&scene).copied()
    }

    pub fn scene_configs(&self) -> impl Iterator<Item = (u8, SceneConfig)> + '_ {
        self.scene_configs.iter().map(|(n, c)| (*n, *c))
    }

    pub(crate) fn set_scene_config(&mut self, scene: u8, config: SceneConfig) {
        self.scene_configs.insert(scene, config);
    }

    /// Whether calling `scene` needs a stored configuration that is missing.
    pub fn needs_scene_config(&self, scene_no: u8) -> bool {
        !scene::is_reserved(scene_no) && !self.scene_configs.contains_key(&scene_no)
    }

    /// Apply the local effect of a confirmed scene call.
    pub(crate) fn apply_scene(&mut self, scene_no: u8) -> SceneEffect {
        self.undo = Some(OutputSnapshot {
            scene: scene_no,
            output_value: self.output_value,
            slat_position: self.slat_position,
            slat_angle: self.slat_angle,
        });
        self.last_called_scene = Some(scene_no);

        let current = i64::from(self.main_output());
        let step = if self.output_mode.is_shade() {
            SLAT_POSITION_STEP
        } else {
            BRIGHTNESS_STEP
        };
        match scene_no {
            scene::OFF | scene::MIN => {
                self.set_main_output(i64::from(OUTPUT_MIN));
            }
            scene::MAX => {
                self.set_main_output(i64::from(self.max_output()));
            }
            scene::INCREMENT => {
                self.set_main_output(current + i64::from(step));
            }
            scene::DECREMENT => {
                self.set_main_output(current - i64::from(step));
            }
            scene::STOP => {}
            n => {
                let Some(config) = self.scene_configs.get(&n).copied() else {
                    debug!(device = %self.dsid, scene = n, "scene configuration unknown");
                    return SceneEffect::Unknown;
                };
                self.set_main_output(i64::from(config.value));
                if let (Some(angle), OutputMode::ShadeWithAngle) = (config.angle, self.output_mode)
                {
                    self.set_slat_angle(i64::from(angle));
                }
            }
        }
        SceneEffect::Applied
    }

    /// Restore the output from before `scene_no` was called. Returns `false`
    /// when the last call was a different scene.
    pub(crate) fn undo_scene(&mut self, scene_no: u8) -> bool {
        match self.undo {
            Some(snapshot) if snapshot.scene == scene_no => {
                self.output_value = snapshot.output_value;
                self.slat_position = snapshot.slat_position;
                self.slat_angle = snapshot.slat_angle;
                self.undo = None;
                true
            }
            _ => false,
        }
    }

    // ── Persisted properties ─────────────────────────────────────────

    /// Serialize scene configurations and the main output as string pairs.
    pub fn export_properties(&self) -> BTreeMap<String, String> {
        let mut props: BTreeMap<String, String> = self
            .scene_configs
            .iter()
            .map(|(n, c)| {
                let value = match c.angle {
                    Some(angle) => format!("{}:{angle}", c.value),
                    None => c.value.to_string(),
                };
                (format!("scene.{n}"), value)
            })
            .collect();
        props.insert("output".into(), self.main_output().to_string());
        props
    }

    /// Load previously exported properties. Malformed entries are skipped.
    pub fn import_properties(&mut self, props: &BTreeMap<String, String>) {
        for (key, raw) in props {
            if key == "output" {
                match raw.trim().parse::<i64>() {
                    Ok(v) => {
                        self.set_main_output(v);
                    }
                    Err(_) => debug!(device = %self.dsid, value = raw, "bad output property"),
                }
                continue;
            }
            let Some(scene_no) = key
                .strip_prefix("scene.")
                .and_then(|n| n.parse::<u8>().ok())
            else {
                continue;
            };
            match parse_scene_property(raw) {
                Some(config) => {
                    self.scene_configs.insert(scene_no, config);
                }
                None => debug!(device = %self.dsid, key, value = raw, "bad scene property"),
            }
        }
    }
}

fn parse_scene_property(raw: &str) -> Option<SceneConfig> {
    let mut parts = raw.trim().splitn(2, ':');
    let value = parts.next()?.parse().ok()?;
    let angle = match parts.next() {
        Some(a) => Some(a.parse().ok()?),
        None => None,
    };
    Some(SceneConfig { value, angle })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn light() -> Device {
        Device::new(Dsid::from("d1"), OutputMode::Dimmable)
    }

    #[test]
    fn output_setters_clamp() {
        let mut d = light();
        assert_eq!(d.set_output_value(1_000), BRIGHTNESS_MAX);
        assert_eq!(d.set_output_value(-3), 0);
        assert_eq!(d.set_slat_angle(400), SLAT_ANGLE_MAX);
        assert_eq!(d.set_slat_position(70_000), SLAT_POSITION_MAX);
    }

    #[test]
    fn requeue_keeps_order_ahead_of_new_commands() {
        let mut d = light();
        d.enqueue(DeviceStateUpdate::IncreaseOutput);
        let taken = d.take_pending();
        d.enqueue(DeviceStateUpdate::OnOff(false));
        d.requeue_front(taken);
        assert_eq!(
            d.take_pending(),
            vec![DeviceStateUpdate::IncreaseOutput, DeviceStateUpdate::OnOff(false)]
        );
    }

    #[test]
    fn scene_call_uses_stored_config_and_undo_restores() {
        let mut d = light();
        d.set_output_value(40);
        d.set_scene_config(17, SceneConfig { value: 200, angle: None });

        assert_eq!(d.apply_scene(17), SceneEffect::Applied);
        assert_eq!(d.output_value(), 200);
        assert!(d.undo_scene(17));
        assert_eq!(d.output_value(), 40);
        assert!(!d.undo_scene(17));
    }

    #[test]
    fn unknown_scene_leaves_output() {
        let mut d = light();
        d.set_output_value(40);
        assert!(d.needs_scene_config(22));
        assert_eq!(d.apply_scene(22), SceneEffect::Unknown);
        assert_eq!(d.output_value(), 40);
        assert_eq!(d.last_called_scene, Some(22));
    }

    #[test]
    fn reserved_scenes_move_output() {
        let mut d = light();
        d.apply_scene(scene::MAX);
        assert_eq!(d.output_value(), BRIGHTNESS_MAX);
        d.apply_scene(scene::INCREMENT);
        assert_eq!(d.output_value(), BRIGHTNESS_MAX);
        d.apply_scene(scene::DECREMENT);
        assert_eq!(d.output_value(), BRIGHTNESS_MAX - BRIGHTNESS_STEP);
        d.apply_scene(scene::OFF);
        assert!(!d.is_on());
    }

    #[test]
    fn properties_survive_export_import() {
        let mut shade = Device::new(Dsid::from("s1"), OutputMode::ShadeWithAngle);
        shade.set_scene_config(5, SceneConfig { value: 30_000, angle: Some(120) });
        shade.set_scene_config(6, SceneConfig { value: 0, angle: None });
        shade.set_slat_position(1_000);

        let props = shade.export_properties();
        assert_eq!(props.get("scene.5").map(String::as_str), Some("30000:120"));
        assert_eq!(props.get("output").map(String::as_str), Some("1000"));

        let mut restored = Device::new(Dsid::from("s1"), OutputMode::ShadeWithAngle);
        restored.import_properties(&props);
        assert_eq!(restored.scene_config(5), shade.scene_config(5));
        assert_eq!(restored.scene_config(6), shade.scene_config(6));
        assert_eq!(restored.slat_position(), 1_000);
    }

    #[test]
    fn malformed_properties_are_skipped() {
        let mut d = light();
        let props = BTreeMap::from([
            ("scene.5".to_owned(), "abc".to_owned()),
            ("scene.x".to_owned(), "10".to_owned()),
            ("scene.7".to_owned(), "10:20".to_owned()),
        ]);
        d.import_properties(&props);
        assert_eq!(d.scene_config(5), None);
        assert_eq!(d.scene_config(7), Some(SceneConfig { value: 10, angle: Some(20) }));
    }

    #[test]
    fn suspend_refresh_forces_never() {
        let mut d = light();
        d.sensor_types = vec![SensorType::ACTIVE_POWER];
        d.init_priorities(&SensorPriorities::default());
        assert_eq!(d.refresh_priority(SensorType::ACTIVE_POWER), RefreshPriority::Low);
        d.suspend_refresh();
        assert_eq!(d.refresh_priority(SensorType::ACTIVE_POWER), RefreshPriority::Never);
    }
}
