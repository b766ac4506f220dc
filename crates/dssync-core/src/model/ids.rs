// ── Core identity types ──
//
// `Dsid` names devices and circuits; `SceneId` names a scene invocable
// on one zone/group pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::output::scene::LAST_PRESET;

// ── Dsid ────────────────────────────────────────────────────────────

/// Opaque, stable identity of a device or metering circuit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dsid(String);

impl Dsid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Dsid {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<String> for Dsid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Dsid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── SceneId ─────────────────────────────────────────────────────────

/// A scene number invoked on every device of a zone/group pair.
///
/// Zone `0` addresses the whole apartment; group `0` addresses every group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId {
    pub zone: u16,
    pub group: u16,
    pub scene: u8,
}

impl SceneId {
    pub const fn new(zone: u16, group: u16, scene: u8) -> Self {
        Self { zone, group, scene }
    }

    /// Whether `other` addresses the same zone/group pair.
    pub fn same_target(&self, other: &Self) -> bool {
        self.zone == other.zone && self.group == other.group
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.zone, self.group, self.scene)
    }
}

impl FromStr for SceneId {
    type Err = String;

    /// Parses the `zone-group-scene` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| format!("missing {what} in scene id {s:?}"))
        };
        let zone = next("zone")?;
        let group = next("group")?;
        let scene = next("scene")?;
        let scene_no: u8 = scene.parse().map_err(|e| format!("bad scene {scene:?}: {e}"))?;
        if scene_no > LAST_PRESET {
            return Err(format!("scene {scene_no} out of range 0-{LAST_PRESET}"));
        }
        Ok(Self {
            zone: zone.parse().map_err(|e| format!("bad zone {zone:?}: {e}"))?,
            group: group.parse().map_err(|e| format!("bad group {group:?}: {e}"))?,
            scene: scene_no,
        })
    }
}
