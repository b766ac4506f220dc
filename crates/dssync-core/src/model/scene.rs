// ── Internal scenes ──

use serde::{Deserialize, Serialize};

use super::ids::{Dsid, SceneId};

/// A scene on a zone/group pair, tracked locally.
///
/// Starts inactive when discovered; calling it activates it and
/// deactivates the other scenes of the same zone/group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalScene {
    pub id: SceneId,
    pub name: String,
    pub active: bool,
    /// Devices affected when the scene is invoked.
    pub reference_devices: Vec<Dsid>,
}

impl InternalScene {
    pub fn new(id: SceneId, name: String) -> Self {
        Self {
            id,
            name,
            active: false,
            reference_devices: Vec::new(),
        }
    }
}
