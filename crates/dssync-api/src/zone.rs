use crate::client::DssClient;
use crate::error::Error;

impl DssClient {
    /// Invoke a scene on every device of `(zone, group)`.
    pub async fn call_zone_scene(
        &self,
        zone_id: u16,
        group_id: u16,
        scene: u8,
        force: bool,
    ) -> Result<(), Error> {
        self.command(
            "zone/callScene",
            &[
                ("id", zone_id.to_string()),
                ("groupID", group_id.to_string()),
                ("sceneNumber", scene.to_string()),
                ("force", force.to_string()),
            ],
        )
        .await
    }

    pub async fn undo_zone_scene(&self, zone_id: u16, group_id: u16, scene: u8) -> Result<(), Error> {
        self.command(
            "zone/undoScene",
            &[
                ("id", zone_id.to_string()),
                ("groupID", group_id.to_string()),
                ("sceneNumber", scene.to_string()),
            ],
        )
        .await
    }
}
