// Apartment-wide inventory queries
//
// The three snapshot reads driving a reconciliation tick plus the
// per-zone reachable-scene lookup used while generating scenes.

use tracing::debug;

use crate::client::DssClient;
use crate::error::Error;
use crate::models::{
    ReachableScenes, RemoteCircuit, RemoteDevice, RemoteZone, decode_circuits, decode_devices,
    decode_structure,
};

impl DssClient {
    /// Full device inventory. Records without an id are skipped.
    pub async fn get_devices(&self) -> Result<Vec<RemoteDevice>, Error> {
        let value = self.call("apartment/getDevices", &[]).await?;
        let devices = decode_devices(&value);
        debug!(count = devices.len(), "fetched devices");
        Ok(devices)
    }

    /// All metering circuits.
    pub async fn get_circuits(&self) -> Result<Vec<RemoteCircuit>, Error> {
        let value = self.call("apartment/getCircuits", &[]).await?;
        let circuits = decode_circuits(&value);
        debug!(count = circuits.len(), "fetched circuits");
        Ok(circuits)
    }

    /// Zone/group tree with names and last-called scenes.
    pub async fn get_structure(&self) -> Result<Vec<RemoteZone>, Error> {
        let value = self.call("apartment/getStructure", &[]).await?;
        Ok(decode_structure(&value))
    }

    /// Scenes that can be invoked on `(zone, group)`.
    pub async fn get_reachable_scenes(
        &self,
        zone_id: u16,
        group_id: u16,
    ) -> Result<ReachableScenes, Error> {
        self.call_typed(
            "zone/getReachableScenes",
            &[("id", zone_id.to_string()), ("groupID", group_id.to_string())],
        )
        .await
    }
}
