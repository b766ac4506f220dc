use crate::client::DssClient;
use crate::error::Error;
use crate::models::{MeterValue, decode_meter_values};

impl DssClient {
    /// Latest metering value of one circuit for a `(type, unit)` pair,
    /// e.g. `("consumption", "W")` or `("energy", "Wh")`.
    pub async fn get_latest_metering(
        &self,
        circuit_dsid: &str,
        metering_type: &str,
        unit: &str,
    ) -> Result<Option<MeterValue>, Error> {
        let value = self
            .call(
                "metering/getLatest",
                &[
                    ("from", format!(".meters({circuit_dsid})")),
                    ("type", metering_type.to_owned()),
                    ("unit", unit.to_owned()),
                ],
            )
            .await?;
        Ok(decode_meter_values(&value)
            .into_iter()
            .find(|v| v.dsid == circuit_dsid))
    }
}
