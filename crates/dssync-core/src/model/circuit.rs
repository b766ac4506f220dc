// ── Metering circuits ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::Dsid;
use super::sensor::MeteringKind;

/// Latest cached metering value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A metering-only endpoint (one per electrical circuit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub dsid: Dsid,
    pub name: String,
    pub is_present: bool,
    pub is_valid: bool,
    pub has_metering: bool,
    readings: BTreeMap<MeteringKind, MeterReading>,
}

impl Circuit {
    pub fn new(dsid: Dsid) -> Self {
        Self {
            dsid,
            name: String::new(),
            is_present: true,
            is_valid: true,
            has_metering: true,
            readings: BTreeMap::new(),
        }
    }

    pub fn reading(&self, kind: MeteringKind) -> Option<MeterReading> {
        self.readings.get(&kind).copied()
    }

    /// Replace the cached value only with a strictly newer one.
    pub(crate) fn record(&mut self, kind: MeteringKind, reading: MeterReading) -> bool {
        match self.readings.get(&kind) {
            Some(cached) if cached.timestamp >= reading.timestamp => false,
            _ => {
                self.readings.insert(kind, reading);
                true
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn only_newer_readings_replace_cache() {
        let mut c = Circuit::new(Dsid::from("m1"));
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();

        assert!(c.record(MeteringKind::Consumption, MeterReading { value: 10.0, timestamp: t1 }));
        assert!(!c.record(MeteringKind::Consumption, MeterReading { value: 99.0, timestamp: t0 }));
        assert!(!c.record(MeteringKind::Consumption, MeterReading { value: 99.0, timestamp: t1 }));
        assert!((c.reading(MeteringKind::Consumption).unwrap().value - 10.0).abs() < f64::EPSILON);
    }
}
