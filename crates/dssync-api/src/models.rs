// ── Wire models ──
//
// Payload shapes returned by the server. Inventory records are decoded
// field by field from `serde_json::Value`: a missing or mistyped field
// falls back to a typed default and is reported as a `FieldIssue`, so one
// odd record never aborts a whole inventory fetch. Small fixed-shape
// replies use plain serde derives.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

// ── Field-level decoding ────────────────────────────────────────────

/// A field that was absent or could not be decoded and fell back to a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub reason: String,
}

/// Borrowing cursor over one JSON object that records decode problems.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    issues: Vec<FieldIssue>,
}

impl<'a> Fields<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        Self {
            map,
            issues: Vec::new(),
        }
    }

    fn report(&mut self, field: &'static str, reason: impl Into<String>) {
        self.issues.push(FieldIssue {
            field,
            reason: reason.into(),
        });
    }

    fn raw(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn opt_str(&mut self, field: &'static str) -> Option<String> {
        match self.raw(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            other => {
                self.report(field, format!("expected string, got {other}"));
                None
            }
        }
    }

    fn str_or(&mut self, field: &'static str, default: &str) -> String {
        if self.raw(field).is_none() {
            self.report(field, "missing");
        }
        self.opt_str(field).unwrap_or_else(|| default.to_owned())
    }

    fn opt_u64(&mut self, field: &'static str) -> Option<u64> {
        let value = self.raw(field)?;
        let parsed = value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
        if parsed.is_none() {
            self.report(field, format!("expected unsigned integer, got {value}"));
        }
        parsed
    }

    fn opt_u16(&mut self, field: &'static str) -> Option<u16> {
        let value = self.opt_u64(field)?;
        match u16::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.report(field, format!("{value} out of range"));
                None
            }
        }
    }

    fn u16_or(&mut self, field: &'static str, default: u16) -> u16 {
        if self.raw(field).is_none() {
            self.report(field, "missing");
        }
        self.opt_u16(field).unwrap_or(default)
    }

    fn opt_f64(&mut self, field: &'static str) -> Option<f64> {
        let value = self.raw(field)?;
        let parsed = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
        if parsed.is_none() {
            self.report(field, format!("expected number, got {value}"));
        }
        parsed
    }

    fn bool_or(&mut self, field: &'static str, default: bool) -> bool {
        let Some(value) = self.raw(field) else {
            self.report(field, "missing");
            return default;
        };
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_u64().is_some_and(|v| v != 0),
            Value::String(s) => matches!(s.as_str(), "true" | "1"),
            other => {
                self.report(field, format!("expected bool, got {other}"));
                default
            }
        }
    }

    fn array(&mut self, field: &'static str) -> &'a [Value] {
        match self.raw(field) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.report(field, format!("expected array, got {other}"));
                &[]
            }
            None => &[],
        }
    }
}

fn log_issues(kind: &str, id: &str, issues: &[FieldIssue]) {
    for issue in issues {
        debug!(kind, id, field = issue.field, reason = %issue.reason, "field decoded with default");
    }
}

// ── Devices ─────────────────────────────────────────────────────────

/// A binary input (window contact, push button, presence detector) on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBinaryInput {
    pub input_id: u16,
    pub input_type: u16,
    pub target_group: u16,
    pub state: Option<bool>,
}

impl RemoteBinaryInput {
    /// Decode one binary-input object, reporting per-field failures.
    pub fn from_value(value: &Value) -> (Option<Self>, Vec<FieldIssue>) {
        let Some(map) = value.as_object() else {
            return (
                None,
                vec![FieldIssue {
                    field: "binaryInputs",
                    reason: format!("expected object, got {value}"),
                }],
            );
        };
        let mut f = Fields::new(map);
        let input_id = f.u16_or("inputId", 0);
        let input_type = f.u16_or("inputType", 0);
        let target_group = f.u16_or("targetGroup", 0);
        let state = f.raw("state").map(|v| match v {
            Value::Bool(b) => *b,
            other => other.as_u64().is_some_and(|s| s != 0),
        });
        (
            Some(Self {
                input_id,
                input_type,
                target_group,
                state,
            }),
            f.issues,
        )
    }
}

/// One entry of the device inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub dsid: String,
    pub name: String,
    pub zone_id: u16,
    pub is_present: bool,
    pub output_mode: u16,
    pub has_slat_angle: bool,
    pub meter_dsid: Option<String>,
    pub groups: Vec<u16>,
    pub binary_inputs: Vec<RemoteBinaryInput>,
    pub sensor_types: Vec<u8>,
    pub output_value: Option<u16>,
}

impl RemoteDevice {
    /// Decode one device record. Returns `None` only when the identity is missing.
    pub fn from_value(value: &Value) -> Option<(Self, Vec<FieldIssue>)> {
        let map = value.as_object()?;
        let mut f = Fields::new(map);
        let dsid = f.opt_str("id").or_else(|| f.opt_str("dSID"))?;

        let name = f.str_or("name", "");
        let zone_id = f.u16_or("zoneID", 0);
        let is_present = f.bool_or("isPresent", false);
        let output_mode = f.u16_or("outputMode", 0);
        let has_slat_angle = f.raw("hasSlatAngle").is_some() && f.bool_or("hasSlatAngle", false);
        let meter_dsid = f.opt_str("meterDSID");
        let output_value = f.opt_u16("outputValue");

        let mut groups = Vec::new();
        for item in f.array("groups") {
            match item.as_u64().and_then(|g| u16::try_from(g).ok()) {
                Some(g) => groups.push(g),
                None => f.report("groups", format!("invalid group id {item}")),
            }
        }

        let mut binary_inputs = Vec::new();
        for item in f.array("binaryInputs") {
            let (input, issues) = RemoteBinaryInput::from_value(item);
            f.issues.extend(issues);
            binary_inputs.extend(input);
        }

        let mut sensor_types = Vec::new();
        for item in f.array("sensors") {
            let ty = item
                .get("type")
                .and_then(Value::as_u64)
                .and_then(|t| u8::try_from(t).ok());
            match ty {
                Some(t) => sensor_types.push(t),
                None => f.report("sensors", format!("invalid sensor descriptor {item}")),
            }
        }

        let issues = f.issues;
        log_issues("device", &dsid, &issues);
        Some((
            Self {
                dsid,
                name,
                zone_id,
                is_present,
                output_mode,
                has_slat_angle,
                meter_dsid,
                groups,
                binary_inputs,
                sensor_types,
                output_value,
            },
            issues,
        ))
    }
}

/// Decode a device inventory array, skipping records without identity.
pub fn decode_devices(value: &Value) -> Vec<RemoteDevice> {
    let Some(items) = value.as_array() else {
        warn!("device inventory is not an array, treating as empty");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let decoded = RemoteDevice::from_value(item);
            if decoded.is_none() {
                warn!(record = %item, "device record without id skipped");
            }
            decoded.map(|(device, _)| device)
        })
        .collect()
}

// ── Circuits ────────────────────────────────────────────────────────

/// A metering circuit (dSM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCircuit {
    pub dsid: String,
    pub name: String,
    pub is_present: bool,
    pub is_valid: bool,
    pub has_metering: bool,
}

impl RemoteCircuit {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut f = Fields::new(map);
        let dsid = f.opt_str("dsid").or_else(|| f.opt_str("dSID"))?;
        let circuit = Self {
            name: f.str_or("name", ""),
            is_present: f.bool_or("isPresent", true),
            is_valid: f.bool_or("isValid", true),
            has_metering: f.bool_or("hasMetering", true),
            dsid,
        };
        log_issues("circuit", &circuit.dsid, &f.issues);
        Some(circuit)
    }
}

/// Decode the `{ circuits: [...] }` payload.
pub fn decode_circuits(value: &Value) -> Vec<RemoteCircuit> {
    value
        .get("circuits")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(RemoteCircuit::from_value).collect())
        .unwrap_or_default()
}

// ── Structure ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: u16,
    pub name: String,
    pub last_called_scene: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteZone {
    pub id: u16,
    pub name: String,
    pub groups: Vec<RemoteGroup>,
}

/// Decode `{ apartment: { zones: [...] } }`.
pub fn decode_structure(value: &Value) -> Vec<RemoteZone> {
    let zones = value
        .get("apartment")
        .and_then(|a| a.get("zones"))
        .and_then(Value::as_array);
    let Some(zones) = zones else {
        warn!("structure payload without zones, treating as empty");
        return Vec::new();
    };

    zones
        .iter()
        .filter_map(|zone| {
            let map = zone.as_object()?;
            let mut f = Fields::new(map);
            let id = f.opt_u16("id")?;
            let name = f.str_or("name", "");
            let groups = f
                .array("groups")
                .iter()
                .filter_map(|group| {
                    let map = group.as_object()?;
                    let mut g = Fields::new(map);
                    let gid = g.opt_u16("id")?;
                    let last = g
                        .opt_u16("lastCalledScene")
                        .and_then(|s| u8::try_from(s).ok());
                    Some(RemoteGroup {
                        id: gid,
                        name: g.str_or("name", ""),
                        last_called_scene: last,
                    })
                })
                .collect();
            Some(RemoteZone { id, name, groups })
        })
        .collect()
}

/// Scenes that can be invoked on a zone/group, with optional user names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachableScenes {
    #[serde(default)]
    pub reachable_scenes: Vec<u8>,
    #[serde(default)]
    pub user_scene_names: Vec<UserSceneName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSceneName {
    pub scene_nr: u8,
    pub scene_name: String,
}

// ── Sensor / scene / metering reads ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorValue {
    pub sensor_value: f64,
    #[serde(default)]
    pub sensor_type: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SceneValue {
    pub value: u16,
    #[serde(default)]
    pub angle: Option<u16>,
}

/// Latest metering value of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub dsid: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Decode `{ values: [{ dsid, value, date }] }`.
pub fn decode_meter_values(value: &Value) -> Vec<MeterValue> {
    value
        .get("values")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let map = item.as_object()?;
                    let mut f = Fields::new(map);
                    let dsid = f.opt_str("dsid")?;
                    let value = f.opt_f64("value")?;
                    let timestamp = f.opt_str("date").and_then(|d| parse_timestamp(&d))?;
                    Some(MeterValue {
                        dsid,
                        value,
                        timestamp,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse either RFC 3339 or the server's `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

// ── Events ──────────────────────────────────────────────────────────

/// Where a pushed event originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub dsid: Option<String>,
    pub zone_id: Option<u16>,
    pub group_id: Option<u16>,
    pub is_device: bool,
    pub is_apartment: bool,
}

/// A named event delivered by the long-poll feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DssEvent {
    pub name: String,
    /// Property values; numbers are normalized to their string form.
    pub properties: BTreeMap<String, String>,
    pub source: EventSource,
}

impl DssEvent {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let name = map.get("name")?.as_str()?.to_owned();

        let properties = map
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            Value::Number(n) => n.to_string(),
                            Value::Bool(b) => b.to_string(),
                            _ => return None,
                        };
                        Some((k.clone(), v))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let source = map
            .get("source")
            .and_then(Value::as_object)
            .map(|src| {
                let mut f = Fields::new(src);
                EventSource {
                    dsid: f.opt_str("dsid"),
                    zone_id: f.opt_u16("zoneID"),
                    group_id: f.opt_u16("groupID"),
                    is_device: f.raw("isDevice").is_some() && f.bool_or("isDevice", false),
                    is_apartment: f.raw("isApartment").is_some()
                        && f.bool_or("isApartment", false),
                }
            })
            .unwrap_or_default();

        Some(Self {
            name,
            properties,
            source,
        })
    }

    /// Property lookup parsed as an integer.
    pub fn property_u16(&self, key: &str) -> Option<u16> {
        self.properties.get(key)?.trim().parse().ok()
    }

    /// Property lookup parsed as a float.
    pub fn property_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key)?.trim().parse().ok()
    }
}

/// Decode `{ events: [...] }`, skipping unnamed entries.
pub fn decode_events(value: &Value) -> Vec<DssEvent> {
    value
        .get("events")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let event = DssEvent::from_value(item);
                    if event.is_none() {
                        debug!(record = %item, "unnamed event skipped");
                    }
                    event
                })
                .collect()
        })
        .unwrap_or_default()
}
