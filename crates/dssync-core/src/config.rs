// ── Runtime engine configuration ──
//
// Describes how to reach the server and how aggressively to poll it.
// Carries credential data but never touches disk; the config crate or
// the embedding host builds an `EngineConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::jobs::RefreshPriority;
use crate::model::SensorType;

/// How to authenticate with the server.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// Saved application token (preferred).
    ApplicationToken(SecretString),
    /// User credentials; used once to mint an application token.
    Credentials {
        username: String,
        password: SecretString,
    },
    /// Saved token plus credentials to mint a replacement if the token is revoked.
    TokenWithFallback {
        token: SecretString,
        username: String,
        password: SecretString,
    },
    /// Nothing configured. Every authentication attempt reports missing credentials.
    None,
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Servers ship self-signed certificates.
    #[default]
    DangerAcceptInvalid,
}

/// Per-sensor-type background refresh priorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorPriorities {
    pub active_power: RefreshPriority,
    pub output_current: RefreshPriority,
    pub electric_meter: RefreshPriority,
    /// Climate and every other sensor type.
    pub other: RefreshPriority,
}

impl Default for SensorPriorities {
    fn default() -> Self {
        Self {
            active_power: RefreshPriority::Low,
            output_current: RefreshPriority::Never,
            electric_meter: RefreshPriority::Never,
            other: RefreshPriority::Low,
        }
    }
}

impl SensorPriorities {
    pub fn for_sensor(&self, sensor: SensorType) -> RefreshPriority {
        match sensor {
            SensorType::ACTIVE_POWER => self.active_power,
            SensorType::OUTPUT_CURRENT => self.output_current,
            SensorType::ELECTRIC_METER => self.electric_meter,
            _ => self.other,
        }
    }
}

/// Configuration for synchronizing with a single server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server URL (e.g. `https://dss.local:8080`).
    pub url: Url,
    pub auth: AuthCredentials,
    pub tls: TlsVerification,
    /// Connect/read timeout of every remote call.
    pub timeout: Duration,
    /// Period of the reconciliation tick.
    pub polling_interval: Duration,
    /// Maximum age of a sensor or metering reading before it is refreshed.
    pub sensor_refresh_interval: Duration,
    /// Days a vanished device stays in the trash before it is purged.
    pub trash_grace_days: u32,
    pub sensor_priorities: SensorPriorities,
    pub metering_priority: RefreshPriority,
    pub scene_config_priority: RefreshPriority,
    /// Pause between two background jobs.
    pub job_spacing: Duration,
    /// Minimum interval between two calls of the same scene.
    pub scene_min_interval: Duration,
    /// How long an echo marker waits for its push event.
    pub echo_ttl: Duration,
    pub event_feed_enabled: bool,
    /// Server-side timeout of one long-poll request.
    pub event_poll_timeout: Duration,
    /// Name under which application tokens are requested.
    pub application_name: String,
}

impl EngineConfig {
    /// Configuration for `url` with default polling and refresh settings.
    pub fn new(url: Url, auth: AuthCredentials) -> Self {
        Self {
            url,
            auth,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            polling_interval: Duration::from_secs(10),
            sensor_refresh_interval: Duration::from_secs(300),
            trash_grace_days: 7,
            sensor_priorities: SensorPriorities::default(),
            metering_priority: RefreshPriority::Medium,
            scene_config_priority: RefreshPriority::Low,
            job_spacing: Duration::from_millis(500),
            scene_min_interval: Duration::from_millis(500),
            echo_ttl: Duration::from_secs(10),
            event_feed_enabled: true,
            event_poll_timeout: Duration::from_secs(60),
            application_name: "dssync".into(),
        }
    }
}
