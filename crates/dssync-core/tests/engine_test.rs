#![allow(clippy::unwrap_used)]
// End-to-end engine scenarios against a wiremock server.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dssync_core::{
    AuthCredentials, AuthFailure, ConnectionEvent, ConnectionState, Device, DeviceStateUpdate,
    Dsid, Engine, EngineConfig, EngineListener, InternalScene, LostReason, SceneCall, SceneId,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Records every callback as a short string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, entry: String) {
        self.events.lock().unwrap().push(entry);
    }

    fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl EngineListener for Recorder {
    fn on_device_added(&self, device: &Device) {
        self.push(format!("added {}", device.dsid));
    }

    fn on_device_removed(&self, device: &Device) {
        self.push(format!("removed {}", device.dsid));
    }

    fn on_device_state_changed(&self, device: &Device, update: &DeviceStateUpdate) {
        self.push(format!("state {} {update:?}", device.dsid));
    }

    fn on_scene_state_changed(&self, scene: &InternalScene) {
        self.push(format!("scene {} {}", scene.id, scene.active));
    }

    fn on_scene_removed(&self, scene: &InternalScene) {
        self.push(format!("dropped scene {}", scene.id));
    }

    fn on_connection_event(&self, event: &ConnectionEvent) {
        if let ConnectionEvent::TokenGenerated(token) = event {
            self.tokens
                .lock()
                .unwrap()
                .push(token.expose_secret().to_owned());
        }
        self.push(format!("connection {event:?}"));
    }
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
}

fn ok_empty() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": true }))
}

fn rejected(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "message": message }))
}

fn dimmer(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Desk lamp",
        "zoneID": 1,
        "isPresent": true,
        "outputMode": 22,
        "groups": [1],
        "binaryInputs": [],
        "sensors": [],
    })
}

fn shade(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Blind",
        "zoneID": 1,
        "isPresent": true,
        "outputMode": 33,
        "hasSlatAngle": true,
        "groups": [1],
        "binaryInputs": [],
        "sensors": [],
    })
}

fn config(server: &MockServer, auth: AuthCredentials) -> EngineConfig {
    EngineConfig {
        event_feed_enabled: false,
        job_spacing: Duration::from_millis(10),
        scene_min_interval: Duration::ZERO,
        ..EngineConfig::new(Url::parse(&server.uri()).unwrap(), auth)
    }
}

fn app_token() -> AuthCredentials {
    AuthCredentials::ApplicationToken(SecretString::from("app-token".to_owned()))
}

/// Session login, time check, empty circuit list, one zone and scene lookups.
async fn mount_server_basics(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/json/system/loginApplication"))
        .and(query_param("loginToken", "app-token"))
        .respond_with(ok(json!({ "token": "session-1" })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/time"))
        .respond_with(ok(json!({ "time": 1_700_000_000 })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/logout"))
        .respond_with(ok_empty())
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getCircuits"))
        .respond_with(ok(json!({ "circuits": [] })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getStructure"))
        .respond_with(ok(json!({
            "apartment": { "zones": [
                { "id": 1, "name": "Living", "groups": [{ "id": 1, "name": "Light" }] }
            ]}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/zone/getReachableScenes"))
        .respond_with(ok(json!({ "reachableScenes": [5], "userSceneNames": [] })))
        .mount(server)
        .await;
}

async fn mount_devices(server: &MockServer, devices: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ok(devices))
        .mount(server)
        .await;
}

/// Engine with one dimmable light `d1`, already discovered.
async fn setup() -> (MockServer, Engine, Arc<Recorder>) {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([dimmer("d1")])).await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();
    let report = engine.tick().await;
    assert!(report.ran);
    assert_eq!(report.devices_added, 1);
    (server, engine, recorder)
}

fn d1() -> Dsid {
    Dsid::from("d1")
}

// ── Command dispatch ────────────────────────────────────────────────

#[tokio::test]
async fn test_set_percent_sends_absolute_value() {
    let (server, engine, recorder) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/setValue"))
        .and(query_param("dsid", "d1"))
        .and(query_param("value", "127"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;

    assert!(!engine.device(&d1()).unwrap().is_on());
    engine
        .enqueue(&d1(), DeviceStateUpdate::SetOutputPercent(50))
        .unwrap();
    let report = engine.tick().await;

    assert_eq!(report.commands_sent, 1);
    let device = engine.device(&d1()).unwrap();
    assert_eq!(device.output_value(), 127);
    assert!(device.is_on());
    assert_eq!(recorder.count("state d1 SetOutput(127)"), 1);
}

#[tokio::test]
async fn test_redundant_commands_coalesce_into_one_call() {
    let (server, engine, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/increaseValue"))
        .respond_with(ok_empty())
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/device/setValue"))
        .and(query_param("value", "127"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;

    for _ in 0..3 {
        engine
            .enqueue(&d1(), DeviceStateUpdate::IncreaseOutput)
            .unwrap();
    }
    engine
        .enqueue(&d1(), DeviceStateUpdate::SetOutputPercent(50))
        .unwrap();

    let report = engine.tick().await;
    assert_eq!(report.commands_sent, 1);
    assert_eq!(engine.device(&d1()).unwrap().output_value(), 127);
}

#[tokio::test]
async fn test_out_of_range_output_is_clamped() {
    let (server, engine, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/setValue"))
        .and(query_param("value", "255"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;

    engine
        .enqueue(&d1(), DeviceStateUpdate::SetOutput(4000))
        .unwrap();
    engine.tick().await;
    assert_eq!(engine.device(&d1()).unwrap().output_value(), 255);
}

#[tokio::test]
async fn test_command_without_effect_is_not_sent() {
    let (server, engine, recorder) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/turnOff"))
        .respond_with(ok_empty())
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/device/decreaseValue"))
        .respond_with(ok_empty())
        .expect(0)
        .mount(&server)
        .await;

    engine
        .enqueue(&d1(), DeviceStateUpdate::OnOff(false))
        .unwrap();
    engine
        .enqueue(&d1(), DeviceStateUpdate::DecreaseOutput)
        .unwrap();
    let report = engine.tick().await;

    assert_eq!(report.commands_sent, 0);
    assert_eq!(recorder.count("state"), 0);
}

#[tokio::test]
async fn test_rejected_command_is_dropped() {
    let (server, engine, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/turnOn"))
        .respond_with(rejected("device not reachable"))
        .expect(1)
        .mount(&server)
        .await;

    engine.enqueue(&d1(), DeviceStateUpdate::OnOff(true)).unwrap();
    let report = engine.tick().await;

    let device = engine.device(&d1()).unwrap();
    assert_eq!(report.commands_sent, 0);
    assert!(!device.is_on());
    assert_eq!(device.pending_len(), 0);
    assert!(engine.is_connected());
}

#[tokio::test]
async fn test_slat_angle_steps_accumulate_into_one_write() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([shade("s1")])).await;
    Mock::given(method("GET"))
        .and(path("/json/device/setOutputValue"))
        .and(query_param("dsid", "s1"))
        .and(query_param("offset", "4"))
        .and(query_param("value", "80"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();
    assert!(engine.tick().await.ran);

    let blind = Dsid::from("s1");
    engine
        .enqueue(&blind, DeviceStateUpdate::StepSlatAngle(40))
        .unwrap();
    engine
        .enqueue(&blind, DeviceStateUpdate::StepSlatAngle(40))
        .unwrap();
    let report = engine.tick().await;

    assert_eq!(report.commands_sent, 1);
    assert_eq!(engine.device(&blind).unwrap().slat_angle(), 80);
    assert_eq!(recorder.count("state s1 SetSlatAngle(80)"), 1);
}

#[tokio::test]
async fn test_connection_failure_requeues_commands() {
    let (server, engine, recorder) = setup().await;

    Mock::given(method("GET"))
        .and(path("/json/device/setValue"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    engine
        .enqueue(&d1(), DeviceStateUpdate::SetOutput(100))
        .unwrap();
    engine
        .enqueue(&d1(), DeviceStateUpdate::OnOff(false))
        .unwrap();
    engine.tick().await;

    let device = engine.device(&d1()).unwrap();
    assert_eq!(device.pending_len(), 2);
    assert_eq!(device.output_value(), 0);
    assert_eq!(
        *engine.connection_state().borrow(),
        ConnectionState::Lost(LostReason::HostUnreachable)
    );
    assert_eq!(recorder.count("connection Lost"), 1);
}

#[tokio::test]
async fn test_enqueue_on_unknown_device_fails() {
    let (_server, engine, _) = setup().await;
    let result = engine.enqueue(&Dsid::from("nope"), DeviceStateUpdate::OnOff(true));
    assert!(result.is_err());
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_unchanged_snapshot_is_idempotent() {
    let (_server, engine, recorder) = setup().await;
    let before = engine.device(&d1()).unwrap();
    let events_before = recorder.events.lock().unwrap().len();

    let report = engine.tick().await;

    assert!(report.ran);
    assert_eq!(report.devices_added, 0);
    assert_eq!(report.devices_updated, 0);
    assert_eq!(report.commands_sent, 0);
    assert_eq!(*engine.device(&d1()).unwrap(), *before);
    assert_eq!(recorder.events.lock().unwrap().len(), events_before);
}

#[tokio::test]
async fn test_vanished_device_is_restored_from_trash() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ok(json!([dimmer("d1")])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ok(json!([])))
        .up_to_n_times(3)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ok(json!([dimmer("d1")])))
        .with_priority(3)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();
    let props = BTreeMap::from([("scene.5".to_owned(), "200".to_owned())]);
    engine.preload_properties(d1(), props);

    engine.tick().await;
    let original = engine.device(&d1()).unwrap();
    assert_eq!(original.scene_config(5).map(|c| c.value), Some(200));

    for _ in 0..3 {
        engine.tick().await;
        assert!(engine.device(&d1()).is_none());
        assert_eq!(engine.trashed_devices(), vec![d1()]);
    }

    let report = engine.tick().await;
    assert_eq!(report.devices_restored, 1);
    assert_eq!(report.devices_added, 0);
    assert!(engine.trashed_devices().is_empty());
    assert_eq!(*engine.device(&d1()).unwrap(), *original);
    assert_eq!(recorder.count("added d1"), 2);
    assert_eq!(recorder.count("removed d1"), 1);
}

#[tokio::test]
async fn test_first_tick_generates_scenes() {
    let (_server, engine, _) = setup().await;
    let scene = engine.scene(SceneId::new(1, 1, 5)).unwrap();
    assert_eq!(scene.name, "Living Light scene 5");
    assert_eq!(scene.reference_devices, vec![d1()]);
    assert!(!scene.active);
}

#[tokio::test]
async fn test_scene_is_removed_with_its_last_device() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ok(json!([dimmer("d1")])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_devices(&server, json!([])).await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(
        EngineConfig {
            trash_grace_days: 0,
            ..config(&server, app_token())
        },
        recorder.clone(),
    )
    .unwrap();
    let scene = SceneId::new(1, 1, 5);

    engine.tick().await;
    assert!(engine.scene(scene).is_some());

    let report = engine.tick().await;
    assert_eq!(report.devices_purged, 1);
    assert!(engine.trashed_devices().is_empty());
    assert!(engine.scene(scene).is_none());
    assert!(engine.scenes().is_empty());
    assert_eq!(recorder.count(&format!("dropped scene {scene}")), 1);
}

#[tokio::test]
async fn test_trashed_device_keeps_its_scenes() {
    let (server, engine, recorder) = setup().await;
    server.reset().await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([])).await;

    assert!(engine.tick().await.ran);
    assert_eq!(engine.trashed_devices(), vec![d1()]);
    assert!(engine.scene(SceneId::new(1, 1, 5)).is_some());
    assert_eq!(recorder.count("dropped scene"), 0);
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn test_credentials_mint_application_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/system/requestApplicationToken"))
        .and(query_param("applicationName", "dssync"))
        .respond_with(ok(json!({ "applicationToken": "minted" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/login"))
        .and(query_param("user", "dssadmin"))
        .respond_with(ok(json!({ "token": "user-session" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/enableToken"))
        .and(query_param("applicationToken", "minted"))
        .and(query_param("token", "user-session"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/logout"))
        .respond_with(ok_empty())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/loginApplication"))
        .and(query_param("loginToken", "minted"))
        .respond_with(ok(json!({ "token": "session-2" })))
        .mount(&server)
        .await;
    mount_devices(&server, json!([])).await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getCircuits"))
        .respond_with(ok(json!({ "circuits": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getStructure"))
        .respond_with(ok(json!({ "apartment": { "zones": [] } })))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let auth = AuthCredentials::Credentials {
        username: "dssadmin".into(),
        password: SecretString::from("secret".to_owned()),
    };
    let engine = Engine::new(config(&server, auth), recorder.clone()).unwrap();

    let report = engine.tick().await;
    assert!(report.ran);
    assert!(engine.is_connected());
    assert_eq!(*recorder.tokens.lock().unwrap(), vec!["minted".to_owned()]);
}

#[tokio::test]
async fn test_expired_session_is_renewed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/system/time"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/system/loginApplication"))
        .respond_with(ok(json!({ "token": "session-1" })))
        .expect(2)
        .mount(&server)
        .await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([dimmer("d1")])).await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();

    assert!(engine.tick().await.ran);
    assert!(engine.tick().await.ran);
    assert!(engine.is_connected());
    assert_eq!(recorder.count("connection Lost"), 0);
}

#[tokio::test]
async fn test_rejected_token_waits_for_new_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/system/loginApplication"))
        .respond_with(rejected("Application-Authentication failed"))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();

    assert!(!engine.tick().await.ran);
    assert_eq!(
        *engine.connection_state().borrow(),
        ConnectionState::Lost(LostReason::Unauthenticated(AuthFailure::WrongToken))
    );
    // No further login attempts until the credentials change.
    assert!(!engine.tick().await.ran);
    assert_eq!(recorder.count("connection Lost"), 1);
}

#[tokio::test]
async fn test_refused_session_retry_recovers_on_next_tick() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    Mock::given(method("GET"))
        .and(path("/json/apartment/getDevices"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_devices(&server, json!([dimmer("d1")])).await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(config(&server, app_token()), recorder.clone()).unwrap();

    assert!(!engine.tick().await.ran);
    assert_eq!(
        *engine.connection_state().borrow(),
        ConnectionState::Lost(LostReason::SessionLost)
    );

    let report = engine.tick().await;
    assert!(report.ran);
    assert_eq!(report.devices_added, 1);
    assert!(engine.is_connected());
    assert_eq!(recorder.count("connection Lost(SessionLost)"), 1);
    assert_eq!(recorder.count("connection Resumed"), 1);
}

// ── Scenes and echo suppression ─────────────────────────────────────

#[tokio::test]
async fn test_own_scene_call_echo_is_suppressed() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([dimmer("d1")])).await;

    Mock::given(method("GET"))
        .and(path("/json/zone/callScene"))
        .and(query_param("sceneNumber", "14"))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/event/subscribe"))
        .respond_with(ok_empty())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/event/unsubscribe"))
        .respond_with(ok_empty())
        .mount(&server)
        .await;
    // The echo of our own call, then an external "min" call on the same group.
    Mock::given(method("GET"))
        .and(path("/json/event/get"))
        .respond_with(ok(json!({ "events": [
            {
                "name": "callScene",
                "properties": { "sceneID": "14", "zoneID": "1", "groupID": "1" },
                "source": { "zoneID": 1, "groupID": 1, "isDevice": false }
            },
            {
                "name": "callScene",
                "properties": { "sceneID": "13", "zoneID": "1", "groupID": "1" },
                "source": { "zoneID": 1, "groupID": 1, "isDevice": false }
            }
        ]})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/event/get"))
        .respond_with(ok(json!({ "events": [] })).set_delay(Duration::from_millis(50)))
        .with_priority(2)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new(
        EngineConfig {
            event_feed_enabled: true,
            ..config(&server, app_token())
        },
        recorder.clone(),
    )
    .unwrap();
    assert!(engine.tick().await.ran);

    let call = engine.call_scene(SceneId::new(1, 1, 14)).await.unwrap();
    assert_eq!(call, SceneCall::Sent);
    assert_eq!(engine.device(&d1()).unwrap().output_value(), 255);

    engine.start().await;
    for _ in 0..50 {
        if engine.device(&d1()).unwrap().output_value() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Give a wrongly applied echo time to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.stop().await;

    assert_eq!(engine.device(&d1()).unwrap().output_value(), 0);
    assert_eq!(recorder.count("state d1 CallScene(14)"), 1);
    assert_eq!(recorder.count("state d1 CallScene(13)"), 1);
    assert!(engine.scene(SceneId::new(1, 1, 13)).unwrap().active);
}

async fn scene_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/json/zone/callScene")
        .count()
}

#[tokio::test]
async fn test_rapid_scene_calls_are_spaced_out() {
    let server = MockServer::start().await;
    mount_server_basics(&server).await;
    mount_devices(&server, json!([dimmer("d1")])).await;
    Mock::given(method("GET"))
        .and(path("/json/zone/callScene"))
        .respond_with(ok_empty())
        .expect(3)
        .mount(&server)
        .await;

    let engine = Engine::new(
        EngineConfig {
            scene_min_interval: Duration::from_millis(100),
            ..config(&server, app_token())
        },
        Arc::new(Recorder::default()),
    )
    .unwrap();
    assert!(engine.tick().await.ran);

    let scene = SceneId::new(1, 1, 5);

    assert_eq!(engine.call_scene(scene).await.unwrap(), SceneCall::Sent);
    let SceneCall::Deferred(second) = engine.call_scene(scene).await.unwrap() else {
        panic!("second call was not deferred");
    };
    let SceneCall::Deferred(third) = engine.call_scene(scene).await.unwrap() else {
        panic!("third call was not deferred");
    };
    assert!(second <= Duration::from_millis(100));
    assert!(third > Duration::from_millis(100));
    assert_eq!(scene_calls(&server).await, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(scene_calls(&server).await, 2);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(scene_calls(&server).await, 3);
}
