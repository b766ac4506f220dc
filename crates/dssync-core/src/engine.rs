// ── Engine composition root ──
//
// Wires the connection manager, registry, trash, job queue and scene
// manager together and owns the background tasks: the reconciliation
// tick, the job worker and the event feed listener.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AuthCredentials, EngineConfig};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::CoreError;
use crate::jobs::{JobKey, JobQueue, RefreshPriority};
use crate::listener::{EngineListener, SceneListener};
use crate::model::{
    Circuit, Device, DeviceStateUpdate, Dsid, InternalScene, MeteringKind, SceneId, SensorType,
};
use crate::reconcile::{self, TickReport};
use crate::scene::SceneManager;
use crate::scene::activation::{self, SceneCall};
use crate::store::{StructureRegistry, Trash};
use crate::{feed, jobs};

// ── EngineInner ──────────────────────────────────────────────────────

/// Shared state of one engine. Background tasks hold an `Arc` to it.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) connection: ConnectionManager,
    pub(crate) registry: StructureRegistry,
    pub(crate) trash: Trash,
    pub(crate) jobs: JobQueue,
    pub(crate) scenes: SceneManager,
    pub(crate) listener: Arc<dyn EngineListener>,
    /// Held for the duration of one tick; a tick that finds it taken is skipped.
    pub(crate) tick_lock: tokio::sync::Mutex<()>,
    /// Set once initial scene hydration and generation ran.
    pub(crate) hydrated: AtomicBool,
    /// Host-persisted properties for devices not discovered yet.
    preloaded: Mutex<HashMap<Dsid, BTreeMap<String, String>>>,
    cancel: CancellationToken,
    /// Child token for the current run; cancelled on stop, replaced on start.
    cancel_child: Mutex<CancellationToken>,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl EngineInner {
    /// Token cancelled when the current run stops.
    pub(crate) fn session_token(&self) -> CancellationToken {
        self.cancel_child
            .lock()
            .expect("cancel token lock poisoned")
            .clone()
    }

    /// Queue a sensor read. Returns `false` for `Never` or when already queued.
    pub(crate) fn schedule_sensor(
        &self,
        dsid: &Dsid,
        sensor: SensorType,
        priority: RefreshPriority,
    ) -> bool {
        let Some(priority) = priority.job_priority() else {
            return false;
        };
        self.jobs.push(
            JobKey::Sensor {
                device: dsid.clone(),
                sensor,
            },
            priority,
        )
    }

    /// Queue a read of one stored scene configuration.
    pub(crate) fn schedule_scene_config(&self, dsid: &Dsid, scene: u8) -> bool {
        let Some(priority) = self.config.scene_config_priority.job_priority() else {
            return false;
        };
        let queued = self.jobs.push(
            JobKey::SceneConfig {
                device: dsid.clone(),
                scene,
            },
            priority,
        );
        if queued {
            debug!(device = %dsid, scene, "scene configuration read scheduled");
        }
        queued
    }

    pub(crate) fn schedule_metering(&self, circuit: &Dsid, kind: MeteringKind) -> bool {
        let Some(priority) = self.config.metering_priority.job_priority() else {
            return false;
        };
        self.jobs.push(
            JobKey::Metering {
                circuit: circuit.clone(),
                kind,
            },
            priority,
        )
    }

    pub(crate) fn take_preloaded(&self, dsid: &Dsid) -> Option<BTreeMap<String, String>> {
        self.preloaded
            .lock()
            .expect("preload lock poisoned")
            .remove(dsid)
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The synchronization engine for one server.
///
/// Cheaply cloneable via `Arc<EngineInner>`. [`new`](Self::new) only
/// builds the HTTP client; [`start`](Self::start) spawns the background
/// tasks and [`stop`](Self::stop) shuts them down again while keeping the
/// device registry for a later restart.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig, listener: Arc<dyn EngineListener>) -> Result<Self, CoreError> {
        let connection = ConnectionManager::new(&config, Arc::clone(&listener))?;
        let scenes = SceneManager::new(config.echo_ttl, config.scene_min_interval);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                connection,
                registry: StructureRegistry::new(),
                trash: Trash::new(),
                jobs: JobQueue::new(),
                scenes,
                listener,
                tick_lock: tokio::sync::Mutex::new(()),
                hydrated: AtomicBool::new(false),
                preloaded: Mutex::new(HashMap::new()),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the reconciliation tick, the job worker and (if enabled) the
    /// event feed. The first tick runs immediately. Calling `start` on a
    /// running engine does nothing.
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            debug!("engine already running");
            return;
        }

        let child = self.inner.cancel.child_token();
        *self
            .inner
            .cancel_child
            .lock()
            .expect("cancel token lock poisoned") = child.clone();

        let period = self.inner.config.polling_interval;
        handles.push(tokio::spawn(tick_task(
            Arc::clone(&self.inner),
            period,
            child.clone(),
        )));
        handles.push(tokio::spawn(jobs::executor::run(
            Arc::clone(&self.inner),
            child.clone(),
        )));
        if self.inner.config.event_feed_enabled {
            handles.push(tokio::spawn(feed::run(Arc::clone(&self.inner), child)));
        }

        info!(
            url = %self.inner.config.url,
            polling_secs = period.as_secs(),
            event_feed = self.inner.config.event_feed_enabled,
            "engine started"
        );
    }

    /// Stop every background task and end the session.
    ///
    /// Queued background jobs are dropped; the event feed unsubscribes
    /// before its task exits. Devices, circuits and scenes stay in place.
    pub async fn stop(&self) {
        self.inner.session_token().cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.inner.jobs.clear();
        self.inner.connection.logout().await;
        info!(devices = self.inner.registry.device_count(), "engine stopped");
    }

    /// Run one reconciliation tick now.
    ///
    /// Skipped (empty report) if another tick is in progress or the server
    /// is unreachable.
    pub async fn tick(&self) -> TickReport {
        reconcile::tick(&self.inner).await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Queue a state change on a device. It is dispatched by the next tick.
    pub fn enqueue(&self, dsid: &Dsid, update: DeviceStateUpdate) -> Result<(), CoreError> {
        self.inner
            .registry
            .update_device(dsid, |d| d.enqueue(update))
            .ok_or_else(|| CoreError::DeviceNotFound {
                dsid: dsid.to_string(),
            })
    }

    /// Call a zone/group scene. Calls repeated faster than the configured
    /// minimum interval are deferred, not dropped.
    pub async fn call_scene(&self, id: SceneId) -> Result<SceneCall, CoreError> {
        activation::call_internal_scene(&self.inner, id).await
    }

    pub async fn undo_scene(&self, id: SceneId) -> Result<(), CoreError> {
        if self.inner.scenes.scene(id).is_none() {
            return Err(CoreError::SceneNotFound {
                scene: id.to_string(),
            });
        }
        activation::undo_internal_scene(&self.inner, id).await
    }

    pub fn register_scene_listener(&self, id: SceneId, listener: Arc<dyn SceneListener>) {
        self.inner.scenes.register_listener(id, listener);
    }

    pub fn unregister_scene_listener(&self, id: SceneId) {
        self.inner.scenes.unregister_listener(id);
    }

    /// Replace the credentials. Clears an authentication failure so the
    /// next tick logs in again.
    pub fn update_credentials(&self, auth: AuthCredentials) {
        self.inner.connection.update_credentials(auth);
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn device(&self, dsid: &Dsid) -> Option<Arc<Device>> {
        self.inner.registry.device(dsid)
    }

    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.registry.devices()
    }

    /// Receiver that yields a new device snapshot after every change.
    pub fn subscribe_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.inner.registry.subscribe_devices()
    }

    pub fn circuits(&self) -> Arc<Vec<Arc<Circuit>>> {
        self.inner.registry.circuits()
    }

    pub fn scene(&self, id: SceneId) -> Option<InternalScene> {
        self.inner.scenes.scene(id)
    }

    pub fn scenes(&self) -> Vec<InternalScene> {
        self.inner.scenes.scenes()
    }

    /// Devices waiting in the trash for their grace period to end.
    pub fn trashed_devices(&self) -> Vec<Dsid> {
        self.inner.trash.ids()
    }

    /// Number of background reads waiting to run.
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    // ── Persisted properties ─────────────────────────────────────────

    /// Stash host-persisted properties. Applied immediately to a known
    /// device, otherwise when the device is first discovered.
    pub fn preload_properties(&self, dsid: Dsid, props: BTreeMap<String, String>) {
        if self
            .inner
            .registry
            .update_device(&dsid, |d| d.import_properties(&props))
            .is_some()
        {
            return;
        }
        self.inner
            .preloaded
            .lock()
            .expect("preload lock poisoned")
            .insert(dsid, props);
    }

    /// Properties the host should persist for a device.
    pub fn device_properties(&self, dsid: &Dsid) -> Option<BTreeMap<String, String>> {
        self.inner.registry.device(dsid).map(|d| d.export_properties())
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn tick_task(engine: Arc<EngineInner>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let report = reconcile::tick(&engine).await;
                if report.ran {
                    debug!(?report, "tick complete");
                }
            }
        }
    }
}
