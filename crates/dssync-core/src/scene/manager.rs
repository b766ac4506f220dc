// ── Scene manager state ──
//
// Scene table, echo ledger, call throttle and per-scene listener
// registrations. During bulk generation listener (un)registrations are
// queued and applied once the scene set is complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::echo::EchoLedger;
use super::throttle::SceneThrottle;
use crate::listener::SceneListener;
use crate::model::{Device, Dsid, InternalScene, SceneId};

enum ListenerRequest {
    Register(SceneId, Arc<dyn SceneListener>),
    Unregister(SceneId),
}

#[derive(Default)]
struct Listeners {
    generating: bool,
    queued: Vec<ListenerRequest>,
    by_scene: HashMap<SceneId, Arc<dyn SceneListener>>,
}

impl Listeners {
    fn apply(&mut self, request: ListenerRequest) {
        match request {
            ListenerRequest::Register(id, listener) => {
                self.by_scene.insert(id, listener);
            }
            ListenerRequest::Unregister(id) => {
                self.by_scene.remove(&id);
            }
        }
    }
}

pub struct SceneManager {
    scenes: Mutex<HashMap<SceneId, InternalScene>>,
    pub(crate) echoes: EchoLedger,
    pub(crate) throttle: SceneThrottle,
    listeners: Mutex<Listeners>,
}

impl SceneManager {
    pub fn new(echo_ttl: Duration, min_call_interval: Duration) -> Self {
        Self {
            scenes: Mutex::new(HashMap::new()),
            echoes: EchoLedger::new(echo_ttl),
            throttle: SceneThrottle::new(min_call_interval),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    // ── Scene table ──────────────────────────────────────────────────

    pub fn scene(&self, id: SceneId) -> Option<InternalScene> {
        self.scenes
            .lock()
            .expect("scene lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All scenes, ordered by id.
    pub fn scenes(&self) -> Vec<InternalScene> {
        let mut all: Vec<InternalScene> = self
            .scenes
            .lock()
            .expect("scene lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub fn len(&self) -> usize {
        self.scenes.lock().expect("scene lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a scene, creating it if unseen. Returns the scene and
    /// whether it was created.
    pub(crate) fn ensure(
        &self,
        id: SceneId,
        name: impl FnOnce() -> String,
        reference_devices: impl FnOnce() -> Vec<Dsid>,
    ) -> (InternalScene, bool) {
        let mut scenes = self.scenes.lock().expect("scene lock poisoned");
        if let Some(existing) = scenes.get(&id) {
            return (existing.clone(), false);
        }
        let mut scene = InternalScene::new(id, name());
        scene.reference_devices = reference_devices();
        scenes.insert(id, scene.clone());
        debug!(scene = %id, name = %scene.name, "scene created");
        (scene, true)
    }

    /// Set a scene's activity. Activating a scene deactivates every other
    /// active scene of the same zone/group. Returns the scenes whose
    /// state actually changed.
    pub(crate) fn set_active(&self, id: SceneId, active: bool) -> Vec<InternalScene> {
        let mut scenes = self.scenes.lock().expect("scene lock poisoned");
        let mut changed = Vec::new();
        if active {
            for other in scenes.values_mut() {
                if other.id != id && other.active && other.id.same_target(&id) {
                    other.active = false;
                    changed.push(other.clone());
                }
            }
        }
        if let Some(scene) = scenes.get_mut(&id) {
            if scene.active != active {
                scene.active = active;
                changed.push(scene.clone());
            }
        }
        changed
    }

    /// Remove every scene for which `orphaned` holds. Each removed
    /// scene's listener is told and dropped.
    pub(crate) fn remove_where(&self, orphaned: impl Fn(SceneId) -> bool) -> Vec<InternalScene> {
        let removed: Vec<InternalScene> = {
            let mut scenes = self.scenes.lock().expect("scene lock poisoned");
            let ids: Vec<SceneId> = scenes.keys().copied().filter(|id| orphaned(*id)).collect();
            ids.iter().filter_map(|id| scenes.remove(id)).collect()
        };
        for scene in &removed {
            let listener = self
                .listeners
                .lock()
                .expect("listener lock poisoned")
                .by_scene
                .remove(&scene.id);
            if let Some(listener) = listener {
                listener.scene_removed(scene);
            }
            debug!(scene = %scene.id, "scene removed");
        }
        removed
    }

    /// Add a newly discovered device to the reference sets it belongs to.
    pub(crate) fn add_reference(&self, device: &Device) {
        let mut scenes = self.scenes.lock().expect("scene lock poisoned");
        for scene in scenes.values_mut() {
            if device.is_in_zone_group(scene.id.zone, scene.id.group)
                && !scene.reference_devices.contains(&device.dsid)
            {
                scene.reference_devices.push(device.dsid.clone());
            }
        }
    }

    pub(crate) fn remove_reference(&self, dsid: &Dsid) {
        let mut scenes = self.scenes.lock().expect("scene lock poisoned");
        for scene in scenes.values_mut() {
            scene.reference_devices.retain(|d| d != dsid);
        }
    }

    // ── Listener registration ────────────────────────────────────────

    pub fn register_listener(&self, id: SceneId, listener: Arc<dyn SceneListener>) {
        self.request(ListenerRequest::Register(id, listener));
    }

    pub fn unregister_listener(&self, id: SceneId) {
        self.request(ListenerRequest::Unregister(id));
    }

    pub fn has_listener(&self, id: SceneId) -> bool {
        self.listener(id).is_some()
    }

    pub fn is_generating(&self) -> bool {
        self.listeners.lock().expect("listener lock poisoned").generating
    }

    pub(crate) fn begin_generation(&self) {
        self.listeners.lock().expect("listener lock poisoned").generating = true;
    }

    /// End bulk generation and apply queued listener requests in order.
    pub(crate) fn finish_generation(&self) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        listeners.generating = false;
        let queued = std::mem::take(&mut listeners.queued);
        if !queued.is_empty() {
            debug!(count = queued.len(), "applying queued scene listener requests");
        }
        for request in queued {
            listeners.apply(request);
        }
    }

    /// Deliver a state change to the scene's registered listener.
    pub(crate) fn notify(&self, scene: &InternalScene) {
        // Clone out of the lock so the callback may (un)register.
        if let Some(listener) = self.listener(scene.id) {
            listener.scene_state_changed(scene);
        }
    }

    fn listener(&self, id: SceneId) -> Option<Arc<dyn SceneListener>> {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .by_scene
            .get(&id)
            .cloned()
    }

    fn request(&self, request: ListenerRequest) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        if listeners.generating {
            listeners.queued.push(request);
        } else {
            listeners.apply(request);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> SceneManager {
        SceneManager::new(Duration::from_secs(10), Duration::from_millis(500))
    }

    fn create(m: &SceneManager, id: SceneId) {
        m.ensure(id, || format!("scene {}", id.scene), Vec::new);
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl SceneListener for Counter {
        fn scene_state_changed(&self, _scene: &InternalScene) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RemovalCounter(AtomicUsize);

    impl SceneListener for RemovalCounter {
        fn scene_state_changed(&self, _scene: &InternalScene) {}

        fn scene_removed(&self, _scene: &InternalScene) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ensure_creates_once() {
        let m = manager();
        let id = SceneId::new(1, 1, 5);
        let (_, created) = m.ensure(id, || "a".into(), Vec::new);
        assert!(created);
        let (scene, created) = m.ensure(id, || "b".into(), Vec::new);
        assert!(!created);
        assert_eq!(scene.name, "a");
    }

    #[test]
    fn activation_deactivates_siblings_only() {
        let m = manager();
        let a = SceneId::new(1, 1, 5);
        let b = SceneId::new(1, 1, 6);
        let other_zone = SceneId::new(2, 1, 5);
        for id in [a, b, other_zone] {
            create(&m, id);
        }
        m.set_active(a, true);
        m.set_active(other_zone, true);

        let changed = m.set_active(b, true);
        let ids: Vec<_> = changed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(!m.scene(a).unwrap().active);
        assert!(m.scene(other_zone).unwrap().active);

        // Re-activating an active scene changes nothing.
        assert!(m.set_active(b, true).is_empty());
    }

    #[test]
    fn registrations_wait_for_generation_to_finish() {
        let m = manager();
        let id = SceneId::new(1, 1, 5);
        create(&m, id);

        m.begin_generation();
        m.register_listener(id, Arc::new(Counter::default()));
        assert!(!m.has_listener(id));

        m.finish_generation();
        assert!(m.has_listener(id));
    }

    #[test]
    fn queued_register_then_unregister_ends_unregistered() {
        let m = manager();
        let id = SceneId::new(1, 1, 5);
        m.begin_generation();
        m.register_listener(id, Arc::new(Counter::default()));
        m.unregister_listener(id);
        m.finish_generation();
        assert!(!m.has_listener(id));
    }

    #[test]
    fn notify_reaches_registered_listener() {
        let m = manager();
        let id = SceneId::new(1, 1, 5);
        create(&m, id);
        let counter = Arc::new(Counter::default());
        m.register_listener(id, counter.clone());

        m.notify(&m.scene(id).unwrap());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn references_follow_zone_and_group() {
        use crate::model::OutputMode;

        let m = manager();
        let id = SceneId::new(1, 1, 5);
        create(&m, id);

        let mut inside = Device::new(Dsid::from("in"), OutputMode::Dimmable);
        inside.zone_id = 1;
        inside.groups = vec![1];
        let mut outside = Device::new(Dsid::from("out"), OutputMode::Dimmable);
        outside.zone_id = 2;
        outside.groups = vec![1];

        m.add_reference(&inside);
        m.add_reference(&outside);
        m.add_reference(&inside);
        assert_eq!(m.scene(id).unwrap().reference_devices, vec![Dsid::from("in")]);

        m.remove_reference(&Dsid::from("in"));
        assert!(m.scene(id).unwrap().reference_devices.is_empty());
    }

    #[test]
    fn removal_notifies_and_drops_listener() {
        let m = manager();
        let gone = SceneId::new(1, 1, 5);
        let kept = SceneId::new(2, 1, 5);
        create(&m, gone);
        create(&m, kept);
        let counter = Arc::new(RemovalCounter::default());
        m.register_listener(gone, counter.clone());

        let removed = m.remove_where(|id| id.zone == 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, gone);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!m.has_listener(gone));
        assert!(m.scene(gone).is_none());
        assert!(m.scene(kept).is_some());
    }
}
