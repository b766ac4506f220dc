// ── Scene call throttle ──
//
// Next free call slot per scene. A call arriving before its slot is not
// blocked: it reserves the slot, so later callers queue behind it, and
// gets back the wait until the reserved instant.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::SceneId;

#[derive(Debug)]
pub struct SceneThrottle {
    last_call: Mutex<HashMap<SceneId, Instant>>,
    min_interval: Duration,
}

impl SceneThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    /// Claim the next call slot for `scene`.
    ///
    /// Returns `Ok` when the slot is now, otherwise the instant of the
    /// reserved slot. The caller must not send before that instant.
    pub fn try_acquire(&self, scene: SceneId) -> Result<(), Instant> {
        let now = Instant::now();
        let mut last_call = self.last_call.lock().expect("throttle lock poisoned");
        let slot = last_call
            .get(&scene)
            .map_or(now, |last| (*last + self.min_interval).max(now));
        last_call.insert(scene, slot);
        if slot > now { Err(slot) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_call_waits_for_interval() {
        let throttle = SceneThrottle::new(Duration::from_millis(500));
        let id = SceneId::new(1, 1, 5);

        let start = Instant::now();
        assert!(throttle.try_acquire(id).is_ok());
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(
            throttle.try_acquire(id),
            Err(start + Duration::from_millis(500))
        );

        // Other scenes are independent.
        assert!(throttle.try_acquire(SceneId::new(1, 1, 6)).is_ok());

        // The deferred call holds the 500ms slot, so the next free one is 1000ms.
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(
            throttle.try_acquire(id),
            Err(start + Duration::from_millis(1000))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_queue_one_interval_apart() {
        let throttle = SceneThrottle::new(Duration::from_millis(500));
        let id = SceneId::new(2, 1, 17);
        let start = Instant::now();

        assert!(throttle.try_acquire(id).is_ok());
        let slots: Vec<_> = (0..3).map(|_| throttle.try_acquire(id)).collect();
        assert_eq!(
            slots,
            vec![
                Err(start + Duration::from_millis(500)),
                Err(start + Duration::from_millis(1000)),
                Err(start + Duration::from_millis(1500)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_scene_is_called_immediately() {
        let throttle = SceneThrottle::new(Duration::from_millis(500));
        let id = SceneId::new(1, 1, 5);

        assert!(throttle.try_acquire(id).is_ok());
        tokio::time::advance(Duration::from_millis(700)).await;
        assert!(throttle.try_acquire(id).is_ok());
    }
}
