// ── Background job queue ──
//
// Priority-ordered queue of low-urgency remote reads. Lower rank runs
// sooner; FIFO within a rank. At most one queued job per key: pushing a
// key that is still waiting is a no-op. Cancellation is lazy: the heap
// entry stays behind and is skipped when popped.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::model::{Dsid, MeteringKind, SensorType};

/// Execution tier of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPriority {
    High,
    Medium,
    Low,
    /// Runs after every named tier; lower numbers first.
    Custom(u32),
}

impl JobPriority {
    fn rank(self) -> (u8, u32) {
        match self {
            Self::High => (0, 0),
            Self::Medium => (1, 0),
            Self::Low => (2, 0),
            Self::Custom(n) => (3, n),
        }
    }
}

/// Configured refresh priority; `Never` disables the refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefreshPriority {
    #[default]
    Never,
    High,
    Medium,
    Low,
    Custom(u32),
}

impl RefreshPriority {
    pub fn job_priority(self) -> Option<JobPriority> {
        match self {
            Self::Never => None,
            Self::High => Some(JobPriority::High),
            Self::Medium => Some(JobPriority::Medium),
            Self::Low => Some(JobPriority::Low),
            Self::Custom(n) => Some(JobPriority::Custom(n)),
        }
    }
}

impl fmt::Display for RefreshPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("never"),
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
            Self::Custom(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for RefreshPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => other.parse::<u32>().map(Self::Custom).map_err(|_| {
                format!("invalid priority {s:?} (expected never, low, medium, high or a number)")
            }),
        }
    }
}

/// Identity of a background read. Also fully describes the work to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    Sensor { device: Dsid, sensor: SensorType },
    SceneConfig { device: Dsid, scene: u8 },
    Metering { circuit: Dsid, kind: MeteringKind },
}

impl JobKey {
    fn owner(&self) -> &Dsid {
        match self {
            Self::Sensor { device, .. } | Self::SceneConfig { device, .. } => device,
            Self::Metering { circuit, .. } => circuit,
        }
    }
}

#[derive(Debug)]
struct Entry {
    rank: (u8, u32),
    seq: u64,
    key: JobKey,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank, self.seq).cmp(&(other.rank, other.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<Entry>>,
    /// Waiting keys and the sequence number of their live heap entry.
    waiting: HashMap<JobKey, u64>,
    next_seq: u64,
}

#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job. Returns `false` if the key is already waiting.
    pub fn push(&self, key: JobKey, priority: JobPriority) -> bool {
        {
            let mut state = self.state.lock().expect("job queue lock poisoned");
            if state.waiting.contains_key(&key) {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.insert(key.clone(), seq);
            state.heap.push(Reverse(Entry {
                rank: priority.rank(),
                seq,
                key,
            }));
        }
        self.notify.notify_one();
        true
    }

    /// Take the next job to run.
    pub fn pop(&self) -> Option<JobKey> {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        while let Some(Reverse(entry)) = state.heap.pop() {
            if state.waiting.get(&entry.key) == Some(&entry.seq) {
                state.waiting.remove(&entry.key);
                return Some(entry.key);
            }
        }
        None
    }

    /// Cancel a waiting job. Returns `true` if one was waiting.
    pub fn cancel(&self, key: &JobKey) -> bool {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        state.waiting.remove(key).is_some()
    }

    /// Cancel every waiting job of one device or circuit.
    pub fn cancel_owner(&self, owner: &Dsid) -> usize {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        let before = state.waiting.len();
        state.waiting.retain(|key, _| key.owner() != owner);
        before - state.waiting.len()
    }

    pub fn is_waiting(&self, key: &JobKey) -> bool {
        self.state
            .lock()
            .expect("job queue lock poisoned")
            .waiting
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("job queue lock poisoned")
            .waiting
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        state.heap.clear();
        state.waiting.clear();
    }

    /// Resolves after the next `push` (or immediately if one happened
    /// since the last wait).
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}
