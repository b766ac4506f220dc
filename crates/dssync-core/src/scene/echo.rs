// ── Echo ledger ──
//
// Markers for commands this engine issued whose effect will come back
// through the event feed. A matching inbound event consumes exactly one
// marker and is dropped; markers expire after a TTL so a lost event
// cannot suppress a later, genuine one.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::model::Dsid;

/// What an echoed event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EchoTarget {
    Device(Dsid),
    Zone { zone: u16, group: u16 },
}

/// The echoed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EchoAction {
    CallScene(u8),
    UndoScene(u8),
}

#[derive(Debug)]
struct EchoEntry {
    target: EchoTarget,
    action: EchoAction,
    recorded: Instant,
}

#[derive(Debug)]
pub struct EchoLedger {
    entries: Mutex<VecDeque<EchoEntry>>,
    ttl: Duration,
}

impl EchoLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ttl,
        }
    }

    pub fn record(&self, target: EchoTarget, action: EchoAction) {
        let mut entries = self.entries.lock().expect("echo ledger lock poisoned");
        self.prune(&mut entries);
        trace!(?target, ?action, "echo recorded");
        entries.push_back(EchoEntry {
            target,
            action,
            recorded: Instant::now(),
        });
    }

    /// Remove the newest matching marker (the command it was recorded for failed).
    pub fn withdraw(&self, target: &EchoTarget, action: EchoAction) -> bool {
        let mut entries = self.entries.lock().expect("echo ledger lock poisoned");
        let position = entries
            .iter()
            .rposition(|e| e.target == *target && e.action == action);
        position.and_then(|i| entries.remove(i)).is_some()
    }

    /// Consume the oldest matching marker. Returns `true` if the inbound
    /// event is an echo and must be dropped.
    pub fn consume(&self, target: &EchoTarget, action: EchoAction) -> bool {
        let mut entries = self.entries.lock().expect("echo ledger lock poisoned");
        self.prune(&mut entries);
        let position = entries
            .iter()
            .position(|e| e.target == *target && e.action == action);
        position.and_then(|i| entries.remove(i)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("echo ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, entries: &mut VecDeque<EchoEntry>) {
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|e| now.duration_since(e.recorded) >= self.ttl)
        {
            entries.pop_front();
        }
    }
}
