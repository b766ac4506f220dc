// ── Deferred deletion ──
//
// Devices missing from a snapshot wait here, stamped with the day they
// vanished, until they reappear or their grace period runs out.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Days, NaiveDate};

use crate::model::{Device, Dsid};

#[derive(Debug, Clone)]
pub struct TrashEntry {
    pub device: Device,
    pub removed_on: NaiveDate,
}

impl TrashEntry {
    /// Expired once `removed_on + grace_days <= today`.
    pub fn is_expired(&self, today: NaiveDate, grace_days: u32) -> bool {
        self.removed_on
            .checked_add_days(Days::new(u64::from(grace_days)))
            .is_none_or(|deadline| deadline <= today)
    }
}

#[derive(Debug, Default)]
pub struct Trash {
    entries: Mutex<HashMap<Dsid, TrashEntry>>,
}

impl Trash {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, device: Device, today: NaiveDate) {
        let mut entries = self.entries.lock().expect("trash lock poisoned");
        entries.insert(
            device.dsid.clone(),
            TrashEntry {
                device,
                removed_on: today,
            },
        );
    }

    /// Take a device back out of the trash, if present.
    pub(crate) fn take(&self, dsid: &Dsid) -> Option<Device> {
        let mut entries = self.entries.lock().expect("trash lock poisoned");
        entries.remove(dsid).map(|e| e.device)
    }

    /// Drop every expired entry, returning the purged devices.
    pub(crate) fn purge_expired(&self, today: NaiveDate, grace_days: u32) -> Vec<Device> {
        let mut entries = self.entries.lock().expect("trash lock poisoned");
        let expired: Vec<Dsid> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(today, grace_days))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| entries.remove(id).map(|e| e.device))
            .collect()
    }

    pub fn contains(&self, dsid: &Dsid) -> bool {
        self.entries
            .lock()
            .expect("trash lock poisoned")
            .contains_key(dsid)
    }

    /// Whether a trashed device belongs to `(zone, group)`.
    pub fn holds_member_of(&self, zone: u16, group: u16) -> bool {
        self.entries
            .lock()
            .expect("trash lock poisoned")
            .values()
            .any(|e| e.device.is_in_zone_group(zone, group))
    }

    pub fn ids(&self) -> Vec<Dsid> {
        self.entries
            .lock()
            .expect("trash lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("trash lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
