//! Reconciles a fresh snapshot with the stored slot state.
//!
//! A notification fires only when a slot transitions into `Available` from
//! anything else (never seen, or last seen booked). A booked reading re-arms
//! the key so the next opening notifies again. Keys missing from the
//! snapshot are carried over untouched.

use chrono::{DateTime, Utc};
use shared_types::{EventDetail, NotificationEvent, SlotStatus, StateMap, StateRecord};

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    pub events: Vec<NotificationEvent>,
    pub updated: StateMap,
}

impl DiffOutcome {
    /// Drop the events `cold` selects and restore the notification
    /// timestamps they changed. Returns how many were dropped.
    pub fn suppress<F>(&mut self, previous: &StateMap, cold: F) -> usize
    where
        F: Fn(&NotificationEvent) -> bool,
    {
        let (dropped, kept): (Vec<_>, Vec<_>) = self.events.drain(..).partition(|e| cold(e));
        for event in &dropped {
            let key = event.key();
            if let Some(record) = self.updated.get_mut(&key) {
                record.last_notified_at = previous.get(&key).and_then(|r| r.last_notified_at);
            }
        }
        self.events = kept;
        dropped.len()
    }
}

pub fn diff(snapshot: &Snapshot, previous: &StateMap, now: DateTime<Utc>) -> DiffOutcome {
    let mut updated = previous.clone();
    let mut events = Vec::new();

    for (key, observation) in snapshot.iter() {
        let prior = previous.get(key);
        let prior_status = prior.map(|r| r.last_status);
        let last_notified_at = prior.and_then(|r| r.last_notified_at);

        let record = match observation.status {
            SlotStatus::Available if prior_status != Some(SlotStatus::Available) => {
                events.push(NotificationEvent {
                    target: key.target.clone(),
                    date: key.date,
                    time: key.time,
                    detail: EventDetail {
                        window: observation.window,
                        previous_status: prior_status,
                    },
                });
                StateRecord {
                    key: key.clone(),
                    last_status: SlotStatus::Available,
                    last_notified_at: Some(now),
                }
            }
            status => StateRecord {
                key: key.clone(),
                last_status: status,
                last_notified_at,
            },
        };

        updated.insert(key.clone(), record);
    }

    DiffOutcome { events, updated }
}
