//! What is observed right now, filtered down to the windows users asked for.

use shared_types::{QueryPoint, Slot, SlotKey, SlotStatus, TargetId, TimeWindow};
use std::collections::BTreeMap;

use crate::expander::CyclePlan;

/// One observed slot that fell inside at least one watch window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: SlotStatus,
    /// First matching window, reported in notifications
    pub window: TimeWindow,
}

/// Observations of one cycle, keyed by slot identity
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    observations: BTreeMap<SlotKey, Observation>,
    failed_targets: Vec<TargetId>,
}

impl Snapshot {
    /// Record the slots scraped for one query point.
    ///
    /// Slots outside every window are dropped. If a source reports the same
    /// time twice, an available reading wins.
    pub fn record(&mut self, point: &QueryPoint, windows: &[TimeWindow], slots: &[Slot]) {
        for slot in slots {
            let Some(window) = windows.iter().find(|w| w.contains(slot.time)) else {
                continue;
            };
            let key = SlotKey::new(point.target.clone(), point.date, slot.time);
            self.observations
                .entry(key)
                .and_modify(|existing| {
                    if slot.status.is_available() {
                        existing.status = SlotStatus::Available;
                    }
                })
                .or_insert(Observation {
                    status: slot.status,
                    window: *window,
                });
        }
    }

    pub fn mark_failed(&mut self, target: TargetId) {
        if !self.failed_targets.contains(&target) {
            self.failed_targets.push(target);
        }
    }

    pub fn failed_targets(&self) -> &[TargetId] {
        &self.failed_targets
    }

    pub fn get(&self, key: &SlotKey) -> Option<&Observation> {
        self.observations.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotKey, &Observation)> {
        self.observations.iter()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.observations
            .values()
            .filter(|o| o.status.is_available())
            .count()
    }
}

/// Slots returned by a source for one query point
pub type ScrapeResults = Vec<(QueryPoint, Vec<Slot>)>;

/// Build a snapshot from the points that were read and the targets that
/// produced nothing at all.
///
/// Points that failed have no entry in `results`, so their keys are simply
/// not observed this cycle.
pub fn assemble(plan: &CyclePlan, results: &ScrapeResults, failed: &[TargetId]) -> Snapshot {
    let mut snapshot = Snapshot::default();

    for target in failed {
        snapshot.mark_failed(target.clone());
    }

    for (point, slots) in results {
        snapshot.record(point, plan.windows_for(point), slots);
    }

    snapshot
}
