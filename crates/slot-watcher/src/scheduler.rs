//! Check cycle driver.
//!
//! [`CycleRunner`] owns the in-memory slot state and runs one complete
//! plan, scrape, diff, commit, notify pass. [`CheckScheduler`] fires it on a
//! fixed interval, never overlapping, until shutdown is requested.

use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use shared_types::{StateMap, TargetId};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

use crate::config::Settings;
use crate::diff;
use crate::dispatcher::NotificationDispatcher;
use crate::error::WatchResult;
use crate::expander;
use crate::notifier::Notifier;
use crate::scrape::{self, ScrapeOptions};
use crate::snapshot;
use crate::source::SlotSource;
use crate::state_store::{self, StateStore};

/// Summary of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub points_planned: usize,
    pub points_scraped: usize,
    pub failed_targets: Vec<TargetId>,
    pub observed_slots: usize,
    pub available_slots: usize,
    pub events: usize,
    pub deliveries_failed: usize,
    pub records_committed: usize,
    pub records_pruned: usize,
    /// Some target was read for the first time since a fresh start
    pub notifications_suppressed: bool,
    pub events_suppressed: usize,
}

pub struct CycleRunner {
    settings: Settings,
    source: Arc<dyn SlotSource>,
    store: Arc<dyn StateStore>,
    dispatcher: NotificationDispatcher,
    state: StateMap,
    /// After a fresh start: targets already read once. `None` once every
    /// watched target has been read (or when there was saved state).
    warmed: Option<BTreeSet<TargetId>>,
}

impl CycleRunner {
    /// Load the committed state and wire up the collaborators
    pub fn open(
        settings: Settings,
        source: Arc<dyn SlotSource>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> WatchResult<Self> {
        let (state, fresh) = match store.load()? {
            Some(state) => {
                tracing::info!("Loaded {} slot records", state.len());
                (state, false)
            }
            None => {
                tracing::info!("No saved state found, starting fresh");
                (StateMap::new(), true)
            }
        };

        let dispatcher = NotificationDispatcher::new(
            notifier,
            settings.ntfy.topic.clone(),
            settings.registry.clone(),
            settings.duration_minutes,
        );

        let warmed = (fresh && !settings.notify_on_cold_start).then(BTreeSet::new);

        Ok(Self {
            settings,
            source,
            store,
            dispatcher,
            state,
            warmed,
        })
    }

    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Whether notifications are still held back for some target
    pub fn is_cold_start(&self) -> bool {
        self.warmed.is_some()
    }

    /// Targets whose first successful reading since a fresh start is still
    /// pending; their openings are recorded but not announced.
    fn cold_targets(&self, succeeded: &[TargetId]) -> BTreeSet<TargetId> {
        match &self.warmed {
            Some(warmed) => succeeded
                .iter()
                .filter(|t| !warmed.contains(*t))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        }
    }

    fn mark_warmed(&mut self, targets: BTreeSet<TargetId>) {
        let Some(warmed) = &mut self.warmed else {
            return;
        };
        warmed.extend(targets);

        let all_read = self
            .settings
            .watches
            .iter()
            .flat_map(|w| w.targets())
            .all(|t| warmed.contains(t));
        if all_read {
            tracing::info!("Every watched target has been read once, notifications fully enabled");
            self.warmed = None;
        }
    }

    /// One full cycle for `today`.
    ///
    /// State is committed before any notification goes out, so a failed
    /// commit aborts the cycle without sending anything and the next tick
    /// retries from the last committed state.
    pub async fn run_cycle(
        &mut self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> WatchResult<CycleReport> {
        let plan = expander::plan(&self.settings.watches, today);
        tracing::info!(
            "Running check cycle: {} query point(s) across {} watch(es)",
            plan.len(),
            self.settings.watches.len()
        );

        let scraped = scrape::scrape_plan(
            self.source.as_ref(),
            &self.settings.registry,
            &plan,
            ScrapeOptions::from(&self.settings),
        )
        .await;
        let failed = scraped.failed_targets();
        let snapshot = snapshot::assemble(&plan, &scraped.results, &failed);

        let mut outcome = diff::diff(&snapshot, &self.state, now);
        let cold = self.cold_targets(&scraped.succeeded_targets());
        let events_suppressed = outcome.suppress(&self.state, |e| cold.contains(&e.target));
        if events_suppressed > 0 {
            tracing::info!(
                "First reading after a fresh start: recording {} open slot(s) without notifying",
                events_suppressed
            );
        }

        let mut updated = outcome.updated;
        let records_pruned = self.prune(&mut updated, today);

        // Blocking file I/O on the runtime thread. No await point sits between
        // the commit and the in-memory swap, so shutdown cannot split them.
        self.store.commit(&updated)?;
        self.state = updated;
        let notifications_suppressed = !cold.is_empty();
        self.mark_warmed(cold);

        let deliveries = self.dispatcher.dispatch(&outcome.events).await;
        let deliveries_failed = deliveries.iter().filter(|r| r.is_err()).count();

        Ok(CycleReport {
            points_planned: plan.len(),
            points_scraped: scraped.results.len(),
            failed_targets: snapshot.failed_targets().to_vec(),
            observed_slots: snapshot.len(),
            available_slots: snapshot.available_count(),
            events: outcome.events.len(),
            deliveries_failed,
            records_committed: self.state.len(),
            records_pruned,
            notifications_suppressed,
            events_suppressed,
        })
    }

    fn prune(&self, state: &mut StateMap, today: NaiveDate) -> usize {
        if self.settings.retention_days == 0 {
            return 0;
        }
        let Some(cutoff) = today.checked_sub_days(Days::new(self.settings.retention_days.into()))
        else {
            return 0;
        };
        let removed = state_store::prune_before(state, cutoff);
        if removed > 0 {
            tracing::info!("Pruned {} slot record(s) dated before {}", removed, cutoff);
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Terminated,
}

pub struct CheckScheduler {
    runner: CycleRunner,
    interval: Duration,
    state: SchedulerState,
    cycles: u64,
}

impl CheckScheduler {
    pub fn new(runner: CycleRunner, interval: Duration) -> Self {
        Self {
            runner,
            interval,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Cycles that ran to completion (committed or failed)
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// A cycle in flight when shutdown arrives is dropped; it cannot have
    /// committed partial results because the commit is its last state step.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting check scheduler (interval: {:?})", self.interval);

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            self.state = SchedulerState::Running;
            let today = Local::now().date_naive();
            let now = Utc::now();

            tokio::select! {
                result = self.runner.run_cycle(today, now) => {
                    self.cycles += 1;
                    match result {
                        Ok(report) => log_report(&report),
                        Err(e) => tracing::error!("Check cycle failed, state not committed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    tracing::warn!(
                        "Shutdown requested mid-cycle, abandoning it without committing"
                    );
                    break;
                }
            }

            self.state = SchedulerState::Idle;
            tracing::debug!("Sleeping until next check in {:?}", self.interval);
        }

        self.state = SchedulerState::Terminated;
        tracing::info!("Check scheduler stopped after {} cycle(s)", self.cycles);
    }
}

fn log_report(report: &CycleReport) {
    if !report.failed_targets.is_empty() {
        let failed: Vec<&str> = report.failed_targets.iter().map(|t| t.as_str()).collect();
        tracing::warn!("Targets skipped this cycle: {}", failed.join(", "));
    }
    tracing::info!(
        "Check cycle complete: {}/{} points scraped, {} slots in window ({} open), {} new, \
         {} delivery failures, {} records saved",
        report.points_scraped,
        report.points_planned,
        report.observed_slots,
        report.available_slots,
        report.events,
        report.deliveries_failed,
        report.records_committed
    );
}

#[cfg(test)]
pub(crate) fn test_settings(targets: &[&str]) -> Settings {
    use crate::config::{NtfyConfig, ScraperConfig};
    use crate::targets::{test_descriptor, TargetRegistry};
    use shared_types::{WatchRule, Weekday};
    use std::collections::BTreeMap;

    let mut scrapers = BTreeMap::new();
    scrapers.insert(
        "test".to_string(),
        ScraperConfig {
            command: vec!["true".to_string()],
        },
    );

    Settings {
        interval: Duration::from_secs(300),
        duration_minutes: 90,
        scrape_timeout: Duration::from_secs(30),
        request_delay: Duration::ZERO,
        max_parallel_targets: 2,
        retention_days: 14,
        notify_on_cold_start: false,
        state_path: "unused.json".into(),
        ntfy: NtfyConfig {
            topic: "alerts".to_string(),
            server: "https://ntfy.sh".to_string(),
            priority: "high".to_string(),
            tags: "tennis".to_string(),
        },
        scrapers,
        registry: TargetRegistry::new(targets.iter().map(|t| test_descriptor(t))).unwrap(),
        watches: vec![WatchRule::new(
            targets.iter().map(|t| TargetId::new(*t)).collect(),
            Weekday::Tuesday,
            "18:00".parse().unwrap(),
            "19:00".parse().unwrap(),
            2,
        )
        .unwrap()],
    }
}
