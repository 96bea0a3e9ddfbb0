//! Runs the slot source over a cycle plan with per-point isolation.
//!
//! Targets are scraped concurrently (bounded), the dates of one target
//! sequentially with a politeness delay in between. A failed date is left
//! out of the results and the target moves on to its next date; a target
//! counts as failed only when none of its dates could be read.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use shared_types::{QueryPoint, TargetId};
use std::time::Duration;
use tokio::time;

use crate::config::Settings;
use crate::error::WatchError;
use crate::expander::CyclePlan;
use crate::snapshot::ScrapeResults;
use crate::source::SlotSource;
use crate::targets::TargetRegistry;

#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    pub duration_minutes: u32,
    pub timeout: Duration,
    pub request_delay: Duration,
    pub max_parallel_targets: usize,
}

impl From<&Settings> for ScrapeOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            duration_minutes: settings.duration_minutes,
            timeout: settings.scrape_timeout,
            request_delay: settings.request_delay,
            max_parallel_targets: settings.max_parallel_targets,
        }
    }
}

/// Everything gathered for one plan
#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub results: ScrapeResults,
    /// Points that produced no reading, with the reason
    pub failures: Vec<(QueryPoint, WatchError)>,
    failed_targets: Vec<TargetId>,
}

impl ScrapeOutcome {
    /// Targets for which every planned point failed
    pub fn failed_targets(&self) -> Vec<TargetId> {
        self.failed_targets.clone()
    }

    /// Targets with at least one successfully read point
    pub fn succeeded_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = Vec::new();
        for (point, _) in &self.results {
            if !targets.contains(&point.target) {
                targets.push(point.target.clone());
            }
        }
        targets
    }

    pub fn failure_for(&self, point: &QueryPoint) -> Option<&WatchError> {
        self.failures.iter().find(|(p, _)| p == point).map(|(_, e)| e)
    }
}

#[derive(Default)]
struct TargetOutcome {
    results: ScrapeResults,
    failures: Vec<(QueryPoint, WatchError)>,
}

pub async fn scrape_plan(
    source: &dyn SlotSource,
    registry: &TargetRegistry,
    plan: &CyclePlan,
    options: ScrapeOptions,
) -> ScrapeOutcome {
    let outcomes: Vec<(TargetId, TargetOutcome)> = stream::iter(plan.by_target())
        .map(|(target, dates)| async move {
            let outcome = scrape_target(source, registry, &target, dates, options).await;
            (target, outcome)
        })
        .buffer_unordered(options.max_parallel_targets.max(1))
        .collect()
        .await;

    let mut outcome = ScrapeOutcome::default();
    for (target, scraped) in outcomes {
        if scraped.results.is_empty() && !scraped.failures.is_empty() {
            outcome.failed_targets.push(target);
        }
        outcome.results.extend(scraped.results);
        outcome.failures.extend(scraped.failures);
    }
    outcome
}

async fn scrape_target(
    source: &dyn SlotSource,
    registry: &TargetRegistry,
    target: &TargetId,
    dates: Vec<NaiveDate>,
    options: ScrapeOptions,
) -> TargetOutcome {
    let mut outcome = TargetOutcome::default();
    let point = |date| QueryPoint {
        target: target.clone(),
        date,
    };

    let Some(descriptor) = registry.get(target) else {
        tracing::error!("Target {} is not configured, skipping it", target);
        for date in dates {
            let error = WatchError::target(target, "target is not configured");
            outcome.failures.push((point(date), error));
        }
        return outcome;
    };

    for (i, date) in dates.into_iter().enumerate() {
        if i > 0 && !options.request_delay.is_zero() {
            time::sleep(options.request_delay).await;
        }

        let scraped = time::timeout(
            options.timeout,
            source.scrape(descriptor, date, options.duration_minutes),
        )
        .await
        .unwrap_or_else(|_| {
            Err(WatchError::Timeout {
                target: target.clone(),
                after: options.timeout,
            })
        });

        match scraped {
            Ok(slots) => {
                tracing::debug!(
                    "{} on {}: {} slot(s) reported",
                    descriptor.name,
                    date,
                    slots.len()
                );
                outcome.results.push((point(date), slots));
            }
            Err(e) => {
                match &e {
                    WatchError::Timeout { .. } => tracing::warn!(
                        "{} on {}: page timed out (date may not be bookable yet)",
                        descriptor.name,
                        date
                    ),
                    _ => tracing::error!("Failed to scrape {} for {}: {}", target, date, e),
                }
                outcome.failures.push((point(date), e));
            }
        }
    }

    outcome
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use crate::expander;
    use crate::targets::test_descriptor;
    use chrono::NaiveDate;
    use shared_types::{Slot, WatchRule, Weekday};

    fn options() -> ScrapeOptions {
        ScrapeOptions {
            duration_minutes: 90,
            timeout: Duration::from_secs(5),
            request_delay: Duration::ZERO,
            max_parallel_targets: 2,
        }
    }

    fn plan_for(targets: &[&str], horizon: u32) -> CyclePlan {
        let rule = WatchRule::new(
            targets.iter().map(|t| TargetId::new(*t)).collect(),
            Weekday::Tuesday,
            "18:00".parse().unwrap(),
            "21:00".parse().unwrap(),
            horizon,
        )
        .unwrap();
        expander::plan(&[rule], NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
    }

    fn registry() -> TargetRegistry {
        TargetRegistry::new([test_descriptor("a"), test_descriptor("b")]).unwrap()
    }

    #[tokio::test]
    async fn test_failure_isolated_to_target() {
        let source = FakeSource::default();
        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        source.set("b", tuesday, vec![Slot::available("18:00".parse().unwrap())]);
        source.fail("a");

        let plan = plan_for(&["a", "b"], 2);
        let outcome = scrape_plan(&source, &registry(), &plan, options()).await;

        assert_eq!(outcome.failed_targets(), vec![TargetId::new("a")]);
        assert_eq!(outcome.succeeded_targets(), vec![TargetId::new("b")]);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|(p, _)| p.target.as_str() == "b"));
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(source.call_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_date_does_not_hide_other_dates() {
        let source = FakeSource::default();
        let near = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let far = NaiveDate::from_ymd_opt(2026, 10, 27).unwrap();
        source.set("a", near, vec![Slot::available("18:30".parse().unwrap())]);
        source.fail_on("a", far);

        let plan = plan_for(&["a"], 2);
        let outcome = scrape_plan(&source, &registry(), &plan, options()).await;

        assert!(outcome.failed_targets().is_empty());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].0.date, near);
        let far_point = QueryPoint {
            target: TargetId::new("a"),
            date: far,
        };
        assert!(outcome.failure_for(&far_point).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_target_scoped() {
        let source = FakeSource {
            hang: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let plan = plan_for(&["a"], 1);
        let outcome = scrape_plan(&source, &registry(), &plan, options()).await;

        assert!(outcome.results.is_empty());
        assert!(matches!(outcome.failures[0].1, WatchError::Timeout { .. }));
        assert_eq!(outcome.failed_targets(), vec![TargetId::new("a")]);
    }

    #[tokio::test]
    async fn test_unconfigured_target_fails_without_scraping() {
        let source = FakeSource::default();
        let plan = plan_for(&["zzz"], 1);
        let outcome = scrape_plan(&source, &registry(), &plan, options()).await;
        assert_eq!(outcome.failed_targets(), vec![TargetId::new("zzz")]);
        assert_eq!(source.call_count(), 0);
    }
}
