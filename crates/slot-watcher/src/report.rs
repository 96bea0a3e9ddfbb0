//! One-shot availability report for the `check` command.
//!
//! Scrapes the planned points like a cycle would but never touches the
//! state store and never notifies.

use chrono::NaiveDate;
use serde::Serialize;
use shared_types::{Slot, TargetId, TimeOfDay, TimeWindow};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::config::Settings;
use crate::expander::{self, CyclePlan};
use crate::scrape::{self, ScrapeOptions, ScrapeOutcome};
use crate::source::SlotSource;

#[derive(Debug, Clone, Serialize)]
pub struct PointReport {
    pub target: TargetId,
    pub name: String,
    pub date: NaiveDate,
    pub windows: Vec<String>,
    pub available: Vec<TimeOfDay>,
    pub booked: Vec<TimeOfDay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub points: Vec<PointReport>,
}

impl CheckReport {
    pub fn build(settings: &Settings, plan: &CyclePlan, outcome: &ScrapeOutcome) -> Self {
        let scraped: HashMap<_, _> = outcome.results.iter().map(|(p, s)| (p, s)).collect();

        let points = plan
            .points()
            .iter()
            .map(|point| {
                let windows = plan.windows_for(point);
                let (available, booked) = scraped
                    .get(point)
                    .map(|slots| split_in_windows(slots, windows))
                    .unwrap_or_default();
                let error = match scraped.contains_key(point) {
                    true => None,
                    false => Some(
                        outcome
                            .failure_for(point)
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "no result".to_string()),
                    ),
                };

                PointReport {
                    target: point.target.clone(),
                    name: settings.registry.name_of(&point.target).to_string(),
                    date: point.date,
                    windows: windows.iter().map(ToString::to_string).collect(),
                    available,
                    booked,
                    error,
                }
            })
            .collect();

        Self { points }
    }

    /// True when targets were planned and none of them produced a result
    pub fn all_failed(&self) -> bool {
        let planned: BTreeSet<&TargetId> = self.points.iter().map(|p| &p.target).collect();
        let succeeded: BTreeSet<&TargetId> = self
            .points
            .iter()
            .filter(|p| p.error.is_none())
            .map(|p| &p.target)
            .collect();
        !planned.is_empty() && succeeded.is_empty()
    }

    pub fn render_text(&self) -> String {
        if self.points.is_empty() {
            return "No query points planned.\n".to_string();
        }

        let mut out = String::new();
        for point in &self.points {
            let _ = writeln!(
                out,
                "{} ({}) {} [{}]",
                point.name,
                point.target,
                point.date.format("%a %Y-%m-%d"),
                point.windows.join(", ")
            );
            match &point.error {
                Some(error) => {
                    let _ = writeln!(out, "  error: {}", error);
                }
                None => {
                    let _ = writeln!(out, "  available: {}", join_times(&point.available));
                    let _ = writeln!(out, "  booked:    {}", join_times(&point.booked));
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn split_in_windows(slots: &[Slot], windows: &[TimeWindow]) -> (Vec<TimeOfDay>, Vec<TimeOfDay>) {
    let mut available = BTreeSet::new();
    let mut booked = BTreeSet::new();
    for slot in slots.iter().filter(|s| windows.iter().any(|w| w.contains(s.time))) {
        match slot.status.is_available() {
            true => available.insert(slot.time),
            false => booked.insert(slot.time),
        };
    }
    // A time reported both ways counts as bookable
    booked.retain(|t| !available.contains(t));
    (available.into_iter().collect(), booked.into_iter().collect())
}

fn join_times(times: &[TimeOfDay]) -> String {
    match times.is_empty() {
        true => "-".to_string(),
        false => times.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
    }
}

/// Scrape today's plan, optionally narrowed to one target and/or date.
///
/// A date outside the plan is scraped anyway, with the windows of every
/// rule watching the target(s).
pub async fn run_check(
    settings: &Settings,
    source: &dyn SlotSource,
    today: NaiveDate,
    target: Option<&TargetId>,
    date: Option<NaiveDate>,
) -> CheckReport {
    let mut plan = expander::plan(&settings.watches, today);
    plan.restrict(target, date);
    if plan.is_empty() {
        if let Some(date) = date {
            tracing::info!("{} is not a planned date, checking it anyway", date);
            plan = expander::plan_for_date(&settings.watches, date, target);
        }
    }
    tracing::info!("Checking {} query point(s)", plan.len());

    let options = ScrapeOptions::from(settings);
    let outcome = scrape::scrape_plan(source, &settings.registry, &plan, options).await;
    CheckReport::build(settings, &plan, &outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::test_settings;
    use crate::scrape::testing::FakeSource;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn tuesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn at(time: &str) -> TimeOfDay {
        time.parse().unwrap()
    }

    #[tokio::test]
    async fn test_report_lists_slots_in_window() {
        let settings = test_settings(&["A", "B"]);
        let source = FakeSource::default();
        source.set(
            "A",
            tuesday(),
            vec![
                Slot::available(at("17:30")),
                Slot::available(at("18:00")),
                Slot::booked(at("18:30")),
                Slot::available(at("19:00")),
            ],
        );
        source.fail("B");

        let report = run_check(&settings, &source, monday(), None, None).await;
        assert_eq!(report.points.len(), 4);
        assert!(!report.all_failed());

        let first = &report.points[0];
        assert_eq!(first.target, TargetId::new("A"));
        assert_eq!(first.date, tuesday());
        assert_eq!(first.windows, vec!["18:00-19:00".to_string()]);
        assert_eq!(first.available, vec![at("18:00")]);
        assert_eq!(first.booked, vec![at("18:30")]);

        let failed: Vec<_> = report.points.iter().filter(|p| p.error.is_some()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|p| p.target.as_str() == "B"));

        let text = report.render_text();
        assert!(text.contains("Club A (A) Tue 2026-10-20 [18:00-19:00]"));
        assert!(text.contains("  available: 18:00"));
        assert!(text.contains("  error: "));
    }

    #[tokio::test]
    async fn test_restricted_check_scrapes_one_point() {
        let settings = test_settings(&["A", "B"]);
        let source = FakeSource::default();

        let target = TargetId::new("B");
        let report = run_check(&settings, &source, monday(), Some(&target), Some(tuesday())).await;
        assert_eq!(report.points.len(), 1);
        assert_eq!(source.call_count(), 1);
        assert_eq!(report.points[0].available, Vec::<TimeOfDay>::new());
    }

    #[tokio::test]
    async fn test_off_schedule_date_is_checked() {
        let settings = test_settings(&["A", "B"]);
        let source = FakeSource::default();
        let wednesday = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        source.set("A", wednesday, vec![Slot::available(at("18:30"))]);

        let target = TargetId::new("A");
        let report = run_check(&settings, &source, monday(), Some(&target), Some(wednesday)).await;
        assert_eq!(source.call_count(), 1);
        assert_eq!(report.points.len(), 1);
        assert_eq!(report.points[0].date, wednesday);
        assert_eq!(report.points[0].windows, vec!["18:00-19:00".to_string()]);
        assert_eq!(report.points[0].available, vec![at("18:30")]);
        assert!(!report.render_text().contains("No query points planned."));
    }

    #[tokio::test]
    async fn test_failed_date_reports_its_own_error() {
        let settings = test_settings(&["A"]);
        let source = FakeSource::default();
        source.set("A", tuesday(), vec![Slot::available(at("18:00"))]);
        source.fail_on("A", NaiveDate::from_ymd_opt(2026, 10, 27).unwrap());

        let report = run_check(&settings, &source, monday(), None, None).await;
        assert_eq!(report.points.len(), 2);
        assert!(report.points[0].error.is_none());
        assert_eq!(report.points[0].available, vec![at("18:00")]);
        assert!(report.points[1].error.as_deref().unwrap().contains("not bookable yet"));
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_all_failed() {
        let settings = test_settings(&["A"]);
        let source = FakeSource::default();
        source.fail("A");

        let report = run_check(&settings, &source, monday(), None, None).await;
        assert!(report.all_failed());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["points"][0]["target"], "A");
        assert!(json["points"][0]["error"].is_string());
    }

    #[test]
    fn test_empty_report_is_not_a_failure() {
        let report = CheckReport::default();
        assert!(!report.all_failed());
        assert_eq!(report.render_text(), "No query points planned.\n");
    }
}
