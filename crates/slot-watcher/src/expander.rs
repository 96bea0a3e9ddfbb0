//! Turns watch rules into concrete `(target, date)` query points.

use chrono::{Datelike, Duration, NaiveDate};
use shared_types::{QueryPoint, TargetId, TimeWindow, WatchRule, Weekday};
use std::collections::HashMap;

/// First date on or after `today` falling on `weekday`
pub fn next_occurrence(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let wanted = chrono::Weekday::from(weekday).num_days_from_monday() as i64;
    let current = today.weekday().num_days_from_monday() as i64;
    let days_until = (wanted - current).rem_euclid(7);
    today + Duration::days(days_until)
}

/// The `horizon_count` upcoming dates of the rule's weekday, today included
pub fn upcoming_dates(rule: &WatchRule, today: NaiveDate) -> Vec<NaiveDate> {
    let first = next_occurrence(today, rule.weekday());
    (0..rule.horizon_count())
        .map(|week| first + Duration::weeks(week as i64))
        .collect()
}

/// Expand one rule: dates ascending, then targets in declared order
pub fn expand(rule: &WatchRule, today: NaiveDate) -> Vec<QueryPoint> {
    upcoming_dates(rule, today)
        .into_iter()
        .flat_map(|date| {
            rule.targets().iter().map(move |target| QueryPoint {
                target: target.clone(),
                date,
            })
        })
        .collect()
}

/// Deduplicated work for one cycle across all rules
#[derive(Debug, Clone, Default)]
pub struct CyclePlan {
    points: Vec<QueryPoint>,
    windows: HashMap<QueryPoint, Vec<TimeWindow>>,
}

impl CyclePlan {
    /// Query points in first-seen order, each exactly once
    pub fn points(&self) -> &[QueryPoint] {
        &self.points
    }

    /// Every window that asked for this point
    pub fn windows_for(&self, point: &QueryPoint) -> &[TimeWindow] {
        self.windows.get(point).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Points grouped per target, targets in first-seen order
    pub fn by_target(&self) -> Vec<(TargetId, Vec<NaiveDate>)> {
        let mut groups: Vec<(TargetId, Vec<NaiveDate>)> = Vec::new();
        for point in &self.points {
            match groups.iter_mut().find(|(target, _)| *target == point.target) {
                Some((_, dates)) => dates.push(point.date),
                None => groups.push((point.target.clone(), vec![point.date])),
            }
        }
        groups
    }

    /// Keep only points of one target (and optionally one date)
    pub fn restrict(&mut self, target: Option<&TargetId>, date: Option<NaiveDate>) {
        self.points.retain(|p| {
            target.map_or(true, |t| &p.target == t) && date.map_or(true, |d| p.date == d)
        });
        let points = &self.points;
        self.windows.retain(|p, _| points.contains(p));
    }

    fn add(&mut self, point: QueryPoint, window: TimeWindow) {
        if !self.windows.contains_key(&point) {
            self.points.push(point.clone());
        }
        let windows = self.windows.entry(point).or_default();
        if !windows.contains(&window) {
            windows.push(window);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Expand every rule and merge duplicates, unioning their windows
pub fn plan(rules: &[WatchRule], today: NaiveDate) -> CyclePlan {
    let mut plan = CyclePlan::default();
    for rule in rules {
        for point in expand(rule, today) {
            plan.add(point, rule.window());
        }
    }
    plan
}

/// Points for one explicit date, whatever its weekday.
///
/// Every rule naming a target contributes its window for that target, so an
/// off-schedule date is still filtered to the hours the user watches.
pub fn plan_for_date(
    rules: &[WatchRule],
    date: NaiveDate,
    target: Option<&TargetId>,
) -> CyclePlan {
    let mut plan = CyclePlan::default();
    for rule in rules {
        for rule_target in rule.targets() {
            if target.map_or(true, |t| t == rule_target) {
                let point = QueryPoint {
                    target: rule_target.clone(),
                    date,
                };
                plan.add(point, rule.window());
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TimeOfDay;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn rule(targets: &[&str], weekday: Weekday, from: &str, to: &str, horizon: u32) -> WatchRule {
        WatchRule::new(
            targets.iter().map(|t| TargetId::new(*t)).collect(),
            weekday,
            t(from),
            t(to),
            horizon,
        )
        .unwrap()
    }

    #[test]
    fn test_dates_are_weekly_and_match_weekday() {
        let today = date(2026, 10, 18); // Sunday
        for weekday in [
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
            Weekday::Sunday,
        ] {
            for horizon in 1..=6 {
                let rule = rule(&["x"], weekday, "08:00", "09:00", horizon);
                let dates = upcoming_dates(&rule, today);
                assert_eq!(dates.len(), horizon as usize);
                assert!(dates[0] >= today && dates[0] < today + Duration::days(7));
                for pair in dates.windows(2) {
                    assert_eq!(pair[1] - pair[0], Duration::days(7));
                }
                for d in &dates {
                    assert_eq!(Weekday::from(d.weekday()), weekday);
                }
            }
        }
    }

    #[test]
    fn test_today_included_when_weekday_matches() {
        let tuesday = date(2026, 10, 20);
        let rule = rule(&["x"], Weekday::Tuesday, "08:00", "09:00", 2);
        let dates = upcoming_dates(&rule, tuesday);
        assert_eq!(dates, vec![tuesday, date(2026, 10, 27)]);
    }

    #[test]
    fn test_monday_expands_to_next_day_tuesday() {
        let monday = date(2026, 10, 19);
        let points = expand(&rule(&["X"], Weekday::Tuesday, "18:00", "19:00", 2), monday);
        assert_eq!(
            points,
            vec![
                QueryPoint {
                    target: TargetId::new("X"),
                    date: date(2026, 10, 20)
                },
                QueryPoint {
                    target: TargetId::new("X"),
                    date: date(2026, 10, 27)
                },
            ]
        );
    }

    #[test]
    fn test_order_dates_then_declared_targets() {
        let today = date(2026, 10, 18);
        let points = expand(&rule(&["b", "a"], Weekday::Monday, "08:00", "09:00", 2), today);
        let rendered: Vec<String> = points
            .iter()
            .map(|p| format!("{}@{}", p.target, p.date))
            .collect();
        assert_eq!(
            rendered,
            vec!["b@2026-10-19", "a@2026-10-19", "b@2026-10-26", "a@2026-10-26"]
        );
    }

    #[test]
    fn test_plan_dedups_and_unions_windows() {
        let today = date(2026, 10, 18);
        let rules = vec![
            rule(&["a", "b"], Weekday::Tuesday, "18:00", "19:00", 2),
            rule(&["a"], Weekday::Tuesday, "20:00", "21:00", 3),
            rule(&["a"], Weekday::Tuesday, "18:00", "19:00", 1),
        ];
        let plan = plan(&rules, today);

        // a x 3 dates, b x 2 dates
        assert_eq!(plan.len(), 5);
        let first = QueryPoint {
            target: TargetId::new("a"),
            date: date(2026, 10, 20),
        };
        assert_eq!(plan.windows_for(&first).len(), 2);

        let third_week = QueryPoint {
            target: TargetId::new("a"),
            date: date(2026, 11, 3),
        };
        let late = TimeWindow::new(t("20:00"), t("21:00")).unwrap();
        assert_eq!(plan.windows_for(&third_week), &[late]);

        let groups = plan.by_target();
        assert_eq!(groups[0].0, TargetId::new("a"));
        assert_eq!(groups[0].1.len(), 3);
        assert_eq!(groups[1].1.len(), 2);
    }

    #[test]
    fn test_restrict_plan() {
        let today = date(2026, 10, 18);
        let rules = [rule(&["a", "b"], Weekday::Tuesday, "18:00", "19:00", 2)];
        let mut plan = plan(&rules, today);
        plan.restrict(Some(&TargetId::new("b")), Some(date(2026, 10, 27)));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.points()[0].target, TargetId::new("b"));
        assert_eq!(plan.windows_for(&plan.points()[0].clone()).len(), 1);
    }

    #[test]
    fn test_plan_for_off_schedule_date() {
        let rules = vec![
            rule(&["a", "b"], Weekday::Tuesday, "18:00", "19:00", 2),
            rule(&["a"], Weekday::Friday, "20:00", "21:00", 2),
        ];
        let wednesday = date(2026, 10, 21);

        let all = plan_for_date(&rules, wednesday, None);
        assert_eq!(all.len(), 2);
        assert!(all.points().iter().all(|p| p.date == wednesday));

        let only_a = plan_for_date(&rules, wednesday, Some(&TargetId::new("a")));
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a.windows_for(&only_a.points()[0].clone()).len(), 2);

        assert!(plan_for_date(&rules, wednesday, Some(&TargetId::new("zzz"))).is_empty());
    }
}
