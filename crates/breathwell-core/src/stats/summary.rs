//! Aggregates over the session history.
//!
//! Everything here is a pure function of the record set and the caller's
//! notion of "today", so every view computes the same numbers.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Weekday};
use serde::{Deserialize, Serialize};

use super::streak::{current_streak, longest_streak};
use crate::storage::SessionRecord;

/// Relative HRV change below this magnitude reads as stable.
const TREND_THRESHOLD_PCT: f64 = 5.0;

/// Percentage change from `before` to `after`.
///
/// `None` when `before` is not a positive finite number.
pub fn improvement_pct(before: f64, after: f64) -> Option<f64> {
    if !before.is_finite() || !after.is_finite() || before <= 0.0 {
        return None;
    }
    Some((after - before) / before * 100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub sessions: u32,
    pub cycles: u32,
    pub minutes: f64,
}

impl PeriodTotals {
    fn add(&mut self, record: &SessionRecord) {
        self.sessions += 1;
        self.cycles += record.cycles_completed;
        self.minutes += record.duration_min();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub sessions: u32,
    pub minutes: f64,
}

/// Per-day HRV averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvPoint {
    pub date: NaiveDate,
    pub hrv_before: Option<f64>,
    pub hrv_after: Option<f64>,
    pub improvement_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: u32,
    pub total_cycles: u32,
    pub total_minutes: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub this_week: PeriodTotals,
    pub this_month: PeriodTotals,
    /// Oldest first, ending today.
    pub last_7_days: Vec<DayTotal>,
    /// Mean improvement over sessions with both readings.
    pub average_improvement_pct: Option<f64>,
    pub hrv_trend: TrendDirection,
}

/// Everything the history screen shows, computed in one pass per view.
pub fn summarize<Tz: TimeZone>(records: &[SessionRecord], today: NaiveDate, tz: &Tz) -> SessionStats {
    let mut all = PeriodTotals::default();
    for record in records {
        all.add(record);
    }

    SessionStats {
        total_sessions: all.sessions,
        total_cycles: all.cycles,
        total_minutes: all.minutes,
        current_streak: current_streak(records, today, tz),
        longest_streak: longest_streak(records, tz),
        this_week: weekly_totals(records, today, tz),
        this_month: monthly_totals(records, today, tz),
        last_7_days: daily_totals(records, today, 7, tz),
        average_improvement_pct: average_improvement(records),
        hrv_trend: hrv_trend_direction(records, today, tz),
    }
}

fn local_date<Tz: TimeZone>(record: &SessionRecord, tz: &Tz) -> NaiveDate {
    record.started_at.with_timezone(tz).date_naive()
}

fn totals_where<Tz, F>(records: &[SessionRecord], tz: &Tz, keep: F) -> PeriodTotals
where
    Tz: TimeZone,
    F: Fn(NaiveDate) -> bool,
{
    let mut totals = PeriodTotals::default();
    for record in records.iter().filter(|r| keep(local_date(r, tz))) {
        totals.add(record);
    }
    totals
}

/// Totals for the Monday-based calendar week containing `today`.
pub fn weekly_totals<Tz: TimeZone>(records: &[SessionRecord], today: NaiveDate, tz: &Tz) -> PeriodTotals {
    let week = today.week(Weekday::Mon);
    let (first, last) = (week.first_day(), week.last_day());
    totals_where(records, tz, |d| d >= first && d <= last)
}

/// Totals for the calendar month containing `today`.
pub fn monthly_totals<Tz: TimeZone>(records: &[SessionRecord], today: NaiveDate, tz: &Tz) -> PeriodTotals {
    totals_where(records, tz, |d| {
        d.year() == today.year() && d.month() == today.month()
    })
}

/// One entry per day for the `days` days ending today, oldest first.
/// Days without sessions are present with zero totals.
pub fn daily_totals<Tz: TimeZone>(
    records: &[SessionRecord],
    today: NaiveDate,
    days: u32,
    tz: &Tz,
) -> Vec<DayTotal> {
    let mut by_day: BTreeMap<NaiveDate, DayTotal> = (0..days as i64)
        .rev()
        .map(|n| today - Duration::days(n))
        .map(|date| {
            (
                date,
                DayTotal {
                    date,
                    sessions: 0,
                    minutes: 0.0,
                },
            )
        })
        .collect();

    for record in records {
        if let Some(day) = by_day.get_mut(&local_date(record, tz)) {
            day.sessions += 1;
            day.minutes += record.duration_min();
        }
    }
    by_day.into_values().collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0u32), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Mean of the per-session improvement percentages.
pub fn average_improvement(records: &[SessionRecord]) -> Option<f64> {
    mean(records.iter().filter_map(SessionRecord::hrv_improvement_pct))
}

/// Per-day HRV averages, oldest first. Days without any HRV reading are
/// left out.
pub fn hrv_trend<Tz: TimeZone>(records: &[SessionRecord], tz: &Tz) -> Vec<HrvPoint> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&SessionRecord>> = BTreeMap::new();
    for record in records {
        if record.hrv_before.is_some() || record.hrv_after.is_some() {
            by_day.entry(local_date(record, tz)).or_default().push(record);
        }
    }

    by_day
        .into_iter()
        .map(|(date, day)| {
            let hrv_before = mean(day.iter().filter_map(|r| r.hrv_before));
            let hrv_after = mean(day.iter().filter_map(|r| r.hrv_after));
            HrvPoint {
                date,
                hrv_before,
                hrv_after,
                improvement_pct: hrv_before.zip(hrv_after).and_then(|(b, a)| improvement_pct(b, a)),
            }
        })
        .collect()
}

/// Compare mean post-session HRV over the last 7 days with the 7 days before.
pub fn hrv_trend_direction<Tz: TimeZone>(
    records: &[SessionRecord],
    today: NaiveDate,
    tz: &Tz,
) -> TrendDirection {
    let recent_start = today - Duration::days(6);
    let prior_start = today - Duration::days(13);

    let window = |from: NaiveDate, to: NaiveDate| {
        mean(records.iter().filter_map(|r| {
            let d = local_date(r, tz);
            if d >= from && d <= to {
                r.hrv_after
            } else {
                None
            }
        }))
    };

    let recent = window(recent_start, today);
    let prior = window(prior_start, recent_start - Duration::days(1));

    match recent.zip(prior).and_then(|(r, p)| improvement_pct(p, r)) {
        None => TrendDirection::InsufficientData,
        Some(pct) if pct >= TREND_THRESHOLD_PCT => TrendDirection::Improving,
        Some(pct) if pct <= -TREND_THRESHOLD_PCT => TrendDirection::Declining,
        Some(_) => TrendDirection::Stable,
    }
}
