//! Integration tests for statistics computed over a stored history.

use breathwell_core::stats::{self, TrendDirection};
use breathwell_core::storage::{DeviceKind, SessionFilter, SessionRecord, SessionStore};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

fn session(at: DateTime<Utc>, cycles: u32, before: Option<f64>, after: Option<f64>) -> SessionRecord {
    let duration_secs = 19.0 * cycles as f64;
    SessionRecord {
        id: Uuid::new_v4(),
        started_at: at,
        ended_at: at + Duration::milliseconds((duration_secs * 1000.0) as i64),
        cycles_completed: cycles,
        duration_secs,
        hrv_before: before,
        hrv_after: after,
        average_heart_rate: None,
        synced_to_health: true,
        source_device: DeviceKind::Phone,
    }
}

fn day(d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, hour, 0, 0).unwrap()
}

/// Two weeks of practice: the first week with lower post-session HRV,
/// a gap on the 9th, then every day from the 10th to the 14th.
fn seeded_store() -> SessionStore {
    let store = SessionStore::open_memory().unwrap();
    for d in 1..=7 {
        store
            .append(&session(day(d, 7), 4, Some(40.0), Some(44.0)))
            .unwrap();
    }
    for d in 10..=14 {
        store
            .append(&session(day(d, 7), 4, Some(40.0), Some(52.0)))
            .unwrap();
    }
    store
        .append(&session(day(14, 21), 2, None, None))
        .unwrap();
    store
}

#[test]
fn test_summary_over_stored_history() {
    let store = seeded_store();
    let records = store.all().unwrap();
    let today = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();

    let summary = stats::summarize(&records, today, &Utc);

    assert_eq!(summary.total_sessions, 13);
    assert_eq!(summary.total_cycles, 12 * 4 + 2);
    assert!((summary.total_minutes - (50.0 * 19.0) / 60.0).abs() < 1e-9);
    assert_eq!(summary.current_streak, 5);
    assert_eq!(summary.longest_streak, 7);
    // Monday 9 March .. Sunday 15 March.
    assert_eq!(summary.this_week.sessions, 6);
    assert_eq!(summary.this_month.sessions, 13);
    assert_eq!(summary.last_7_days.len(), 7);
    assert_eq!(summary.last_7_days[6].sessions, 2);
    assert_eq!(summary.last_7_days[1].sessions, 0);
    assert_eq!(summary.hrv_trend, TrendDirection::Improving);
}

#[test]
fn test_streak_breaks_after_missed_day() {
    let store = seeded_store();
    let records = store.all().unwrap();
    let day_after_tomorrow = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();

    // Today not yet practised: the streak through yesterday still counts.
    assert_eq!(stats::current_streak(&records, tomorrow, &Utc), 5);
    assert_eq!(stats::current_streak(&records, day_after_tomorrow, &Utc), 0);
}

#[test]
fn test_filtered_history_feeds_trend() {
    let store = seeded_store();
    let second_week = store
        .query(&SessionFilter::default().since(day(10, 0)))
        .unwrap();
    assert_eq!(second_week.len(), 6);

    let points = stats::hrv_trend(&second_week, &Utc);
    assert_eq!(points.len(), 5);
    for point in points {
        let pct = point.improvement_pct.unwrap();
        assert!((pct - 30.0).abs() < 1e-9);
    }
    let avg = stats::average_improvement(&second_week).unwrap();
    assert!((avg - 30.0).abs() < 1e-9);
}
