//! Day streaks over the session history.
//!
//! Days are calendar days in the caller's time zone, so a session at 23:50
//! and one at 00:10 count as two days.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, TimeZone};

use crate::storage::SessionRecord;

/// Local calendar days with at least one session.
pub fn session_days<Tz: TimeZone>(records: &[SessionRecord], tz: &Tz) -> BTreeSet<NaiveDate> {
    records
        .iter()
        .map(|r| r.started_at.with_timezone(tz).date_naive())
        .collect()
}

/// Consecutive days with a session, walking back from `today`.
///
/// A day without a session yet does not break the streak until it is over:
/// when `today` is empty the walk starts from yesterday. With neither today
/// nor yesterday practiced the streak is 0.
pub fn current_streak<Tz: TimeZone>(records: &[SessionRecord], today: NaiveDate, tz: &Tz) -> u32 {
    let days = session_days(records, tz);

    let mut day = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

/// Longest run of consecutive session days anywhere in the history.
pub fn longest_streak<Tz: TimeZone>(records: &[SessionRecord], tz: &Tz) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for day in session_days(records, tz) {
        run = match previous {
            Some(prev) if day - prev == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }
    longest
}
