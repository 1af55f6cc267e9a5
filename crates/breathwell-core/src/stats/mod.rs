//! Statistics derived from the session history.
//!
//! Streaks, period totals and HRV trends are computed on read from the full
//! record set; none of them is stored.

mod streak;
mod summary;

pub use streak::{current_streak, longest_streak, session_days};
pub use summary::{
    average_improvement, daily_totals, hrv_trend, hrv_trend_direction, improvement_pct,
    monthly_totals, summarize, weekly_totals, DayTotal, HrvPoint, PeriodTotals, SessionStats,
    TrendDirection,
};
