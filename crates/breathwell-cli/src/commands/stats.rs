use breathwell_core::stats::{self, SessionStats, TrendDirection};
use breathwell_core::storage::Config;
use chrono::Local;
use clap::Args;

use super::{open_store, print_json, CliResult};

#[derive(Args)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: StatsArgs) -> CliResult {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let records = store.all()?;
    let summary = stats::summarize(&records, Local::now().date_naive(), &Local);

    if args.json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(s: &SessionStats) {
    println!(
        "Sessions: {}  Cycles: {}  Minutes: {:.1}",
        s.total_sessions, s.total_cycles, s.total_minutes
    );
    println!("Streak: {} days (longest {})", s.current_streak, s.longest_streak);
    println!(
        "This week: {} sessions, {:.1} min   This month: {} sessions, {:.1} min",
        s.this_week.sessions, s.this_week.minutes, s.this_month.sessions, s.this_month.minutes
    );

    let days: Vec<String> = s
        .last_7_days
        .iter()
        .map(|d| format!("{} {}", d.date.format("%a"), d.sessions))
        .collect();
    println!("Last 7 days: {}", days.join("  "));

    if let Some(pct) = s.average_improvement_pct {
        println!("Average HRV change: {pct:+.1}%");
    }
    let trend = match s.hrv_trend {
        TrendDirection::Improving => "improving",
        TrendDirection::Stable => "stable",
        TrendDirection::Declining => "declining",
        TrendDirection::InsufficientData => "not enough data",
    };
    println!("HRV trend: {trend}");
}
