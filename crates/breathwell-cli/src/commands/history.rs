use breathwell_core::storage::{Config, DeviceKind, SessionFilter, SessionRecord};
use chrono::{Local, NaiveDate, TimeZone, Utc};
use clap::Subcommand;
use uuid::Uuid;

use super::{open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List sessions, newest first
    List {
        /// Only sessions started on or after this local date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Only sessions recorded on this device (phone, watch)
        #[arg(long)]
        device: Option<DeviceKind>,
        /// Maximum number of sessions
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one session as JSON
    Show {
        /// Session ID
        id: Uuid,
    },
    /// Delete a session
    Delete {
        /// Session ID
        id: Uuid,
    },
}

pub fn run(action: HistoryAction) -> CliResult {
    let config = Config::load()?;
    let store = open_store(&config)?;

    match action {
        HistoryAction::List {
            since,
            device,
            limit,
            json,
        } => {
            let mut filter = SessionFilter::default().limit(limit);
            if let Some(date) = since {
                let midnight = date.and_hms_opt(0, 0, 0).ok_or("invalid date")?;
                let start = Local
                    .from_local_datetime(&midnight)
                    .earliest()
                    .ok_or("date does not exist in the local timezone")?;
                filter = filter.since(start.with_timezone(&Utc));
            }
            if let Some(device) = device {
                filter = filter.device(device);
            }

            let records = store.query(&filter)?;
            if json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No sessions yet.");
            } else {
                for record in &records {
                    println!("{}", summary_line(record));
                }
            }
        }
        HistoryAction::Show { id } => match store.get(id)? {
            Some(record) => print_json(&record)?,
            None => return Err(format!("session not found: {id}").into()),
        },
        HistoryAction::Delete { id } => {
            if !store.delete(id)? {
                return Err(format!("session not found: {id}").into());
            }
            println!("Session deleted: {id}");
        }
    }
    Ok(())
}

fn summary_line(record: &SessionRecord) -> String {
    let started = record.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let hrv = match record.hrv_improvement_pct() {
        Some(pct) => format!("  HRV {pct:+.1}%"),
        None => String::new(),
    };
    format!(
        "{}  {started}  {:>2} cycles  {:>5.1} min  {}{hrv}",
        record.id,
        record.cycles_completed,
        record.duration_min(),
        record.source_device,
    )
}
