use std::time::Duration;

use breathwell_core::haptics::HapticPattern;
use breathwell_core::session::Phase;
use clap::{Args, ValueEnum};
use serde::Serialize;

use super::{print_json, CliResult};

#[derive(Clone, Copy, ValueEnum)]
enum PatternKind {
    Inhale,
    Hold,
    Exhale,
    /// Played when a session finishes
    Completion,
    /// Played on the last three preparation counts
    Tick,
}

#[derive(Args)]
pub struct PatternArgs {
    #[arg(value_enum)]
    kind: PatternKind,
    /// Override the phase length in seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct PulseRow {
    at_ms: u128,
    intensity: f64,
    sharpness: f64,
}

pub fn run(args: PatternArgs) -> CliResult {
    let phase_duration = |phase: Phase| -> CliResult<Duration> {
        match args.duration {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| format!("invalid duration: {secs}").into()),
            None => Ok(phase.duration()),
        }
    };

    let pattern = match args.kind {
        PatternKind::Inhale => HapticPattern::for_phase(Phase::Inhale, phase_duration(Phase::Inhale)?),
        PatternKind::Hold => HapticPattern::for_phase(Phase::Hold, phase_duration(Phase::Hold)?),
        PatternKind::Exhale => HapticPattern::for_phase(Phase::Exhale, phase_duration(Phase::Exhale)?),
        PatternKind::Completion => HapticPattern::completion(),
        PatternKind::Tick => HapticPattern::rhythm_tick(),
    };

    let rows: Vec<PulseRow> = pattern
        .pulses()
        .iter()
        .map(|p| PulseRow {
            at_ms: p.at.as_millis(),
            intensity: p.intensity,
            sharpness: p.sharpness,
        })
        .collect();

    if args.json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("(silent)");
    }
    for row in &rows {
        println!(
            "{:>6} ms  intensity {:.2}  sharpness {:.2}",
            row.at_ms, row.intensity, row.sharpness
        );
    }
    Ok(())
}
