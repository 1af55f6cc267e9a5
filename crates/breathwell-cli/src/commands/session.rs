use std::sync::Arc;

use breathwell_core::biometrics::{
    BiometricCoordinator, BiometricProvider, HealthStore, MemoryHealthStore, PassiveProvider,
    WorkoutSessionProvider,
};
use breathwell_core::haptics::{HapticPlayer, TraceActuator};
use breathwell_core::session::{
    NoDisplay, SessionController, SessionMachine, SessionServices, MAX_CYCLES, MIN_CYCLES,
};
use breathwell_core::storage::{Config, DeviceKind, SessionRecord};
use breathwell_core::Event;
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{open_reconciler, open_store, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Run a session in the terminal. Ctrl-C ends it early and saves it.
    Run {
        /// Number of 19-second cycles (defaults to session.total_cycles)
        #[arg(long, value_parser = clap::value_parser!(u32).range(MIN_CYCLES as i64..=MAX_CYCLES as i64))]
        cycles: Option<u32>,
        /// Turn off haptic pulses for this run
        #[arg(long)]
        no_haptics: bool,
        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: SessionAction) -> CliResult {
    match action {
        SessionAction::Run {
            cycles,
            no_haptics,
            json,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_session(cycles, no_haptics, json))
        }
    }
}

fn build_controller(config: &Config, cycles: Option<u32>, no_haptics: bool) -> CliResult<SessionController> {
    let store = Arc::new(open_store(config)?);
    let sync = open_reconciler(config, store.clone())?.map(Arc::new);

    // The terminal has no platform health service; readings stay absent.
    let health: Arc<dyn HealthStore> = Arc::new(MemoryHealthStore::new());
    let provider: Arc<dyn BiometricProvider> = match config.device.kind {
        DeviceKind::Watch => Arc::new(WorkoutSessionProvider::new(health)),
        DeviceKind::Phone => Arc::new(PassiveProvider::new(health)),
    };

    let haptics = HapticPlayer::new(Arc::new(TraceActuator));
    haptics.set_enabled(config.session.haptics_enabled && !no_haptics);

    let services = SessionServices {
        haptics: Arc::new(haptics),
        biometrics: Arc::new(BiometricCoordinator::new(provider, config.biometrics.settings())),
        store,
        sync,
        display: Arc::new(NoDisplay),
        device: config.device.kind,
        keep_display_awake: config.session.keep_display_awake,
    };
    let machine = SessionMachine::new(cycles.unwrap_or(config.session.total_cycles))
        .with_countdown(config.session.preparation_secs);

    Ok(SessionController::new(machine, services))
}

async fn run_session(cycles: Option<u32>, no_haptics: bool, json: bool) -> CliResult {
    let config = Config::load()?;
    let controller = build_controller(&config, cycles, no_haptics)?;
    let mut events = controller.subscribe();

    controller.start().await;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut total_cycles = 0;

    let result: CliResult = loop {
        tokio::select! {
            _ = &mut interrupt => {
                let saved = controller.end().await;
                if let Some(record) = &saved {
                    print_saved(record, json)?;
                }
                break match saved {
                    Some(_) => Ok(()),
                    None => Err("session was not saved".into()),
                };
            }
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed session events");
                        continue;
                    }
                    Err(RecvError::Closed) => break Ok(()),
                };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                }
                match event {
                    Event::PreparationStarted { total_cycles: n, .. } => {
                        total_cycles = n;
                        if !json {
                            println!("Get ready: {n} cycles of 4-7-8 breathing");
                        }
                    }
                    Event::CountdownTick { remaining, .. } if !json => println!("  {remaining}..."),
                    Event::PhaseChanged { phase, cycle, duration_secs, .. } if !json => {
                        println!("[{cycle}/{total_cycles}] {} ({duration_secs}s)", phase.label());
                    }
                    Event::BaselineCaptured { hrv_ms, .. } if !json => {
                        println!("Baseline HRV {hrv_ms:.1} ms");
                    }
                    Event::SessionCompleted { cycles_completed, early, .. } if !json => {
                        if early {
                            println!("Session ended after {cycles_completed} cycles");
                        } else {
                            println!("Session complete");
                        }
                    }
                    Event::SessionSaved { record_id, duration_secs, .. } => {
                        if !json {
                            println!("Saved {record_id} ({duration_secs:.0}s)");
                        }
                        break Ok(());
                    }
                    Event::SessionSaveFailed { message, .. } => {
                        break Err(format!("session was not saved: {message}").into());
                    }
                    _ => {}
                }
            }
        }
    };

    controller.shutdown().await;
    result
}

fn print_saved(record: &SessionRecord, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string(record)?);
    } else {
        println!(
            "Saved {} ({} cycles, {:.0}s)",
            record.id, record.cycles_completed, record.duration_secs
        );
    }
    Ok(())
}
