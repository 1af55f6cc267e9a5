//! Breathing session: the 4-7-8 phase model, the pure state machine, and the
//! async controller that drives it.

mod controller;
mod machine;
pub mod phase;

pub use controller::{DisplayControl, NoDisplay, SessionController, SessionServices};
pub use machine::{
    Effect, SessionMachine, SessionOutcome, SessionState, SessionStatus, BREATHING_INTERVAL,
    COUNTDOWN_INTERVAL, DEFAULT_COUNTDOWN, DEFAULT_CYCLES, MAX_CYCLES, MIN_CYCLES,
};
pub use phase::{cycle_duration, current_beat, remaining_secs, Phase, CONTRACTED, EXPANDED};
