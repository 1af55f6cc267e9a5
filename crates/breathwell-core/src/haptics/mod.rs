//! Haptic guidance: pure pulse schedules and their playback.

mod actuator;
mod pattern;
mod player;

pub use actuator::{HapticActuator, NullActuator, RecordedPulse, RecordingActuator, TraceActuator};
pub use pattern::{HapticPattern, Pulse, INHALE_ALPHA, INHALE_PULSES};
pub use player::HapticPlayer;
