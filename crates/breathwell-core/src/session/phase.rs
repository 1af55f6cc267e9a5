use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Target level for the breathing visual when the lungs are empty.
pub const CONTRACTED: f64 = 0.2;
/// Target level for the breathing visual when the lungs are full.
pub const EXPANDED: f64 = 1.0;

/// One timed unit of the 4-7-8 breathing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inhale,
    Hold,
    Exhale,
}

impl Phase {
    /// All phases in cycle order.
    pub const ALL: [Phase; 3] = [Phase::Inhale, Phase::Hold, Phase::Exhale];

    /// Phase duration in whole seconds.
    pub fn duration_secs(self) -> u64 {
        match self {
            Phase::Inhale => 4,
            Phase::Hold => 7,
            Phase::Exhale => 8,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.duration_secs())
    }

    /// The phase that follows this one. The successor graph is a 3-cycle.
    pub fn next(self) -> Phase {
        match self {
            Phase::Inhale => Phase::Hold,
            Phase::Hold => Phase::Exhale,
            Phase::Exhale => Phase::Inhale,
        }
    }

    /// Level the animation and haptic layers move toward during this phase.
    pub fn target_intensity(self) -> f64 {
        match self {
            Phase::Inhale | Phase::Hold => EXPANDED,
            Phase::Exhale => CONTRACTED,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Inhale => "Breathe In",
            Phase::Hold => "Hold",
            Phase::Exhale => "Breathe Out",
        }
    }
}

/// Length of one full Inhale -> Hold -> Exhale cycle.
pub fn cycle_duration() -> Duration {
    Phase::ALL.iter().map(|p| p.duration()).sum()
}

/// Seconds left in a phase, rounded up and clamped at zero.
pub fn remaining_secs(phase: Phase, elapsed: Duration) -> u64 {
    let left = phase.duration().as_secs_f64() - elapsed.as_secs_f64();
    if left <= 0.0 {
        0
    } else {
        left.ceil() as u64
    }
}

/// 1-indexed ordinal second within the phase, capped at the phase length.
pub fn current_beat(phase: Phase, elapsed: Duration) -> u64 {
    let beat = elapsed.as_secs_f64().floor() as u64 + 1;
    beat.min(phase.duration_secs())
}
