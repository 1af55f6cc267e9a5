use std::sync::Mutex;

use tokio::time::Instant;

use crate::error::HapticError;

/// The device's vibration motor.
///
/// Calls are synchronous and expected to return quickly; the player owns all
/// timing.
pub trait HapticActuator: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn pulse(&self, intensity: f64, sharpness: f64) -> Result<(), HapticError>;
}

/// Actuator for hosts without haptic hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullActuator;

impl HapticActuator for NullActuator {
    fn is_available(&self) -> bool {
        false
    }

    fn pulse(&self, _intensity: f64, _sharpness: f64) -> Result<(), HapticError> {
        Err(HapticError::Unavailable)
    }
}

/// Emits every pulse as a trace event. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceActuator;

impl HapticActuator for TraceActuator {
    fn pulse(&self, intensity: f64, sharpness: f64) -> Result<(), HapticError> {
        tracing::trace!(intensity, sharpness, "haptic pulse");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedPulse {
    pub at: Instant,
    pub intensity: f64,
    pub sharpness: f64,
}

/// Keeps every pulse it receives so tests can inspect playback.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    pulses: Mutex<Vec<RecordedPulse>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulses(&self) -> Vec<RecordedPulse> {
        self.pulses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.pulses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl HapticActuator for RecordingActuator {
    fn pulse(&self, intensity: f64, sharpness: f64) -> Result<(), HapticError> {
        self.pulses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedPulse {
                at: Instant::now(),
                intensity,
                sharpness,
            });
        Ok(())
    }
}
