use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HapticActuator, HapticPattern};
use crate::error::HapticError;

#[derive(Default)]
struct Playback {
    /// Bumped on every play and cancel. A pulse fires only while its
    /// playback's generation is still current.
    generation: u64,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Playback {
    fn stop(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Plays one pattern at a time on an actuator.
///
/// Starting a pattern cancels whatever is playing. After [`cancel`] returns no
/// pulse from an earlier pattern reaches the actuator.
///
/// [`cancel`]: HapticPlayer::cancel
pub struct HapticPlayer {
    actuator: Arc<dyn HapticActuator>,
    enabled: AtomicBool,
    playback: Arc<Mutex<Playback>>,
}

impl HapticPlayer {
    pub fn new(actuator: Arc<dyn HapticActuator>) -> Self {
        Self {
            actuator,
            enabled: AtomicBool::new(true),
            playback: Arc::new(Mutex::new(Playback::default())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disabling also stops the current pattern.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.cancel();
        }
    }

    pub fn is_available(&self) -> bool {
        self.actuator.is_available()
    }

    /// Replace the current pattern with `pattern`, starting now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn play(&self, pattern: HapticPattern) {
        let mut playback = lock(&self.playback);
        playback.stop();

        if pattern.is_empty() || !self.is_enabled() {
            return;
        }
        if !self.actuator.is_available() {
            debug!("haptics unavailable, skipping pattern");
            return;
        }

        let generation = playback.generation;
        let token = CancellationToken::new();
        let task_token = token.clone();
        let shared = Arc::clone(&self.playback);
        let actuator = Arc::clone(&self.actuator);

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            for pulse in pattern.pulses() {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = sleep_until(start + pulse.at) => {}
                }

                let current = lock(&shared);
                if current.generation != generation {
                    return;
                }
                match actuator.pulse(pulse.intensity, pulse.sharpness) {
                    Ok(()) => {}
                    Err(HapticError::Unavailable) => return,
                    Err(e) => warn!("haptic pulse failed: {e}"),
                }
            }
        });

        playback.token = Some(token);
        playback.handle = Some(handle);
    }

    /// Stop the current pattern.
    pub fn cancel(&self) {
        lock(&self.playback).stop();
    }
}

impl Drop for HapticPlayer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(playback: &Mutex<Playback>) -> MutexGuard<'_, Playback> {
    playback
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
