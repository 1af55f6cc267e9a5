//! Pure session state machine.
//!
//! The machine never reads a clock or touches a timer. Every command and every
//! `tick(delta, now)` returns the list of [`Effect`]s the driver must apply,
//! which keeps the transition logic testable with synthetic time steps.
//!
//! ## State Transitions
//!
//! ```text
//! Ready -> Preparing(n) -> Breathing(phase) <-> Paused(phase) -> Completed -> Ready
//!              \________________\___________________\__end()__/
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{self, Phase};
use crate::events::Event;

pub const DEFAULT_COUNTDOWN: u32 = 5;
pub const MIN_CYCLES: u32 = 1;
pub const MAX_CYCLES: u32 = 10;
pub const DEFAULT_CYCLES: u32 = 4;

/// Cadence of the countdown timer while preparing.
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);
/// Cadence of the breathing tick loop.
pub const BREATHING_INTERVAL: Duration = Duration::from_millis(50);

/// Rhythm ticks are played for the last this-many countdown values.
const RHYTHM_TICK_COUNTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Ready,
    Preparing { countdown: u32 },
    Breathing { phase: Phase, elapsed: Duration },
    Paused { phase: Phase, elapsed: Duration },
    Completed,
}

/// Flat discriminant of [`SessionState`], used in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ready,
    Preparing,
    Breathing,
    Paused,
    Completed,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Ready => SessionStatus::Ready,
            SessionState::Preparing { .. } => SessionStatus::Preparing,
            SessionState::Breathing { .. } => SessionStatus::Breathing,
            SessionState::Paused { .. } => SessionStatus::Paused,
            SessionState::Completed => SessionStatus::Completed,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionState::Breathing { phase, .. } | SessionState::Paused { phase, .. } => {
                Some(*phase)
            }
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            SessionState::Breathing { elapsed, .. } | SessionState::Paused { elapsed, .. } => {
                *elapsed
            }
            _ => Duration::ZERO,
        }
    }

    /// Whether the session is between `start()` and completion.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Preparing { .. }
                | SessionState::Breathing { .. }
                | SessionState::Paused { .. }
        )
    }
}

/// Everything finalization needs to build a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cycles_completed: u32,
    pub duration_secs: f64,
    pub hrv_before: Option<f64>,
    pub early: bool,
}

/// Side effects requested by a transition. Applied by the driver, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Activate continuous biometric acquisition for the session window.
    BeginBiometrics { session_id: Uuid },
    /// Fetch the pre-session HRV reading without blocking the session.
    FetchBaseline { session_id: Uuid },
    /// Light preparation pulse.
    RhythmTick,
    /// Play the phase pattern, starting `offset` into the phase.
    PhaseEntered {
        phase: Phase,
        duration: Duration,
        offset: Duration,
    },
    /// Stop every pending pulse of the current pattern.
    CancelHaptics,
    /// Strong double pulse marking the end of a session.
    CompletionSignal,
    /// Collect post-session data, persist and replicate.
    Finalize(SessionOutcome),
    /// Session abandoned by `reset()`; release resources, save nothing.
    Abort { session_id: Uuid },
    Emit(Event),
}

/// Core session state machine.
///
/// Operates on caller-supplied time deltas -- no internal timer.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    total_cycles: u32,
    countdown_from: u32,
    state: SessionState,
    session_id: Option<Uuid>,
    cycles_completed: u32,
    /// Sub-second remainder carried between countdown ticks.
    countdown_carry: Duration,
    /// Breathing time across all phases, excluding pauses.
    breathing_elapsed: Duration,
    prepared_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    hrv_before: Option<f64>,
}

impl SessionMachine {
    /// Create a machine for `total_cycles` cycles (clamped to 1..=10).
    pub fn new(total_cycles: u32) -> Self {
        Self {
            total_cycles: total_cycles.clamp(MIN_CYCLES, MAX_CYCLES),
            countdown_from: DEFAULT_COUNTDOWN,
            state: SessionState::Ready,
            session_id: None,
            cycles_completed: 0,
            countdown_carry: Duration::ZERO,
            breathing_elapsed: Duration::ZERO,
            prepared_at: None,
            started_at: None,
            hrv_before: None,
        }
    }

    pub fn with_countdown(mut self, countdown: u32) -> Self {
        self.countdown_from = countdown;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn total_cycles(&self) -> u32 {
        self.total_cycles
    }

    pub fn cycles_completed(&self) -> u32 {
        self.cycles_completed
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn breathing_elapsed(&self) -> Duration {
        self.breathing_elapsed
    }

    /// Baseline HRV captured for `session_id`, if it has arrived.
    pub fn baseline_for(&self, session_id: Uuid) -> Option<f64> {
        if self.session_id == Some(session_id) {
            self.hrv_before
        } else {
            None
        }
    }

    /// Timer cadence the current state needs, if any.
    pub fn tick_interval(&self) -> Option<Duration> {
        match self.state {
            SessionState::Preparing { .. } => Some(COUNTDOWN_INTERVAL),
            SessionState::Breathing { .. } => Some(BREATHING_INTERVAL),
            _ => None,
        }
    }

    /// 0.0 .. 1.0 progress across all configured cycles.
    pub fn session_progress(&self) -> f64 {
        if self.state == SessionState::Completed && !self.ended_early() {
            return 1.0;
        }
        let total = phase::cycle_duration().as_secs_f64() * self.total_cycles as f64;
        (self.breathing_elapsed.as_secs_f64() / total).min(1.0)
    }

    /// 1-indexed cycle currently in progress.
    pub fn current_cycle(&self) -> u32 {
        (self.cycles_completed + 1).min(self.total_cycles)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Event {
        let phase = self.state.phase();
        let elapsed = self.state.elapsed();
        Event::StateSnapshot {
            status: self.state.status(),
            phase,
            countdown: match self.state {
                SessionState::Preparing { countdown } => Some(countdown),
                _ => None,
            },
            elapsed_ms: elapsed.as_millis() as u64,
            remaining_secs: phase.map(|p| phase::remaining_secs(p, elapsed)).unwrap_or(0),
            current_beat: phase.map(|p| phase::current_beat(p, elapsed)).unwrap_or(0),
            cycle: self.current_cycle(),
            total_cycles: self.total_cycles,
            session_progress: self.session_progress(),
            at: now,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Change the configured cycle count. Only honoured while Ready.
    pub fn set_total_cycles(&mut self, total_cycles: u32) -> bool {
        if self.state != SessionState::Ready {
            return false;
        }
        self.total_cycles = total_cycles.clamp(MIN_CYCLES, MAX_CYCLES);
        true
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.state != SessionState::Ready {
            return Vec::new();
        }
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.cycles_completed = 0;
        self.countdown_carry = Duration::ZERO;
        self.breathing_elapsed = Duration::ZERO;
        self.prepared_at = Some(now);
        self.started_at = None;
        self.hrv_before = None;
        self.state = SessionState::Preparing {
            countdown: self.countdown_from,
        };

        let mut effects = vec![
            Effect::BeginBiometrics { session_id },
            Effect::FetchBaseline { session_id },
            Effect::Emit(Event::PreparationStarted {
                session_id,
                countdown: self.countdown_from,
                total_cycles: self.total_cycles,
                at: now,
            }),
        ];
        if self.countdown_from == 0 {
            self.enter_breathing(now, &mut effects);
        }
        effects
    }

    /// Advance by `delta` of wall-clock time.
    pub fn tick(&mut self, delta: Duration, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Preparing { .. } => self.tick_countdown(delta, now, &mut effects),
            SessionState::Breathing { .. } => self.tick_breathing(delta, now, &mut effects),
            _ => {}
        }
        effects
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let SessionState::Breathing { phase, elapsed } = self.state else {
            return Vec::new();
        };
        self.state = SessionState::Paused { phase, elapsed };
        vec![
            Effect::CancelHaptics,
            Effect::Emit(Event::SessionPaused {
                phase,
                elapsed_ms: elapsed.as_millis() as u64,
                at: now,
            }),
        ]
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let SessionState::Paused { phase, elapsed } = self.state else {
            return Vec::new();
        };
        self.state = SessionState::Breathing { phase, elapsed };
        vec![
            Effect::PhaseEntered {
                phase,
                duration: phase.duration(),
                offset: elapsed,
            },
            Effect::Emit(Event::SessionResumed {
                phase,
                elapsed_ms: elapsed.as_millis() as u64,
                at: now,
            }),
        ]
    }

    /// Terminate early. A no-op unless a session is active, so a second call
    /// never finalizes twice.
    pub fn end(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.state.is_active() {
            return Vec::new();
        }
        let mut effects = Vec::new();
        self.finish(now, true, &mut effects);
        effects
    }

    /// Return to Ready. From an active state the session is abandoned.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state {
            SessionState::Ready => return effects,
            SessionState::Completed => {}
            _ => {
                effects.push(Effect::CancelHaptics);
                if let Some(session_id) = self.session_id {
                    effects.push(Effect::Abort { session_id });
                }
            }
        }
        self.state = SessionState::Ready;
        self.session_id = None;
        self.cycles_completed = 0;
        self.countdown_carry = Duration::ZERO;
        self.breathing_elapsed = Duration::ZERO;
        self.prepared_at = None;
        self.started_at = None;
        self.hrv_before = None;
        effects.push(Effect::Emit(Event::SessionReset { at: now }));
        effects
    }

    /// Store a baseline that arrived asynchronously. Readings for a superseded
    /// session are rejected.
    pub fn record_baseline(&mut self, session_id: Uuid, hrv_ms: f64) -> bool {
        if self.session_id != Some(session_id) {
            return false;
        }
        self.hrv_before = Some(hrv_ms);
        true
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn tick_countdown(&mut self, delta: Duration, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        self.countdown_carry += delta;
        while self.countdown_carry >= COUNTDOWN_INTERVAL {
            let SessionState::Preparing { countdown } = self.state else {
                break;
            };
            self.countdown_carry -= COUNTDOWN_INTERVAL;
            let remaining = countdown.saturating_sub(1);
            if remaining == 0 {
                self.enter_breathing(now, effects);
                break;
            }
            self.state = SessionState::Preparing {
                countdown: remaining,
            };
            if remaining <= RHYTHM_TICK_COUNTS {
                effects.push(Effect::RhythmTick);
            }
            effects.push(Effect::Emit(Event::CountdownTick { remaining, at: now }));
        }
    }

    fn tick_breathing(&mut self, delta: Duration, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let SessionState::Breathing { mut phase, mut elapsed } = self.state else {
            return;
        };
        elapsed += delta;
        self.breathing_elapsed += delta;

        while elapsed >= phase.duration() {
            // Overshoot carries into the next phase so ticks never lose time.
            elapsed -= phase.duration();
            if phase == Phase::Exhale {
                self.cycles_completed += 1;
                if self.cycles_completed >= self.total_cycles {
                    self.breathing_elapsed = self.breathing_elapsed.saturating_sub(elapsed);
                    self.finish(now, false, effects);
                    return;
                }
            }
            phase = phase.next();
            self.push_phase_entry(phase, now, effects);
        }
        self.state = SessionState::Breathing { phase, elapsed };
    }

    fn enter_breathing(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        self.started_at = Some(now);
        self.countdown_carry = Duration::ZERO;
        self.state = SessionState::Breathing {
            phase: Phase::Inhale,
            elapsed: Duration::ZERO,
        };
        self.push_phase_entry(Phase::Inhale, now, effects);
    }

    fn push_phase_entry(&self, phase: Phase, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        effects.push(Effect::PhaseEntered {
            phase,
            duration: phase.duration(),
            offset: Duration::ZERO,
        });
        effects.push(Effect::Emit(Event::PhaseChanged {
            phase,
            cycle: self.current_cycle(),
            duration_secs: phase.duration_secs(),
            at: now,
        }));
    }

    fn finish(&mut self, now: DateTime<Utc>, early: bool, effects: &mut Vec<Effect>) {
        self.state = SessionState::Completed;
        let Some(session_id) = self.session_id else {
            return;
        };
        let started_at = self.started_at.or(self.prepared_at).unwrap_or(now);
        let outcome = SessionOutcome {
            session_id,
            started_at,
            ended_at: now.max(started_at),
            cycles_completed: self.cycles_completed,
            duration_secs: self.breathing_elapsed.as_secs_f64(),
            hrv_before: self.hrv_before,
            early,
        };
        effects.push(Effect::CancelHaptics);
        effects.push(Effect::CompletionSignal);
        effects.push(Effect::Emit(Event::SessionCompleted {
            session_id,
            cycles_completed: self.cycles_completed,
            early,
            at: now,
        }));
        effects.push(Effect::Finalize(outcome));
    }

    fn ended_early(&self) -> bool {
        self.cycles_completed < self.total_cycles
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalize_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Finalize(_)))
            .count()
    }

    fn outcome(effects: &[Effect]) -> Option<SessionOutcome> {
        effects.iter().find_map(|e| match e {
            Effect::Finalize(o) => Some(o.clone()),
            _ => None,
        })
    }

    /// Run the machine through the countdown into the first Inhale.
    fn breathing_machine(cycles: u32) -> SessionMachine {
        let mut m = SessionMachine::new(cycles);
        let now = Utc::now();
        m.start(now);
        m.tick(Duration::from_secs(5), now);
        assert!(matches!(m.state(), SessionState::Breathing { phase: Phase::Inhale, .. }));
        m
    }

    #[test]
    fn start_enters_preparing_and_requests_biometrics() {
        let mut m = SessionMachine::default();
        let effects = m.start(Utc::now());
        assert_eq!(m.state(), SessionState::Preparing { countdown: 5 });
        assert!(matches!(effects[0], Effect::BeginBiometrics { .. }));
        assert!(matches!(effects[1], Effect::FetchBaseline { .. }));
    }

    #[test]
    fn start_is_ignored_outside_ready() {
        let mut m = breathing_machine(4);
        assert!(m.start(Utc::now()).is_empty());
    }

    #[test]
    fn countdown_plays_rhythm_ticks_for_final_three_counts() {
        let mut m = SessionMachine::default();
        let now = Utc::now();
        m.start(now);

        let mut ticks = 0;
        let mut inhale_entries = 0;
        for _ in 0..5 {
            for effect in m.tick(COUNTDOWN_INTERVAL, now) {
                match effect {
                    Effect::RhythmTick => ticks += 1,
                    Effect::PhaseEntered { phase: Phase::Inhale, .. } => inhale_entries += 1,
                    _ => {}
                }
            }
        }
        assert_eq!(ticks, 3);
        assert_eq!(inhale_entries, 1);
        assert_eq!(m.started_at(), Some(now));
    }

    #[test]
    fn countdown_accumulates_sub_second_ticks() {
        let mut m = SessionMachine::default();
        let now = Utc::now();
        m.start(now);
        for _ in 0..19 {
            m.tick(BREATHING_INTERVAL, now);
        }
        assert_eq!(m.state(), SessionState::Preparing { countdown: 5 });
        m.tick(BREATHING_INTERVAL, now);
        assert_eq!(m.state(), SessionState::Preparing { countdown: 4 });
    }

    #[test]
    fn phases_advance_in_order() {
        let mut m = breathing_machine(2);
        let now = Utc::now();
        m.tick(Duration::from_secs(4), now);
        assert_eq!(m.state().phase(), Some(Phase::Hold));
        m.tick(Duration::from_secs(7), now);
        assert_eq!(m.state().phase(), Some(Phase::Exhale));
        m.tick(Duration::from_secs(8), now);
        assert_eq!(m.state().phase(), Some(Phase::Inhale));
        assert_eq!(m.cycles_completed(), 1);
    }

    #[test]
    fn full_run_completes_configured_cycles() {
        for cycles in [1, 4, 10] {
            let mut m = breathing_machine(cycles);
            let now = Utc::now();
            let mut finalized = Vec::new();
            let mut guard = 0;
            while m.state() != SessionState::Completed {
                finalized.extend(m.tick(BREATHING_INTERVAL, now));
                guard += 1;
                assert!(guard < 10_000, "session never completed");
            }
            assert_eq!(finalize_count(&finalized), 1);
            let o = outcome(&finalized).unwrap();
            assert_eq!(o.cycles_completed, cycles);
            assert!(!o.early);
            let expected = 19.0 * cycles as f64;
            assert!((o.duration_secs - expected).abs() < 0.051, "{} vs {}", o.duration_secs, expected);
        }
    }

    #[test]
    fn large_tick_discards_overshoot_at_completion() {
        let mut m = breathing_machine(1);
        let effects = m.tick(Duration::from_secs(25), Utc::now());
        let o = outcome(&effects).unwrap();
        assert_eq!(o.cycles_completed, 1);
        assert_eq!(o.duration_secs, 19.0);
    }

    #[test]
    fn pause_preserves_elapsed_exactly() {
        let mut m = breathing_machine(4);
        let now = Utc::now();
        m.tick(Duration::from_millis(5_350), now);
        let before = m.state();
        assert_eq!(before.phase(), Some(Phase::Hold));
        assert_eq!(before.elapsed(), Duration::from_millis(1_350));

        let effects = m.pause(now);
        assert!(effects.contains(&Effect::CancelHaptics));
        // Ticks while paused change nothing.
        assert!(m.tick(Duration::from_secs(3_600), now).is_empty());

        let effects = m.resume(now);
        assert_eq!(m.state().elapsed(), Duration::from_millis(1_350));
        assert!(effects.contains(&Effect::PhaseEntered {
            phase: Phase::Hold,
            duration: Duration::from_secs(7),
            offset: Duration::from_millis(1_350),
        }));
    }

    #[test]
    fn pause_does_not_change_time_to_completion() {
        let mut paused = breathing_machine(1);
        let mut straight = breathing_machine(1);
        let now = Utc::now();

        paused.tick(Duration::from_millis(2_000), now);
        paused.pause(now);
        paused.tick(Duration::from_secs(500), now);
        paused.resume(now);
        let o1 = outcome(&paused.tick(Duration::from_millis(17_000), now)).unwrap();
        let o2 = outcome(&straight.tick(Duration::from_millis(19_000), now)).unwrap();
        assert_eq!(o1.duration_secs, o2.duration_secs);
    }

    #[test]
    fn pause_outside_breathing_is_a_no_op() {
        let mut m = SessionMachine::default();
        assert!(m.pause(Utc::now()).is_empty());
        m.start(Utc::now());
        assert!(m.pause(Utc::now()).is_empty());
        assert!(m.resume(Utc::now()).is_empty());
    }

    #[test]
    fn end_finalizes_once_from_every_active_state() {
        let now = Utc::now();

        let mut preparing = SessionMachine::default();
        preparing.start(now);

        let mut breathing = breathing_machine(4);
        breathing.tick(Duration::from_secs(30), now);

        let mut paused = breathing_machine(4);
        paused.pause(now);

        for mut m in [preparing, breathing, paused] {
            let first = m.end(now);
            assert_eq!(m.state(), SessionState::Completed);
            assert_eq!(finalize_count(&first), 1);
            assert!(outcome(&first).unwrap().early);
            assert!(m.end(now).is_empty());
        }
    }

    #[test]
    fn end_keeps_reached_cycle_count() {
        let mut m = breathing_machine(4);
        let now = Utc::now();
        m.tick(Duration::from_secs(40), now);
        let o = outcome(&m.end(now)).unwrap();
        assert_eq!(o.cycles_completed, 2);
        assert_eq!(o.duration_secs, 40.0);
    }

    #[test]
    fn end_while_ready_does_nothing() {
        let mut m = SessionMachine::default();
        assert!(m.end(Utc::now()).is_empty());
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn reset_from_completed_returns_to_ready() {
        let mut m = breathing_machine(1);
        let now = Utc::now();
        m.end(now);
        let effects = m.reset(now);
        assert_eq!(m.state(), SessionState::Ready);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Abort { .. })));
        assert!(!m.start(now).is_empty());
    }

    #[test]
    fn reset_from_active_state_aborts() {
        let mut m = breathing_machine(4);
        let effects = m.reset(Utc::now());
        assert!(effects.iter().any(|e| matches!(e, Effect::Abort { .. })));
        assert_eq!(finalize_count(&effects), 0);
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn start_clears_previous_session_values() {
        let mut m = breathing_machine(1);
        let now = Utc::now();
        let first = m.session_id().unwrap();
        m.record_baseline(first, 44.0);
        m.tick(Duration::from_secs(19), now);
        m.reset(now);
        m.start(now);
        let second = m.session_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(m.cycles_completed(), 0);
        assert_eq!(m.breathing_elapsed(), Duration::ZERO);
        assert_eq!(m.baseline_for(second), None);
    }

    #[test]
    fn stale_baseline_is_rejected() {
        let mut m = SessionMachine::default();
        m.start(Utc::now());
        assert!(!m.record_baseline(Uuid::new_v4(), 50.0));
        let id = m.session_id().unwrap();
        assert!(m.record_baseline(id, 50.0));
        assert_eq!(m.baseline_for(id), Some(50.0));
    }

    #[test]
    fn baseline_flows_into_outcome() {
        let mut m = breathing_machine(1);
        let id = m.session_id().unwrap();
        m.record_baseline(id, 38.5);
        let o = outcome(&m.tick(Duration::from_secs(19), Utc::now())).unwrap();
        assert_eq!(o.hrv_before, Some(38.5));
    }

    #[test]
    fn tick_interval_matches_state() {
        let mut m = SessionMachine::default();
        assert_eq!(m.tick_interval(), None);
        m.start(Utc::now());
        assert_eq!(m.tick_interval(), Some(COUNTDOWN_INTERVAL));
        m.tick(Duration::from_secs(5), Utc::now());
        assert_eq!(m.tick_interval(), Some(BREATHING_INTERVAL));
        m.pause(Utc::now());
        assert_eq!(m.tick_interval(), None);
    }

    #[test]
    fn zero_countdown_starts_breathing_immediately() {
        let mut m = SessionMachine::new(2).with_countdown(0);
        let effects = m.start(Utc::now());
        assert!(matches!(m.state(), SessionState::Breathing { phase: Phase::Inhale, .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::PhaseEntered { .. })));
    }

    #[test]
    fn cycle_count_is_clamped() {
        assert_eq!(SessionMachine::new(0).total_cycles(), 1);
        assert_eq!(SessionMachine::new(25).total_cycles(), 10);
    }

    #[test]
    fn progress_reaches_one_on_completion() {
        let mut m = breathing_machine(2);
        let now = Utc::now();
        m.tick(Duration::from_secs(19), now);
        assert!((m.session_progress() - 0.5).abs() < 1e-9);
        m.tick(Duration::from_secs(19), now);
        assert_eq!(m.session_progress(), 1.0);
    }

    #[test]
    fn snapshot_reports_display_values() {
        let mut m = breathing_machine(4);
        let now = Utc::now();
        m.tick(Duration::from_millis(1_200), now);
        match m.snapshot(now) {
            Event::StateSnapshot {
                status,
                phase,
                remaining_secs,
                current_beat,
                cycle,
                ..
            } => {
                assert_eq!(status, SessionStatus::Breathing);
                assert_eq!(phase, Some(Phase::Inhale));
                assert_eq!(remaining_secs, 3);
                assert_eq!(current_beat, 2);
                assert_eq!(cycle, 1);
            }
            other => panic!("Expected StateSnapshot, got {other:?}"),
        }
    }
}
