//! Pure haptic pulse schedules.
//!
//! A pattern is a time-ordered list of pulses relative to the start of a
//! phase. Patterns are computed up front, independent of the session tick
//! rate, and handed to the [`HapticPlayer`](super::HapticPlayer) for playback.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::Phase;

/// Pulses in the inhale build-up.
pub const INHALE_PULSES: usize = 18;
/// Exponent of the inhale timing curve. Below 1.0 the gaps shrink over time.
pub const INHALE_ALPHA: f64 = 0.6;

const HOLD_ENTRY_GAP: Duration = Duration::from_millis(120);
const HOLD_EXIT_PULSES: usize = 5;
const HOLD_EXIT_ALPHA: f64 = 0.5;
const COMPLETION_GAP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    /// Offset from the start of the pattern.
    pub at: Duration,
    /// 0.0 .. 1.0
    pub intensity: f64,
    /// 0.0 (soft) .. 1.0 (crisp)
    pub sharpness: f64,
}

impl Pulse {
    fn new(at_secs: f64, intensity: f64, sharpness: f64) -> Self {
        Self {
            at: Duration::from_secs_f64(at_secs.max(0.0)),
            intensity: intensity.clamp(0.0, 1.0),
            sharpness: sharpness.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HapticPattern {
    pulses: Vec<Pulse>,
}

impl HapticPattern {
    fn from_pulses(mut pulses: Vec<Pulse>) -> Self {
        pulses.sort_by(|a, b| a.at.cmp(&b.at));
        Self { pulses }
    }

    /// The pattern played on entry to `phase` when it lasts `duration`.
    pub fn for_phase(phase: Phase, duration: Duration) -> Self {
        match phase {
            Phase::Inhale => Self::inhale(duration, INHALE_PULSES, INHALE_ALPHA),
            Phase::Hold => Self::hold(duration),
            Phase::Exhale => Self::exhale(),
        }
    }

    /// Accelerating build-up: `t_i = duration * (i / n)^alpha` for `i in 0..n`.
    pub fn inhale(duration: Duration, n: usize, alpha: f64) -> Self {
        let d = duration.as_secs_f64();
        let pulses = (0..n)
            .map(|i| {
                let x = i as f64 / n as f64;
                let ramp = if n > 1 { i as f64 / (n - 1) as f64 } else { 1.0 };
                Pulse::new(d * x.powf(alpha), 0.3 + 0.7 * ramp, 0.4)
            })
            .collect();
        Self::from_pulses(pulses)
    }

    /// Entry double pulse, one pulse per whole second through the middle,
    /// then an accelerating cluster in the last second.
    pub fn hold(duration: Duration) -> Self {
        let d = duration.as_secs_f64();
        let exit_start = (d - 1.0).max(0.0);
        let mut pulses = vec![
            Pulse::new(0.0, 0.9, 0.7),
            Pulse::new(HOLD_ENTRY_GAP.as_secs_f64(), 0.6, 0.7),
        ];

        let mut second = 1.0;
        while second < exit_start {
            pulses.push(Pulse::new(second, 0.4, 0.3));
            second += 1.0;
        }

        let window = d - exit_start;
        for k in 0..HOLD_EXIT_PULSES {
            let x = k as f64 / HOLD_EXIT_PULSES as f64;
            let at = exit_start + window * x.powf(HOLD_EXIT_ALPHA);
            let ramp = k as f64 / (HOLD_EXIT_PULSES - 1) as f64;
            pulses.push(Pulse::new(at, 0.5 + 0.5 * ramp, 0.6));
        }

        pulses.retain(|p| p.at.as_secs_f64() < d);
        Self::from_pulses(pulses)
    }

    /// Exhale is unguided.
    pub fn exhale() -> Self {
        Self::default()
    }

    /// Single light pulse for the last seconds of the countdown.
    pub fn rhythm_tick() -> Self {
        Self::from_pulses(vec![Pulse::new(0.0, 0.35, 0.8)])
    }

    /// Strong double pulse marking the end of a session.
    pub fn completion() -> Self {
        Self::from_pulses(vec![
            Pulse::new(0.0, 1.0, 1.0),
            Pulse::new(COMPLETION_GAP.as_secs_f64(), 1.0, 1.0),
        ])
    }

    /// The remainder of this pattern when playback starts `offset` in.
    pub fn resumed_at(&self, offset: Duration) -> Self {
        if offset.is_zero() {
            return self.clone();
        }
        let pulses = self
            .pulses
            .iter()
            .filter(|p| p.at >= offset)
            .map(|p| Pulse {
                at: p.at - offset,
                ..*p
            })
            .collect();
        Self { pulses }
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Offset of the final pulse.
    pub fn span(&self) -> Duration {
        self.pulses.last().map(|p| p.at).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn offsets(pattern: &HapticPattern) -> Vec<f64> {
        pattern.pulses().iter().map(|p| p.at.as_secs_f64()).collect()
    }

    #[test]
    fn inhale_is_eighteen_increasing_pulses_in_bounds() {
        let pattern = HapticPattern::for_phase(Phase::Inhale, Duration::from_secs(4));
        let t = offsets(&pattern);
        assert_eq!(t.len(), 18);
        assert!(t.iter().all(|&x| (0.0..=4.0).contains(&x)));
        for pair in t.windows(2) {
            assert!(pair[1] > pair[0], "not strictly increasing: {pair:?}");
        }
    }

    #[test]
    fn inhale_gaps_shrink() {
        let pattern = HapticPattern::for_phase(Phase::Inhale, Duration::from_secs(4));
        let t = offsets(&pattern);
        let gaps: Vec<f64> = t.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] < pair[0], "gap grew: {pair:?}");
        }
    }

    #[test]
    fn inhale_intensity_builds() {
        let pattern = HapticPattern::for_phase(Phase::Inhale, Duration::from_secs(4));
        let first = pattern.pulses().first().unwrap().intensity;
        let last = pattern.pulses().last().unwrap().intensity;
        assert!(first < last);
        assert!((last - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hold_has_entry_middle_and_exit_stages() {
        let pattern = HapticPattern::for_phase(Phase::Hold, Duration::from_secs(7));
        let t = offsets(&pattern);

        // Entry double pulse.
        assert_eq!(t[0], 0.0);
        assert!((t[1] - 0.12).abs() < 1e-9);

        // One pulse per whole second through the middle.
        let middle: Vec<f64> = t.iter().copied().filter(|&x| x >= 1.0 && x < 6.0).collect();
        assert_eq!(middle, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        // Accelerating exit cluster in the last second.
        let exit: Vec<f64> = t.iter().copied().filter(|&x| x >= 6.0).collect();
        assert_eq!(exit.len(), 5);
        assert!(exit.iter().all(|&x| x < 7.0));
        let gaps: Vec<f64> = exit.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] < pair[0]);
        }
    }

    #[test]
    fn exhale_is_silent() {
        assert!(HapticPattern::for_phase(Phase::Exhale, Duration::from_secs(8)).is_empty());
    }

    #[test]
    fn completion_is_a_strong_double_pulse() {
        let pattern = HapticPattern::completion();
        assert_eq!(pattern.len(), 2);
        assert!(pattern.pulses().iter().all(|p| p.intensity == 1.0));
    }

    #[test]
    fn resume_drops_elapsed_pulses_and_rebases() {
        let pattern = HapticPattern::for_phase(Phase::Hold, Duration::from_secs(7));
        let resumed = pattern.resumed_at(Duration::from_millis(2_500));
        assert_eq!(resumed.pulses()[0].at, Duration::from_millis(500));
        assert_eq!(resumed.len(), pattern.len() - 4);
        assert_eq!(pattern.resumed_at(Duration::ZERO), pattern);
    }

    #[test]
    fn short_hold_stays_inside_phase() {
        let pattern = HapticPattern::hold(Duration::from_millis(800));
        assert!(!pattern.is_empty());
        assert!(pattern.span() < Duration::from_millis(800));
    }

    proptest! {
        #[test]
        fn inhale_schedule_is_monotonic_for_any_shape(
            ms in 500u64..20_000,
            n in 2usize..40,
            alpha in 0.1f64..0.99,
        ) {
            let duration = Duration::from_millis(ms);
            let pattern = HapticPattern::inhale(duration, n, alpha);
            prop_assert_eq!(pattern.len(), n);
            let t = offsets(&pattern);
            for pair in t.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
            prop_assert!(pattern.span() <= duration);
        }

        #[test]
        fn hold_schedule_is_sorted_and_bounded(ms in 1_000u64..20_000) {
            let duration = Duration::from_millis(ms);
            let pattern = HapticPattern::hold(duration);
            let t = offsets(&pattern);
            for pair in t.windows(2) {
                prop_assert!(pair[1] >= pair[0]);
            }
            prop_assert!(pattern.span() < duration);
        }
    }
}
