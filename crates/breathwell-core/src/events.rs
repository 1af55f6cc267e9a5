use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{Phase, SessionStatus};
use crate::storage::DeviceKind;

/// Every observable change in a session produces an Event.
/// The UI layer subscribes to them; nothing in the core depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    PreparationStarted {
        session_id: Uuid,
        countdown: u32,
        total_cycles: u32,
        at: DateTime<Utc>,
    },
    CountdownTick {
        remaining: u32,
        at: DateTime<Utc>,
    },
    PhaseChanged {
        phase: Phase,
        /// 1-indexed cycle the phase belongs to.
        cycle: u32,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        phase: Phase,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        phase: Phase,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: Uuid,
        cycles_completed: u32,
        /// True when the user ended the session before the last cycle.
        early: bool,
        at: DateTime<Utc>,
    },
    BaselineCaptured {
        hrv_ms: f64,
        at: DateTime<Utc>,
    },
    SessionSaved {
        record_id: Uuid,
        cycles_completed: u32,
        duration_secs: f64,
        at: DateTime<Utc>,
    },
    SessionSaveFailed {
        message: String,
        at: DateTime<Utc>,
    },
    SessionReset {
        at: DateTime<Utc>,
    },
    RecordReceived {
        record_id: Uuid,
        source_device: DeviceKind,
        at: DateTime<Utc>,
    },
    DuplicateDiscarded {
        started_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        status: SessionStatus,
        phase: Option<Phase>,
        countdown: Option<u32>,
        elapsed_ms: u64,
        remaining_secs: u64,
        current_beat: u64,
        cycle: u32,
        total_cycles: u32,
        session_progress: f64,
        at: DateTime<Utc>,
    },
}
