//! # Breathwell Core Library
//!
//! Core logic for guided 4-7-8 breathing sessions. The CLI binary and any
//! device front-end are thin layers over this crate.
//!
//! ## Architecture
//!
//! - **Session**: a pure state machine that turns commands and elapsed time
//!   into effects, plus an async controller that runs the clock and applies
//!   those effects
//! - **Haptics**: per-phase pulse schedules and a cancellable player
//! - **Biometrics**: HRV baseline and post-session readings from a health store
//! - **Storage**: SQLite session history and TOML configuration
//! - **Sync**: replication of finished sessions to the paired device
//!
//! ## Key Components
//!
//! - [`SessionMachine`]: breathing session state machine
//! - [`SessionController`]: drives a machine in real time
//! - [`SessionStore`]: duplicate-checked session persistence
//! - [`SyncReconciler`]: outbound outbox and inbound merge
//! - [`Config`]: application configuration management

pub mod biometrics;
pub mod error;
pub mod events;
pub mod haptics;
pub mod session;
pub mod stats;
pub mod storage;
pub mod sync;

pub use biometrics::{BiometricCoordinator, BiometricProvider, HealthStore};
pub use error::{
    BiometricError, ConfigError, CoreError, DatabaseError, HapticError, Result, SyncError,
    ValidationError,
};
pub use events::Event;
pub use haptics::{HapticActuator, HapticPattern, HapticPlayer};
pub use session::{Phase, SessionController, SessionMachine, SessionServices, SessionState};
pub use stats::SessionStats;
pub use storage::{Config, DeviceKind, SessionRecord, SessionStore};
pub use sync::{SyncMessage, SyncReconciler};
