//! HRV and heart-rate acquisition around a session.

mod coordinator;
mod health_store;
mod provider;

pub use coordinator::{AcquisitionGuard, BiometricCoordinator, BiometricSettings, PostSessionReadings};
pub use health_store::{Authorization, HealthStore, MemoryHealthStore, Sample};
pub use provider::{BiometricProvider, PassiveProvider, WorkoutSessionProvider};
