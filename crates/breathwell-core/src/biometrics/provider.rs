use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Authorization, HealthStore, Sample};
use crate::error::BiometricError;

/// A source of HRV and heart-rate readings.
///
/// The watch reads its sensors through an active workout session; the phone
/// only sees what has already been written to the shared health store. The
/// coordinator treats both the same.
pub trait BiometricProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start heightened sampling for a session.
    fn begin_acquisition(&self) -> Result<(), BiometricError>;

    /// Stop heightened sampling. Called exactly once per successful begin.
    fn end_acquisition(&self) -> Result<(), BiometricError>;

    /// Most recent HRV value recorded in `[from, to)`.
    fn latest_hrv(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError>;

    /// Mean heart rate over `[from, to)`.
    fn average_heart_rate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError>;

    fn save_mindful_session(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BiometricError>;
}

fn latest(samples: &[Sample]) -> Option<f64> {
    samples.iter().max_by_key(|s| s.at).map(|s| s.value)
}

fn mean(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
}

fn ensure_authorized(store: &dyn HealthStore) -> Result<(), BiometricError> {
    let status = match store.authorization() {
        Authorization::NotDetermined => store.request_authorization()?,
        status => status,
    };
    match status {
        Authorization::Authorized => Ok(()),
        _ => Err(BiometricError::NotAuthorized),
    }
}

/// Watch provider: runs a workout session for the length of a breathing
/// session so the heart-rate sensor samples continuously.
pub struct WorkoutSessionProvider {
    store: Arc<dyn HealthStore>,
}

impl WorkoutSessionProvider {
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }
}

impl BiometricProvider for WorkoutSessionProvider {
    fn name(&self) -> &'static str {
        "workout"
    }

    fn begin_acquisition(&self) -> Result<(), BiometricError> {
        ensure_authorized(self.store.as_ref())?;
        self.store.start_workout()
    }

    fn end_acquisition(&self) -> Result<(), BiometricError> {
        self.store.stop_workout()
    }

    fn latest_hrv(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError> {
        Ok(latest(&self.store.hrv_samples(from, to)?))
    }

    fn average_heart_rate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError> {
        Ok(mean(&self.store.heart_rate_samples(from, to)?))
    }

    fn save_mindful_session(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BiometricError> {
        self.store.save_mindful_session(start, end)
    }
}

/// Phone provider: passive queries only.
pub struct PassiveProvider {
    store: Arc<dyn HealthStore>,
}

impl PassiveProvider {
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }
}

impl BiometricProvider for PassiveProvider {
    fn name(&self) -> &'static str {
        "passive"
    }

    fn begin_acquisition(&self) -> Result<(), BiometricError> {
        ensure_authorized(self.store.as_ref())
    }

    fn end_acquisition(&self) -> Result<(), BiometricError> {
        Ok(())
    }

    fn latest_hrv(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError> {
        Ok(latest(&self.store.hrv_samples(from, to)?))
    }

    fn average_heart_rate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, BiometricError> {
        Ok(mean(&self.store.heart_rate_samples(from, to)?))
    }

    fn save_mindful_session(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BiometricError> {
        self.store.save_mindful_session(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biometrics::MemoryHealthStore;
    use chrono::Duration;

    #[test]
    fn workout_provider_starts_and_stops_a_workout() {
        let store = Arc::new(MemoryHealthStore::new());
        let provider = WorkoutSessionProvider::new(store.clone());
        provider.begin_acquisition().unwrap();
        assert!(store.workout_active());
        provider.end_acquisition().unwrap();
        assert!(!store.workout_active());
        assert_eq!(store.workout_counts(), (1, 1));
    }

    #[test]
    fn begin_fails_when_access_is_denied() {
        let store = Arc::new(MemoryHealthStore::with_authorization(
            Authorization::NotDetermined,
        ));
        store.set_grant_on_request(false);
        let provider = WorkoutSessionProvider::new(store.clone());
        assert_eq!(
            provider.begin_acquisition(),
            Err(BiometricError::NotAuthorized)
        );
        assert!(!store.workout_active());
    }

    #[test]
    fn passive_provider_never_touches_workouts() {
        let store = Arc::new(MemoryHealthStore::new());
        let provider = PassiveProvider::new(store.clone());
        provider.begin_acquisition().unwrap();
        provider.end_acquisition().unwrap();
        assert_eq!(store.workout_counts(), (0, 0));
    }

    #[test]
    fn latest_and_mean_over_window() {
        let store = Arc::new(MemoryHealthStore::new());
        let t0 = Utc::now();
        store.add_hrv(42.0, t0 - Duration::hours(3));
        store.add_hrv(48.0, t0 - Duration::hours(1));
        store.add_heart_rate(60.0, t0 - Duration::minutes(2));
        store.add_heart_rate(70.0, t0 - Duration::minutes(1));

        let provider = PassiveProvider::new(store);
        let from = t0 - Duration::hours(24);
        assert_eq!(provider.latest_hrv(from, t0).unwrap(), Some(48.0));
        assert_eq!(
            provider
                .average_heart_rate(t0 - Duration::minutes(5), t0)
                .unwrap(),
            Some(65.0)
        );
        assert_eq!(provider.latest_hrv(t0, t0).unwrap(), None);
    }
}
