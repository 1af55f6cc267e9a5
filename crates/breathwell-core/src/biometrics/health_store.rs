use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BiometricError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    NotDetermined,
    Denied,
    Authorized,
}

/// One timestamped reading from the health store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: f64, at: DateTime<Utc>) -> Self {
        Self { value, at }
    }
}

/// The platform health database.
///
/// Every call may block on I/O; callers run them off the async executor.
pub trait HealthStore: Send + Sync {
    fn authorization(&self) -> Authorization;

    /// Prompt for access if it has not been decided yet.
    fn request_authorization(&self) -> Result<Authorization, BiometricError>;

    /// HRV (SDNN, milliseconds) samples with `from <= at < to`.
    fn hrv_samples(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, BiometricError>;

    /// Heart rate (beats per minute) samples with `from <= at < to`.
    fn heart_rate_samples(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, BiometricError>;

    fn save_mindful_session(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BiometricError>;

    /// Start a workout session, which raises the sensor sampling rate.
    fn start_workout(&self) -> Result<(), BiometricError>;

    fn stop_workout(&self) -> Result<(), BiometricError>;
}

#[derive(Debug)]
struct Inner {
    authorization: Authorization,
    /// What `request_authorization` resolves a pending prompt to.
    grant_on_request: bool,
    /// How long the user takes to answer a prompt.
    prompt_delay: Duration,
    hrv: Vec<Sample>,
    heart_rate: Vec<Sample>,
    mindful: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    workout_active: bool,
    workouts_started: u32,
    workouts_stopped: u32,
    failure: Option<BiometricError>,
}

/// In-process health store. Backs the CLI and the test suite.
#[derive(Debug)]
pub struct MemoryHealthStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryHealthStore {
    fn default() -> Self {
        Self::with_authorization(Authorization::Authorized)
    }
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authorization(authorization: Authorization) -> Self {
        Self {
            inner: Mutex::new(Inner {
                authorization,
                grant_on_request: true,
                prompt_delay: Duration::ZERO,
                hrv: Vec::new(),
                heart_rate: Vec::new(),
                mindful: Vec::new(),
                workout_active: false,
                workouts_started: 0,
                workouts_stopped: 0,
                failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        self.lock().authorization = authorization;
    }

    /// Whether a pending prompt is granted or denied.
    pub fn set_grant_on_request(&self, grant: bool) {
        self.lock().grant_on_request = grant;
    }

    /// Block `request_authorization` for `delay` before answering.
    pub fn set_prompt_delay(&self, delay: Duration) {
        self.lock().prompt_delay = delay;
    }

    /// Make every subsequent query fail with `error`. `None` clears it.
    pub fn fail_with(&self, error: Option<BiometricError>) {
        self.lock().failure = error;
    }

    pub fn add_hrv(&self, value: f64, at: DateTime<Utc>) {
        self.lock().hrv.push(Sample::new(value, at));
    }

    pub fn add_heart_rate(&self, bpm: f64, at: DateTime<Utc>) {
        self.lock().heart_rate.push(Sample::new(bpm, at));
    }

    pub fn mindful_sessions(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.lock().mindful.clone()
    }

    pub fn workout_active(&self) -> bool {
        self.lock().workout_active
    }

    /// (started, stopped) workout counts.
    pub fn workout_counts(&self) -> (u32, u32) {
        let inner = self.lock();
        (inner.workouts_started, inner.workouts_stopped)
    }

    fn check(inner: &Inner) -> Result<(), BiometricError> {
        if let Some(err) = &inner.failure {
            return Err(err.clone());
        }
        match inner.authorization {
            Authorization::Authorized => Ok(()),
            _ => Err(BiometricError::NotAuthorized),
        }
    }

    fn window(samples: &[Sample], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Sample> {
        let mut found: Vec<Sample> = samples
            .iter()
            .filter(|s| s.at >= from && s.at < to)
            .copied()
            .collect();
        found.sort_by_key(|s| s.at);
        found
    }
}

impl HealthStore for MemoryHealthStore {
    fn authorization(&self) -> Authorization {
        self.lock().authorization
    }

    fn request_authorization(&self) -> Result<Authorization, BiometricError> {
        let delay = self.lock().prompt_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut inner = self.lock();
        if inner.authorization == Authorization::NotDetermined {
            inner.authorization = if inner.grant_on_request {
                Authorization::Authorized
            } else {
                Authorization::Denied
            };
        }
        Ok(inner.authorization)
    }

    fn hrv_samples(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, BiometricError> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(Self::window(&inner.hrv, from, to))
    }

    fn heart_rate_samples(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, BiometricError> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(Self::window(&inner.heart_rate, from, to))
    }

    fn save_mindful_session(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), BiometricError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.mindful.push((start, end));
        Ok(())
    }

    fn start_workout(&self) -> Result<(), BiometricError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.workout_active = true;
        inner.workouts_started += 1;
        Ok(())
    }

    fn stop_workout(&self) -> Result<(), BiometricError> {
        let mut inner = self.lock();
        if inner.workout_active {
            inner.workout_active = false;
            inner.workouts_stopped += 1;
        }
        Ok(())
    }
}
