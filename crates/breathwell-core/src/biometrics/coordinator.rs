use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::BiometricProvider;
use crate::error::BiometricError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiometricSettings {
    /// Wait after a session ends before the post-session query, so the
    /// sensor has time to flush its last reading.
    pub settle_delay: Duration,
    /// How far back the baseline query looks.
    pub baseline_window: Duration,
    /// Upper bound on any single health-store call.
    pub query_timeout: Duration,
}

impl Default for BiometricSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            baseline_window: Duration::from_secs(24 * 60 * 60),
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// Readings gathered once a session has ended.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PostSessionReadings {
    pub hrv_after: Option<f64>,
    pub average_heart_rate: Option<f64>,
}

enum Acquisition {
    Inactive,
    Active,
    /// The begin call outlived the query timeout and may still succeed.
    Starting(JoinHandle<Result<(), BiometricError>>),
}

/// Ends biometric acquisition when the session it was started for is over.
///
/// [`finish`](AcquisitionGuard::finish) ends it on the blocking pool;
/// dropping the guard ends it otherwise. Either way the provider sees exactly
/// one end call for every begin that succeeded.
pub struct AcquisitionGuard {
    provider: Arc<dyn BiometricProvider>,
    state: Acquisition,
    limit: Duration,
}

impl AcquisitionGuard {
    pub fn is_active(&self) -> bool {
        matches!(self.state, Acquisition::Active)
    }

    /// End acquisition. A begin call that is still running is waited out
    /// first, so a late success is still paired with its end.
    pub async fn finish(mut self) {
        let started = match std::mem::replace(&mut self.state, Acquisition::Inactive) {
            Acquisition::Inactive => false,
            Acquisition::Active => true,
            Acquisition::Starting(pending) => matches!(pending.await, Ok(Ok(()))),
        };
        if !started {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let call = tokio::task::spawn_blocking(move || provider.end_acquisition());
        let result = match timeout(self.limit, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(BiometricError::QueryFailed(join.to_string())),
            Err(_) => Err(BiometricError::Timeout(millis(self.limit))),
        };
        match result {
            Ok(()) => debug!(provider = self.provider.name(), "biometric acquisition ended"),
            Err(e) => warn!(provider = self.provider.name(), "ending acquisition failed: {e}"),
        }
    }
}

impl Drop for AcquisitionGuard {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut self.state, Acquisition::Inactive);
        let provider = Arc::clone(&self.provider);
        let end = move || {
            if let Err(e) = provider.end_acquisition() {
                warn!(provider = provider.name(), "ending acquisition failed: {e}");
            }
        };
        match (state, Handle::try_current()) {
            (Acquisition::Inactive, _) => {}
            (Acquisition::Active, Ok(runtime)) => {
                runtime.spawn_blocking(end);
            }
            (Acquisition::Active, Err(_)) => end(),
            (Acquisition::Starting(pending), Ok(runtime)) => {
                runtime.spawn(async move {
                    if let Ok(Ok(())) = pending.await {
                        let _ = tokio::task::spawn_blocking(end).await;
                    }
                });
            }
            // Without a runtime the pending begin cannot be awaited.
            (Acquisition::Starting(_), Err(_)) => {}
        }
    }
}

/// Runs every biometric call for a session.
///
/// Nothing here fails outward: an unavailable, denied, slow or failing
/// provider turns into an absent reading and a log line.
pub struct BiometricCoordinator {
    provider: Arc<dyn BiometricProvider>,
    settings: BiometricSettings,
}

impl BiometricCoordinator {
    pub fn new(provider: Arc<dyn BiometricProvider>, settings: BiometricSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &BiometricSettings {
        &self.settings
    }

    /// Activate acquisition for a new session.
    ///
    /// Runs on the blocking pool, since the provider may first have to ask
    /// the user for access. A call that exceeds the query timeout yields a
    /// guard that still ends acquisition if the call later succeeds.
    pub async fn begin_session(&self) -> AcquisitionGuard {
        let provider = Arc::clone(&self.provider);
        let mut call = tokio::task::spawn_blocking(move || provider.begin_acquisition());
        let limit = self.settings.query_timeout;

        let answered = timeout(limit, &mut call).await;
        let state = match answered {
            Ok(Ok(Ok(()))) => {
                debug!(provider = self.provider.name(), "biometric acquisition started");
                Acquisition::Active
            }
            Ok(Ok(Err(e))) => {
                warn!(provider = self.provider.name(), "biometric acquisition unavailable: {e}");
                Acquisition::Inactive
            }
            Ok(Err(join)) => {
                warn!(provider = self.provider.name(), "biometric acquisition failed: {join}");
                Acquisition::Inactive
            }
            Err(_) => {
                warn!(
                    provider = self.provider.name(),
                    timeout_ms = millis(limit),
                    "biometric acquisition still starting"
                );
                Acquisition::Starting(call)
            }
        };

        AcquisitionGuard {
            provider: Arc::clone(&self.provider),
            state,
            limit,
        }
    }

    /// Most recent HRV reading within the baseline window.
    pub async fn fetch_baseline(&self) -> Option<f64> {
        let to = Utc::now();
        let from = to - chrono_window(self.settings.baseline_window);
        self.query("baseline", move |p| p.latest_hrv(from, to)).await
    }

    /// Most recent HRV reading recorded since the session started.
    pub async fn fetch_post_session(&self, started_at: DateTime<Utc>) -> Option<f64> {
        let to = Utc::now() + chrono::Duration::seconds(1);
        self.query("post-session", move |p| p.latest_hrv(started_at, to))
            .await
    }

    pub async fn fetch_average_heart_rate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<f64> {
        self.query("average heart rate", move |p| p.average_heart_rate(from, to))
            .await
    }

    /// Wait out the settle delay, then run the post-session HRV and average
    /// heart-rate queries concurrently.
    pub async fn collect_post_session(
        &self,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> PostSessionReadings {
        tokio::time::sleep(self.settings.settle_delay).await;
        let (hrv_after, average_heart_rate) = tokio::join!(
            self.fetch_post_session(started_at),
            self.fetch_average_heart_rate(started_at, ended_at),
        );
        PostSessionReadings {
            hrv_after,
            average_heart_rate,
        }
    }

    /// Mirror the session into the health store. Returns whether it stuck.
    pub async fn save_mindful_session(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.query("mindful session", move |p| {
            p.save_mindful_session(start, end).map(Some)
        })
        .await
        .is_some()
    }

    async fn query<T, F>(&self, what: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BiometricProvider) -> Result<Option<T>, BiometricError> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let call = tokio::task::spawn_blocking(move || f(provider.as_ref()));
        let limit = self.settings.query_timeout;

        let result = match timeout(limit, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(BiometricError::QueryFailed(join.to_string())),
            Err(_) => Err(BiometricError::Timeout(millis(limit))),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(provider = self.provider.name(), "{what} query failed: {e}");
                None
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn chrono_window(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24))
}
