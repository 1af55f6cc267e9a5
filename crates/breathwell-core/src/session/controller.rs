//! Async driver for [`SessionMachine`].
//!
//! The controller owns the only machine, runs the ticker that feeds it real
//! elapsed time, and applies the effects each transition returns: haptics,
//! biometric acquisition, persistence and sync.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Effect, SessionMachine, SessionOutcome, SessionState};
use crate::biometrics::{AcquisitionGuard, BiometricCoordinator};
use crate::events::Event;
use crate::haptics::{HapticPattern, HapticPlayer};
use crate::storage::{DeviceKind, InsertOutcome, SessionRecord, SessionStore};
use crate::sync::SyncReconciler;

const EVENT_CAPACITY: usize = 256;

/// Keeps the screen on while a session runs.
pub trait DisplayControl: Send + Sync {
    fn keep_awake(&self, awake: bool);
}

/// For hosts without a screen to manage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplay;

impl DisplayControl for NoDisplay {
    fn keep_awake(&self, _awake: bool) {}
}

/// Collaborators the controller drives.
pub struct SessionServices {
    pub haptics: Arc<HapticPlayer>,
    pub biometrics: Arc<BiometricCoordinator>,
    pub store: Arc<SessionStore>,
    /// Absent when the device has no paired peer.
    pub sync: Option<Arc<SyncReconciler>>,
    pub display: Arc<dyn DisplayControl>,
    pub device: DeviceKind,
    pub keep_display_awake: bool,
}

struct Ticker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn stop(self) {
        self.token.cancel();
        self.handle.abort();
    }

    fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

type AcquisitionSlot = Arc<StdMutex<Option<(Uuid, AcquisitionGuard)>>>;

#[derive(Clone)]
pub struct SessionController {
    machine: Arc<Mutex<SessionMachine>>,
    services: Arc<SessionServices>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    acquisition: AcquisitionSlot,
    /// Last queued begin or end call. Each call waits for the one before it,
    /// so provider calls happen in the order the machine asked for them.
    acquisition_tail: Arc<StdMutex<Option<JoinHandle<()>>>>,
    /// Save of a session that finished on its own.
    pending_save: Arc<StdMutex<Option<JoinHandle<Option<SessionRecord>>>>>,
    events: broadcast::Sender<Event>,
}

impl SessionController {
    pub fn new(machine: SessionMachine, services: SessionServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(machine, services, events)
    }

    /// Share an existing event channel, e.g. with the sync reconciler.
    pub fn with_events(
        machine: SessionMachine,
        services: SessionServices,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            services: Arc::new(services),
            ticker: Arc::new(Mutex::new(None)),
            acquisition: Arc::new(StdMutex::new(None)),
            acquisition_tail: Arc::new(StdMutex::new(None)),
            pending_save: Arc::new(StdMutex::new(None)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // ── Queries ────────────────────────────────────────────────────

    pub async fn state(&self) -> SessionState {
        self.machine.lock().await.state()
    }

    pub async fn snapshot(&self) -> Event {
        self.machine.lock().await.snapshot(Utc::now())
    }

    pub async fn cycles_completed(&self) -> u32 {
        self.machine.lock().await.cycles_completed()
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Change the session length. Only allowed before a session starts.
    pub async fn set_total_cycles(&self, total_cycles: u32) -> bool {
        self.machine.lock().await.set_total_cycles(total_cycles)
    }

    /// Begin the preparation countdown. Returns false if a session is
    /// already underway.
    pub async fn start(&self) -> bool {
        let mut machine = self.machine.lock().await;
        let effects = machine.start(Utc::now());
        if effects.is_empty() {
            return false;
        }
        if self.services.keep_display_awake {
            self.services.display.keep_awake(true);
        }
        self.apply(effects);
        self.sync_ticker(&machine).await;
        true
    }

    pub async fn pause(&self) -> bool {
        let mut machine = self.machine.lock().await;
        let effects = machine.pause(Utc::now());
        let changed = !effects.is_empty();
        self.apply(effects);
        self.sync_ticker(&machine).await;
        changed
    }

    pub async fn resume(&self) -> bool {
        let mut machine = self.machine.lock().await;
        let effects = machine.resume(Utc::now());
        let changed = !effects.is_empty();
        self.apply(effects);
        self.sync_ticker(&machine).await;
        changed
    }

    /// End the session now and wait for its record to be saved.
    ///
    /// A session that already finished on its own but is still being saved
    /// is waited for instead. Returns `None` if there was nothing to save or
    /// the save failed.
    pub async fn end(&self) -> Option<SessionRecord> {
        let outcome = {
            let mut machine = self.machine.lock().await;
            let effects = machine.end(Utc::now());
            let outcome = self.apply(effects);
            self.sync_ticker(&machine).await;
            outcome
        };
        match outcome {
            Some(outcome) => self.finalize(outcome).await,
            None => self.await_pending_save().await,
        }
    }

    /// Return to `Ready`. An active session is abandoned without saving.
    pub async fn reset(&self) {
        let mut machine = self.machine.lock().await;
        let effects = machine.reset(Utc::now());
        self.apply(effects);
        self.sync_ticker(&machine).await;
        self.services.display.keep_awake(false);
    }

    /// Stop everything the controller started. Used on shutdown.
    ///
    /// A save already underway is allowed to finish first.
    pub async fn shutdown(&self) {
        self.await_pending_save().await;
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop();
        }
        self.services.haptics.cancel();
        let _ = self.finish_acquisition(None).await;
        self.services.display.keep_awake(false);
    }

    // ── Internal ───────────────────────────────────────────────────

    /// Apply effects in order. Returns the outcome to finalize, if any; the
    /// caller finalizes it after releasing the machine lock.
    fn apply(&self, effects: Vec<Effect>) -> Option<SessionOutcome> {
        let mut finalize = None;
        for effect in effects {
            match effect {
                Effect::BeginBiometrics { session_id } => self.begin_acquisition(session_id),
                Effect::FetchBaseline { session_id } => self.spawn_baseline_fetch(session_id),
                Effect::RhythmTick => self.services.haptics.play(HapticPattern::rhythm_tick()),
                Effect::PhaseEntered {
                    phase,
                    duration,
                    offset,
                } => {
                    let pattern = HapticPattern::for_phase(phase, duration).resumed_at(offset);
                    self.services.haptics.play(pattern);
                }
                Effect::CancelHaptics => self.services.haptics.cancel(),
                Effect::CompletionSignal => {
                    self.services.haptics.play(HapticPattern::completion());
                    self.services.display.keep_awake(false);
                }
                Effect::Finalize(outcome) => finalize = Some(outcome),
                Effect::Abort { session_id } => {
                    info!(%session_id, "session abandoned");
                    drop(self.finish_acquisition(Some(session_id)));
                }
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
        finalize
    }

    /// Queue `op` behind every acquisition call already queued. The receiver
    /// resolves once `op` has run.
    fn enqueue_acquisition<F, Fut>(&self, op: F) -> oneshot::Receiver<()>
    where
        F: FnOnce(AcquisitionSlot) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (done, finished) = oneshot::channel();
        let slot = Arc::clone(&self.acquisition);
        let mut tail = lock(&self.acquisition_tail);
        let previous = tail.take();
        *tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            op(slot).await;
            let _ = done.send(());
        }));
        finished
    }

    /// Start acquisition for `session_id`. Whatever acquisition is still
    /// held for an earlier session is ended first.
    fn begin_acquisition(&self, session_id: Uuid) {
        let biometrics = Arc::clone(&self.services.biometrics);
        drop(self.enqueue_acquisition(move |slot| async move {
            let previous = lock(&slot).take();
            if let Some((owner, guard)) = previous {
                debug!(%owner, "ending acquisition left over from an earlier session");
                guard.finish().await;
            }
            let guard = biometrics.begin_session().await;
            *lock(&slot) = Some((session_id, guard));
        }));
    }

    /// End acquisition for `session_id`, or for whatever is running if
    /// `None`. A guard belonging to another session is left alone.
    fn finish_acquisition(&self, session_id: Option<Uuid>) -> oneshot::Receiver<()> {
        self.enqueue_acquisition(move |slot| async move {
            let guard = {
                let mut slot = lock(&slot);
                match (&*slot, session_id) {
                    (Some((owner, _)), Some(id)) if *owner != id => None,
                    _ => slot.take(),
                }
            };
            if let Some((_, guard)) = guard {
                guard.finish().await;
            }
        })
    }

    async fn await_pending_save(&self) -> Option<SessionRecord> {
        let pending = lock(&self.pending_save).take()?;
        match pending.await {
            Ok(record) => record,
            Err(e) => {
                error!("session save task failed: {e}");
                None
            }
        }
    }

    /// Finalize a session that finished on its own. The save outlives the
    /// ticker and is tracked so `end` and `shutdown` can wait for it.
    fn spawn_finalize(&self, outcome: SessionOutcome) {
        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.finalize(outcome).await });
        if let Some(earlier) = lock(&self.pending_save).replace(handle) {
            debug!(finished = earlier.is_finished(), "replacing tracked session save");
        }
    }

    fn spawn_baseline_fetch(&self, session_id: Uuid) {
        let controller = self.clone();
        tokio::spawn(async move {
            let Some(hrv) = controller.services.biometrics.fetch_baseline().await else {
                return;
            };
            let mut machine = controller.machine.lock().await;
            if machine.record_baseline(session_id, hrv) {
                let _ = controller.events.send(Event::BaselineCaptured {
                    hrv_ms: hrv,
                    at: Utc::now(),
                });
            } else {
                debug!(%session_id, "discarding baseline for superseded session");
            }
        });
    }

    /// Start, keep, or stop the ticker to match the machine's state.
    async fn sync_ticker(&self, machine: &SessionMachine) {
        let mut slot = self.ticker.lock().await;
        match machine.tick_interval() {
            None => {
                if let Some(ticker) = slot.take() {
                    ticker.stop();
                }
            }
            Some(_) if slot.as_ref().is_some_and(Ticker::is_running) => {}
            Some(_) => {
                if let Some(stale) = slot.take() {
                    stale.stop();
                }
                *slot = Some(self.spawn_ticker());
            }
        }
    }

    fn spawn_ticker(&self) -> Ticker {
        let token = CancellationToken::new();
        let controller = self.clone();
        let cancel = token.clone();
        let handle = tokio::spawn(async move { controller.run_ticker(cancel).await });
        Ticker { token, handle }
    }

    /// Feed the machine real elapsed time until it stops asking for ticks.
    /// The cadence follows the machine: 1 s while counting down, 50 ms while
    /// breathing.
    async fn run_ticker(&self, cancel: CancellationToken) {
        let mut last = Instant::now();
        let mut interval = match self.machine.lock().await.tick_interval() {
            Some(interval) => interval,
            None => return,
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(last + interval) => {}
            }

            {
                let mut machine = self.machine.lock().await;
                // A pause or reset that won the lock cancelled us first.
                if cancel.is_cancelled() {
                    return;
                }
                let now = Instant::now();
                let delta = now - last;
                last = now;

                let effects = machine.tick(delta, Utc::now());
                // Tracked before the lock is released, so an `end` that
                // races the last tick finds the save.
                if let Some(outcome) = self.apply(effects) {
                    self.spawn_finalize(outcome);
                }
                match machine.tick_interval() {
                    Some(next) => interval = next,
                    None => {
                        cancel.cancel();
                    }
                }
            }

            if cancel.is_cancelled() {
                return;
            }
        }
    }

    /// Gather post-session readings, persist the record and hand it to sync.
    async fn finalize(&self, outcome: SessionOutcome) -> Option<SessionRecord> {
        let biometrics = &self.services.biometrics;
        let readings = biometrics
            .collect_post_session(outcome.started_at, outcome.ended_at)
            .await;
        let _ = self.finish_acquisition(Some(outcome.session_id)).await;

        // The baseline may have arrived after the machine built the outcome.
        let hrv_before = match outcome.hrv_before {
            Some(hrv) => Some(hrv),
            None => self.machine.lock().await.baseline_for(outcome.session_id),
        };

        let synced_to_health = biometrics
            .save_mindful_session(outcome.started_at, outcome.ended_at)
            .await;

        let record = SessionRecord {
            id: outcome.session_id,
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            cycles_completed: outcome.cycles_completed,
            duration_secs: outcome.duration_secs,
            hrv_before,
            hrv_after: readings.hrv_after,
            average_heart_rate: readings.average_heart_rate,
            synced_to_health,
            source_device: self.services.device,
        };

        let store = Arc::clone(&self.services.store);
        let to_store = record.clone();
        let saved = tokio::task::spawn_blocking(move || store.append(&to_store)).await;

        match saved {
            Ok(Ok(InsertOutcome::Inserted { id })) => {
                info!(
                    %id,
                    cycles = record.cycles_completed,
                    duration_secs = record.duration_secs,
                    early = outcome.early,
                    "session saved"
                );
                let _ = self.events.send(Event::SessionSaved {
                    record_id: id,
                    cycles_completed: record.cycles_completed,
                    duration_secs: record.duration_secs,
                    at: Utc::now(),
                });
                self.replicate(&record).await;
                Some(record)
            }
            Ok(Ok(InsertOutcome::Duplicate { existing })) => {
                warn!(%existing, "session already stored from the paired device");
                self.save_failed(format!("duplicate of stored session {existing}"));
                None
            }
            Ok(Err(e)) => {
                error!("failed to save session: {e}");
                self.save_failed(e.to_string());
                None
            }
            Err(join) => {
                error!("session save task failed: {join}");
                self.save_failed(join.to_string());
                None
            }
        }
    }

    fn save_failed(&self, message: String) {
        let _ = self.events.send(Event::SessionSaveFailed {
            message,
            at: Utc::now(),
        });
    }

    async fn replicate(&self, record: &SessionRecord) {
        let Some(sync) = self.services.sync.clone() else {
            return;
        };
        let record = record.clone();
        let pushed = tokio::task::spawn_blocking(move || sync.push(&record)).await;
        match pushed {
            Ok(Ok(report)) => debug!(?report, "session queued for peer"),
            Ok(Err(e)) => warn!("could not queue session for peer: {e}"),
            Err(e) => warn!("sync task failed: {e}"),
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
