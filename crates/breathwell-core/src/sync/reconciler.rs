//! Replicates session records between the paired devices.
//!
//! Outbound records go through the outbox so nothing is lost while the peer
//! is away. Inbound records go through the same duplicate-checked insert as
//! local ones; since both devices may save the same session, the store keeps
//! whichever copy lands first.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{read_inbox, Outbox, PeerTransport, SyncMessage};
use crate::error::SyncError;
use crate::events::Event;
use crate::storage::{InsertOutcome, SessionRecord, SessionStore};

/// How long the retry loop sleeps when the outbox is empty.
const IDLE_POLL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    Inserted { id: Uuid },
    Duplicate { existing: Uuid },
    /// Dropped: malformed, unknown, or not storable.
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Sent over the immediate channel.
    pub delivered: usize,
    /// Handed to the queued channel.
    pub transferred: usize,
    pub failed: usize,
    /// Left in the outbox afterwards.
    pub pending: usize,
}

pub struct SyncReconciler {
    store: Arc<SessionStore>,
    transport: Arc<dyn PeerTransport>,
    outbox: Mutex<Outbox>,
    events: Option<broadcast::Sender<Event>>,
    wake: Notify,
}

impl SyncReconciler {
    pub fn new(store: Arc<SessionStore>, transport: Arc<dyn PeerTransport>, outbox: Outbox) -> Self {
        Self {
            store,
            transport,
            outbox: Mutex::new(outbox),
            events: None,
            wake: Notify::new(),
        }
    }

    /// Publish inbound results on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    pub fn pending(&self) -> usize {
        self.outbox().len()
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Queue `record` for the peer and try to deliver it right away.
    ///
    /// # Errors
    /// Returns an error only if the message cannot be encoded or the outbox
    /// cannot be written. Delivery failures stay in the outbox for retry.
    pub fn push(&self, record: &SessionRecord) -> Result<FlushReport, SyncError> {
        let message = SyncMessage::new_session(record).to_wire()?;
        self.outbox()
            .enqueue(record.id.to_string(), message, Utc::now())?;
        let report = self.flush()?;
        self.wake.notify_one();
        Ok(report)
    }

    /// Attempt every due message once.
    pub fn flush(&self) -> Result<FlushReport, SyncError> {
        let now = Utc::now();
        let mut outbox = self.outbox();
        let mut report = FlushReport::default();

        for (key, message) in outbox.due(now) {
            match self.deliver(&message) {
                Ok(immediate) => {
                    if immediate {
                        report.delivered += 1;
                    } else {
                        report.transferred += 1;
                    }
                    outbox.mark_delivered(&key)?;
                }
                Err(e) => {
                    report.failed += 1;
                    outbox.mark_failed(&key, now)?;
                    warn!(
                        key = %key,
                        attempts = outbox.attempts(&key).unwrap_or_default(),
                        "sync delivery failed: {e}"
                    );
                }
            }
        }

        report.pending = outbox.len();
        if report.delivered + report.transferred > 0 {
            debug!(?report, "sync outbox flushed");
        }
        Ok(report)
    }

    /// Immediate channel when the peer is reachable, queued channel
    /// otherwise or if the immediate send fails. `Ok(true)` means immediate.
    fn deliver(&self, message: &Value) -> Result<bool, SyncError> {
        if self.transport.is_reachable() {
            match self.transport.send_message(message) {
                Ok(()) => return Ok(true),
                Err(e) => debug!("immediate send failed, falling back to transfer: {e}"),
            }
        }
        self.transport.transfer(message).map(|()| false)
    }

    /// Retry outbox deliveries until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let wait = self
                .outbox()
                .time_until_next_attempt(Utc::now())
                .unwrap_or(IDLE_POLL);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            // Delivery and outbox persistence touch the filesystem.
            let reconciler = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || reconciler.flush()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("sync outbox flush failed: {e}"),
                Err(e) => error!("sync outbox flush task failed: {e}"),
            }
        }
        debug!("sync retry loop stopped");
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Apply a message from the peer. Never fails: rejected messages are
    /// logged and dropped.
    pub fn receive(&self, value: &Value) -> InboundOutcome {
        let record = match SyncMessage::from_wire(value) {
            Ok(SyncMessage::NewSession(payload)) => payload.into_record(),
            Err(e) => Err(e),
        };
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                error!("dropping inbound sync message: {e}");
                return InboundOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        match self.store.append(&record) {
            Ok(InsertOutcome::Inserted { id }) => {
                info!(%id, source = %record.source_device, "session received from peer");
                self.emit(Event::RecordReceived {
                    record_id: id,
                    source_device: record.source_device,
                    at: Utc::now(),
                });
                InboundOutcome::Inserted { id }
            }
            Ok(InsertOutcome::Duplicate { existing }) => {
                self.emit(Event::DuplicateDiscarded {
                    started_at: record.started_at,
                    at: Utc::now(),
                });
                InboundOutcome::Duplicate { existing }
            }
            Err(e) => {
                error!("failed to store inbound session: {e}");
                InboundOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Import every message file from a shared directory, removing each one
    /// once it has been applied.
    pub fn receive_from_dir(&self, dir: &Path) -> Result<Vec<InboundOutcome>, SyncError> {
        let mut outcomes = Vec::new();
        for (path, value) in read_inbox(dir)? {
            outcomes.push(self.receive(&value));
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), "could not remove imported message: {e}");
            }
        }
        Ok(outcomes)
    }
}
