//! Persistent queue of outbound sync messages with retry backoff.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::storage::data_dir;

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt after `attempts` failures, without jitter.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// [`delay`](Self::delay) plus up to 10% random jitter, still capped.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.delay(attempts);
        let spread = delay.as_millis() as u64 / 10;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        (delay + Duration::from_millis(jitter)).min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingMessage {
    message: Value,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
    next_attempt_at: DateTime<Utc>,
}

/// Messages awaiting delivery, keyed by the record they describe.
///
/// Re-enqueueing a key replaces its message. Every change is written through
/// to disk when the outbox has a file.
pub struct Outbox {
    pending: BTreeMap<String, PendingMessage>,
    queue_file: Option<PathBuf>,
    policy: RetryPolicy,
}

impl Outbox {
    /// Outbox persisted at `~/.config/breathwell/sync_outbox.json`.
    pub fn open(policy: RetryPolicy) -> Result<Self, SyncError> {
        Self::open_at(data_dir()?.join("sync_outbox.json"), policy)
    }

    /// Outbox persisted at `path`, loading anything already queued there.
    pub fn open_at(path: PathBuf, policy: RetryPolicy) -> Result<Self, SyncError> {
        let mut outbox = Self {
            pending: BTreeMap::new(),
            queue_file: Some(path),
            policy,
        };
        outbox.load()?;
        Ok(outbox)
    }

    /// Outbox that lives only as long as the process.
    pub fn in_memory(policy: RetryPolicy) -> Self {
        Self {
            pending: BTreeMap::new(),
            queue_file: None,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Queue `message` for immediate delivery.
    pub fn enqueue(&mut self, key: impl Into<String>, message: Value, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.pending.insert(
            key.into(),
            PendingMessage {
                message,
                attempts: 0,
                enqueued_at: now,
                next_attempt_at: now,
            },
        );
        self.persist()
    }

    /// Messages whose next attempt is due, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(String, Value)> {
        let mut due: Vec<(&String, &PendingMessage)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|(_, p)| p.enqueued_at);
        due.into_iter()
            .map(|(k, p)| (k.clone(), p.message.clone()))
            .collect()
    }

    pub fn mark_delivered(&mut self, key: &str) -> Result<(), SyncError> {
        if self.pending.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    /// Record a failed attempt and push the next one out by the backoff.
    pub fn mark_failed(&mut self, key: &str, now: DateTime<Utc>) -> Result<(), SyncError> {
        let policy = self.policy;
        if let Some(pending) = self.pending.get_mut(key) {
            pending.attempts = pending.attempts.saturating_add(1);
            let delay = chrono::Duration::from_std(policy.jittered_delay(pending.attempts))
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
            pending.next_attempt_at = now + delay;
            self.persist()?;
        }
        Ok(())
    }

    pub fn attempts(&self, key: &str) -> Option<u32> {
        self.pending.get(key).map(|p| p.attempts)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time until the earliest pending attempt; zero if one is already due.
    pub fn time_until_next_attempt(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.pending
            .values()
            .map(|p| p.next_attempt_at)
            .min()
            .map(|t| (t - now).to_std().unwrap_or(Duration::ZERO))
    }

    fn persist(&self) -> Result<(), SyncError> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.pending)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn load(&mut self) -> Result<(), SyncError> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;
        self.pending = serde_json::from_str(&content)?;
        Ok(())
    }
}
