//! Delivery channels to the paired device.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::SyncError;

/// Link to the paired device.
pub trait PeerTransport: Send + Sync {
    /// Whether the peer can take an immediate message right now.
    fn is_reachable(&self) -> bool;

    /// Deliver immediately. Fails when the peer is not reachable.
    fn send_message(&self, message: &Value) -> Result<(), SyncError>;

    /// Hand the message to a queued channel that delivers once the peer
    /// becomes reachable.
    fn transfer(&self, message: &Value) -> Result<(), SyncError>;
}

/// In-process transport. Messages land in an inbox the test (or the other
/// side of a loopback) drains.
#[derive(Debug)]
pub struct MemoryTransport {
    reachable: AtomicBool,
    queued_available: AtomicBool,
    failures_left: AtomicU32,
    delivered: Mutex<Vec<Value>>,
    transferred: Mutex<Vec<Value>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            queued_available: AtomicBool::new(true),
            failures_left: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
            transferred: Mutex::new(Vec::new()),
        }
    }
}

fn lock(values: &Mutex<Vec<Value>>) -> MutexGuard<'_, Vec<Value>> {
    values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Whether the queued channel accepts messages.
    pub fn set_queued_available(&self, available: bool) {
        self.queued_available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` delivery attempts of either kind.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Messages delivered immediately, draining them.
    pub fn take_delivered(&self) -> Vec<Value> {
        std::mem::take(&mut *lock(&self.delivered))
    }

    /// Messages handed to the queued channel, draining them.
    pub fn take_transferred(&self) -> Vec<Value> {
        std::mem::take(&mut *lock(&self.transferred))
    }

    fn injected_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PeerTransport for MemoryTransport {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn send_message(&self, message: &Value) -> Result<(), SyncError> {
        if !self.is_reachable() {
            return Err(SyncError::PeerUnreachable);
        }
        if self.injected_failure() {
            return Err(SyncError::Transport("injected failure".into()));
        }
        lock(&self.delivered).push(message.clone());
        Ok(())
    }

    fn transfer(&self, message: &Value) -> Result<(), SyncError> {
        if !self.queued_available.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("queued channel unavailable".into()));
        }
        if self.injected_failure() {
            return Err(SyncError::Transport("injected failure".into()));
        }
        lock(&self.transferred).push(message.clone());
        Ok(())
    }
}

/// Writes each message as a JSON file into a directory shared with the peer,
/// for example a synced folder. The peer imports and removes the files.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    dir: PathBuf,
}

impl DirectoryTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, message: &Value) -> Result<(), SyncError> {
        let stem = format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4());
        let tmp = self.dir.join(format!(".{stem}.tmp"));
        let target = self.dir.join(format!("{stem}.json"));

        std::fs::write(&tmp, serde_json::to_vec_pretty(message)?)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }
}

impl PeerTransport for DirectoryTransport {
    fn is_reachable(&self) -> bool {
        self.dir.is_dir()
    }

    fn send_message(&self, message: &Value) -> Result<(), SyncError> {
        if !self.is_reachable() {
            return Err(SyncError::PeerUnreachable);
        }
        self.write(message)
    }

    fn transfer(&self, message: &Value) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)?;
        self.write(message)
    }
}

/// Read every message file in `dir`, oldest first.
///
/// Files that are not valid JSON are skipped with a warning and left in
/// place. Returns each file's path with its content so the caller can
/// remove it once processed.
pub fn read_inbox(dir: &Path) -> Result<Vec<(PathBuf, Value)>, SyncError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut messages = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read(&path)
            .map_err(SyncError::from)
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(SyncError::from));
        match parsed {
            Ok(value) => messages.push((path, value)),
            Err(e) => warn!(path = %path.display(), "skipping unreadable sync message: {e}"),
        }
    }
    Ok(messages)
}
