pub mod config;
pub mod history;
pub mod pattern;
pub mod session;
pub mod stats;
pub mod sync;

use std::sync::Arc;

use breathwell_core::storage::{Config, SessionStore};
use breathwell_core::sync::{DirectoryTransport, Outbox, SyncReconciler};
use serde::Serialize;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Session store using the configured duplicate tolerance.
pub fn open_store(config: &Config) -> CliResult<SessionStore> {
    Ok(SessionStore::open()?.with_dedup_tolerance(config.sync.dedup_tolerance()))
}

/// Reconciler that delivers into the configured peer directory. `None` when
/// no peer is configured.
pub fn open_reconciler(config: &Config, store: Arc<SessionStore>) -> CliResult<Option<SyncReconciler>> {
    let Some(peer_dir) = &config.sync.peer_dir else {
        return Ok(None);
    };
    let outbox = Outbox::open(config.sync.retry_policy())?;
    let transport = Arc::new(DirectoryTransport::new(peer_dir.clone()));
    Ok(Some(SyncReconciler::new(store, transport, outbox)))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
