//! Sync subcommand for exchanging sessions with the paired device.
//!
//! Outbound sessions are written into `sync.peer_dir`; inbound ones are
//! imported from a directory the peer writes into.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use breathwell_core::storage::{Config, SessionStore};
use breathwell_core::sync::{InboundOutcome, MemoryTransport, Outbox, SyncReconciler};
use clap::Subcommand;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{open_reconciler, open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Show the peer directory and the number of undelivered sessions
    Status,
    /// Retry every undelivered session that is due
    Flush,
    /// Send a stored session to the peer
    Push {
        /// Session ID
        id: Uuid,
    },
    /// Import session messages written by the peer
    Import {
        /// Directory the peer delivers into
        dir: PathBuf,
    },
    /// Keep retrying deliveries and importing from `dir` until Ctrl-C
    Watch {
        /// Directory the peer delivers into
        dir: PathBuf,
        /// Seconds between imports
        #[arg(long, default_value = "10")]
        interval: u64,
    },
}

#[derive(Serialize)]
struct SyncStatus {
    peer_dir: Option<PathBuf>,
    pending: usize,
}

#[derive(Debug, Default, Serialize)]
struct ImportSummary {
    inserted: usize,
    duplicates: usize,
    rejected: usize,
}

impl ImportSummary {
    fn tally(outcomes: &[InboundOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                InboundOutcome::Inserted { .. } => summary.inserted += 1,
                InboundOutcome::Duplicate { .. } => summary.duplicates += 1,
                InboundOutcome::Rejected { .. } => summary.rejected += 1,
            }
        }
        summary
    }
}

/// Run the sync command.
pub fn run(action: SyncAction) -> CliResult {
    let config = Config::load()?;
    let store = Arc::new(open_store(&config)?);

    match action {
        SyncAction::Status => {
            let outbox = Outbox::open(config.sync.retry_policy())?;
            print_json(&SyncStatus {
                peer_dir: config.sync.peer_dir.clone(),
                pending: outbox.len(),
            })?;
        }
        SyncAction::Flush => {
            let reconciler = require_peer(&config, store)?;
            print_json(&reconciler.flush()?)?;
        }
        SyncAction::Push { id } => {
            let record = store
                .get(id)?
                .ok_or_else(|| format!("session not found: {id}"))?;
            let reconciler = require_peer(&config, store)?;
            print_json(&reconciler.push(&record)?)?;
        }
        SyncAction::Import { dir } => {
            let reconciler = inbound_reconciler(&config, store)?;
            let outcomes = reconciler.receive_from_dir(&dir)?;
            print_json(&ImportSummary::tally(&outcomes))?;
        }
        SyncAction::Watch { dir, interval } => {
            let reconciler = Arc::new(require_peer(&config, store)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(watch(reconciler, dir, Duration::from_secs(interval.max(1))))?;
        }
    }
    Ok(())
}

fn require_peer(config: &Config, store: Arc<SessionStore>) -> CliResult<SyncReconciler> {
    open_reconciler(config, store)?
        .ok_or_else(|| "no peer configured; set sync.peer_dir first".into())
}

/// Importing never sends, so without a configured peer a loopback transport
/// stands in.
fn inbound_reconciler(config: &Config, store: Arc<SessionStore>) -> CliResult<SyncReconciler> {
    match open_reconciler(config, store.clone())? {
        Some(reconciler) => Ok(reconciler),
        None => Ok(SyncReconciler::new(
            store,
            Arc::new(MemoryTransport::new()),
            Outbox::in_memory(config.sync.retry_policy()),
        )),
    }
}

async fn watch(reconciler: Arc<SyncReconciler>, inbox: PathBuf, every: Duration) -> CliResult {
    let cancel = CancellationToken::new();
    let retry = tokio::spawn(reconciler.clone().run(cancel.clone()));

    let mut ticker = tokio::time::interval(every);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            _ = ticker.tick() => {
                let importer = reconciler.clone();
                let dir = inbox.clone();
                let outcomes = tokio::task::spawn_blocking(move || importer.receive_from_dir(&dir)).await??;
                if !outcomes.is_empty() {
                    println!("{}", serde_json::to_string(&ImportSummary::tally(&outcomes))?);
                }
            }
        }
    }

    cancel.cancel();
    retry.await?;
    Ok(())
}
