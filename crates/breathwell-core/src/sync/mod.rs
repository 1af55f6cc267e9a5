//! Cross-device replication of session records.
//!
//! Each device stores its own sessions and sends a copy to the paired
//! device. Messages travel as tagged JSON, wait in a persistent outbox until
//! delivered, and are de-duplicated by start time on arrival.

pub mod message;
pub mod outbox;
pub mod reconciler;
pub mod transport;

#[cfg(test)]
mod reconciler_tests;

pub use message::{SessionPayload, SyncMessage, ABSENT, NEW_SESSION};
pub use outbox::{Outbox, RetryPolicy};
pub use reconciler::{FlushReport, InboundOutcome, SyncReconciler};
pub use transport::{read_inbox, DirectoryTransport, MemoryTransport, PeerTransport};
