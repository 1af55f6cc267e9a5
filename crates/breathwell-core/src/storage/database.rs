//! SQLite-backed session history.
//!
//! Records are append-only. Every insert, local or replicated, goes through
//! [`SessionStore::append`], which refuses a record whose start time lies
//! within the duplicate tolerance of one already stored.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{data_dir, DeviceKind, SessionRecord};
use crate::error::{DatabaseError, Result};

/// Two records starting within this window are the same session.
pub const DEFAULT_DEDUP_TOLERANCE: Duration = Duration::from_millis(500);

const COLUMNS: &str = "id, started_at_ms, ended_at_ms, cycles_completed, duration_secs, \
                       hrv_before, hrv_after, average_heart_rate, synced_to_health, source_device";

/// Result of [`SessionStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted { id: Uuid },
    /// An existing record already covers this session.
    Duplicate { existing: Uuid },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }
}

/// History query. All bounds are optional; results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Inclusive lower bound on `started_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `started_at`.
    pub until: Option<DateTime<Utc>>,
    pub source_device: Option<DeviceKind>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn device(mut self, device: DeviceKind) -> Self {
        self.source_device = Some(device);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Persistent store of completed sessions.
///
/// The connection sits behind a mutex so the store can be shared between the
/// session controller and the sync reconciler; each operation holds it for
/// its whole read-check-write sequence.
pub struct SessionStore {
    conn: Mutex<Connection>,
    dedup_tolerance: Duration,
}

impl SessionStore {
    /// Open `~/.config/breathwell/breathwell.db`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened or
    /// migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("breathwell.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        super::migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
        })
    }

    pub fn with_dedup_tolerance(mut self, tolerance: Duration) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    pub fn dedup_tolerance(&self) -> Duration {
        self.dedup_tolerance
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Insert `record` unless a session starting within the duplicate
    /// tolerance is already stored.
    ///
    /// # Errors
    /// Returns a validation error for a malformed record, or a database
    /// error if the write fails.
    pub fn append(&self, record: &SessionRecord) -> Result<InsertOutcome> {
        self.insert_deduplicated(record, self.dedup_tolerance)
    }

    /// [`append`](Self::append) with an explicit tolerance.
    pub fn insert_deduplicated(
        &self,
        record: &SessionRecord,
        tolerance: Duration,
    ) -> Result<InsertOutcome> {
        record.validate()?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let tolerance = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
        let start = record.started_at.timestamp_millis();
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM sessions
                 WHERE started_at_ms BETWEEN ?1 AND ?2
                 ORDER BY ABS(started_at_ms - ?3)
                 LIMIT 1",
                params![start.saturating_sub(tolerance), start.saturating_add(tolerance), start],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing) = existing {
            let existing = parse_id(&existing)?;
            debug!(%existing, started_at = %record.started_at, "duplicate session discarded");
            return Ok(InsertOutcome::Duplicate { existing });
        }

        tx.execute(
            &format!("INSERT INTO sessions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                record.id.to_string(),
                record.started_at.timestamp_millis(),
                record.ended_at.timestamp_millis(),
                record.cycles_completed,
                record.duration_secs,
                record.hrv_before,
                record.hrv_after,
                record.average_heart_rate,
                record.synced_to_health,
                record.source_device.as_str(),
            ],
        )?;
        tx.commit()?;

        Ok(InsertOutcome::Inserted { id: record.id })
    }

    /// Remove a record. Returns whether it existed.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.to_string()])?;
        Ok(n > 0)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get(&self, id: Uuid) -> Result<Option<SessionRecord>> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
                [id.to_string()],
                RawRow::read,
            )
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    pub fn query(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE (?1 IS NULL OR started_at_ms >= ?1)
               AND (?2 IS NULL OR started_at_ms < ?2)
               AND (?3 IS NULL OR source_device = ?3)
             ORDER BY started_at_ms DESC
             LIMIT ?4"
        ))?;

        let limit = filter.limit.map(|n| n as i64).unwrap_or(-1);
        let rows = stmt.query_map(
            params![
                filter.since.map(|t| t.timestamp_millis()),
                filter.until.map(|t| t.timestamp_millis()),
                filter.source_device.map(|d| d.as_str()),
                limit,
            ],
            RawRow::read,
        )?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    /// Every stored record, newest first.
    pub fn all(&self) -> Result<Vec<SessionRecord>> {
        self.query(&SessionFilter::default())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// Column values as SQLite returns them, before domain conversion.
struct RawRow {
    id: String,
    started_at_ms: i64,
    ended_at_ms: i64,
    cycles_completed: u32,
    duration_secs: f64,
    hrv_before: Option<f64>,
    hrv_after: Option<f64>,
    average_heart_rate: Option<f64>,
    synced_to_health: bool,
    source_device: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            started_at_ms: row.get(1)?,
            ended_at_ms: row.get(2)?,
            cycles_completed: row.get(3)?,
            duration_secs: row.get(4)?,
            hrv_before: row.get(5)?,
            hrv_after: row.get(6)?,
            average_heart_rate: row.get(7)?,
            synced_to_health: row.get(8)?,
            source_device: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            id: parse_id(&self.id)?,
            started_at: from_millis(self.started_at_ms)?,
            ended_at: from_millis(self.ended_at_ms)?,
            cycles_completed: self.cycles_completed,
            duration_secs: self.duration_secs,
            hrv_before: self.hrv_before,
            hrv_after: self.hrv_after,
            average_heart_rate: self.average_heart_rate,
            synced_to_health: self.synced_to_health,
            source_device: self
                .source_device
                .parse()
                .map_err(|e| corrupt(format!("{e}")))?,
        })
    }
}

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: "sessions".into(),
        message,
    }
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| corrupt(format!("bad id '{s}': {e}")).into())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(format!("timestamp {ms} out of range")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn record_at(started_at: DateTime<Utc>, device: DeviceKind) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            started_at,
            ended_at: started_at + ChronoDuration::seconds(76),
            cycles_completed: 4,
            duration_secs: 76.0,
            hrv_before: Some(41.5),
            hrv_after: None,
            average_heart_rate: Some(63.0),
            synced_to_health: true,
            source_device: device,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn append_and_read_back() {
        let store = SessionStore::open_memory().unwrap();
        let record = record_at(t(0), DeviceKind::Watch);

        let outcome = store.append(&record).unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted { id: record.id });
        assert_eq!(store.get(record.id).unwrap(), Some(record));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn start_within_tolerance_is_a_duplicate() {
        let store = SessionStore::open_memory().unwrap();
        let first = record_at(t(0), DeviceKind::Phone);
        store.append(&first).unwrap();

        let near = record_at(t(0) + ChronoDuration::milliseconds(300), DeviceKind::Watch);
        assert_eq!(
            store.append(&near).unwrap(),
            InsertOutcome::Duplicate { existing: first.id }
        );

        let edge = record_at(t(0) - ChronoDuration::milliseconds(500), DeviceKind::Watch);
        assert!(!store.append(&edge).unwrap().is_inserted());

        let apart = record_at(t(0) + ChronoDuration::milliseconds(501), DeviceKind::Watch);
        assert!(store.append(&apart).unwrap().is_inserted());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn tolerance_is_configurable() {
        let store = SessionStore::open_memory()
            .unwrap()
            .with_dedup_tolerance(Duration::from_secs(2));
        store.append(&record_at(t(0), DeviceKind::Phone)).unwrap();
        assert!(!store
            .append(&record_at(t(1), DeviceKind::Watch))
            .unwrap()
            .is_inserted());
    }

    #[test]
    fn huge_tolerance_still_deduplicates() {
        let store = SessionStore::open_memory()
            .unwrap()
            .with_dedup_tolerance(Duration::MAX);
        store.append(&record_at(t(0), DeviceKind::Phone)).unwrap();
        assert!(!store
            .append(&record_at(t(86_400), DeviceKind::Watch))
            .unwrap()
            .is_inserted());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn invalid_record_is_rejected() {
        let store = SessionStore::open_memory().unwrap();
        let mut record = record_at(t(0), DeviceKind::Phone);
        record.ended_at = t(-10);
        assert!(store.append(&record).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn query_is_newest_first_and_filtered() {
        let store = SessionStore::open_memory().unwrap();
        for (i, device) in [DeviceKind::Phone, DeviceKind::Watch, DeviceKind::Phone]
            .into_iter()
            .enumerate()
        {
            store.append(&record_at(t(i as i64 * 3600), device)).unwrap();
        }

        let all = store.all().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].started_at > w[1].started_at));

        let phones = store
            .query(&SessionFilter::default().device(DeviceKind::Phone))
            .unwrap();
        assert_eq!(phones.len(), 2);

        let window = store
            .query(&SessionFilter::default().since(t(3600)).until(t(7200)))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].started_at, t(3600));

        let latest = store.query(&SessionFilter::default().limit(1)).unwrap();
        assert_eq!(latest[0].started_at, t(7200));
    }

    #[test]
    fn delete_removes_record() {
        let store = SessionStore::open_memory().unwrap();
        let record = record_at(t(0), DeviceKind::Phone);
        store.append(&record).unwrap();

        assert!(store.delete(record.id).unwrap());
        assert!(!store.delete(record.id).unwrap());
        assert_eq!(store.get(record.id).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let record = record_at(t(0), DeviceKind::Watch);

        SessionStore::open_at(&path).unwrap().append(&record).unwrap();
        let reopened = SessionStore::open_at(&path).unwrap();
        assert_eq!(reopened.all().unwrap(), vec![record]);
    }
}
