//! Wire format for records replicated to the paired device.
//!
//! Messages are JSON objects tagged by `type`. Optional numeric fields travel
//! as `-1` when absent. Decoding validates every field; a payload that fails
//! is rejected whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::storage::{DeviceKind, SessionRecord};

/// Wire value for an absent optional number.
pub const ABSENT: f64 = -1.0;

pub const NEW_SESSION: &str = "newSession";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "newSession")]
    NewSession(SessionPayload),
}

/// A completed session as it travels between devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    /// Seconds since the Unix epoch.
    pub start_date: f64,
    pub end_date: f64,
    pub cycles_completed: i64,
    /// Seconds.
    pub duration: f64,
    pub hrv_before: f64,
    pub hrv_after: f64,
    pub average_heart_rate: f64,
    pub synced_to_health_kit: bool,
    pub source_device: String,
}

impl SyncMessage {
    pub fn new_session(record: &SessionRecord) -> Self {
        SyncMessage::NewSession(SessionPayload::from_record(record))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::NewSession(_) => NEW_SESSION,
        }
    }

    pub fn to_wire(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode and validate a message received from the peer.
    ///
    /// # Errors
    /// `UnknownMessage` for an unrecognised `type`, `Malformed` for a
    /// payload that does not match the schema, `InvalidField` for values out
    /// of range.
    pub fn from_wire(value: &Value) -> Result<Self, SyncError> {
        let kind = value
            .get("type")
            .ok_or_else(|| SyncError::Malformed("missing 'type'".into()))?
            .as_str()
            .ok_or_else(|| SyncError::Malformed("'type' is not a string".into()))?;

        if kind != NEW_SESSION {
            return Err(SyncError::UnknownMessage(kind.to_string()));
        }

        let message: SyncMessage = serde_json::from_value(value.clone())
            .map_err(|e| SyncError::Malformed(e.to_string()))?;
        match &message {
            SyncMessage::NewSession(payload) => payload.validate()?,
        }
        Ok(message)
    }
}

impl SessionPayload {
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            start_date: epoch_secs(record.started_at),
            end_date: epoch_secs(record.ended_at),
            cycles_completed: record.cycles_completed as i64,
            duration: record.duration_secs,
            hrv_before: record.hrv_before.unwrap_or(ABSENT),
            hrv_after: record.hrv_after.unwrap_or(ABSENT),
            average_heart_rate: record.average_heart_rate.unwrap_or(ABSENT),
            synced_to_health_kit: record.synced_to_health,
            source_device: record.source_device.as_str().to_string(),
        }
    }

    fn validate(&self) -> Result<(), SyncError> {
        self.into_record().map(|_| ())
    }

    /// Build a local record. The wire carries no identifier, so the record
    /// gets a fresh one.
    pub fn into_record(&self) -> Result<SessionRecord, SyncError> {
        let started_at = from_epoch_secs("startDate", self.start_date)?;
        let ended_at = from_epoch_secs("endDate", self.end_date)?;
        if ended_at < started_at {
            return Err(invalid("endDate", "precedes startDate".into()));
        }

        let cycles_completed = u32::try_from(self.cycles_completed)
            .map_err(|_| invalid("cyclesCompleted", format!("{} is out of range", self.cycles_completed)))?;

        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(invalid("duration", format!("{} is not a valid duration", self.duration)));
        }

        let source_device: DeviceKind = self
            .source_device
            .parse()
            .map_err(|_| invalid("sourceDevice", format!("unknown device '{}'", self.source_device)))?;

        Ok(SessionRecord {
            id: Uuid::new_v4(),
            started_at,
            ended_at,
            cycles_completed,
            duration_secs: self.duration,
            hrv_before: optional("hrvBefore", self.hrv_before)?,
            hrv_after: optional("hrvAfter", self.hrv_after)?,
            average_heart_rate: optional("averageHeartRate", self.average_heart_rate)?,
            synced_to_health: self.synced_to_health_kit,
            source_device,
        })
    }
}

fn invalid(field: &'static str, message: String) -> SyncError {
    SyncError::InvalidField { field, message }
}

fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn from_epoch_secs(field: &'static str, secs: f64) -> Result<DateTime<Utc>, SyncError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid(field, format!("{secs} is not a timestamp")));
    }
    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        .ok_or_else(|| invalid(field, format!("{secs} is out of range")))
}

/// Map the sentinel back to `None`; any other negative value is an error.
fn optional(field: &'static str, value: f64) -> Result<Option<f64>, SyncError> {
    if value == ABSENT {
        return Ok(None);
    }
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, format!("{value} is neither a reading nor -1")));
    }
    Ok(Some(value))
}
