use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::stats::improvement_pct;

/// Which physical device produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Phone,
    Watch,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Phone => "phone",
            DeviceKind::Watch => "watch",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(DeviceKind::Phone),
            "watch" => Ok(DeviceKind::Watch),
            other => Err(ValidationError::InvalidValue {
                field: "source_device".into(),
                message: format!("unknown device '{other}'"),
            }),
        }
    }
}

/// A finished breathing session.
///
/// Built once when a session finalizes (or when a replicated copy arrives from
/// the paired device) and never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cycles_completed: u32,
    /// Breathing time in seconds, excluding preparation and pauses.
    pub duration_secs: f64,
    /// Heart-rate variability before the session, in milliseconds.
    pub hrv_before: Option<f64>,
    pub hrv_after: Option<f64>,
    /// Average heart rate during the session, in beats per minute.
    pub average_heart_rate: Option<f64>,
    /// Whether the session was mirrored into the platform health store.
    pub synced_to_health: bool,
    pub source_device: DeviceKind,
}

impl SessionRecord {
    /// Percentage change in HRV across the session, if both readings exist.
    pub fn hrv_improvement_pct(&self) -> Option<f64> {
        improvement_pct(self.hrv_before?, self.hrv_after?)
    }

    pub fn duration_min(&self) -> f64 {
        self.duration_secs / 60.0
    }

    /// Check the invariants every stored record must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ended_at < self.started_at {
            return Err(ValidationError::InvalidTimeRange {
                start: self.started_at,
                end: self.ended_at,
            });
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "duration_secs".into(),
                message: format!("{} is not a non-negative number", self.duration_secs),
            });
        }
        for (field, value) in [
            ("hrv_before", self.hrv_before),
            ("hrv_after", self.hrv_after),
            ("average_heart_rate", self.average_heart_rate),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ValidationError::InvalidValue {
                        field: field.into(),
                        message: format!("{v} is not a non-negative number"),
                    });
                }
            }
        }
        Ok(())
    }
}
