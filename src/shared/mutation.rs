//! Mutation Data Model
//!
//! A mutation is a client-originated state change destined for the factory
//! API: an attendance mark, a work-entry submission, or a supervisor's
//! validation decision. Mutations are queued locally and delivered
//! at-least-once by the sync engine.
//!
//! The payload is a tagged enum whose variant *is* the kind, so a payload can
//! never be paired with the wrong handler. Payload fields serialize in
//! camelCase to match the remote API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::error::SharedError;

/// Client-generated mutation identifier, also used as the idempotency key
pub type MutationId = Uuid;

/// Closed set of mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Attendance,
    WorkEntry,
    Validation,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Attendance,
        MutationKind::WorkEntry,
        MutationKind::Validation,
    ];

    /// Name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Attendance => "attendance",
            MutationKind::WorkEntry => "work_entry",
            MutationKind::Validation => "validation",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MutationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SharedError::validation("kind", format!("unknown mutation kind '{}'", s)))
    }
}

/// Check-in or check-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    CheckIn,
    CheckOut,
}

/// Device position captured with an attendance mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

/// Attendance check-in/check-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePayload {
    pub employee_id: String,
    pub action: AttendanceAction,
    pub recorded_at: DateTime<Utc>,
    pub location: Option<GeoFix>,
    /// Result of the geofence check, computed by the caller
    pub inside_geofence: Option<bool>,
    pub note: Option<String>,
}

/// Production quantities reported for one process on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkEntryPayload {
    pub employee_id: String,
    pub process_id: String,
    pub product_id: String,
    pub work_date: NaiveDate,
    pub quantity: u32,
    pub rejected_quantity: u32,
    pub shift: Option<String>,
    pub notes: Option<String>,
}

/// Supervisor verdict on a work entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationDecision {
    Approved,
    Rejected,
}

/// Supervisor validation of a submitted work entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPayload {
    pub work_entry_id: String,
    pub supervisor_id: String,
    pub decision: ValidationDecision,
    pub comment: Option<String>,
}

/// Kind-specific mutation data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MutationPayload {
    Attendance(AttendancePayload),
    WorkEntry(WorkEntryPayload),
    Validation(ValidationPayload),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::Attendance(_) => MutationKind::Attendance,
            MutationPayload::WorkEntry(_) => MutationKind::WorkEntry,
            MutationPayload::Validation(_) => MutationKind::Validation,
        }
    }

    /// The payload body without the kind tag, as sent to the remote endpoint
    pub fn body(&self) -> Result<serde_json::Value, SharedError> {
        let value = match self {
            MutationPayload::Attendance(p) => serde_json::to_value(p)?,
            MutationPayload::WorkEntry(p) => serde_json::to_value(p)?,
            MutationPayload::Validation(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Rebuild a payload from its stored kind and body
    pub fn from_parts(kind: MutationKind, body: serde_json::Value) -> Result<Self, SharedError> {
        let payload = match kind {
            MutationKind::Attendance => MutationPayload::Attendance(serde_json::from_value(body)?),
            MutationKind::WorkEntry => MutationPayload::WorkEntry(serde_json::from_value(body)?),
            MutationKind::Validation => MutationPayload::Validation(serde_json::from_value(body)?),
        };
        Ok(payload)
    }

    /// Local sanity checks run before a mutation is accepted from the UI
    pub fn validate(&self) -> Result<(), SharedError> {
        match self {
            MutationPayload::Attendance(p) => {
                require_non_empty("employeeId", &p.employee_id)?;
                if let Some(fix) = &p.location {
                    if !(-90.0..=90.0).contains(&fix.latitude) {
                        return Err(SharedError::validation("location.latitude", "out of range"));
                    }
                    if !(-180.0..=180.0).contains(&fix.longitude) {
                        return Err(SharedError::validation("location.longitude", "out of range"));
                    }
                }
                Ok(())
            }
            MutationPayload::WorkEntry(p) => {
                require_non_empty("employeeId", &p.employee_id)?;
                require_non_empty("processId", &p.process_id)?;
                require_non_empty("productId", &p.product_id)?;
                if p.quantity == 0 && p.rejected_quantity == 0 {
                    return Err(SharedError::validation(
                        "quantity",
                        "a work entry must report at least one unit",
                    ));
                }
                Ok(())
            }
            MutationPayload::Validation(p) => {
                require_non_empty("workEntryId", &p.work_entry_id)?;
                require_non_empty("supervisorId", &p.supervisor_id)?;
                if p.decision == ValidationDecision::Rejected
                    && p.comment.as_deref().map_or(true, |c| c.trim().is_empty())
                {
                    return Err(SharedError::validation(
                        "comment",
                        "a rejection must explain the reason",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), SharedError> {
    if value.trim().is_empty() {
        return Err(SharedError::validation(field, "cannot be empty"));
    }
    Ok(())
}

/// A mutation as held by the persistent queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    pub payload: MutationPayload,
    pub enqueued_at: DateTime<Utc>,
    /// Set only after the server confirmed the mutation
    pub synced: bool,
    /// Held back from drain passes until an operator requeues it
    pub quarantined: bool,
    pub attempts: u32,
    /// Attempts the server rejected as invalid or conflicting
    pub rejections: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedMutation {
    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }
}
