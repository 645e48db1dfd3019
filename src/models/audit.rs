use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the override / anomaly audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    pub at: DateTime<Utc>,
    /// Operator or terminal that caused the event, if known.
    pub actor: Option<String>,
    pub slot_id: Option<Uuid>,
    pub token_code: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Administrative force-release of a slot.
    ForceRelease,
    /// Slot moved into RESERVED by an administrator.
    ReservedSet,
    /// Slot moved out of RESERVED by an administrator.
    ReservedCleared,
    /// Administrative deletion of a token.
    TokenDeleted,
    /// Exit granted without a matching occupied slot.
    ReconciliationMiss,
    /// Sensor observation changed slot state.
    SensorCorrection,
}

impl AuditKind {
    pub fn is_override(self) -> bool {
        matches!(
            self,
            AuditKind::ForceRelease
                | AuditKind::ReservedSet
                | AuditKind::ReservedCleared
                | AuditKind::TokenDeleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::ForceRelease => "force_release",
            AuditKind::ReservedSet => "reserved_set",
            AuditKind::ReservedCleared => "reserved_cleared",
            AuditKind::TokenDeleted => "token_deleted",
            AuditKind::ReconciliationMiss => "reconciliation_miss",
            AuditKind::SensorCorrection => "sensor_correction",
        }
    }
}
