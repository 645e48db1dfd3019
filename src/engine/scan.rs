//! Gate scan verification.
//!
//! A scan is resolved as VALID, INVALID or EXPIRED. Only the VALID path
//! mutates anything: the token goes ACTIVE -> USED and, for an exit, the
//! vehicle's slot is released.
//!
//! Lock order is always slot, then token. The vehicle's slot is locked before
//! the USED transition and stays locked until the slot change is committed,
//! so a scan that cannot get either lock returns `Busy` with nothing changed.

use std::sync::Arc;

use serde::Serialize;

use super::allocator::{ParkingAllocator, SlotRef};
use super::audit::{AuditLog, AuditNote};
use super::registry::TokenRegistry;
use crate::errors::GateError;
use crate::middleware::metrics;
use crate::models::audit::AuditKind;
use crate::models::token::{Token, TokenKind, TokenStatus};
use crate::models::vehicle::VehicleCategory;

pub const MSG_NOT_FOUND: &str = "token not found";
pub const MSG_ALREADY_USED: &str = "token already used";
pub const MSG_EXPIRED: &str = "token expired";
pub const MSG_ENTRY_GRANTED: &str = "ACCESS GRANTED: proceed to assigned slot";
pub const MSG_EXIT_GRANTED: &str = "ACCESS GRANTED: exit";
pub const MSG_WAITING: &str = "no slot free: token stays active, scan again when a slot opens";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanResult {
    Valid,
    Invalid,
    Expired,
}

impl ScanResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanResult::Valid => "VALID",
            ScanResult::Invalid => "INVALID",
            ScanResult::Expired => "EXPIRED",
        }
    }

    pub fn access_granted(self) -> bool {
        self == ScanResult::Valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub result: ScanResult,
    pub message: String,
    pub token_code: Option<String>,
    pub kind: Option<TokenKind>,
    pub subject: Option<String>,
    /// Entry: the slot the vehicle was assigned at issuance, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_slot: Option<SlotRef>,
    /// Exit: the slot freed by this scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_slot: Option<SlotRef>,
    /// Exit granted without a matching occupied slot.
    pub reconciliation_miss: bool,
    /// Entry refused only because the facility is still full.
    pub waiting: bool,
}

impl ScanOutcome {
    fn denied(result: ScanResult, message: &str, code: Option<String>) -> Self {
        Self {
            result,
            message: message.to_string(),
            token_code: code,
            kind: None,
            subject: None,
            assigned_slot: None,
            released_slot: None,
            reconciliation_miss: false,
            waiting: false,
        }
    }

    fn granted(token: &Token, message: &str) -> Self {
        Self {
            result: ScanResult::Valid,
            message: message.to_string(),
            token_code: Some(token.code.clone()),
            kind: Some(token.kind),
            subject: Some(token.subject.clone()),
            assigned_slot: None,
            released_slot: None,
            reconciliation_miss: false,
            waiting: false,
        }
    }
}

/// Outcome for a USED transition that lost: to a racing scan, to expiry, or
/// to an administrative delete.
fn refused(err: GateError, code: &str) -> Result<ScanOutcome, GateError> {
    let code = Some(code.to_string());
    match err {
        GateError::InvalidTransition { from, .. } if from == TokenStatus::Expired.as_str() => {
            Ok(ScanOutcome::denied(ScanResult::Expired, MSG_EXPIRED, code))
        }
        GateError::InvalidTransition { .. } => {
            Ok(ScanOutcome::denied(ScanResult::Invalid, MSG_ALREADY_USED, code))
        }
        GateError::NotFound => Ok(ScanOutcome::denied(ScanResult::Invalid, MSG_NOT_FOUND, None)),
        other => Err(other),
    }
}

pub struct ScanVerifier {
    registry: Arc<TokenRegistry>,
    allocator: Arc<ParkingAllocator>,
    audit: Arc<AuditLog>,
}

impl ScanVerifier {
    pub fn new(
        registry: Arc<TokenRegistry>,
        allocator: Arc<ParkingAllocator>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            allocator,
            audit,
        }
    }

    /// Resolve one scan. `Err` is only ever `Busy`: every other failure is a
    /// denied [`ScanOutcome`].
    pub async fn verify(&self, code: &str) -> Result<ScanOutcome, GateError> {
        let outcome = self.resolve(code).await?;
        metrics::record_scan(outcome.result.as_str());
        tracing::info!(
            code = code,
            result = outcome.result.as_str(),
            reconciliation_miss = outcome.reconciliation_miss,
            "{}",
            outcome.message
        );
        Ok(outcome)
    }

    async fn resolve(&self, code: &str) -> Result<ScanOutcome, GateError> {
        let token = match self.registry.lookup(code).await {
            Ok(t) => t,
            Err(GateError::NotFound) => {
                return Ok(ScanOutcome::denied(ScanResult::Invalid, MSG_NOT_FOUND, None))
            }
            Err(e) => return Err(e),
        };

        match token.status {
            TokenStatus::Active => {}
            TokenStatus::Used => {
                return Ok(ScanOutcome::denied(
                    ScanResult::Invalid,
                    MSG_ALREADY_USED,
                    Some(token.code),
                ))
            }
            TokenStatus::Expired => {
                return Ok(ScanOutcome::denied(
                    ScanResult::Expired,
                    MSG_EXPIRED,
                    Some(token.code),
                ))
            }
        }

        match token.kind {
            TokenKind::Entry => self.admit(token).await,
            TokenKind::Exit => self.discharge(token).await,
        }
    }

    async fn admit(&self, token: Token) -> Result<ScanOutcome, GateError> {
        if let Some(hold) = self.allocator.hold_occupant(&token.subject).await? {
            let used = match self.registry.mark_used(token.id).await {
                Ok(t) => t,
                Err(e) => return refused(e, &token.code),
            };
            let mut outcome = ScanOutcome::granted(&used, MSG_ENTRY_GRANTED);
            outcome.assigned_slot = Some(hold.slot());
            return Ok(outcome);
        }

        // Issued while the facility was full: assign now, or keep waiting.
        let category = token.category.unwrap_or(VehicleCategory::Other);
        let hold = match self.allocator.claim(category, &token.subject).await {
            Ok(hold) => hold,
            Err(GateError::NoCapacity) => {
                let mut outcome = ScanOutcome::denied(
                    ScanResult::Invalid,
                    MSG_WAITING,
                    Some(token.code.clone()),
                );
                outcome.kind = Some(token.kind);
                outcome.subject = Some(token.subject);
                outcome.waiting = true;
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };
        match self.registry.mark_used(token.id).await {
            Ok(used) => {
                let mut outcome = ScanOutcome::granted(&used, MSG_ENTRY_GRANTED);
                outcome.assigned_slot = Some(hold.slot());
                Ok(outcome)
            }
            Err(e) => {
                // the claim is still under its own lock, so undoing it cannot fail
                hold.release();
                refused(e, &token.code)
            }
        }
    }

    async fn discharge(&self, token: Token) -> Result<ScanOutcome, GateError> {
        let hold = self.allocator.hold_occupant(&token.subject).await?;
        let used = match self.registry.mark_used(token.id).await {
            Ok(t) => t,
            Err(e) => return refused(e, &token.code),
        };

        let mut outcome = ScanOutcome::granted(&used, MSG_EXIT_GRANTED);
        match hold {
            Some(hold) => {
                let slot = hold.release();
                outcome.message = format!("{} (slot {} released)", MSG_EXIT_GRANTED, slot.label);
                outcome.released_slot = Some(slot);
            }
            None => {
                outcome.reconciliation_miss = true;
                self.audit
                    .record(
                        AuditKind::ReconciliationMiss,
                        AuditNote {
                            token_code: Some(used.code.clone()),
                            detail: format!(
                                "exit granted for {} with no occupied slot on record",
                                used.subject
                            ),
                            ..Default::default()
                        },
                    )
                    .await;
            }
        }
        Ok(outcome)
    }
}
