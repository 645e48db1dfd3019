use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::events::{EventOrigin, SlotEvent};
use crate::engine::{EntryRequest, ScanOutcome, SlotAssignment, SlotRefView};
use crate::errors::AppError;
use crate::models::audit::{AuditEvent, AuditKind};
use crate::models::slot::{ParkingSlot, ZoneSummary};
use crate::models::token::Token;
use crate::models::vehicle::{VehicleCategory, VisitType};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequestBody {
    pub plate: String,
    pub category: String,
    pub visit_type: Option<String>,
    pub issued_by: String,
    #[serde(default)]
    pub fee_paid: bool,
}

/// Slot number, or the literal `"WAITING"` when the facility was full.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SlotNumberField {
    Number(u32),
    Waiting(&'static str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub token_code: String,
    pub slot_number: SlotNumberField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotRefView>,
    pub fee: Decimal,
    pub token: Token,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRequestBody {
    pub plate: String,
    pub issued_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequestBody {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotIdBody {
    pub slot_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEventBody {
    pub slot_id: Uuid,
    pub occupied: bool,
    pub origin: Option<EventOrigin>,
}

#[derive(Debug, Serialize)]
pub struct SensorAck {
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub kind: Option<AuditKind>,
}

/// Matches the VARCHAR(128) columns `subject` and `issued_by` are stored in.
const MAX_FIELD_LEN: usize = 128;

fn require(field: &str, value: &str) -> Result<String, AppError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    if v.chars().count() > MAX_FIELD_LEN {
        return Err(AppError::BadRequest(format!(
            "{} must be at most {} characters",
            field, MAX_FIELD_LEN
        )));
    }
    Ok(v.to_string())
}

/// Operator name for audit records; falls back to a generic label.
fn operator(headers: &HeaderMap) -> String {
    headers
        .get("x-operator")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("admin")
        .to_string()
}

// ── Gate terminal handlers ───────────────────────────────────

/// POST /api/v1/entry: fee, slot, ENTRY token
pub async fn process_entry(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EntryRequestBody>,
) -> Result<(StatusCode, Json<EntryResponse>), AppError> {
    let req = EntryRequest {
        plate: require("plate", &body.plate)?.to_ascii_uppercase(),
        category: VehicleCategory::parse(&body.category),
        visit_type: body
            .visit_type
            .as_deref()
            .map(VisitType::parse)
            .unwrap_or(VisitType::Visitor),
        issued_by: require("issuedBy", &body.issued_by)?,
        fee_paid: body.fee_paid,
    };

    let out = state.engine.process_entry(req).await?;
    let (slot_number, slot) = match out.assignment {
        SlotAssignment::Assigned { slot } => (SlotNumberField::Number(slot.number), Some(slot)),
        SlotAssignment::Waiting => (SlotNumberField::Waiting("WAITING"), None),
    };

    Ok((
        StatusCode::CREATED,
        Json(EntryResponse {
            token_code: out.token.code.clone(),
            slot_number,
            slot,
            fee: out.fee,
            token: out.token,
        }),
    ))
}

/// POST /api/v1/exit: issue an EXIT token
pub async fn issue_exit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExitRequestBody>,
) -> Result<(StatusCode, Json<Token>), AppError> {
    let plate = require("plate", &body.plate)?.to_ascii_uppercase();
    let issued_by = require("issuedBy", &body.issued_by)?;
    let token = state.engine.issue_exit(&plate, &issued_by)?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// POST /api/v1/scan: verify a scanned code
pub async fn scan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScanRequestBody>,
) -> Result<Json<ScanOutcome>, AppError> {
    let outcome = state.engine.scan(&body.code).await?;
    Ok(Json(outcome))
}

/// GET /api/v1/tokens: registry export
pub async fn list_tokens(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Token>>, AppError> {
    Ok(Json(state.engine.registry.list().await?))
}

/// GET /api/v1/slots: parking map export
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ParkingSlot>>, AppError> {
    Ok(Json(state.engine.allocator.snapshot().await?))
}

/// GET /api/v1/slots/summary: per-zone counts
pub async fn slot_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ZoneSummary>>, AppError> {
    Ok(Json(state.engine.allocator.summary().await?))
}

/// POST /api/v1/sensors/events: queue an occupancy observation
pub async fn push_sensor_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SensorEventBody>,
) -> (StatusCode, Json<SensorAck>) {
    let event = SlotEvent {
        slot_id: body.slot_id,
        occupied: body.occupied,
        observed_at: state.engine.clock().now(),
        origin: body.origin.unwrap_or(EventOrigin::Manual),
    };
    let queued = state.sensors.offer(event);
    let status = if queued {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(SensorAck { queued }))
}

// ── Administrative handlers ──────────────────────────────────

/// POST /api/v1/slot/force-release
pub async fn force_release(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SlotIdBody>,
) -> Result<Json<ParkingSlot>, AppError> {
    let slot = state
        .engine
        .allocator
        .force_release(body.slot_id, &operator(&headers))
        .await?;
    Ok(Json(slot))
}

/// POST /api/v1/slots/:id/reserve
pub async fn reserve_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ParkingSlot>, AppError> {
    Ok(Json(state.engine.allocator.reserve(id, &operator(&headers)).await?))
}

/// POST /api/v1/slots/:id/unreserve
pub async fn unreserve_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ParkingSlot>, AppError> {
    Ok(Json(state.engine.allocator.unreserve(id, &operator(&headers)).await?))
}

/// DELETE /api/v1/tokens/:code
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<Token>, AppError> {
    Ok(Json(state.engine.registry.delete(&code, &operator(&headers)).await?))
}

/// GET /api/v1/audit: override and anomaly trail
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Json<Vec<AuditEvent>> {
    let events = match params.kind {
        Some(kind) => state.engine.audit().of_kind(kind).await,
        None => state.engine.audit().all().await,
    };
    Json(events)
}
