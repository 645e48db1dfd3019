//! Gate access and parking allocation engine.
//!
//! Entry: fee → slot assignment → ENTRY token. Exit scan: slot lock →
//! USED transition → slot release. State is owned by [`TokenRegistry`] and
//! [`ParkingAllocator`], each with per-entity locks; there is no global lock.

pub mod allocator;
pub mod audit;
pub mod clock;
pub mod events;
pub mod fee;
pub mod journal;
pub mod registry;
pub mod scan;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use allocator::{ParkingAllocator, SensorOutcome, SlotHold, SlotRef};
pub use audit::AuditLog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{SlotEvent, SlotEventSource};
pub use journal::{Journal, JournalRecord};
pub use registry::TokenRegistry;
pub use scan::{ScanOutcome, ScanResult, ScanVerifier};

use crate::errors::GateError;
use crate::middleware::metrics;
use crate::models::slot::{FacilityLayout, ParkingSlot};
use crate::models::token::Token;
use crate::models::vehicle::{VehicleCategory, VisitType};

/// Shared plumbing handed to every stateful component.
#[derive(Clone, Debug)]
pub struct EngineContext {
    pub clock: Arc<dyn Clock>,
    pub journal: Journal,
    pub audit: Arc<AuditLog>,
    /// Upper bound on any single per-entity lock wait.
    pub lock_timeout: Duration,
}

impl EngineContext {
    pub fn new(clock: Arc<dyn Clock>, journal: Journal, lock_timeout: Duration) -> Self {
        let audit = Arc::new(AuditLog::new(clock.clone()));
        Self {
            clock,
            journal,
            audit,
            lock_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub layout: FacilityLayout,
    pub lock_timeout: Duration,
    pub token_ttl: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            layout: FacilityLayout::default(),
            lock_timeout: Duration::from_millis(250),
            token_ttl: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub plate: String,
    pub category: VehicleCategory,
    pub visit_type: VisitType,
    pub issued_by: String,
    /// Payment result reported by the external payment flow.
    pub fee_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum SlotAssignment {
    Assigned { slot: SlotRefView },
    /// No capacity: the token is issued and the vehicle waits.
    Waiting,
}

/// Serializable mirror of [`SlotRef`] for entry responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRefView {
    pub id: uuid::Uuid,
    pub number: u32,
    pub label: String,
}

impl From<&SlotRef> for SlotRefView {
    fn from(s: &SlotRef) -> Self {
        Self {
            id: s.id,
            number: s.number,
            label: s.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub token: Token,
    pub assignment: SlotAssignment,
    pub fee: Decimal,
}

impl EntryOutcome {
    pub fn slot_number(&self) -> Option<u32> {
        match &self.assignment {
            SlotAssignment::Assigned { slot } => Some(slot.number),
            SlotAssignment::Waiting => None,
        }
    }
}

/// Façade wiring the components together.
pub struct GateEngine {
    pub registry: Arc<TokenRegistry>,
    pub allocator: Arc<ParkingAllocator>,
    pub verifier: ScanVerifier,
    /// Plates with an entry being processed right now.
    entering: DashSet<String>,
    ctx: EngineContext,
}

/// Clears a plate from the in-flight set when its entry finishes or fails.
struct EntryInFlight<'a> {
    plates: &'a DashSet<String>,
    plate: &'a str,
}

impl Drop for EntryInFlight<'_> {
    fn drop(&mut self) {
        self.plates.remove(self.plate);
    }
}

impl GateEngine {
    /// Fresh facility, no tokens.
    pub fn new(settings: EngineSettings, clock: Arc<dyn Clock>, journal: Journal) -> Self {
        let ctx = EngineContext::new(clock, journal, settings.lock_timeout);
        let allocator = Arc::new(ParkingAllocator::new(&settings.layout, ctx.clone()));
        let registry = Arc::new(TokenRegistry::new(settings.token_ttl, ctx.clone()));
        Self::assemble(registry, allocator, ctx)
    }

    /// Rebuild from persisted state.
    pub fn restore(
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        journal: Journal,
        slots: Vec<ParkingSlot>,
        tokens: Vec<Token>,
    ) -> anyhow::Result<Self> {
        let ctx = EngineContext::new(clock, journal, settings.lock_timeout);
        let allocator = Arc::new(ParkingAllocator::from_slots(slots, ctx.clone())?);
        let registry = Arc::new(TokenRegistry::restore(tokens, settings.token_ttl, ctx.clone())?);
        Ok(Self::assemble(registry, allocator, ctx))
    }

    fn assemble(
        registry: Arc<TokenRegistry>,
        allocator: Arc<ParkingAllocator>,
        ctx: EngineContext,
    ) -> Self {
        let verifier = ScanVerifier::new(registry.clone(), allocator.clone(), ctx.audit.clone());
        Self {
            registry,
            allocator,
            verifier,
            entering: DashSet::new(),
            ctx,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.ctx.audit
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.ctx.clock
    }

    /// Process a vehicle at the entry gate. A full facility is not an error:
    /// the token is still issued and the outcome is `Waiting`. A plate that
    /// already occupies a slot is refused with `AlreadyParked`.
    pub async fn process_entry(&self, req: EntryRequest) -> Result<EntryOutcome, GateError> {
        // one entry per plate in flight; a double submit retries on Busy
        if !self.entering.insert(req.plate.clone()) {
            tracing::debug!(plate = %req.plate, "entry for this plate already in progress");
            return Err(GateError::Busy);
        }
        let _entering = EntryInFlight {
            plates: &self.entering,
            plate: &req.plate,
        };

        if let Some(parked) = self.allocator.find_occupant(&req.plate).await? {
            tracing::warn!(
                plate = %req.plate,
                slot = %parked.label,
                "entry refused: vehicle already parked"
            );
            return Err(GateError::AlreadyParked(parked.label));
        }

        let fee = fee::entry_fee(req.category, req.visit_type);

        let hold = match self.allocator.claim(req.category, &req.plate).await {
            Ok(hold) => Some(hold),
            Err(GateError::NoCapacity) => None,
            Err(e) => return Err(e),
        };

        let token = match self.registry.issue_entry(
            &req.plate,
            req.category,
            Some(fee),
            req.fee_paid,
            &req.issued_by,
        ) {
            Ok(t) => t,
            Err(e) => {
                // give the slot back; the vehicle never got a token
                if let Some(hold) = hold {
                    hold.release();
                }
                return Err(e);
            }
        };
        let slot = hold.map(|h| h.slot());

        let assignment = match &slot {
            Some(s) => SlotAssignment::Assigned { slot: s.into() },
            None => SlotAssignment::Waiting,
        };
        metrics::record_entry(if slot.is_some() { "assigned" } else { "waiting" });
        tracing::info!(
            plate = %req.plate,
            code = %token.code,
            fee = %fee,
            slot = slot.as_ref().map(|s| s.label.as_str()).unwrap_or("WAITING"),
            "entry processed"
        );

        Ok(EntryOutcome {
            token,
            assignment,
            fee,
        })
    }

    /// Issue an EXIT token for a vehicle leaving.
    pub fn issue_exit(&self, plate: &str, issued_by: &str) -> Result<Token, GateError> {
        self.registry.issue_exit(plate, issued_by)
    }

    pub async fn scan(&self, code: &str) -> Result<ScanOutcome, GateError> {
        self.verifier.verify(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::slot::Zone;
    use crate::models::token::{TokenKind, TokenStatus};

    fn engine(layout: FacilityLayout) -> GateEngine {
        GateEngine::new(
            EngineSettings {
                layout,
                ..Default::default()
            },
            Arc::new(ManualClock::default()),
            Journal::disabled(),
        )
    }

    fn truck_entry(plate: &str) -> EntryRequest {
        EntryRequest {
            plate: plate.to_string(),
            category: VehicleCategory::Truck,
            visit_type: VisitType::Visitor,
            issued_by: "gate-1".into(),
            fee_paid: true,
        }
    }

    #[tokio::test]
    async fn test_truck_visitor_entry() {
        let eng = engine(FacilityLayout::default());
        let out = eng.process_entry(truck_entry("TRK-1")).await.unwrap();

        assert_eq!(out.fee, Decimal::from(10_000));
        assert_eq!(out.token.kind, TokenKind::Entry);
        assert_eq!(out.token.status, TokenStatus::Active);
        assert_eq!(out.token.fee, Some(Decimal::from(10_000)));
        let SlotAssignment::Assigned { slot } = &out.assignment else {
            panic!("expected a slot");
        };
        let stored = eng.allocator.get(slot.id).await.unwrap();
        assert_eq!(stored.zone, Zone::A);
        assert_eq!(stored.occupant.as_deref(), Some("TRK-1"));
    }

    #[tokio::test]
    async fn test_full_facility_yields_waiting_with_token() {
        let eng = engine(FacilityLayout {
            zone_a: 1,
            zone_b: 0,
            zone_c: 0,
        });
        eng.process_entry(truck_entry("TRK-1")).await.unwrap();
        let out = eng.process_entry(truck_entry("TRK-2")).await.unwrap();

        assert_eq!(out.assignment, SlotAssignment::Waiting);
        assert_eq!(out.slot_number(), None);
        assert_eq!(eng.registry.lookup(&out.token.code).await.unwrap().subject, "TRK-2");
    }

    #[tokio::test]
    async fn test_second_entry_for_parked_plate_is_refused() {
        let eng = engine(FacilityLayout {
            zone_a: 2,
            zone_b: 0,
            zone_c: 0,
        });
        let first = eng.process_entry(truck_entry("TRK-1")).await.unwrap();
        let err = eng.process_entry(truck_entry("TRK-1")).await.unwrap_err();
        assert_eq!(err, GateError::AlreadyParked("A-01".into()));

        let occupied: Vec<_> = eng
            .allocator
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.occupant.is_some())
            .collect();
        assert_eq!(occupied.len(), 1);
        assert_eq!(eng.registry.len(), 1);
        assert_eq!(first.token.category, Some(VehicleCategory::Truck));

        // the in-flight marker is gone, so a different plate is unaffected
        assert!(eng.entering.is_empty());
        let second = eng.process_entry(truck_entry("TRK-2")).await.unwrap();
        assert_eq!(second.slot_number(), Some(2));
    }

    #[tokio::test]
    async fn test_entry_in_progress_for_same_plate_is_busy() {
        let eng = engine(FacilityLayout::default());
        eng.entering.insert("TRK-1".to_string());
        assert_eq!(
            eng.process_entry(truck_entry("TRK-1")).await.unwrap_err(),
            GateError::Busy
        );
        assert!(eng.registry.is_empty());
    }

    #[tokio::test]
    async fn test_regular_pass_holder_pays_nothing() {
        let eng = engine(FacilityLayout::default());
        let mut req = truck_entry("TRK-9");
        req.visit_type = VisitType::Regular;
        let out = eng.process_entry(req).await.unwrap();
        assert_eq!(out.fee, Decimal::ZERO);
    }
}
