//! Parking slot ownership.
//!
//! The slot set is fixed at construction. Each slot carries its own async
//! mutex; every read-modify-write of a slot happens under that slot's lock and
//! nothing ever holds two slot locks at once. Lock waits are bounded by the
//! context's `lock_timeout` and surface as [`GateError::Busy`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::audit::AuditNote;
use super::events::SlotEvent;
use super::journal::JournalRecord;
use super::EngineContext;
use crate::errors::GateError;
use crate::models::audit::AuditKind;
use crate::models::slot::{
    FacilityLayout, ParkingSlot, SlotState, SlotStatus, Zone, ZoneSummary,
    UNIDENTIFIED_OCCUPANT,
};
use crate::models::vehicle::VehicleCategory;

/// Handle to an assigned slot, returned to the gate terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRef {
    pub id: Uuid,
    pub number: u32,
    pub label: String,
    pub zone: Zone,
}

/// What a sensor observation did to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorOutcome {
    Applied(SlotStatus),
    Unchanged,
    IgnoredReserved,
    /// Slot was locked by an allocator transaction; the observation is dropped.
    IgnoredBusy,
    /// Observation predates the slot's last committed change.
    IgnoredStale,
    UnknownSlot,
}

impl SensorOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorOutcome::Applied(_) => "applied",
            SensorOutcome::Unchanged => "unchanged",
            SensorOutcome::IgnoredReserved => "ignored_reserved",
            SensorOutcome::IgnoredBusy => "ignored_busy",
            SensorOutcome::IgnoredStale => "ignored_stale",
            SensorOutcome::UnknownSlot => "unknown_slot",
        }
    }
}

struct SlotRecord {
    state: SlotState,
    updated_at: DateTime<Utc>,
}

struct SlotCell {
    id: Uuid,
    number: u32,
    zone: Zone,
    label: String,
    record: Mutex<SlotRecord>,
}

impl SlotCell {
    fn slot_ref(&self) -> SlotRef {
        SlotRef {
            id: self.id,
            number: self.number,
            label: self.label.clone(),
            zone: self.zone,
        }
    }

    fn view(&self, rec: &SlotRecord) -> ParkingSlot {
        ParkingSlot {
            id: self.id,
            number: self.number,
            label: self.label.clone(),
            zone: self.zone,
            status: rec.state.status(),
            occupant: rec.state.occupant().map(str::to_string),
            updated_at: rec.updated_at,
        }
    }
}

/// A slot locked on behalf of one vehicle. While the hold lives no other
/// transaction or sensor event can touch the slot; dropping it changes nothing.
pub struct SlotHold<'a> {
    alloc: &'a ParkingAllocator,
    cell: &'a SlotCell,
    rec: MutexGuard<'a, SlotRecord>,
}

impl SlotHold<'_> {
    pub fn slot(&self) -> SlotRef {
        self.cell.slot_ref()
    }

    /// Free the slot under the lock taken when the hold was created.
    pub fn release(mut self) -> SlotRef {
        let plate = self.rec.state.occupant().map(str::to_string);
        self.alloc.commit(self.cell, &mut self.rec, SlotState::Available);
        tracing::info!(slot = %self.cell.label, plate = ?plate, "slot released");
        self.cell.slot_ref()
    }
}

pub struct ParkingAllocator {
    /// Sorted by ascending slot number.
    slots: Vec<SlotCell>,
    index: HashMap<Uuid, usize>,
    ctx: EngineContext,
}

impl ParkingAllocator {
    /// Build a fresh facility with every slot AVAILABLE.
    pub fn new(layout: &FacilityLayout, ctx: EngineContext) -> Self {
        let slots = layout.fresh_slots(ctx.clock.now());
        Self::build(slots, ctx)
    }

    /// Rebuild from persisted slots. Fails if any slot breaks the occupancy
    /// invariant or two slots share a number.
    pub fn from_slots(slots: Vec<ParkingSlot>, ctx: EngineContext) -> anyhow::Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for slot in &slots {
            if slot.state().is_none() {
                anyhow::bail!(
                    "slot {} has status {} with occupant {:?}",
                    slot.label,
                    slot.status.as_str(),
                    slot.occupant
                );
            }
            if !seen.insert(slot.number) {
                anyhow::bail!("duplicate slot number {}", slot.number);
            }
        }
        Ok(Self::build(slots, ctx))
    }

    fn build(mut slots: Vec<ParkingSlot>, ctx: EngineContext) -> Self {
        slots.sort_by_key(|s| s.number);
        let cells: Vec<SlotCell> = slots
            .into_iter()
            .map(|s| {
                let state = s.state().unwrap_or(SlotState::Available);
                SlotCell {
                    id: s.id,
                    number: s.number,
                    zone: s.zone,
                    label: s.label,
                    record: Mutex::new(SlotRecord {
                        state,
                        updated_at: s.updated_at,
                    }),
                }
            })
            .collect();
        let index = cells.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        Self {
            slots: cells,
            index,
            ctx,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn cell(&self, slot_id: Uuid) -> Result<&SlotCell, GateError> {
        self.index
            .get(&slot_id)
            .map(|&i| &self.slots[i])
            .ok_or(GateError::UnknownSlot(slot_id))
    }

    async fn lock<'a>(&self, cell: &'a SlotCell) -> Result<MutexGuard<'a, SlotRecord>, GateError> {
        tokio::time::timeout(self.ctx.lock_timeout, cell.record.lock())
            .await
            .map_err(|_| {
                tracing::debug!(slot = %cell.label, "slot lock wait timed out");
                GateError::Busy
            })
    }

    /// Write a new state while the caller holds the slot lock.
    fn commit(&self, cell: &SlotCell, rec: &mut SlotRecord, state: SlotState) -> ParkingSlot {
        rec.state = state;
        rec.updated_at = self.ctx.clock.now();
        let view = cell.view(rec);
        self.ctx.journal.record(JournalRecord::Slot(view.clone()));
        view
    }

    /// Preferred-zone slots first, then every other slot, each in ascending
    /// number order.
    fn candidates(&self, preferred: Zone) -> impl Iterator<Item = &SlotCell> {
        let first = self.slots.iter().filter(move |c| c.zone == preferred);
        let rest = self.slots.iter().filter(move |c| c.zone != preferred);
        first.chain(rest)
    }

    /// Claim the first AVAILABLE slot for `plate`, preferring the category's
    /// zone. Selection and commit happen under the same slot lock.
    ///
    /// Returns `NoCapacity` when every slot is taken, or `Busy` when nothing
    /// could be claimed and at least one slot could not be inspected in time.
    pub async fn assign(&self, category: VehicleCategory, plate: &str) -> Result<SlotRef, GateError> {
        self.claim(category, plate).await.map(|hold| hold.slot())
    }

    /// Like [`assign`](Self::assign), but the claimed slot stays locked until
    /// the returned hold is dropped, so the caller can undo the claim with
    /// [`SlotHold::release`] without ever waiting on the lock again.
    pub async fn claim(
        &self,
        category: VehicleCategory,
        plate: &str,
    ) -> Result<SlotHold<'_>, GateError> {
        let preferred = category.preferred_zone();
        let mut skipped_busy = false;

        for cell in self.candidates(preferred) {
            let Ok(mut rec) = self.lock(cell).await else {
                skipped_busy = true;
                continue;
            };
            if rec.state != SlotState::Available {
                continue;
            }
            self.commit(
                cell,
                &mut rec,
                SlotState::Occupied {
                    plate: plate.to_string(),
                },
            );
            tracing::info!(
                slot = %cell.label,
                zone = cell.zone.as_str(),
                plate = plate,
                category = category.as_str(),
                fallback = cell.zone != preferred,
                "slot assigned"
            );
            return Ok(SlotHold {
                alloc: self,
                cell,
                rec,
            });
        }

        if skipped_busy {
            return Err(GateError::Busy);
        }
        tracing::info!(plate = plate, category = category.as_str(), "no slot available");
        Err(GateError::NoCapacity)
    }

    /// Free an occupied slot. Releasing an AVAILABLE slot is a no-op; a
    /// RESERVED slot can only be changed by an administrator.
    pub async fn release(&self, slot_id: Uuid) -> Result<ParkingSlot, GateError> {
        let cell = self.cell(slot_id)?;
        let mut rec = self.lock(cell).await?;
        match &rec.state {
            SlotState::Available => {
                tracing::debug!(slot = %cell.label, "release on available slot, nothing to do");
                Ok(cell.view(&rec))
            }
            SlotState::Occupied { plate } => {
                tracing::info!(slot = %cell.label, plate = %plate, "slot released");
                Ok(self.commit(cell, &mut rec, SlotState::Available))
            }
            SlotState::Reserved => Err(GateError::InvalidTransition {
                entity: "slot",
                from: SlotStatus::Reserved.as_str(),
                to: SlotStatus::Available.as_str(),
            }),
        }
    }

    /// Lock the slot `plate` occupies and keep it locked. `Ok(None)` means no
    /// slot holds that plate. Any slot that cannot be inspected in time makes
    /// the whole search `Busy`, since the plate could be parked there.
    pub async fn hold_occupant(&self, plate: &str) -> Result<Option<SlotHold<'_>>, GateError> {
        for cell in &self.slots {
            let rec = self.lock(cell).await?;
            if rec.state.occupant() == Some(plate) {
                return Ok(Some(SlotHold {
                    alloc: self,
                    cell,
                    rec,
                }));
            }
        }
        Ok(None)
    }

    /// Read-only: the slot currently occupied by `plate`, if any.
    pub async fn find_occupant(&self, plate: &str) -> Result<Option<SlotRef>, GateError> {
        Ok(self.hold_occupant(plate).await?.map(|hold| hold.slot()))
    }

    /// Administrative override: clear a slot whatever its state. Always
    /// permitted and always audited.
    pub async fn force_release(&self, slot_id: Uuid, actor: &str) -> Result<ParkingSlot, GateError> {
        let cell = self.cell(slot_id)?;
        let (view, previous) = {
            let mut rec = self.lock(cell).await?;
            let previous = match &rec.state {
                SlotState::Occupied { plate } => format!("OCCUPIED by {}", plate),
                other => other.status().as_str().to_string(),
            };
            (self.commit(cell, &mut rec, SlotState::Available), previous)
        };
        self.ctx
            .audit
            .record(
                AuditKind::ForceRelease,
                AuditNote {
                    actor: Some(actor.to_string()),
                    slot_id: Some(slot_id),
                    detail: format!("slot {} force-released (was {})", cell.label, previous),
                    ..Default::default()
                },
            )
            .await;
        Ok(view)
    }

    /// Administrative: hold an AVAILABLE slot out of allocation.
    pub async fn reserve(&self, slot_id: Uuid, actor: &str) -> Result<ParkingSlot, GateError> {
        let cell = self.cell(slot_id)?;
        let view = {
            let mut rec = self.lock(cell).await?;
            match &rec.state {
                SlotState::Reserved => return Ok(cell.view(&rec)),
                SlotState::Occupied { .. } => {
                    return Err(GateError::InvalidTransition {
                        entity: "slot",
                        from: SlotStatus::Occupied.as_str(),
                        to: SlotStatus::Reserved.as_str(),
                    })
                }
                SlotState::Available => self.commit(cell, &mut rec, SlotState::Reserved),
            }
        };
        self.ctx
            .audit
            .record(
                AuditKind::ReservedSet,
                AuditNote {
                    actor: Some(actor.to_string()),
                    slot_id: Some(slot_id),
                    detail: format!("slot {} reserved", cell.label),
                    ..Default::default()
                },
            )
            .await;
        Ok(view)
    }

    /// Administrative: return a RESERVED slot to the pool.
    pub async fn unreserve(&self, slot_id: Uuid, actor: &str) -> Result<ParkingSlot, GateError> {
        let cell = self.cell(slot_id)?;
        let view = {
            let mut rec = self.lock(cell).await?;
            match &rec.state {
                SlotState::Available => return Ok(cell.view(&rec)),
                SlotState::Occupied { .. } => {
                    return Err(GateError::InvalidTransition {
                        entity: "slot",
                        from: SlotStatus::Occupied.as_str(),
                        to: SlotStatus::Available.as_str(),
                    })
                }
                SlotState::Reserved => self.commit(cell, &mut rec, SlotState::Available),
            }
        };
        self.ctx
            .audit
            .record(
                AuditKind::ReservedCleared,
                AuditNote {
                    actor: Some(actor.to_string()),
                    slot_id: Some(slot_id),
                    detail: format!("slot {} returned to pool", cell.label),
                    ..Default::default()
                },
            )
            .await;
        Ok(view)
    }

    /// Reconcile an external occupancy observation. Never waits on a slot
    /// lock and never touches a RESERVED slot.
    pub async fn apply_sensor_event(&self, event: &SlotEvent) -> SensorOutcome {
        let Ok(cell) = self.cell(event.slot_id) else {
            tracing::warn!(slot_id = %event.slot_id, "sensor event for unknown slot");
            return SensorOutcome::UnknownSlot;
        };

        let (outcome, detail) = {
            let Ok(mut rec) = cell.record.try_lock() else {
                tracing::debug!(slot = %cell.label, "slot mid-transaction, sensor event dropped");
                return SensorOutcome::IgnoredBusy;
            };
            if rec.state == SlotState::Reserved {
                return SensorOutcome::IgnoredReserved;
            }
            if event.observed_at < rec.updated_at {
                tracing::debug!(slot = %cell.label, "stale sensor event dropped");
                return SensorOutcome::IgnoredStale;
            }
            match (event.occupied, &rec.state) {
                (true, SlotState::Available) => {
                    self.commit(
                        cell,
                        &mut rec,
                        SlotState::Occupied {
                            plate: UNIDENTIFIED_OCCUPANT.to_string(),
                        },
                    );
                    (
                        SensorOutcome::Applied(SlotStatus::Occupied),
                        format!("slot {} observed occupied while AVAILABLE", cell.label),
                    )
                }
                (false, SlotState::Occupied { plate }) => {
                    let detail = format!("slot {} observed empty while held by {}", cell.label, plate);
                    self.commit(cell, &mut rec, SlotState::Available);
                    (SensorOutcome::Applied(SlotStatus::Available), detail)
                }
                _ => return SensorOutcome::Unchanged,
            }
        };

        self.ctx
            .audit
            .record(
                AuditKind::SensorCorrection,
                AuditNote {
                    actor: Some(event.origin.as_str().to_string()),
                    slot_id: Some(event.slot_id),
                    detail,
                    ..Default::default()
                },
            )
            .await;
        outcome
    }

    pub async fn get(&self, slot_id: Uuid) -> Result<ParkingSlot, GateError> {
        let cell = self.cell(slot_id)?;
        let rec = self.lock(cell).await?;
        Ok(cell.view(&rec))
    }

    /// Point-in-time copy of every slot, ascending by number. Each slot is
    /// read under its own lock; the whole list is not one atomic snapshot.
    pub async fn snapshot(&self) -> Result<Vec<ParkingSlot>, GateError> {
        let mut out = Vec::with_capacity(self.slots.len());
        for cell in &self.slots {
            let rec = self.lock(cell).await?;
            out.push(cell.view(&rec));
        }
        Ok(out)
    }

    /// Per-zone counts followed by a facility total (`zone: None`).
    pub async fn summary(&self) -> Result<Vec<ZoneSummary>, GateError> {
        let slots = self.snapshot().await?;
        let mut per_zone: Vec<ZoneSummary> = Zone::ALL
            .iter()
            .map(|z| ZoneSummary {
                zone: Some(*z),
                ..Default::default()
            })
            .collect();
        let mut total = ZoneSummary::default();

        for slot in &slots {
            let idx = Zone::ALL.iter().position(|z| *z == slot.zone).unwrap_or(0);
            for s in [&mut per_zone[idx], &mut total] {
                match slot.status {
                    SlotStatus::Available => s.available += 1,
                    SlotStatus::Occupied => s.occupied += 1,
                    SlotStatus::Reserved => s.reserved += 1,
                }
            }
        }
        per_zone.push(total);
        Ok(per_zone)
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::{Clock, ManualClock};
    use crate::engine::events::EventOrigin;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use std::sync::Arc;

    fn ctx_with(clock: ManualClock) -> EngineContext {
        EngineContext::new(
            Arc::new(clock),
            crate::engine::journal::Journal::disabled(),
            Duration::from_millis(200),
        )
    }

    fn allocator(a: u32, b: u32, c: u32) -> ParkingAllocator {
        let layout = FacilityLayout {
            zone_a: a,
            zone_b: b,
            zone_c: c,
        };
        ParkingAllocator::new(&layout, ctx_with(ManualClock::default()))
    }

    fn one_truck_slot() -> FacilityLayout {
        FacilityLayout {
            zone_a: 1,
            zone_b: 0,
            zone_c: 0,
        }
    }

    fn assert_invariant(slots: &[ParkingSlot]) {
        for s in slots {
            assert_eq!(
                s.occupant.is_some(),
                s.status == SlotStatus::Occupied,
                "occupancy invariant broken on {}",
                s.label
            );
        }
    }

    #[tokio::test]
    async fn test_assign_prefers_category_zone() {
        let alloc = allocator(2, 2, 2);
        let truck = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        assert_eq!(truck.zone, Zone::A);
        assert_eq!(truck.number, 1);

        let bike = alloc.assign(VehicleCategory::Bike, "BK-1").await.unwrap();
        assert_eq!(bike.zone, Zone::C);
        assert_eq!(bike.number, 5);

        let car = alloc.assign(VehicleCategory::Car, "CAR-1").await.unwrap();
        assert_eq!(car.zone, Zone::B);
        assert_eq!(car.number, 3);

        assert_invariant(&alloc.snapshot().await.unwrap());
    }

    #[tokio::test]
    async fn test_assign_falls_back_to_lowest_number_in_any_zone() {
        let alloc = allocator(1, 1, 1);
        alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        // zone A full: the next truck takes the lowest-numbered free slot
        let fallback = alloc.assign(VehicleCategory::Truck, "TRK-2").await.unwrap();
        assert_eq!(fallback.number, 2);
        assert_eq!(fallback.zone, Zone::B);
    }

    #[tokio::test]
    async fn test_no_capacity_is_distinct_result() {
        let alloc = allocator(1, 0, 0);
        alloc.assign(VehicleCategory::Car, "CAR-1").await.unwrap();
        let err = alloc.assign(VehicleCategory::Car, "CAR-2").await.unwrap_err();
        assert_eq!(err, GateError::NoCapacity);
    }

    #[tokio::test]
    async fn test_reserved_slots_are_never_assigned() {
        let alloc = allocator(2, 0, 0);
        let first = alloc.snapshot().await.unwrap()[0].id;
        alloc.reserve(first, "admin").await.unwrap();

        let got = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        assert_eq!(got.number, 2);
        assert_eq!(
            alloc.assign(VehicleCategory::Truck, "TRK-2").await.unwrap_err(),
            GateError::NoCapacity
        );
        assert_eq!(alloc.get(first).await.unwrap().status, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let alloc = allocator(1, 0, 0);
        let slot = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();

        let once = alloc.release(slot.id).await.unwrap();
        let twice = alloc.release(slot.id).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.status, SlotStatus::Available);
        assert!(twice.occupant.is_none());
    }

    #[tokio::test]
    async fn test_release_refuses_reserved_slot() {
        let alloc = allocator(1, 0, 0);
        let id = alloc.snapshot().await.unwrap()[0].id;
        alloc.reserve(id, "admin").await.unwrap();
        let err = alloc.release(id).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidTransition { .. }));
        assert_eq!(alloc.get(id).await.unwrap().status, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_force_release_clears_any_state_and_audits() {
        let alloc = allocator(2, 0, 0);
        let occupied = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        let reserved = alloc.snapshot().await.unwrap()[1].id;
        alloc.reserve(reserved, "admin").await.unwrap();

        alloc.force_release(occupied.id, "admin").await.unwrap();
        alloc.force_release(reserved, "admin").await.unwrap();

        let slots = alloc.snapshot().await.unwrap();
        assert!(slots.iter().all(|s| s.status == SlotStatus::Available));
        assert_invariant(&slots);

        let overrides = alloc.ctx.audit.of_kind(AuditKind::ForceRelease).await;
        assert_eq!(overrides.len(), 2);
        assert!(overrides[0].detail.contains("TRK-1"));
    }

    #[tokio::test]
    async fn test_reserve_refuses_occupied_slot() {
        let alloc = allocator(1, 0, 0);
        let slot = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        assert!(matches!(
            alloc.reserve(slot.id, "admin").await,
            Err(GateError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_hold_occupant_finds_plate_and_releases() {
        let alloc = allocator(0, 3, 0);
        alloc.assign(VehicleCategory::Car, "CAR-1").await.unwrap();
        let target = alloc.assign(VehicleCategory::Car, "CAR-2").await.unwrap();

        let hold = alloc.hold_occupant("CAR-2").await.unwrap().unwrap();
        assert_eq!(hold.slot(), target);
        assert_eq!(hold.release(), target);

        assert!(alloc.hold_occupant("CAR-2").await.unwrap().is_none());
        assert_eq!(alloc.get(target.id).await.unwrap().status, SlotStatus::Available);
        assert!(alloc.find_occupant("CAR-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_hold_changes_nothing() {
        let alloc = allocator(1, 0, 0);
        let slot = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        {
            let hold = alloc.hold_occupant("TRK-1").await.unwrap().unwrap();
            // the held slot cannot be touched meanwhile
            assert_eq!(alloc.release(slot.id).await.unwrap_err(), GateError::Busy);
            drop(hold);
        }
        let after = alloc.get(slot.id).await.unwrap();
        assert_eq!(after.occupant.as_deref(), Some("TRK-1"));
    }

    #[tokio::test]
    async fn test_hold_occupant_is_busy_when_a_slot_is_locked() {
        let alloc = allocator(2, 0, 0);
        alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        let _held = alloc.slots[0].record.lock().await;

        // TRK-1 may well be behind the locked slot: no answer is safer than "none"
        assert!(matches!(alloc.hold_occupant("TRK-1").await, Err(GateError::Busy)));
        assert!(matches!(alloc.hold_occupant("TRK-9").await, Err(GateError::Busy)));
    }

    #[tokio::test]
    async fn test_claim_can_be_undone_under_its_own_lock() {
        let alloc = allocator(1, 0, 0);
        let hold = alloc.claim(VehicleCategory::Truck, "TRK-1").await.unwrap();
        let id = hold.slot().id;
        hold.release();

        let after = alloc.get(id).await.unwrap();
        assert_eq!(after.status, SlotStatus::Available);
        assert!(after.occupant.is_none());
    }

    #[tokio::test]
    async fn test_unknown_slot() {
        let alloc = allocator(1, 0, 0);
        let id = Uuid::new_v4();
        assert_eq!(alloc.release(id).await.unwrap_err(), GateError::UnknownSlot(id));
    }

    #[tokio::test]
    async fn test_sensor_marks_unassigned_slot_occupied() {
        let clock = ManualClock::default();
        let alloc = ParkingAllocator::new(&one_truck_slot(), ctx_with(clock.clone()));
        let id = alloc.snapshot().await.unwrap()[0].id;
        clock.advance(ChronoDuration::seconds(1));

        let ev = SlotEvent {
            slot_id: id,
            occupied: true,
            observed_at: clock.now(),
            origin: EventOrigin::Sensor,
        };
        assert_eq!(alloc.apply_sensor_event(&ev).await, SensorOutcome::Applied(SlotStatus::Occupied));
        let slot = alloc.get(id).await.unwrap();
        assert_eq!(slot.occupant.as_deref(), Some(UNIDENTIFIED_OCCUPANT));
        assert_eq!(alloc.apply_sensor_event(&ev).await, SensorOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_sensor_never_overrides_reserved() {
        let clock = ManualClock::default();
        let alloc = ParkingAllocator::new(&one_truck_slot(), ctx_with(clock.clone()));
        let id = alloc.snapshot().await.unwrap()[0].id;
        alloc.reserve(id, "admin").await.unwrap();
        clock.advance(ChronoDuration::seconds(1));

        let ev = SlotEvent {
            slot_id: id,
            occupied: true,
            observed_at: clock.now(),
            origin: EventOrigin::Manual,
        };
        assert_eq!(alloc.apply_sensor_event(&ev).await, SensorOutcome::IgnoredReserved);
        assert_eq!(alloc.get(id).await.unwrap().status, SlotStatus::Reserved);
    }

    #[tokio::test]
    async fn test_sensor_loses_to_newer_allocator_commit() {
        let clock = ManualClock::default();
        let alloc = ParkingAllocator::new(&one_truck_slot(), ctx_with(clock.clone()));
        let observed_at = clock.now();
        clock.advance(ChronoDuration::seconds(5));
        let slot = alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();

        // "empty" reading taken before the assignment committed
        let ev = SlotEvent {
            slot_id: slot.id,
            occupied: false,
            observed_at,
            origin: EventOrigin::Sensor,
        };
        assert_eq!(alloc.apply_sensor_event(&ev).await, SensorOutcome::IgnoredStale);
        assert_eq!(alloc.get(slot.id).await.unwrap().occupant.as_deref(), Some("TRK-1"));
    }

    #[tokio::test]
    async fn test_sensor_does_not_wait_on_locked_slot() {
        let alloc = allocator(1, 0, 0);
        let id = alloc.slots[0].id;
        let _held = alloc.slots[0].record.lock().await;

        let ev = SlotEvent {
            slot_id: id,
            occupied: true,
            observed_at: Utc::now() + ChronoDuration::hours(1),
            origin: EventOrigin::Sensor,
        };
        assert_eq!(alloc.apply_sensor_event(&ev).await, SensorOutcome::IgnoredBusy);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_busy() {
        let alloc = allocator(1, 0, 0);
        let id = alloc.slots[0].id;
        let _held = alloc.slots[0].record.lock().await;

        assert_eq!(alloc.release(id).await.unwrap_err(), GateError::Busy);
        assert_eq!(
            alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap_err(),
            GateError::Busy
        );
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let alloc = allocator(2, 1, 1);
        alloc.assign(VehicleCategory::Truck, "TRK-1").await.unwrap();
        let c = alloc.snapshot().await.unwrap()[3].id;
        alloc.reserve(c, "admin").await.unwrap();

        let summary = alloc.summary().await.unwrap();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].zone, Some(Zone::A));
        assert_eq!((summary[0].available, summary[0].occupied), (1, 1));
        assert_eq!(summary[2].reserved, 1);
        let total = &summary[3];
        assert_eq!(total.zone, None);
        assert_eq!((total.available, total.occupied, total.reserved), (2, 1, 1));
    }

    #[test]
    fn test_from_slots_rejects_broken_invariant() {
        let bad = ParkingSlot {
            id: Uuid::new_v4(),
            number: 1,
            label: "A-01".into(),
            zone: Zone::A,
            status: SlotStatus::Available,
            occupant: Some("TRK-1".into()),
            updated_at: Utc::now(),
        };
        assert!(ParkingAllocator::from_slots(vec![bad], ctx_with(ManualClock::default())).is_err());
    }
}
