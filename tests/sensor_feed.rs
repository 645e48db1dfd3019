//! Occupancy observations flowing into the parking map.

use std::sync::Arc;
use std::time::Duration;

use gatekeeper::engine::events::{
    self, EventOrigin, ReconcileStats, ScriptedEventSource, SlotEvent, StreamEventSource,
};
use gatekeeper::engine::{
    Clock, EngineContext, Journal, ManualClock, ParkingAllocator, SensorOutcome,
};
use gatekeeper::models::audit::AuditKind;
use gatekeeper::models::slot::{FacilityLayout, SlotStatus, UNIDENTIFIED_OCCUPANT};
use gatekeeper::models::vehicle::VehicleCategory;

fn setup() -> (Arc<ParkingAllocator>, ManualClock, EngineContext) {
    let clock = ManualClock::default();
    let ctx = EngineContext::new(
        Arc::new(clock.clone()),
        Journal::disabled(),
        Duration::from_millis(500),
    );
    let layout = FacilityLayout {
        zone_a: 1,
        zone_b: 2,
        zone_c: 0,
    };
    let alloc = Arc::new(ParkingAllocator::new(&layout, ctx.clone()));
    (alloc, clock, ctx)
}

fn observe(slot_id: uuid::Uuid, occupied: bool, clock: &ManualClock) -> SlotEvent {
    SlotEvent {
        slot_id,
        occupied,
        observed_at: clock.now(),
        origin: EventOrigin::Sensor,
    }
}

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_unassigned_car_is_recorded_as_unidentified() {
        let (alloc, clock, ctx) = setup();
        let slot = alloc.snapshot().await.unwrap()[1].clone();
        clock.advance(chrono::Duration::seconds(5));

        let stats = events::drive(
            ScriptedEventSource::new([observe(slot.id, true, &clock)]),
            alloc.clone(),
        )
        .await;
        assert_eq!(stats.applied, 1);

        let after = alloc.get(slot.id).await.unwrap();
        assert_eq!(after.status, SlotStatus::Occupied);
        assert_eq!(after.occupant.as_deref(), Some(UNIDENTIFIED_OCCUPANT));
        assert_eq!(ctx.audit.of_kind(AuditKind::SensorCorrection).await.len(), 1);

        // the allocator skips it now
        let car = alloc.assign(VehicleCategory::Car, "CAR-1").await.unwrap();
        assert_ne!(car.id, slot.id);
    }

    #[tokio::test]
    async fn test_reserved_slot_ignores_sensors() {
        let (alloc, clock, _ctx) = setup();
        let slot = alloc.snapshot().await.unwrap()[0].clone();
        alloc.reserve(slot.id, "ops").await.unwrap();
        clock.advance(chrono::Duration::seconds(1));

        let outcome = alloc
            .apply_sensor_event(&observe(slot.id, true, &clock))
            .await;
        assert_eq!(outcome, SensorOutcome::IgnoredReserved);
        assert_eq!(
            alloc.get(slot.id).await.unwrap().status,
            SlotStatus::Reserved
        );
    }

    /// An observation taken before the allocator's last change must not undo it.
    #[tokio::test]
    async fn test_stale_observation_is_dropped() {
        let (alloc, clock, _ctx) = setup();
        let before = observe(alloc.snapshot().await.unwrap()[0].id, false, &clock);
        clock.advance(chrono::Duration::seconds(2));
        let slot = alloc.assign(VehicleCategory::Truck, "TRK-5").await.unwrap();
        assert_eq!(slot.id, before.slot_id);

        assert_eq!(
            alloc.apply_sensor_event(&before).await,
            SensorOutcome::IgnoredStale
        );
        assert_eq!(
            alloc.get(slot.id).await.unwrap().occupant.as_deref(),
            Some("TRK-5")
        );
    }

    #[tokio::test]
    async fn test_unknown_slot_is_counted_as_ignored() {
        let (alloc, clock, _ctx) = setup();
        let stats = events::drive(
            ScriptedEventSource::new([observe(uuid::Uuid::new_v4(), true, &clock)]),
            alloc,
        )
        .await;
        assert_eq!(
            stats,
            ReconcileStats {
                applied: 0,
                unchanged: 0,
                ignored: 1
            }
        );
    }
}

mod live_sources {
    use super::*;
    use gatekeeper::jobs;

    #[tokio::test]
    async fn test_channel_source_through_reconciler_job() {
        let (alloc, clock, _ctx) = setup();
        let slots = alloc.snapshot().await.unwrap();
        clock.advance(chrono::Duration::seconds(1));

        let (tx, source) = events::channel(16);
        let handle = jobs::reconciler::spawn(source, alloc.clone());

        assert!(tx.offer(observe(slots[1].id, true, &clock)));
        assert!(tx.offer(observe(slots[2].id, true, &clock)));
        assert!(tx.offer(observe(slots[2].id, false, &clock)));
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.applied, 3);

        let after = alloc.snapshot().await.unwrap();
        assert_eq!(after[1].status, SlotStatus::Occupied);
        assert_eq!(after[2].status, SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_stream_source_from_gateway_feed() {
        let (alloc, clock, _ctx) = setup();
        let slot = alloc.snapshot().await.unwrap()[0].id;
        clock.advance(chrono::Duration::seconds(1));

        let feed = futures::stream::iter(vec![
            observe(slot, true, &clock),
            observe(slot, true, &clock),
        ]);
        let stats = events::drive(StreamEventSource::new(feed), alloc.clone()).await;

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.unchanged, 1);
    }
}
