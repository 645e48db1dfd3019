//! Background job: apply occupancy observations to the parking map.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::events::{self, ReconcileStats};
use crate::engine::{ParkingAllocator, SlotEventSource};

/// Spawn a task that drains `source` into the allocator. The handle resolves
/// with the tally once the source is exhausted.
pub fn spawn<S>(source: S, allocator: Arc<ParkingAllocator>) -> JoinHandle<ReconcileStats>
where
    S: SlotEventSource + 'static,
{
    tokio::spawn(async move {
        tracing::info!(slots = allocator.len(), "slot reconciler started");
        let stats = events::drive(source, allocator).await;
        tracing::info!(
            applied = stats.applied,
            unchanged = stats.unchanged,
            ignored = stats.ignored,
            "slot reconciler stopped"
        );
        stats
    })
}
