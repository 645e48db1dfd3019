//! External occupancy observations.
//!
//! Sensors and the manual override panel report what they see through a
//! [`SlotEventSource`]. The allocator consumes observations; it does not own
//! the source. [`drive`] pumps a source into the allocator until it ends.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::allocator::{ParkingAllocator, SensorOutcome};
use crate::middleware::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Sensor,
    Manual,
}

impl EventOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            EventOrigin::Sensor => "sensor",
            EventOrigin::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEvent {
    pub slot_id: Uuid,
    pub occupied: bool,
    pub observed_at: DateTime<Utc>,
    pub origin: EventOrigin,
}

#[async_trait]
pub trait SlotEventSource: Send {
    /// Next observation, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<SlotEvent>;
}

/// Live source fed through a bounded channel (sensor gateway, API ingress).
pub struct ChannelEventSource {
    rx: mpsc::Receiver<SlotEvent>,
}

/// Producer half of a [`ChannelEventSource`].
#[derive(Debug, Clone)]
pub struct SlotEventSender {
    tx: mpsc::Sender<SlotEvent>,
}

pub fn channel(capacity: usize) -> (SlotEventSender, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (SlotEventSender { tx }, ChannelEventSource { rx })
}

impl SlotEventSender {
    /// Enqueue without waiting. Returns false when the queue is full or the
    /// reconciler is gone; observations are advisory so dropping is fine.
    pub fn offer(&self, event: SlotEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(slot_id = %ev.slot_id, "sensor queue full, observation dropped");
                metrics::record_sensor("dropped_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("sensor reconciler stopped, observation dropped");
                false
            }
        }
    }
}

#[async_trait]
impl SlotEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<SlotEvent> {
        self.rx.recv().await
    }
}

/// Adapter for any `Stream` of observations, e.g. a sensor gateway client.
pub struct StreamEventSource<S> {
    inner: S,
}

impl<S> StreamEventSource<S>
where
    S: Stream<Item = SlotEvent> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> SlotEventSource for StreamEventSource<S>
where
    S: Stream<Item = SlotEvent> + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<SlotEvent> {
        self.inner.next().await
    }
}

/// Deterministic, pre-recorded sequence of observations.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    events: VecDeque<SlotEvent>,
}

impl ScriptedEventSource {
    pub fn new(events: impl IntoIterator<Item = SlotEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SlotEventSource for ScriptedEventSource {
    async fn next_event(&mut self) -> Option<SlotEvent> {
        self.events.pop_front()
    }
}

/// Tally of what a drive loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub applied: u64,
    pub unchanged: u64,
    pub ignored: u64,
}

/// Feed every observation from `source` into the allocator until the source
/// is exhausted.
pub async fn drive<S>(mut source: S, allocator: Arc<ParkingAllocator>) -> ReconcileStats
where
    S: SlotEventSource,
{
    let mut stats = ReconcileStats::default();
    while let Some(event) = source.next_event().await {
        let outcome = allocator.apply_sensor_event(&event).await;
        metrics::record_sensor(outcome.as_str());
        match outcome {
            SensorOutcome::Applied(_) => stats.applied += 1,
            SensorOutcome::Unchanged => stats.unchanged += 1,
            _ => stats.ignored += 1,
        }
    }
    tracing::debug!(?stats, "slot event source exhausted");
    stats
}
