//! Background job: write-behind persistence of engine mutations.
//!
//! Drains the [`Journal`](crate::engine::Journal) channel in ready batches.
//! Within a batch only the latest record per entity is written; records for
//! one entity arrive in commit order, so the last one is the current state.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::engine::JournalRecord;
use crate::store::PgStore;

const MAX_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntityKey {
    Token(Uuid),
    Slot(Uuid),
}

fn key(record: &JournalRecord) -> EntityKey {
    match record {
        JournalRecord::Token(t) => EntityKey::Token(t.id),
        JournalRecord::TokenDeleted(id) => EntityKey::Token(*id),
        JournalRecord::Slot(s) => EntityKey::Slot(s.id),
    }
}

/// Keep the last record for each entity, in first-seen order.
fn coalesce(batch: Vec<JournalRecord>) -> Vec<JournalRecord> {
    let mut order: Vec<EntityKey> = Vec::with_capacity(batch.len());
    let mut latest: HashMap<EntityKey, JournalRecord> = HashMap::with_capacity(batch.len());
    for record in batch {
        let k = key(&record);
        if latest.insert(k, record).is_none() {
            order.push(k);
        }
    }
    order
        .into_iter()
        .filter_map(|k| latest.remove(&k))
        .collect()
}

async fn write(store: &PgStore, record: &JournalRecord) -> anyhow::Result<()> {
    match record {
        JournalRecord::Token(t) => store.upsert_token(t).await,
        JournalRecord::TokenDeleted(id) => store.delete_token(*id).await.map(|_| ()),
        JournalRecord::Slot(s) => store.upsert_slot(s).await,
    }
}

/// Spawn the writer. It exits once every [`Journal`](crate::engine::Journal)
/// handle has been dropped and the channel is drained.
pub fn spawn(store: PgStore, rx: UnboundedReceiver<JournalRecord>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut batches = UnboundedReceiverStream::new(rx).ready_chunks(MAX_BATCH);
        while let Some(batch) = batches.next().await {
            for record in coalesce(batch) {
                if let Err(e) = write(&store, &record).await {
                    tracing::error!(entity = ?key(&record), "journal write failed: {}", e);
                }
            }
        }
        tracing::info!("journal writer stopped");
    })
}
