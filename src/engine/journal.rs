//! Change feed for write-behind persistence.
//!
//! Components push a record for every committed mutation while still holding
//! the entity's lock, so per-entity order on the channel matches commit order.
//! A single writer task drains the channel into Postgres (`jobs::journal`).

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::slot::ParkingSlot;
use crate::models::token::Token;

#[derive(Debug, Clone)]
pub enum JournalRecord {
    Token(Token),
    TokenDeleted(Uuid),
    Slot(ParkingSlot),
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    tx: Option<mpsc::UnboundedSender<JournalRecord>>,
}

impl Journal {
    /// Journal that drops every record (memory-only mode, tests).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JournalRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record(&self, record: JournalRecord) {
        if let Some(tx) = &self.tx {
            if tx.send(record).is_err() {
                tracing::warn!("journal writer has stopped; mutation not persisted");
            }
        }
    }
}
