//! Background job: persist EXPIRED on tokens past their TTL.
//!
//! Lookups already report expiry lazily, so this sweep only keeps stored
//! status (and the `/tokens` export) from lagging behind.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::engine::TokenRegistry;

/// Spawn the sweep. Call this once at startup.
pub fn spawn(registry: Arc<TokenRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let expired = registry.expire_stale().await;
            if expired > 0 {
                tracing::info!(tokens = expired, "expired stale gate tokens");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineContext, Journal, JournalRecord, ManualClock};
    use crate::models::token::TokenStatus;

    #[tokio::test]
    async fn test_sweep_persists_expired_status() {
        let clock = ManualClock::default();
        let (journal, mut rx) = Journal::channel();
        let ctx = EngineContext::new(Arc::new(clock.clone()), journal, Duration::from_millis(100));
        let registry = Arc::new(TokenRegistry::new(chrono::Duration::hours(24), ctx));
        let token = registry.issue_exit("TRK-1", "gate-2").unwrap();
        assert!(matches!(rx.recv().await, Some(JournalRecord::Token(t)) if t.status == TokenStatus::Active));

        clock.advance(chrono::Duration::hours(25));
        let handle = spawn(registry.clone(), Duration::from_millis(10));
        let record = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        handle.abort();

        match record {
            Some(JournalRecord::Token(t)) => {
                assert_eq!(t.id, token.id);
                assert_eq!(t.status, TokenStatus::Expired);
            }
            other => panic!("unexpected journal record {:?}", other),
        }
    }
}
