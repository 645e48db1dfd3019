pub mod expiry;
pub mod journal;
pub mod reconciler;
