//! Gatekeeper: gate access tokens and parking slot allocation.
//!
//! The binary in `main.rs` wires these modules into an HTTP service; the
//! library is what integration tests in `tests/` exercise.

pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod store;

use engine::events::SlotEventSender;
use engine::GateEngine;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub engine: GateEngine,
    /// Ingress for manual/sensor occupancy observations.
    pub sensors: SlotEventSender,
    pub config: config::Config,
}
