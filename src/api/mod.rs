//! HTTP API for event ingestion and recommendations
//!
//! Provides:
//! - Event batch ingestion (`POST /events`)
//! - Multi-strategy recommendations and feedback
//! - Per-strategy metrics and health

pub mod server;
pub mod state;

pub use server::ApiServer;
pub use state::AppState;
