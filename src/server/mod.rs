//! Viewer-facing HTTP server
//!
//! WebSocket endpoints for raw and annotated camera streams plus a few JSON
//! endpoints for health, stream introspection and zone occupancy.

pub mod config;
pub mod listener;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use listener::ParkcastServer;
pub use routes::create_router;
pub use state::AppState;
