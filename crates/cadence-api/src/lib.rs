//! Cadence API - REST surface for the campaign engine
//!
//! Operators create campaigns, snapshot recipients, drive the send
//! lifecycle and inspect progress. External delay-capable dispatchers
//! deliver ticks through `POST /api/v1/ticks`.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
