// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod episode;
pub mod error;
pub mod metrics;
pub mod sources;
pub mod upstream;

// ---- Re-exports for stable public API ----
// Router construction for bins/tests: `ani_gateway::create_router(state)`
pub use crate::api::{create_router, AppState};
pub use crate::error::ApiError;
