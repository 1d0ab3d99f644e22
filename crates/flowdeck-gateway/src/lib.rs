//! # Flowdeck Gateway
//!
//! Axum HTTP surface for saving, loading and scheduling workflows.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
