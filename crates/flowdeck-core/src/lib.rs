//! # Flowdeck Core
//!
//! Configuration and the error taxonomy shared by the store, the scheduler
//! and the HTTP gateway.

pub mod config;
pub mod error;

pub use config::FlowdeckConfig;
pub use error::{FlowError, Result};
