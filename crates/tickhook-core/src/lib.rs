//! # Tickhook Core
//!
//! Configuration and the shared error type used by every Tickhook crate.

pub mod config;
pub mod error;

pub use config::TickhookConfig;
pub use error::{Result, TickhookError};
