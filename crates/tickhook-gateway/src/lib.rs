//! # Tickhook Gateway
//!
//! Axum HTTP surface for the scheduler: schedule and unschedule tasks, trigger
//! the minute driver, and inspect what is stored.
//!
//! ```text
//! {prefix}/schedule        POST | GET ?serialized=   → TaskRegistry::schedule
//! {prefix}/unschedule      DELETE                    → TaskRegistry::unschedule
//! {prefix}/on_minute_call  any method                → MinuteDriver::run
//! {prefix}/tasks           GET                       → TaskRegistry::list
//! /health                  GET (no auth)
//! ```

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
