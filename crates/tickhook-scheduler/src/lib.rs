//! # Tickhook Scheduler
//!
//! Deferred webhook delivery with retry and cancellation rules.
//! A task is one HTTP call to a URL, due at an epoch second, retried on a
//! fixed interval until a cancel rule removes it.
//!
//! ## Design Principles
//! - One record per target URL, keyed by the percent-encoded URL
//! - SQLite persistence by default, JSON file or memory for small setups
//! - No background timer: an external trigger drives bounded invocations
//! - All time goes through [`Clock`], so pacing is testable without sleeping
//!
//! ## Architecture
//! ```text
//! TaskRegistry ── schedule / unschedule ──▶ TaskStore (sqlite | json | memory)
//!                                               ▲
//! on_minute_call ─▶ MinuteDriver                │ scan once, upsert / delete
//!                     └── every ~10 s for 50 s ─▶ SweepEngine
//!                                                  ├── due tasks ─▶ Dispatcher ×N
//!                                                  ├── CycleLatch (wait for all)
//!                                                  └── classify ─▶ reschedule | delete
//! ```

pub mod clock;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod persistence;
pub mod registry;
pub mod store;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock, Ticker};
pub use dispatch::{DispatchResult, Dispatcher, HttpDispatcher};
pub use driver::{InvocationOutcome, MinuteDriver};
pub use engine::{CycleReport, Outcome, SweepEngine, classify};
pub use persistence::SqliteStore;
pub use registry::{ScheduleRequest, TaskRegistry, parse_schedule_request, parse_unschedule_request};
pub use store::{JsonFileStore, MemoryStore, TaskStore, open_store};
pub use tasks::{HttpVerb, ScheduledTask};
