//! Headless manga library updater: selects library manga, refreshes their
//! chapters from HTML sources with bounded per-source concurrency, and
//! reports what changed.

pub mod config;
pub mod covers;
pub mod database;
pub mod download;
pub mod error;
pub mod events;
pub mod followups;
pub mod http;
pub mod models;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod tracking;
pub mod traits;
pub mod update;
pub mod wake;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, UpdaterError};
