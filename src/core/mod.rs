//! Core types shared across the watchdog

pub mod error;

pub use error::{DocuSyncError, Result};
