//! Cadence Common - Shared types and utilities
//!
//! This crate provides configuration, the shared error type, identifier
//! aliases and the sending settings consumed by every Cadence component.

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use settings::{DayMinute, SendSettings, TimeWindow, WeeklyWindows};
