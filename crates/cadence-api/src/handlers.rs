//! API request handlers

pub mod campaigns;
pub mod drafts;
pub mod health;
pub mod send;
pub mod settings;
pub mod ticks;

pub use health::*;
