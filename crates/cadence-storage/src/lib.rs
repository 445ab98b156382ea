//! Cadence Storage - Persistence for campaigns, drafts and the send log
//!
//! Every store is exposed as an async repository trait with a PostgreSQL
//! implementation and a process-local [`MemoryStore`] implementation.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
