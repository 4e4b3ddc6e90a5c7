//! Core data models for the sealed file drop service.
//!
//! Rows of the durable backend map to tables via `sqlx::FromRow`; the
//! session and stored-object records serialize via `serde`.

pub mod container;
pub mod metadata;
pub mod object;
pub mod session;
pub mod stored;
