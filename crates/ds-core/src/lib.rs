//! ds-core: shared types, IDs, errors and configuration.
//!
//! This crate is the foundational dependency for all other ds-* crates,
//! providing type-safe identifiers, a unified error type whose variants map
//! one-to-one onto the failure kinds surfaced by the streaming engine, and
//! the application configuration, plus the client-scoped event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
