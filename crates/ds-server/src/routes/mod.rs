//! HTTP route handlers.

pub mod attachments;
pub mod control;
pub mod events;
pub mod health;
pub mod stream;
