//! Shared helpers used across all loam crates: the per-crate error context
//! trait and char-safe text handling.

pub mod error;
pub mod text;

pub use error::FromMessage;
