//! Common utilities and types for the acceleration runtime
//!
//! This crate provides shared functionality used across the runtime crates,
//! including the error taxonomy, backend and operation enums, and timing helpers.

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, ErrorCode, Result};
pub use types::*;
