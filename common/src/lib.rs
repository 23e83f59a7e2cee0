//! Common Utilities and Types Library
//!
//! This crate provides shared identifiers, timing types and grid utilities used across the scheduler.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
