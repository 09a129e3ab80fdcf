//! CLI command implementations.
//!
//! This module organizes commands by domain:
//! - `property`: Registration and lookups
//! - `transfer`: Multi-signature transfer lifecycle

pub mod property;
pub mod transfer;

// Re-export all command functions
pub use property::*;
pub use transfer::*;
