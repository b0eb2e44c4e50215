//! ABOUTME: Core error type, result alias, and tracing utilities
//! ABOUTME: Foundation crate used by all other mixrepo components

pub mod error;
pub mod telemetry;

pub use error::{Error, Result};
