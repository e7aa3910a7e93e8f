/// Core Module for the SQL bridge
///
/// This module holds the templating and dispatch engine: the server
/// registry, address resolution, payload substitution and query execution,
/// together with the shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{BridgeError, Result};
