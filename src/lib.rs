// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod binding;
pub mod bridge;
pub mod config;

#[cfg(test)]
mod test_utils;
