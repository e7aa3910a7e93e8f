/// Bridge Error Module
///
/// This module defines the error types shared by every layer of the bridge,
/// from configuration loading down to statement execution.
use thiserror::Error;

/// Error type for the SQL bridge.
///
/// The variants follow the failure classes a caller has to tell apart:
/// - configuration problems found while loading server descriptors
/// - addresses naming a server that is not registered
/// - payloads that cannot be applied to a template
/// - driver and connection failures while executing
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Errors raised by the SQLite driver
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Missing or invalid server configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// An address names a server id the registry does not know
    #[error("Address resolution error: no server registered as '{0}'")]
    AddressResolution(String),

    /// A payload does not fit the template it is applied to
    #[error("Substitution error: {0}")]
    Substitution(String),

    /// Statement preparation or execution failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Opening or closing a connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Item binding text could not be parsed
    #[error("Binding error: {0}")]
    Binding(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic application errors for unexpected conditions
    #[error("Application error: {0}")]
    App(String),
}

/// Type alias for Result using `BridgeError` as the error type.
pub type Result<T> = std::result::Result<T, BridgeError>;
