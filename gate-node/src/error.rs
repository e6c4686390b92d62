use thiserror::Error;

/// Errors that can occur in the gate-node library
///
/// Authentication and authorization failures are not errors: verification
/// returns `None` and the solver returns the default deny rule. This enum
/// covers configuration problems, unreadable domain files, and internal
/// defects such as a pattern that fails to compile.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error reading domain or resource files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Glob or regex compilation error
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Domain consistency error (unknown user in membership or password)
    #[error("Domain error: {0}")]
    Domain(String),

    /// Token sealing or unsealing error
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;
