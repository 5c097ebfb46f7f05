use thiserror::Error;

/// Common error type for Infoblox discovery components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid payload for {kind}: {reason}")]
    Payload { kind: &'static str, reason: String },
}

impl Error {
    /// Create a payload error for the given entity kind.
    pub fn payload(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Payload {
            kind,
            reason: reason.into(),
        }
    }
}

/// Result type alias using the discovery Error.
pub type Result<T> = std::result::Result<T, Error>;
