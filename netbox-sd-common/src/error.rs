use thiserror::Error;

/// Common error type for netbox-sd components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid target group: {0}")]
    TargetGroup(String),
}

/// Result type alias using netbox-sd's Error.
pub type Result<T> = std::result::Result<T, Error>;
