//! Error types for the AAFS core crate.

/// Errors raised while loading configuration or core data.
#[derive(Debug, thiserror::Error)]
pub enum AafsError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid region: {0}")]
    Region(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AafsError>;
