use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid baseline for city '{city}': {field} {reason}")]
    InvalidBaseline {
        city: String,
        field: &'static str,
        reason: String,
    },

    #[error("Non-finite value for '{field}': {value}")]
    NonFinite { field: String, value: f64 },

    #[error("Duplicate city id '{city}'")]
    DuplicateCity { city: String },

    #[error("No cities configured")]
    NoCities,

    #[error("Invalid horizon: {reason}")]
    InvalidHorizon { reason: String },

    #[error("Scope '{scope}' matches no simulated city")]
    UnknownScope { scope: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
