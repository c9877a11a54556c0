use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid reporting year {0}")]
    InvalidYear(i32),

    #[error("Invalid date window: start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },

    #[error("Snapshot load failed for {key}: {details}")]
    SnapshotUnavailable { key: String, details: String },

    #[error("Persistence write failed for {key}: {details}")]
    PersistenceFailed { key: String, details: String },

    #[error("Summary for supplier {supplier_id} / {year} does not add up: {field} is {stored} but rows sum to {derived}")]
    SummaryMismatch {
        supplier_id: String,
        year: i32,
        field: String,
        stored: f64,
        derived: f64,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
