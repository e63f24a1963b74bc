use thiserror::Error;

use crate::model::ObjectId;

#[derive(Error, Debug)]
pub enum KeepsakeError {
    #[error("Invalid record state for {id}: {reason}")]
    InvalidRecordState { id: ObjectId, reason: String },
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Collection has no source to fetch from")]
    NoSource,
    #[error("No async runtime available to schedule the fetch")]
    NoRuntime,
    #[error("Collection has been destroyed")]
    Destroyed,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, KeepsakeError>;

// Helper conversions
impl From<serde_json::Error> for KeepsakeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for KeepsakeError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
