//! Error types for amrel-model

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid degradation: {0}")]
    InvalidDegradation(String),

    #[error("Cannot combine models: {0}")]
    Combine(String),
}
