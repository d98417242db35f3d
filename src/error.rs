//! Application-wide error types using thiserror
//!
//! Component errors (exchange, store, sizing) are wrapped in AppError
//! so the engine surface has one consistent error type.

use thiserror::Error;

use crate::adapters::errors::ExchangeError;
use crate::sizing::SizingError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sizing error: {0}")]
    Sizing(#[from] SizingError),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
