//! Core error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(#[from] rust_decimal::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
