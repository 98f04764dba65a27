//! Error types for the image store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Corrupt log frame at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned
    }
}
