use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum TinyBatchError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serializer error: {0}")]
    Serializer(#[from] bincode::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record {key} already exists in {table}")]
    Exists { table: String, key: Value },
    #[error("record not found in {table}: {key}")]
    NotFound { table: String, key: Value },
    #[error("{table} has no field named {field}")]
    UnknownField { table: String, field: String },
    #[error("{field} is not a unique field of {table}")]
    NotIndexed { table: String, field: String },
    #[error("primary key of {table} cannot be changed")]
    ImmutableKey { table: String },
    #[error("{0}")]
    Custom(String),
}

impl TinyBatchError {
    /// Failure raised by a custom command's own logic.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

pub type DbResult<T> = Result<T, TinyBatchError>;
