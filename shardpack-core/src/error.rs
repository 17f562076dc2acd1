// shardpack-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::metadata::DType;

#[derive(Error, Debug)]
pub enum ShardError {

    #[error("Cannot cast value of dtype {from} passed as attribute '{attribute}' of dtype {to}")]
    TypeMismatch {
        attribute: String,
        from: DType,
        to: DType,
    },

    #[error("Example is missing a value for attribute '{attribute}'")]
    MissingAttribute {
        attribute: String,
    },

    #[error("Attribute '{attribute}' expects {expected} elements, got {actual}")]
    ShapeMismatch {
        attribute: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unexpected byte order '{tag}'")]
    UnexpectedByteOrder {
        tag: char,
    },

    #[error("Invalid array: {message}")]
    InvalidArray {
        message: String,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Compression error: {message}")]
    Compression {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shard buffer would grow to {size} bytes, exceeding the limit of {limit} bytes")]
    BufferTooLarge {
        size: usize,
        limit: usize,
    },

    #[error("Corrupt shard: {message}")]
    CorruptShard {
        message: String,
    },

    #[error("Shard file '{path}' exists but no examples were written")]
    StaleShardFile {
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ShardError>;

// Convenience constructors
impl ShardError {

    pub fn type_mismatch(attribute: impl Into<String>, from: DType, to: DType) -> Self {
        Self::TypeMismatch {
            attribute: attribute.into(),
            from,
            to,
        }
    }

    pub fn missing_attribute(attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute: attribute.into(),
        }
    }

    pub fn shape_mismatch(attribute: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            attribute: attribute.into(),
            expected,
            actual,
        }
    }

    pub fn invalid_array(message: impl Into<String>) -> Self {
        Self::InvalidArray {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn compression_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Compression {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptShard {
            message: message.into(),
        }
    }
}
