// shardpack-core/src/lib.rs

//! Shardpack - Core Library
//!
//! This crate writes batches of typed numeric examples into FlatBuffers
//! shard files that can be decoded in place by readers in any language,
//! optionally compressed as a whole. It provides error handling,
//! configuration, storage abstractions, the shard writer and a reader for
//! verifying written shards.

pub mod array;
pub mod compress;
pub mod config;
pub mod error;
pub mod flatbuffer;
pub mod metadata;
pub mod shard;
pub mod storage;

// Re-export commonly used types for convenience
pub use array::{Array, ByteOrder, Element, MemoryOrder};
pub use compress::{CompressedFile, CompressionType};
pub use config::{ShardpackConfig, StorageConfig, WriterConfig};
pub use error::{Result, ShardError};
pub use metadata::{Attribute, DType, DatasetStructure};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub use shard::{
    decode_attribute, encode_attribute, Example, FlatBufferShardWriter, ShardInfo, ShardReader,
    ShardWriter,
};
