// shardpack-core/src/shard/mod.rs

//! Writing and reading shard files.

mod flatbuffer_writer;
mod reader;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::compress::CompressionType;
use crate::error::Result;

pub use flatbuffer_writer::{encode_attribute, FlatBufferShardWriter};
pub use reader::{decode_attribute, ShardReader};

/// One record: a value for every attribute, keyed by attribute name.
pub type Example = HashMap<String, Array>;

/// Summary of a shard file written by [`ShardWriter::close`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub path: PathBuf,
    pub num_examples: usize,
    /// Size of the serialized shard before compression.
    pub uncompressed_size: u64,
    /// Size of the file as stored.
    pub compressed_size: u64,
    /// XXHash64 of the file as stored.
    pub checksum: u64,
}

/// Single-pass writer of one shard file.
///
/// Examples are buffered in memory and persisted by `close`. A writer cannot
/// be reused: calling `write` or `close` after `close` panics.
pub trait ShardWriter {
    /// Buffers one example.
    ///
    /// # Errors
    ///
    /// Fails without recording anything if the example lacks an attribute
    /// or a value cannot be stored as its attribute's dtype and shape.
    fn write(&mut self, example: &Example) -> Result<()>;

    /// Persists all buffered examples as one file.
    ///
    /// Returns `None` and creates no file if nothing was written.
    fn close(&mut self) -> Result<Option<ShardInfo>>;

    /// Path of the shard file, relative to the storage base path.
    fn shard_file(&self) -> &Path;

    fn supported_compressions() -> &'static [CompressionType]
    where
        Self: Sized;
}
