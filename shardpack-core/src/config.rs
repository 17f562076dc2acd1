// shardpack-core/src/config.rs

//! Configuration for shard writing.
//!
//! Configuration is parsed from TOML, can be overridden from `SHARDPACK_`
//! environment variables, and is validated before use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, ShardError};
use crate::flatbuffer::MAX_BUFFER_SIZE;

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardpackConfig {
    pub storage: StorageConfig,
    pub writer: WriterConfig,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative shard paths are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to memory-map shards when reading them back.
    pub use_mmap: bool,
    // File size threshold (bytes) above which reads use mmap.
    pub mmap_threshold: u64,
}

/// Shard writer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Compression level handed to the codec. Gzip and zlib clamp it to 0..=9,
    /// lz4 ignores it.
    pub compression_level: i32,
    /// Write to a hidden temporary file and rename it into place on success.
    pub atomic_writes: bool,
    /// Initial capacity of the in-memory shard buffer, in bytes.
    pub initial_buffer_size: usize,
    /// Largest shard, in bytes before compression. A `write` that would
    /// exceed it fails with `BufferTooLarge`.
    pub max_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data"),
            buffer_size: 64 * 1024,      // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            atomic_writes: true,
            initial_buffer_size: 1024 * 1024, // 1 MB
            max_buffer_size: MAX_BUFFER_SIZE,
        }
    }
}

impl FromStr for ShardpackConfig {
    type Err = ShardError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| ShardError::config_with_source("failed to parse TOML config", e))
    }
}

impl ShardpackConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShardError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // - `SHARDPACK_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `SHARDPACK_WRITER_COMPRESSION_LEVEL` overrides `writer.compression_level`
    // - `SHARDPACK_WRITER_ATOMIC_WRITES` overrides `writer.atomic_writes`
    //
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SHARDPACK_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SHARDPACK_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDPACK_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDPACK_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        if let Ok(val) = std::env::var("SHARDPACK_WRITER_COMPRESSION_LEVEL") {
            if let Ok(v) = val.parse() {
                self.writer.compression_level = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDPACK_WRITER_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.writer.atomic_writes = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDPACK_WRITER_INITIAL_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.writer.initial_buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SHARDPACK_WRITER_MAX_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.writer.max_buffer_size = v;
            }
        }

        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(ShardError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.writer.max_buffer_size == 0 || self.writer.max_buffer_size > MAX_BUFFER_SIZE {
            return Err(ShardError::config(format!(
                "writer.max_buffer_size must be between 1 and {MAX_BUFFER_SIZE} bytes"
            )));
        }

        if self.writer.initial_buffer_size > self.writer.max_buffer_size {
            return Err(ShardError::config(
                "writer.initial_buffer_size must not exceed writer.max_buffer_size",
            ));
        }

        Ok(())
    }
}
