// shardpack-core/src/storage/mod.rs

//! Storage abstraction for shard files.
//!
//! Shard writers and readers never touch the filesystem directly. They go
//! through a [`StorageBackend`], so the same code can target the local
//! filesystem or any other blob store that can create, rename and delete
//! objects.
//!
//! # Example
//!
//! ```no_run
//! use shardpack_core::config::StorageConfig;
//! use shardpack_core::storage::{LocalStorage, StorageBackend};
//! use std::io::{Read, Write};
//! use std::path::Path;
//!
//! let config = StorageConfig::default();
//! let storage = LocalStorage::new(&config).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("shard_0.fb")).unwrap();
//! writer.write_all(b"bytes").unwrap();
//! writer.finish().unwrap();
//!
//! let mut reader = storage.open_read(Path::new("shard_0.fb")).unwrap();
//! let mut content = Vec::new();
//! reader.read_to_end(&mut content).unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
