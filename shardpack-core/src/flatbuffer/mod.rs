// shardpack-core/src/flatbuffer/mod.rs

//! FlatBuffers encoding of shard files.
//!
//! Shards use this schema (namespace `shardfile`):
//!
//! ```text
//! table Attribute { attribute_bytes: [ubyte]; }
//! table Example { attributes: [Attribute]; }
//! table Shard { examples: [Example]; }
//! root_type Shard;
//! ```
//!
//! The builder is hand-written because attribute byte vectors must be
//! aligned to the item size of their declared dtype, which the generic
//! vector helpers of FlatBuffers libraries do not allow.

mod builder;
mod view;

pub use builder::{FlatBufferBuilder, UOffset, MAX_BUFFER_SIZE};
pub use view::{ExampleView, ShardView};

/// Slot of the single field every shard table carries.
pub(crate) const FIELD_SLOT: usize = 0;
