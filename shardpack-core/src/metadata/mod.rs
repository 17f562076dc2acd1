// shardpack-core/src/metadata/mod.rs

//! Dataset metadata consumed by the shard writer and reader.
//!
//! The metadata is never stored inside a shard. Attribute names, element
//! types and shapes are all recovered from the [`DatasetStructure`] at read
//! time, by position, so the same structure must be used on both sides.

mod dtype;
mod structure;

pub use dtype::{DType, DTypeKind};
pub use structure::{Attribute, DatasetStructure};
pub(crate) use structure::checked_num_elements;
