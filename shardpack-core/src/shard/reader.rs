// shardpack-core/src/shard/reader.rs

use std::path::Path;
use std::sync::Arc;

use crate::array::{Array, ByteOrder};
use crate::compress::CompressedFile;
use crate::error::{Result, ShardError};
use crate::flatbuffer::ShardView;
use crate::metadata::{Attribute, DatasetStructure};
use crate::storage::StorageBackend;

/// Reads whole shard files back into arrays.
pub struct ShardReader {
    structure: DatasetStructure,
    storage: Arc<dyn StorageBackend>,
}

impl ShardReader {
    pub fn new(structure: DatasetStructure, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        structure.validate()?;
        Ok(Self { structure, storage })
    }

    /// Decodes every example of the shard at `path`.
    ///
    /// Each example holds one array per attribute, in the order of the
    /// dataset structure.
    ///
    /// # Errors
    ///
    /// Returns `CorruptShard` if the file does not match the structure.
    pub fn read(&self, path: &Path) -> Result<Vec<Vec<Array>>> {
        let data = CompressedFile::new(self.structure.compression, 0)
            .read_all(self.storage.as_ref(), path)?;
        let view = ShardView::new(&data)?;
        let attributes = &self.structure.saved_data_description;

        (0..view.num_examples())
            .map(|i| -> Result<Vec<Array>> {
                let example = view.example(i)?;
                if example.num_attributes() != attributes.len() {
                    return Err(ShardError::corrupt(format!(
                        "example {i} has {} attributes, expected {}",
                        example.num_attributes(),
                        attributes.len()
                    )));
                }

                attributes
                    .iter()
                    .enumerate()
                    .map(|(j, attribute)| decode_attribute(attribute, example.attribute_bytes(j)?))
                    .collect()
            })
            .collect()
    }
}

/// Interprets stored bytes as `attribute`: little-endian elements of its
/// dtype, row-major in its shape.
pub fn decode_attribute(attribute: &Attribute, bytes: &[u8]) -> Result<Array> {
    if bytes.len() != attribute.byte_size() {
        return Err(ShardError::corrupt(format!(
            "attribute '{}' has {} bytes, expected {}",
            attribute.name,
            bytes.len(),
            attribute.byte_size()
        )));
    }

    let byte_order = if attribute.dtype.item_size() == 1 {
        ByteOrder::NotApplicable
    } else {
        ByteOrder::Little
    };

    Array::from_bytes(
        attribute.dtype,
        attribute.shape.clone(),
        byte_order,
        bytes.to_vec(),
    )
}
