// shardpack-core/src/metadata/structure.rs

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::compress::CompressionType;
use crate::error::{Result, ShardError};
use crate::flatbuffer::MAX_BUFFER_SIZE;

use super::DType;

/// Description of one attribute of every example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Name used by callers to supply the value. Never persisted.
    pub name: String,
    /// Element type the bytes are stored as.
    pub dtype: DType,
    /// Row-major shape. An empty shape is a scalar.
    #[serde(default)]
    pub shape: Vec<usize>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: shape.into(),
        }
    }

    /// Number of elements described by the shape, saturating at
    /// `usize::MAX`.
    pub fn num_elements(&self) -> usize {
        checked_num_elements(&self.shape).unwrap_or(usize::MAX)
    }

    /// Exact number of bytes one value of this attribute occupies on disk,
    /// saturating at `usize::MAX`.
    pub fn byte_size(&self) -> usize {
        self.num_elements().saturating_mul(self.dtype.item_size())
    }

    fn checked_byte_size(&self) -> Option<usize> {
        checked_num_elements(&self.shape)?.checked_mul(self.dtype.item_size())
    }
}

/// Product of `shape`, or `None` if it overflows. Any zero dimension makes
/// the product zero.
pub(crate) fn checked_num_elements(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// The structure of the data being saved.
///
/// Attribute order is significant: it is the only thing that tells
/// attributes apart inside a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStructure {
    /// Attributes in the order they are written into every example.
    pub saved_data_description: Vec<Attribute>,
    /// Compression applied to whole shard files.
    #[serde(default)]
    pub compression: CompressionType,
}

impl DatasetStructure {
    pub fn new(saved_data_description: Vec<Attribute>, compression: CompressionType) -> Self {
        Self {
            saved_data_description,
            compression,
        }
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.saved_data_description.iter().find(|a| a.name == name)
    }

    /// Validates that the structure can be written and read back.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no attributes, two attributes share a
    /// name, or one value of an attribute would not fit in a shard.
    pub fn validate(&self) -> Result<()> {
        if self.saved_data_description.is_empty() {
            return Err(ShardError::config(
                "saved_data_description must contain at least one attribute",
            ));
        }

        let mut seen = HashSet::new();
        for attribute in &self.saved_data_description {
            if !seen.insert(attribute.name.as_str()) {
                return Err(ShardError::config(format!(
                    "duplicate attribute name: {}",
                    attribute.name
                )));
            }

            let fits = attribute
                .checked_byte_size()
                .map_or(false, |size| size <= MAX_BUFFER_SIZE);
            if !fits {
                return Err(ShardError::config(format!(
                    "attribute '{}' of shape {:?} does not fit in a shard",
                    attribute.name, attribute.shape
                )));
            }
        }

        Ok(())
    }
}
