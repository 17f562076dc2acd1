// shardpack-core/src/flatbuffer/view.rs

//! Zero-copy, bounds-checked access to a serialized shard.

use crate::error::{Result, ShardError};

use super::FIELD_SLOT;

const UOFFSET_SIZE: usize = 4;

/// A vector located inside the buffer.
#[derive(Debug, Clone, Copy)]
struct Vector {
    /// Position of the first element.
    start: usize,
    len: usize,
}

impl Vector {
    const EMPTY: Vector = Vector { start: 0, len: 0 };
}

/// Read-only view over a finished shard buffer.
#[derive(Debug, Clone, Copy)]
pub struct ShardView<'a> {
    buf: &'a [u8],
    examples: Vector,
}

/// One example of a [`ShardView`].
#[derive(Debug, Clone, Copy)]
pub struct ExampleView<'a> {
    buf: &'a [u8],
    attributes: Vector,
}

impl<'a> ShardView<'a> {
    /// Validates the root table and the examples vector.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let root = follow(buf, 0)?;
        let examples = vector_field(buf, root, UOFFSET_SIZE)?;
        Ok(Self { buf, examples })
    }

    pub fn num_examples(&self) -> usize {
        self.examples.len
    }

    /// # Errors
    ///
    /// Returns `CorruptShard` if `index` is not below
    /// [`num_examples`](Self::num_examples).
    pub fn example(&self, index: usize) -> Result<ExampleView<'a>> {
        let table = element_table(self.buf, self.examples, index)?;
        let attributes = vector_field(self.buf, table, UOFFSET_SIZE)?;
        Ok(ExampleView {
            buf: self.buf,
            attributes,
        })
    }
}

impl<'a> ExampleView<'a> {
    pub fn num_attributes(&self) -> usize {
        self.attributes.len
    }

    /// Raw little-endian bytes of the attribute at `index`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptShard` if `index` is not below
    /// [`num_attributes`](Self::num_attributes).
    pub fn attribute_bytes(&self, index: usize) -> Result<&'a [u8]> {
        let table = element_table(self.buf, self.attributes, index)?;
        let bytes = vector_field(self.buf, table, 1)?;
        Ok(&self.buf[bytes.start..bytes.start + bytes.len])
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    pos.checked_add(2)
        .and_then(|end| buf.get(pos..end))
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| ShardError::corrupt(format!("u16 at {pos} is out of bounds")))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    pos.checked_add(4)
        .and_then(|end| buf.get(pos..end))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ShardError::corrupt(format!("u32 at {pos} is out of bounds")))
}

/// Resolves the reference stored at `pos`.
fn follow(buf: &[u8], pos: usize) -> Result<usize> {
    let target = pos
        .checked_add(read_u32(buf, pos)? as usize)
        .filter(|&target| target < buf.len())
        .ok_or_else(|| ShardError::corrupt(format!("reference at {pos} points outside the buffer")))?;
    Ok(target)
}

/// Locates the vector referenced by the single field of the table at
/// `table`. An absent field reads as an empty vector.
fn vector_field(buf: &[u8], table: usize, elem_size: usize) -> Result<Vector> {
    let soffset = read_u32(buf, table)? as i32;
    let vtable = usize::try_from(table as i64 - i64::from(soffset))
        .map_err(|_| ShardError::corrupt(format!("vtable of table at {table} is out of bounds")))?;

    let vtable_size = read_u16(buf, vtable)? as usize;
    let entry = 4 + 2 * FIELD_SLOT;
    if entry + 2 > vtable_size {
        return Ok(Vector::EMPTY);
    }

    let field = read_u16(buf, vtable + entry)? as usize;
    if field == 0 {
        return Ok(Vector::EMPTY);
    }

    let vector = follow(buf, table + field)?;
    let len = read_u32(buf, vector)? as usize;
    let start = vector + UOFFSET_SIZE;

    let fits = len
        .checked_mul(elem_size)
        .and_then(|size| start.checked_add(size))
        .map_or(false, |end| end <= buf.len());
    if !fits {
        return Err(ShardError::corrupt(format!(
            "vector of {len} elements at {vector} overruns the buffer"
        )));
    }

    Ok(Vector { start, len })
}

fn element_table(buf: &[u8], vector: Vector, index: usize) -> Result<usize> {
    if index >= vector.len {
        return Err(ShardError::corrupt(format!(
            "index {index} out of range for vector of length {}",
            vector.len
        )));
    }
    follow(buf, vector.start + index * UOFFSET_SIZE)
}
