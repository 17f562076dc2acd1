// shardpack-core/src/flatbuffer/builder.rs

//! Backward-growing FlatBuffers builder.
//!
//! Data is prepended: the buffer is filled from its end towards its start
//! and every offset handed out is measured from the end of the buffer, so
//! offsets stay valid when the buffer grows. Children of a vector therefore
//! have to be prepended in reverse logical order.

use crate::error::{Result, ShardError};

/// Largest buffer the builder will produce. FlatBuffers offsets are signed
/// 32-bit in places, so buffers must stay below 2 GiB.
pub const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

const UOFFSET_SIZE: usize = 4;
const SOFFSET_SIZE: usize = 4;
const VOFFSET_SIZE: usize = 2;

/// Reference to an object in the builder, measured from the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UOffset(u32);

impl UOffset {
    pub fn value(self) -> u32 {
        self.0
    }
}

pub struct FlatBufferBuilder {
    buf: Vec<u8>,
    /// Index of the first written byte; everything in `buf[head..]` is data.
    head: usize,
    max_size: usize,
    min_align: usize,
    /// Field offsets of the table being built, zero for absent fields.
    current_vtable: Vec<u32>,
    object_end: u32,
    written_vtables: Vec<u32>,
    nested: bool,
    vector_num_elems: u32,
    finished: bool,
}

impl FlatBufferBuilder {
    pub fn new(initial_capacity: usize) -> Self {
        Self::with_max_size(initial_capacity, MAX_BUFFER_SIZE)
    }

    /// Creates a builder that refuses to grow past `max_size` bytes.
    /// `max_size` is capped at [`MAX_BUFFER_SIZE`].
    pub fn with_max_size(initial_capacity: usize, max_size: usize) -> Self {
        let max_size = max_size.min(MAX_BUFFER_SIZE);
        let capacity = initial_capacity.min(max_size);
        Self {
            buf: vec![0; capacity],
            head: capacity,
            max_size,
            min_align: 1,
            current_vtable: Vec::new(),
            object_end: 0,
            written_vtables: Vec::new(),
            nested: false,
            vector_num_elems: 0,
            finished: false,
        }
    }

    /// Current write cursor: the number of bytes written so far.
    pub fn offset(&self) -> UOffset {
        UOffset((self.buf.len() - self.head) as u32)
    }

    /// Starts a vector of `num_elems` elements of `elem_size` bytes each,
    /// whose data is aligned to `alignment` bytes.
    ///
    /// Space for the elements is reserved up front; fill it with
    /// [`place_bytes`](Self::place_bytes) or
    /// [`prepend_uoffset_relative`](Self::prepend_uoffset_relative).
    pub fn start_vector(
        &mut self,
        elem_size: usize,
        num_elems: usize,
        alignment: usize,
    ) -> Result<UOffset> {
        self.assert_not_nested();
        assert!(
            alignment.is_power_of_two(),
            "vector alignment must be a power of two, got {alignment}"
        );

        let len = elem_size
            .checked_mul(num_elems)
            .ok_or_else(|| self.too_large(usize::MAX))?;
        let count = u32::try_from(num_elems).map_err(|_| self.too_large(len))?;

        self.prep(UOFFSET_SIZE, len)?;
        self.prep(alignment, len)?;

        self.nested = true;
        self.vector_num_elems = count;
        Ok(self.offset())
    }

    /// Copies raw bytes in front of the cursor, inside an open vector.
    pub fn place_bytes(&mut self, bytes: &[u8]) {
        assert!(self.nested, "place_bytes called outside of a vector");
        assert!(
            bytes.len() <= self.head,
            "place_bytes exceeds the space reserved by start_vector"
        );

        self.head -= bytes.len();
        self.buf[self.head..self.head + bytes.len()].copy_from_slice(bytes);
    }

    /// Closes the open vector by writing its element count.
    pub fn end_vector(&mut self) -> UOffset {
        assert!(self.nested, "end_vector called without start_vector");
        self.nested = false;

        let count = self.vector_num_elems;
        self.place_u32(count);
        self.offset()
    }

    /// Prepends a reference to `off`, relative to where it is written.
    pub fn prepend_uoffset_relative(&mut self, off: UOffset) -> Result<()> {
        self.prep(UOFFSET_SIZE, 0)?;
        let cursor = self.offset().0;
        assert!(off.0 <= cursor, "offset refers past the written data");

        self.place_u32(cursor - off.0 + UOFFSET_SIZE as u32);
        Ok(())
    }

    /// Builds a vector of references. Offsets are given in logical order.
    pub fn create_offset_vector(&mut self, offsets: &[UOffset]) -> Result<UOffset> {
        self.start_vector(UOFFSET_SIZE, offsets.len(), UOFFSET_SIZE)?;
        let placed = offsets
            .iter()
            .rev()
            .try_for_each(|&off| self.prepend_uoffset_relative(off));
        self.abandon_on_err(placed)?;
        Ok(self.end_vector())
    }

    pub fn start_table(&mut self, num_fields: usize) {
        self.assert_not_nested();
        self.current_vtable.clear();
        self.current_vtable.resize(num_fields, 0);
        self.object_end = self.offset().0;
        self.nested = true;
    }

    /// Adds a reference field to the open table.
    pub fn add_offset_slot(&mut self, slot: usize, off: UOffset) -> Result<()> {
        assert!(self.nested, "add_offset_slot called outside of a table");
        assert!(slot < self.current_vtable.len(), "slot {slot} out of range");

        let placed = self.prepend_uoffset_relative(off);
        self.abandon_on_err(placed)?;
        self.current_vtable[slot] = self.offset().0;
        Ok(())
    }

    /// Closes the open table, sharing an identical vtable if one was
    /// already written.
    ///
    /// On error the table is abandoned. Its bytes stay in the buffer until
    /// [`rollback`](Self::rollback).
    pub fn end_table(&mut self) -> Result<UOffset> {
        assert!(self.nested, "end_table called without start_table");
        let table = self.write_table();
        self.abandon_on_err(table)
    }

    fn write_table(&mut self) -> Result<UOffset> {
        // Placeholder for the vtable reference.
        self.prep(SOFFSET_SIZE, 0)?;
        self.place_u32(0);
        let object_offset = self.offset().0;

        while self.current_vtable.last() == Some(&0) {
            self.current_vtable.pop();
        }

        let existing = self
            .written_vtables
            .iter()
            .copied()
            .find(|&vt| self.vtable_matches(vt, object_offset));

        let vtable_offset = match existing {
            Some(vt) => vt,
            None => {
                for i in (0..self.current_vtable.len()).rev() {
                    let field = self.current_vtable[i];
                    let rel = if field == 0 { 0 } else { object_offset - field };
                    self.prepend_voffset(rel)?;
                }
                self.prepend_voffset(object_offset - self.object_end)?;
                let vtable_size = (self.current_vtable.len() + 2) * VOFFSET_SIZE;
                self.prepend_voffset(vtable_size as u32)?;

                let vt = self.offset().0;
                self.written_vtables.push(vt);
                vt
            }
        };

        let object_pos = self.buf.len() - object_offset as usize;
        let soffset = (i64::from(vtable_offset) - i64::from(object_offset)) as i32;
        self.buf[object_pos..object_pos + SOFFSET_SIZE].copy_from_slice(&soffset.to_le_bytes());

        self.current_vtable.clear();
        self.nested = false;
        Ok(UOffset(object_offset))
    }

    /// Discards everything written after `mark`, including an open vector
    /// or table. `mark` must come from [`offset`](Self::offset).
    pub fn rollback(&mut self, mark: UOffset) {
        assert!(!self.finished, "builder was already finished");
        let used = self.buf.len() - self.head;
        assert!(mark.0 as usize <= used, "rollback mark is ahead of the cursor");

        let new_head = self.buf.len() - mark.0 as usize;
        self.buf[self.head..new_head].fill(0);
        self.head = new_head;
        self.written_vtables.retain(|&vt| vt <= mark.0);
        self.current_vtable.clear();
        self.nested = false;
    }

    /// Writes the root reference. No further data can be added.
    pub fn finish(&mut self, root: UOffset) -> Result<()> {
        self.assert_not_nested();
        self.prep(self.min_align, UOFFSET_SIZE)?;
        self.prepend_uoffset_relative(root)?;
        self.finished = true;
        Ok(())
    }

    /// The serialized buffer. Only valid after [`finish`](Self::finish).
    pub fn finished_data(&self) -> &[u8] {
        assert!(self.finished, "finished_data called before finish");
        &self.buf[self.head..]
    }

    /// Leaves the open vector or table if `result` is an error, so the
    /// builder stays usable.
    fn abandon_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.current_vtable.clear();
            self.nested = false;
        }
        result
    }

    fn too_large(&self, size: usize) -> ShardError {
        ShardError::BufferTooLarge {
            size,
            limit: self.max_size,
        }
    }

    fn assert_not_nested(&self) {
        assert!(!self.nested, "vectors and tables cannot be nested while building");
        assert!(!self.finished, "builder was already finished");
    }

    /// Pads so that after writing `additional` bytes the cursor is aligned
    /// to `size`, growing the buffer as needed.
    fn prep(&mut self, size: usize, additional: usize) -> Result<()> {
        if size > self.min_align {
            self.min_align = size;
        }

        let used = self.buf.len() - self.head;
        let align_size = (!(used.wrapping_add(additional))).wrapping_add(1) & (size - 1);
        let needed = align_size + size + additional;

        let total = used.saturating_add(needed);
        if total > self.max_size {
            return Err(self.too_large(total));
        }

        while self.head < needed {
            self.grow();
        }

        self.head -= align_size;
        self.buf[self.head..self.head + align_size].fill(0);
        Ok(())
    }

    /// Doubles the buffer, keeping the written data at its end.
    fn grow(&mut self) {
        let old_len = self.buf.len();
        let new_len = old_len.saturating_mul(2).clamp(1, self.max_size);
        let added = new_len - old_len;

        self.buf.resize(new_len, 0);
        self.buf.copy_within(0..old_len, added);
        self.buf[..added].fill(0);
        self.head += added;
    }

    fn prepend_voffset(&mut self, value: u32) -> Result<()> {
        let value = u16::try_from(value).map_err(|_| self.too_large(value as usize))?;
        self.prep(VOFFSET_SIZE, 0)?;
        self.head -= VOFFSET_SIZE;
        self.buf[self.head..self.head + VOFFSET_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn place_u32(&mut self, value: u32) {
        self.head -= UOFFSET_SIZE;
        self.buf[self.head..self.head + UOFFSET_SIZE].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u16(&self, pos: usize) -> u16 {
        u16::from_le_bytes([self.buf[pos], self.buf[pos + 1]])
    }

    fn vtable_matches(&self, vtable_offset: u32, object_offset: u32) -> bool {
        let start = self.buf.len() - vtable_offset as usize;
        let vtable_size = self.read_u16(start) as usize;
        let fields = &self.buf[start + 2 * VOFFSET_SIZE..start + vtable_size];

        if fields.len() != self.current_vtable.len() * VOFFSET_SIZE {
            return false;
        }

        self.current_vtable
            .iter()
            .zip(fields.chunks_exact(VOFFSET_SIZE))
            .all(|(&field, stored)| {
                let stored = u32::from(u16::from_le_bytes([stored[0], stored[1]]));
                if field == 0 {
                    stored == 0
                } else {
                    stored == object_offset - field
                }
            })
    }
}

impl Default for FlatBufferBuilder {
    fn default() -> Self {
        Self::new(1024)
    }
}
