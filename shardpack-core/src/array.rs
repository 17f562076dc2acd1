// shardpack-core/src/array.rs

//! Typed n-dimensional values supplied by callers.
//!
//! An [`Array`] carries raw element bytes together with everything needed to
//! interpret them: element type, shape, byte order and memory order. The
//! transforms used by the shard encoder (`cast`, `to_row_major`,
//! `to_little_endian`) all borrow the array and return a new one, so a
//! caller's value is never modified.

use half::f16;

use crate::error::{Result, ShardError};
use crate::metadata::{checked_num_elements, DType};

/// Byte order of the elements of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Whatever the host uses.
    Native,
    Little,
    Big,
    /// Single-byte elements, where order does not matter.
    NotApplicable,
}

impl ByteOrder {
    /// Parses a NumPy byte-order character (`=`, `<`, `>`, `|`).
    pub fn from_tag(tag: char) -> Result<Self> {
        match tag {
            '=' => Ok(ByteOrder::Native),
            '<' => Ok(ByteOrder::Little),
            '>' => Ok(ByteOrder::Big),
            '|' => Ok(ByteOrder::NotApplicable),
            other => Err(ShardError::UnexpectedByteOrder { tag: other }),
        }
    }

    pub fn tag(self) -> char {
        match self {
            ByteOrder::Native => '=',
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }

    /// True if elements in this order have to be reversed to be read natively.
    fn differs_from_host(self) -> bool {
        match self {
            ByteOrder::Native | ByteOrder::NotApplicable => false,
            ByteOrder::Little => cfg!(target_endian = "big"),
            ByteOrder::Big => cfg!(target_endian = "little"),
        }
    }
}

/// Layout of a multi-dimensional array in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrder {
    /// C order, last index varies fastest.
    #[default]
    RowMajor,
    /// Fortran order, first index varies fastest.
    ColumnMajor,
}

/// A Rust type that can be stored as an array element.
pub trait Element: Copy + PartialEq + std::fmt::Debug + 'static {
    const DTYPE: DType;

    /// Appends the native-endian bytes of `self`.
    fn extend_ne_bytes(self, out: &mut Vec<u8>);

    /// Reads a value from exactly `DTYPE.item_size()` native-endian bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                fn extend_ne_bytes(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(buf)
                }
            }
        )*
    };
}

impl_element!(
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    u64 => UInt64,
    i64 => Int64,
    f16 => Float16,
    f32 => Float32,
    f64 => Float64,
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn extend_ne_bytes(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn from_ne_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Widest lossless representation of a single element, used for casting.
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl Scalar {
    /// Reads one element from native-endian bytes.
    fn read(dtype: DType, bytes: &[u8]) -> Self {
        match dtype {
            DType::Bool => Scalar::Bool(bool::from_ne_slice(bytes)),
            DType::UInt8 => Scalar::Int(u8::from_ne_slice(bytes).into()),
            DType::Int8 => Scalar::Int(i8::from_ne_slice(bytes).into()),
            DType::UInt16 => Scalar::Int(u16::from_ne_slice(bytes).into()),
            DType::Int16 => Scalar::Int(i16::from_ne_slice(bytes).into()),
            DType::UInt32 => Scalar::Int(u32::from_ne_slice(bytes).into()),
            DType::Int32 => Scalar::Int(i32::from_ne_slice(bytes).into()),
            DType::UInt64 => Scalar::Int(u64::from_ne_slice(bytes).into()),
            DType::Int64 => Scalar::Int(i64::from_ne_slice(bytes).into()),
            DType::Float16 => Scalar::Float(f16::from_ne_slice(bytes).to_f64()),
            DType::Float32 => Scalar::Float(f32::from_ne_slice(bytes).into()),
            DType::Float64 => Scalar::Float(f64::from_ne_slice(bytes)),
        }
    }

    /// Appends this value as a native-endian element of `dtype`.
    ///
    /// Only called for safe casts, so none of the conversions below lose
    /// information.
    fn write(self, dtype: DType, out: &mut Vec<u8>) {
        match dtype {
            DType::Bool => self.as_bool().extend_ne_bytes(out),
            DType::UInt8 => (self.as_int() as u8).extend_ne_bytes(out),
            DType::Int8 => (self.as_int() as i8).extend_ne_bytes(out),
            DType::UInt16 => (self.as_int() as u16).extend_ne_bytes(out),
            DType::Int16 => (self.as_int() as i16).extend_ne_bytes(out),
            DType::UInt32 => (self.as_int() as u32).extend_ne_bytes(out),
            DType::Int32 => (self.as_int() as i32).extend_ne_bytes(out),
            DType::UInt64 => (self.as_int() as u64).extend_ne_bytes(out),
            DType::Int64 => (self.as_int() as i64).extend_ne_bytes(out),
            DType::Float16 => f16::from_f64(self.as_float()).extend_ne_bytes(out),
            DType::Float32 => (self.as_float() as f32).extend_ne_bytes(out),
            DType::Float64 => self.as_float().extend_ne_bytes(out),
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(i) => i != 0,
            Scalar::Float(f) => f != 0.0,
        }
    }

    fn as_int(self) -> i128 {
        match self {
            Scalar::Bool(b) => b.into(),
            Scalar::Int(i) => i,
            Scalar::Float(f) => f as i128,
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Scalar::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }
}

/// Byte order tag of freshly produced native data.
fn native_order(dtype: DType) -> ByteOrder {
    if dtype.item_size() == 1 {
        ByteOrder::NotApplicable
    } else {
        ByteOrder::Native
    }
}

/// A typed n-dimensional array value.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    dtype: DType,
    shape: Vec<usize>,
    byte_order: ByteOrder,
    memory_order: MemoryOrder,
    data: Vec<u8>,
}

impl Array {
    /// Creates a row-major, native-endian array from typed values.
    ///
    /// # Errors
    ///
    /// Returns an error if `values.len()` does not match the shape.
    pub fn from_vec<T: Element>(shape: impl Into<Vec<usize>>, values: Vec<T>) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.item_size());
        for value in values {
            value.extend_ne_bytes(&mut data);
        }
        Self::from_bytes(T::DTYPE, shape, native_order(T::DTYPE), data)
    }

    /// Creates a zero-dimensional array holding one value.
    pub fn scalar<T: Element>(value: T) -> Self {
        let mut data = Vec::with_capacity(T::DTYPE.item_size());
        value.extend_ne_bytes(&mut data);
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            byte_order: native_order(T::DTYPE),
            memory_order: MemoryOrder::RowMajor,
            data,
        }
    }

    /// Creates a row-major array from raw element bytes in `byte_order`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not exactly `elements * item_size` bytes.
    pub fn from_bytes(
        dtype: DType,
        shape: impl Into<Vec<usize>>,
        byte_order: ByteOrder,
        data: Vec<u8>,
    ) -> Result<Self> {
        let shape = shape.into();
        let expected = checked_num_elements(&shape)
            .and_then(|n| n.checked_mul(dtype.item_size()))
            .ok_or_else(|| {
                ShardError::invalid_array(format!("shape {shape:?} of {dtype} is too large"))
            })?;
        if data.len() != expected {
            return Err(ShardError::invalid_array(format!(
                "shape {shape:?} of {dtype} needs {expected} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            dtype,
            shape,
            byte_order,
            memory_order: MemoryOrder::RowMajor,
            data,
        })
    }

    /// Creates an array from raw bytes described by a NumPy typestring
    /// such as `">f4"`.
    pub fn from_numpy_bytes(
        typestr: &str,
        shape: impl Into<Vec<usize>>,
        data: Vec<u8>,
    ) -> Result<Self> {
        let (byte_order, dtype) = DType::from_numpy_str(typestr)?;
        Self::from_bytes(dtype, shape, byte_order, data)
    }

    /// Reinterprets the data as laid out in `memory_order`.
    #[must_use]
    pub fn with_memory_order(mut self, memory_order: MemoryOrder) -> Self {
        self.memory_order = memory_order;
        self
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn memory_order(&self) -> MemoryOrder {
        self.memory_order
    }

    pub fn num_elements(&self) -> usize {
        self.data.len() / self.dtype.item_size()
    }

    /// Raw element bytes in the array's own byte and memory order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// A "not applicable" byte order only makes sense for one-byte elements.
    fn check_byte_order(&self) -> Result<()> {
        if self.byte_order == ByteOrder::NotApplicable && self.dtype.item_size() > 1 {
            return Err(ShardError::UnexpectedByteOrder {
                tag: self.byte_order.tag(),
            });
        }
        Ok(())
    }

    /// Converts to `to` if the cast is safe.
    ///
    /// Casting to the same dtype keeps the bytes and byte order as they are;
    /// any other cast produces native-endian data.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the cast could lose information.
    pub fn cast(&self, to: DType) -> Result<Array> {
        if !self.dtype.can_cast_safely(to) {
            return Err(ShardError::type_mismatch("<array>", self.dtype, to));
        }
        self.check_byte_order()?;

        if self.dtype == to {
            return Ok(self.clone());
        }

        let item_size = self.dtype.item_size();
        let swap = self.byte_order.differs_from_host();
        let mut scratch = [0u8; 8];
        let mut data = Vec::with_capacity(self.num_elements() * to.item_size());

        for chunk in self.data.chunks_exact(item_size) {
            let element = &mut scratch[..item_size];
            element.copy_from_slice(chunk);
            if swap {
                element.reverse();
            }
            Scalar::read(self.dtype, element).write(to, &mut data);
        }

        Ok(Array {
            dtype: to,
            shape: self.shape.clone(),
            byte_order: native_order(to),
            memory_order: self.memory_order,
            data,
        })
    }

    /// Returns a copy laid out in row-major order.
    pub fn to_row_major(&self) -> Array {
        if self.memory_order == MemoryOrder::RowMajor
            || self.shape.len() < 2
            || self.data.is_empty()
        {
            return Array {
                memory_order: MemoryOrder::RowMajor,
                ..self.clone()
            };
        }

        let item_size = self.dtype.item_size();

        // Column-major strides in elements.
        let mut strides = Vec::with_capacity(self.shape.len());
        let mut stride = 1;
        for &dim in &self.shape {
            strides.push(stride);
            stride *= dim;
        }

        let mut data = Vec::with_capacity(self.data.len());
        let mut index = vec![0usize; self.shape.len()];
        for _ in 0..self.num_elements() {
            let element: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            let start = element * item_size;
            data.extend_from_slice(&self.data[start..start + item_size]);

            // Advance the row-major index, last axis fastest.
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < self.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Array {
            dtype: self.dtype,
            shape: self.shape.clone(),
            byte_order: self.byte_order,
            memory_order: MemoryOrder::RowMajor,
            data,
        }
    }

    /// Returns a copy whose elements are little-endian on every host.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedByteOrder` if a multi-byte dtype claims its byte
    /// order does not apply.
    pub fn to_little_endian(&self) -> Result<Array> {
        self.check_byte_order()?;

        let item_size = self.dtype.item_size();
        let swap = match self.byte_order {
            ByteOrder::Native => cfg!(target_endian = "big"),
            ByteOrder::Big => true,
            ByteOrder::Little | ByteOrder::NotApplicable => false,
        };

        let mut data = self.data.clone();
        if swap && item_size > 1 {
            for element in data.chunks_exact_mut(item_size) {
                element.reverse();
            }
        }

        let byte_order = if item_size == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::Little
        };

        Ok(Array {
            dtype: self.dtype,
            shape: self.shape.clone(),
            byte_order,
            memory_order: self.memory_order,
            data,
        })
    }

    /// Reads the elements back in row-major order.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `T` is not exactly the array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(ShardError::type_mismatch("<array>", self.dtype, T::DTYPE));
        }

        let row_major = self.to_row_major();
        let item_size = self.dtype.item_size();
        let swap = row_major.byte_order.differs_from_host();
        let mut scratch = [0u8; 8];

        Ok(row_major
            .data
            .chunks_exact(item_size)
            .map(|chunk| {
                let element = &mut scratch[..item_size];
                element.copy_from_slice(chunk);
                if swap {
                    element.reverse();
                }
                T::from_ne_slice(element)
            })
            .collect())
    }
}
