// shardpack-core/src/metadata/dtype.rs

//! Fixed-width element types and the safe-cast lattice between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::array::ByteOrder;
use crate::error::{Result, ShardError};

/// Element type of an attribute.
///
/// Names serialize the way NumPy spells them (`"int32"`, `"float16"`, ...)
/// so dataset descriptions written by other tooling parse unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float16,
    Float32,
    Float64,
}

/// Coarse classification used by the cast rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DTypeKind {
    Bool,
    Unsigned,
    Signed,
    Float,
}

impl DType {
    /// Size of one element in bytes.
    pub fn item_size(self) -> usize {
        match self {
            DType::Bool | DType::UInt8 | DType::Int8 => 1,
            DType::UInt16 | DType::Int16 | DType::Float16 => 2,
            DType::UInt32 | DType::Int32 | DType::Float32 => 4,
            DType::UInt64 | DType::Int64 | DType::Float64 => 8,
        }
    }

    pub fn kind(self) -> DTypeKind {
        match self {
            DType::Bool => DTypeKind::Bool,
            DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64 => DTypeKind::Unsigned,
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => DTypeKind::Signed,
            DType::Float16 | DType::Float32 | DType::Float64 => DTypeKind::Float,
        }
    }

    /// Returns true if every value of `self` is exactly representable in `to`.
    ///
    /// Mirrors NumPy's `casting="safe"`: widening within a kind, unsigned to
    /// a strictly wider signed type, integers to a float whose mantissa holds
    /// all of their values, and bool to anything. Floats never go to
    /// integers and signed never goes to unsigned.
    pub fn can_cast_safely(self, to: DType) -> bool {
        use DTypeKind::*;

        if self == to {
            return true;
        }

        match (self.kind(), to.kind()) {
            (Bool, _) => true,
            (_, Bool) => false,
            (Unsigned, Unsigned) | (Signed, Signed) | (Float, Float) => {
                to.item_size() >= self.item_size()
            }
            (Unsigned, Signed) => to.item_size() > self.item_size(),
            (Signed, Unsigned) => false,
            (Unsigned, Float) | (Signed, Float) => to.item_size() > self.item_size(),
            (Float, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::UInt8 => "uint8",
            DType::Int8 => "int8",
            DType::UInt16 => "uint16",
            DType::Int16 => "int16",
            DType::UInt32 => "uint32",
            DType::Int32 => "int32",
            DType::UInt64 => "uint64",
            DType::Int64 => "int64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Parses a NumPy array-interface typestring such as `"<i4"` or `"|u1"`.
    ///
    /// A missing byte-order character means native order.
    pub fn from_numpy_str(typestr: &str) -> Result<(ByteOrder, DType)> {
        let mut chars = typestr.chars();
        let first = chars
            .next()
            .ok_or_else(|| ShardError::config("empty dtype string"))?;

        let (byte_order, rest) = if first.is_ascii_alphabetic() || first == '?' {
            (ByteOrder::Native, typestr)
        } else {
            (ByteOrder::from_tag(first)?, chars.as_str())
        };

        let dtype = match rest {
            "?" | "b1" => DType::Bool,
            "u1" => DType::UInt8,
            "i1" => DType::Int8,
            "u2" => DType::UInt16,
            "i2" => DType::Int16,
            "u4" => DType::UInt32,
            "i4" => DType::Int32,
            "u8" => DType::UInt64,
            "i8" => DType::Int64,
            "f2" => DType::Float16,
            "f4" => DType::Float32,
            "f8" => DType::Float64,
            _ => {
                return Err(ShardError::config(format!(
                    "unsupported dtype string: {typestr}"
                )))
            }
        };

        Ok((byte_order, dtype))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bool" => Ok(DType::Bool),
            "uint8" => Ok(DType::UInt8),
            "int8" => Ok(DType::Int8),
            "uint16" => Ok(DType::UInt16),
            "int16" => Ok(DType::Int16),
            "uint32" => Ok(DType::UInt32),
            "int32" => Ok(DType::Int32),
            "uint64" => Ok(DType::UInt64),
            "int64" => Ok(DType::Int64),
            "float16" => Ok(DType::Float16),
            "float32" => Ok(DType::Float32),
            "float64" => Ok(DType::Float64),
            other => Err(ShardError::config(format!("unknown dtype: {other}"))),
        }
    }
}
