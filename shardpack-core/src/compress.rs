// shardpack-core/src/compress.rs

//! Whole-file compression for shard files.
//!
//! [`CompressedFile`] opens a storage object as a scoped, compressing sink.
//! The sink hashes the bytes that actually reach storage, and a sink that
//! is dropped before [`CompressedWriter::finish`] removes whatever it wrote,
//! so a failed write never leaves a partial shard behind.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::{Result, ShardError};
use crate::storage::{StorageBackend, StorageWriter};

/// Compression applied to a whole shard file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    #[serde(alias = "")]
    None,
    Gzip,
    Zlib,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Returns the string name of the compression type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Zlib => "zlib",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            "zlib" => Ok(CompressionType::Zlib),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(ShardError::config(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// Sizes and checksum of a file written through [`CompressedWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenFile {
    /// Bytes handed to the writer.
    pub uncompressed_size: u64,
    /// Bytes that reached storage.
    pub compressed_size: u64,
    /// XXHash64 of the bytes that reached storage.
    pub checksum: u64,
}

/// Opens storage objects with a given compression.
#[derive(Debug, Clone, Copy)]
pub struct CompressedFile {
    compression: CompressionType,
    level: i32,
}

impl CompressedFile {
    pub fn new(compression: CompressionType, level: i32) -> Self {
        Self { compression, level }
    }

    /// All compression types this build can read and write.
    pub fn supported_compressions() -> &'static [CompressionType] {
        &[
            CompressionType::None,
            CompressionType::Gzip,
            CompressionType::Zlib,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ]
    }

    /// Opens `path` for writing, truncating any existing object.
    ///
    /// With `atomic` set the data goes to a hidden `.<name>.tmp` sibling and
    /// is renamed over `path` by [`CompressedWriter::finish`].
    pub fn open_write(
        &self,
        storage: Arc<dyn StorageBackend>,
        path: &Path,
        atomic: bool,
    ) -> Result<CompressedWriter> {
        let write_path = if atomic {
            temp_path_for(path)?
        } else {
            path.to_path_buf()
        };

        let sink = HashingWriter {
            inner: storage.open_write(&write_path)?,
            hasher: XxHash64::with_seed(0),
            bytes_written: 0,
        };

        let encoder = match Encoder::new(self.compression, self.level, sink) {
            Ok(encoder) => encoder,
            Err(e) => {
                remove_quietly(storage.as_ref(), &write_path);
                return Err(e);
            }
        };

        Ok(CompressedWriter {
            storage,
            encoder: Some(encoder),
            write_path,
            final_path: path.to_path_buf(),
            uncompressed_size: 0,
            committed: false,
        })
    }

    /// Reads and decompresses a whole object.
    pub fn read_all(&self, storage: &dyn StorageBackend, path: &Path) -> Result<Vec<u8>> {
        let mut reader = storage.open_read(path)?;
        let mut data = Vec::with_capacity(reader.size() as usize);

        let read = match self.compression {
            CompressionType::None => reader.read_to_end(&mut data),
            CompressionType::Gzip => GzDecoder::new(reader).read_to_end(&mut data),
            CompressionType::Zlib => ZlibDecoder::new(reader).read_to_end(&mut data),
            CompressionType::Lz4 => FrameDecoder::new(reader).read_to_end(&mut data),
            CompressionType::Zstd => zstd::stream::read::Decoder::new(reader)
                .and_then(|mut decoder| decoder.read_to_end(&mut data)),
        };

        read.map_err(|e| {
            ShardError::compression_with_source(
                format!("failed to read {} data from {}", self.compression, path.display()),
                e,
            )
        })?;

        Ok(data)
    }
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| ShardError::storage(path, "path has no file name"))?;
    Ok(path.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}

fn remove_quietly(storage: &dyn StorageBackend, path: &Path) {
    if let Err(e) = storage.delete(path) {
        tracing::warn!("Failed to remove unfinished file {}: {}", path.display(), e);
    }
}

/// Counts and hashes everything written to storage.
struct HashingWriter {
    inner: Box<dyn StorageWriter>,
    hasher: XxHash64,
    bytes_written: u64,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        std::hash::Hasher::write(&mut self.hasher, &buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Encoder {
    None(HashingWriter),
    Gzip(GzEncoder<HashingWriter>),
    Zlib(ZlibEncoder<HashingWriter>),
    Lz4(FrameEncoder<HashingWriter>),
    Zstd(zstd::stream::write::Encoder<'static, HashingWriter>),
}

impl Encoder {
    fn new(compression: CompressionType, level: i32, sink: HashingWriter) -> Result<Self> {
        let flate_level = flate2::Compression::new(level.clamp(0, 9) as u32);

        Ok(match compression {
            CompressionType::None => Encoder::None(sink),
            CompressionType::Gzip => Encoder::Gzip(GzEncoder::new(sink, flate_level)),
            CompressionType::Zlib => Encoder::Zlib(ZlibEncoder::new(sink, flate_level)),
            CompressionType::Lz4 => Encoder::Lz4(FrameEncoder::new(sink)),
            CompressionType::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(sink, level).map_err(|e| {
                    ShardError::compression_with_source("failed to create zstd encoder", e)
                })?,
            ),
        })
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Encoder::None(w) => w,
            Encoder::Gzip(w) => w,
            Encoder::Zlib(w) => w,
            Encoder::Lz4(w) => w,
            Encoder::Zstd(w) => w,
        }
    }

    /// Flushes the codec trailer and hands back the storage sink.
    fn finish(self) -> Result<HashingWriter> {
        match self {
            Encoder::None(w) => Ok(w),
            Encoder::Gzip(w) => w.finish().map_err(|e| {
                ShardError::compression_with_source("failed to finish gzip stream", e)
            }),
            Encoder::Zlib(w) => w.finish().map_err(|e| {
                ShardError::compression_with_source("failed to finish zlib stream", e)
            }),
            Encoder::Lz4(w) => w.finish().map_err(|e| {
                ShardError::compression_with_source("failed to finish lz4 frame", e)
            }),
            Encoder::Zstd(w) => w.finish().map_err(|e| {
                ShardError::compression_with_source("failed to finish zstd stream", e)
            }),
        }
    }
}

/// A scoped, compressing writer for one storage object.
///
/// Dropping the writer without calling [`finish`](Self::finish), or a
/// failing `finish`, deletes the object it was writing.
pub struct CompressedWriter {
    storage: Arc<dyn StorageBackend>,
    encoder: Option<Encoder>,
    write_path: PathBuf,
    final_path: PathBuf,
    uncompressed_size: u64,
    committed: bool,
}

impl CompressedWriter {
    /// Finalizes compression, persists the data and moves it into place.
    pub fn finish(mut self) -> Result<WrittenFile> {
        let Some(encoder) = self.encoder.take() else {
            return Err(ShardError::storage(&self.final_path, "writer already finished"));
        };

        let HashingWriter {
            inner,
            hasher,
            bytes_written,
        } = encoder.finish()?;
        inner.finish()?;

        if self.write_path != self.final_path {
            self.storage.rename(&self.write_path, &self.final_path)?;
        }
        self.committed = true;

        Ok(WrittenFile {
            uncompressed_size: self.uncompressed_size,
            compressed_size: bytes_written,
            checksum: std::hash::Hasher::finish(&hasher),
        })
    }
}

impl Write for CompressedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already finished"))?;
        let n = encoder.writer().write(buf)?;
        self.uncompressed_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.writer().flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CompressedWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close the handle before removing the file.
        drop(self.encoder.take());
        remove_quietly(self.storage.as_ref(), &self.write_path);
    }
}
