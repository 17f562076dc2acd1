// shardpack-core/src/shard/flatbuffer_writer.rs

//! Shard writer producing FlatBuffers shard files.
//!
//! Attribute values are stored as raw byte vectors instead of typed
//! FlatBuffers vectors: a typed vector records only its element count, so a
//! reader that does not know the element type could not tell how many bytes
//! it spans, and dtypes such as float16 have no FlatBuffers equivalent.
//! The bytes are little-endian, row-major, and aligned to the dtype's item
//! size so they can be reinterpreted in place.

use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::array::Array;
use crate::compress::{CompressedFile, CompressionType};
use crate::config::WriterConfig;
use crate::error::{Result, ShardError};
use crate::flatbuffer::{FlatBufferBuilder, UOffset, FIELD_SLOT};
use crate::metadata::{Attribute, DatasetStructure};
use crate::storage::StorageBackend;

use super::{Example, ShardInfo, ShardWriter};

enum State {
    /// Nothing written yet, no builder allocated.
    Empty,
    Open(OpenShard),
    Closed,
}

struct OpenShard {
    builder: FlatBufferBuilder,
    /// Written examples in call order.
    examples: Vec<UOffset>,
}

pub struct FlatBufferShardWriter {
    structure: DatasetStructure,
    shard_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
    config: WriterConfig,
    state: State,
}

impl FlatBufferShardWriter {
    /// Creates a writer for `shard_file`, resolved against the storage base
    /// path. Nothing touches storage until `close`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset structure is invalid.
    pub fn new(
        structure: DatasetStructure,
        shard_file: impl Into<PathBuf>,
        storage: Arc<dyn StorageBackend>,
        config: WriterConfig,
    ) -> Result<Self> {
        structure.validate()?;

        Ok(Self {
            structure,
            shard_file: shard_file.into(),
            storage,
            config,
            state: State::Empty,
        })
    }

    /// Number of examples buffered so far.
    pub fn num_examples(&self) -> usize {
        match &self.state {
            State::Open(shard) => shard.examples.len(),
            State::Empty | State::Closed => 0,
        }
    }

    fn open_shard(&mut self) -> &mut OpenShard {
        if matches!(self.state, State::Empty) {
            self.state = State::Open(OpenShard {
                builder: FlatBufferBuilder::with_max_size(
                    self.config.initial_buffer_size,
                    self.config.max_buffer_size,
                ),
                examples: Vec::new(),
            });
        }

        match &mut self.state {
            State::Open(shard) => shard,
            State::Empty | State::Closed => panic!("write called on a closed shard writer"),
        }
    }

    fn close_empty(&self) -> Result<Option<ShardInfo>> {
        // Never delete: whatever sits at the path was not written by us.
        if self.storage.exists(&self.shard_file)? {
            return Err(ShardError::StaleShardFile {
                path: self.shard_file.clone(),
            });
        }

        tracing::debug!("No examples for shard {}, no file written", self.shard_file.display());
        Ok(None)
    }
}

impl ShardWriter for FlatBufferShardWriter {
    fn write(&mut self, example: &Example) -> Result<()> {
        assert!(
            !matches!(self.state, State::Closed),
            "write called on a closed shard writer"
        );

        // Attribute names are not stored, so the schema order is the only
        // thing that identifies a value on disk.
        let encoded = self
            .structure
            .saved_data_description
            .iter()
            .map(|attribute| -> Result<(usize, Vec<u8>)> {
                let value = example
                    .get(&attribute.name)
                    .ok_or_else(|| ShardError::missing_attribute(&attribute.name))?;
                Ok((attribute.dtype.item_size(), attribute_bytes(attribute, value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let shard = self.open_shard();
        let mark = shard.builder.offset();
        match append_example(&mut shard.builder, &encoded) {
            Ok(example) => {
                shard.examples.push(example);
                Ok(())
            }
            Err(e) => {
                shard.builder.rollback(mark);
                Err(e)
            }
        }
    }

    fn close(&mut self) -> Result<Option<ShardInfo>> {
        let shard = match mem::replace(&mut self.state, State::Closed) {
            State::Closed => panic!("close called on a closed shard writer"),
            State::Empty => return self.close_empty(),
            State::Open(shard) if shard.examples.is_empty() => return self.close_empty(),
            State::Open(shard) => shard,
        };

        let OpenShard {
            mut builder,
            examples,
        } = shard;

        let vector = builder.create_offset_vector(&examples)?;
        let root = single_field_table(&mut builder, vector)?;
        builder.finish(root)?;

        let file = CompressedFile::new(self.structure.compression, self.config.compression_level);
        let mut writer =
            file.open_write(self.storage.clone(), &self.shard_file, self.config.atomic_writes)?;
        writer.write_all(builder.finished_data()).map_err(|e| {
            ShardError::storage_with_source(&self.shard_file, "failed to write shard", e)
        })?;
        let written = writer.finish()?;

        tracing::debug!(
            "Wrote shard {} ({} examples, {} bytes, {} bytes stored with {})",
            self.shard_file.display(),
            examples.len(),
            written.uncompressed_size,
            written.compressed_size,
            self.structure.compression
        );

        Ok(Some(ShardInfo {
            path: self.shard_file.clone(),
            num_examples: examples.len(),
            uncompressed_size: written.uncompressed_size,
            compressed_size: written.compressed_size,
            checksum: written.checksum,
        }))
    }

    fn shard_file(&self) -> &Path {
        &self.shard_file
    }

    fn supported_compressions() -> &'static [CompressionType] {
        CompressedFile::supported_compressions()
    }
}

impl Drop for FlatBufferShardWriter {
    fn drop(&mut self) {
        if let State::Open(shard) = &self.state {
            if !shard.examples.is_empty() {
                tracing::warn!(
                    "Shard writer for {} dropped without close, {} examples lost",
                    self.shard_file.display(),
                    shard.examples.len()
                );
            }
        }
    }
}

/// Embeds `value` into `builder` as the raw bytes of `attribute`.
///
/// Returns the byte vector. On error the builder is left untouched.
pub fn encode_attribute(
    builder: &mut FlatBufferBuilder,
    attribute: &Attribute,
    value: &Array,
) -> Result<UOffset> {
    let bytes = attribute_bytes(attribute, value)?;
    embed_bytes(builder, &bytes, attribute.dtype.item_size())
}

/// Little-endian, row-major bytes of `value` cast to the attribute's dtype.
fn attribute_bytes(attribute: &Attribute, value: &Array) -> Result<Vec<u8>> {
    if !value.dtype().can_cast_safely(attribute.dtype) {
        return Err(ShardError::type_mismatch(
            &attribute.name,
            value.dtype(),
            attribute.dtype,
        ));
    }

    let expected = attribute.num_elements();
    if value.num_elements() != expected {
        return Err(ShardError::shape_mismatch(
            &attribute.name,
            expected,
            value.num_elements(),
        ));
    }

    let bytes = value
        .cast(attribute.dtype)?
        .to_row_major()
        .to_little_endian()?
        .into_bytes();
    debug_assert_eq!(bytes.len(), attribute.byte_size());
    Ok(bytes)
}

/// Embeds one example's encoded attributes and wraps them in an Example
/// table.
fn append_example(builder: &mut FlatBufferBuilder, encoded: &[(usize, Vec<u8>)]) -> Result<UOffset> {
    let mut attributes = Vec::with_capacity(encoded.len());
    for (alignment, bytes) in encoded {
        let vector = embed_bytes(builder, bytes, *alignment)?;
        attributes.push(single_field_table(builder, vector)?);
    }

    let vector = builder.create_offset_vector(&attributes)?;
    single_field_table(builder, vector)
}

/// Stores `bytes` as a `[ubyte]` vector whose length is the byte count and
/// whose data is aligned to `alignment`.
fn embed_bytes(builder: &mut FlatBufferBuilder, bytes: &[u8], alignment: usize) -> Result<UOffset> {
    builder.start_vector(1, bytes.len(), alignment)?;
    builder.place_bytes(bytes);
    Ok(builder.end_vector())
}

fn single_field_table(builder: &mut FlatBufferBuilder, field: UOffset) -> Result<UOffset> {
    builder.start_table(1);
    builder.add_offset_slot(FIELD_SLOT, field)?;
    builder.end_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ByteOrder, MemoryOrder};
    use crate::config::StorageConfig;
    use crate::flatbuffer::ShardView;
    use crate::metadata::DType;
    use crate::shard::ShardReader;
    use crate::storage::{LocalStorage, StorageReader, StorageWriter};
    use half::f16;
    use tempfile::TempDir;

    #[derive(Clone, Copy, Debug)]
    enum FailAt {
        Finish,
        Rename,
    }

    /// Local storage whose writes never become durable.
    struct FailingStorage {
        inner: LocalStorage,
        fail_at: FailAt,
    }

    struct UnfinishableWriter(Box<dyn StorageWriter>);

    impl Write for UnfinishableWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.0.flush()
        }
    }

    impl StorageWriter for UnfinishableWriter {
        fn finish(self: Box<Self>) -> Result<()> {
            Err(ShardError::storage("shard_0.fb", "no space left on device"))
        }
    }

    impl StorageBackend for FailingStorage {
        fn exists(&self, path: &Path) -> Result<bool> {
            self.inner.exists(path)
        }

        fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
            self.inner.open_read(path)
        }

        fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
            let writer = self.inner.open_write(path)?;
            match self.fail_at {
                FailAt::Finish => Ok(Box::new(UnfinishableWriter(writer))),
                FailAt::Rename => Ok(writer),
            }
        }

        fn delete(&self, path: &Path) -> Result<()> {
            self.inner.delete(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            match self.fail_at {
                FailAt::Rename => Err(ShardError::storage(to, "rename refused")),
                FailAt::Finish => self.inner.rename(from, to),
            }
        }

        fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.create_dir_all(path)
        }
    }

    fn create_test_storage() -> (Arc<dyn StorageBackend>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config).unwrap());
        (storage, temp_dir)
    }

    fn int32_structure(compression: CompressionType) -> DatasetStructure {
        DatasetStructure::new(vec![Attribute::new("x", DType::Int32, vec![2])], compression)
    }

    fn writer(
        structure: &DatasetStructure,
        storage: &Arc<dyn StorageBackend>,
    ) -> FlatBufferShardWriter {
        FlatBufferShardWriter::new(
            structure.clone(),
            "shard_0.fb",
            storage.clone(),
            WriterConfig::default(),
        )
        .unwrap()
    }

    fn example(values: Vec<(&str, Array)>) -> Example {
        values
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    fn stored_bytes(storage: &Arc<dyn StorageBackend>, compression: CompressionType) -> Vec<u8> {
        CompressedFile::new(compression, 0)
            .read_all(storage.as_ref(), Path::new("shard_0.fb"))
            .unwrap()
    }

    #[test]
    fn test_single_int32_example() {
        let (storage, _temp) = create_test_storage();
        let structure = int32_structure(CompressionType::None);
        let mut writer = writer(&structure, &storage);

        let x = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
        writer.write(&example(vec![("x", x)])).unwrap();
        let info = writer.close().unwrap().unwrap();

        assert_eq!(info.num_examples, 1);
        assert_eq!(info.path, PathBuf::from("shard_0.fb"));

        let data = stored_bytes(&storage, CompressionType::None);
        assert_eq!(info.compressed_size, data.len() as u64);
        assert_eq!(info.uncompressed_size, data.len() as u64);

        let view = ShardView::new(&data).unwrap();
        assert_eq!(view.num_examples(), 1);
        let stored = view.example(0).unwrap();
        assert_eq!(stored.num_attributes(), 1);
        assert_eq!(stored.attribute_bytes(0).unwrap(), &[1, 0, 0, 0, 2, 0, 0, 0]);

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0][0].to_vec::<i32>().unwrap(), vec![1, 2]);
        assert_eq!(decoded[0][0].shape(), &[2]);
    }

    #[test]
    fn test_float_into_int_is_rejected() {
        let (storage, _temp) = create_test_storage();
        let mut writer = writer(&int32_structure(CompressionType::None), &storage);

        let x = Array::from_vec(vec![2], vec![1.5f64, 2.5]).unwrap();
        let err = writer.write(&example(vec![("x", x)])).unwrap_err();
        assert!(matches!(err, ShardError::TypeMismatch { ref attribute, .. } if attribute == "x"));
        assert!(matches!(writer.state, State::Empty));

        assert!(writer.close().unwrap().is_none());
        assert!(!storage.exists(Path::new("shard_0.fb")).unwrap());
    }

    #[test]
    fn test_cast_rejection_leaves_cursor() {
        let mut builder = FlatBufferBuilder::new(64);
        let attribute = Attribute::new("x", DType::UInt16, vec![3]);

        let ok = Array::from_vec(vec![3], vec![1u8, 2, 3]).unwrap();
        encode_attribute(&mut builder, &attribute, &ok).unwrap();
        let before = builder.offset();

        for bad in [
            Array::from_vec(vec![3], vec![1i8, 2, 3]).unwrap(),
            Array::from_vec(vec![3], vec![1.0f32, 2.0, 3.0]).unwrap(),
            Array::from_vec(vec![3], vec![1u32, 2, 3]).unwrap(),
        ] {
            let err = encode_attribute(&mut builder, &attribute, &bad).unwrap_err();
            assert!(matches!(err, ShardError::TypeMismatch { .. }));
            assert_eq!(builder.offset(), before);
        }
    }

    #[test]
    fn test_encode_attribute_byte_length_and_order() {
        let attribute = Attribute::new("v", DType::Int64, vec![2]);
        let widened = Array::from_vec(vec![2], vec![-1i16, 258]).unwrap();

        let mut builder = FlatBufferBuilder::new(8);
        let vector = encode_attribute(&mut builder, &attribute, &widened).unwrap();
        builder.finish(vector).unwrap();

        let data = builder.finished_data();
        let pos = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        assert_eq!(u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()), 16);
        assert_eq!((pos + 4) % 8, 0);

        let mut expected = (-1i64).to_le_bytes().to_vec();
        expected.extend_from_slice(&258i64.to_le_bytes());
        assert_eq!(&data[pos + 4..pos + 20], expected.as_slice());
    }

    #[test]
    fn test_roundtrip_every_byte_order() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![
                Attribute::new("native", DType::Int32, vec![3]),
                Attribute::new("little", DType::Int32, vec![3]),
                Attribute::new("big", DType::Int32, vec![3]),
                Attribute::new("half", DType::Float16, vec![2]),
                Attribute::new("bytes", DType::UInt8, vec![2]),
            ],
            CompressionType::None,
        );
        let values = [7i32, -2, 300_000];

        let le: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let be: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let halves = [f16::from_f32(1.5), f16::from_f32(-0.25)];
        let half_be: Vec<u8> = halves.iter().flat_map(|v| v.to_be_bytes()).collect();

        let input = example(vec![
            ("native", Array::from_vec(vec![3], values.to_vec()).unwrap()),
            ("little", Array::from_bytes(DType::Int32, vec![3], ByteOrder::Little, le.clone()).unwrap()),
            ("big", Array::from_bytes(DType::Int32, vec![3], ByteOrder::Big, be).unwrap()),
            ("half", Array::from_numpy_bytes(">f2", vec![2], half_be).unwrap()),
            ("bytes", Array::from_numpy_bytes("|u1", vec![2], vec![9, 250]).unwrap()),
        ]);

        let mut writer = writer(&structure, &storage);
        writer.write(&input).unwrap();
        writer.close().unwrap();

        let data = stored_bytes(&storage, CompressionType::None);
        let stored = ShardView::new(&data).unwrap().example(0).unwrap();
        for index in 0..3 {
            assert_eq!(stored.attribute_bytes(index).unwrap(), le.as_slice());
        }

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        for array in &decoded[0][..3] {
            assert_eq!(array.to_vec::<i32>().unwrap(), values);
        }
        assert_eq!(decoded[0][3].to_vec::<f16>().unwrap(), halves);
        assert_eq!(decoded[0][4].to_vec::<u8>().unwrap(), vec![9, 250]);
    }

    #[test]
    fn test_widening_casts_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![
                Attribute::new("wide", DType::Int64, vec![2]),
                Attribute::new("float", DType::Float32, vec![2]),
                Attribute::new("flag", DType::UInt8, vec![]),
                Attribute::new("double", DType::Float64, vec![1]),
            ],
            CompressionType::Zstd,
        );

        let input = example(vec![
            ("wide", Array::from_vec(vec![2], vec![-5i16, 1000]).unwrap()),
            ("float", Array::from_vec(vec![2], vec![3u8, 255]).unwrap()),
            ("flag", Array::scalar(true)),
            ("double", Array::from_vec(vec![1], vec![f16::from_f32(0.5)]).unwrap()),
        ]);

        let mut writer = writer(&structure, &storage);
        writer.write(&input).unwrap();
        writer.close().unwrap();

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        let example = &decoded[0];
        assert_eq!(example[0].to_vec::<i64>().unwrap(), vec![-5, 1000]);
        assert_eq!(example[1].to_vec::<f32>().unwrap(), vec![3.0, 255.0]);
        assert_eq!(example[2].to_vec::<u8>().unwrap(), vec![1]);
        assert_eq!(example[2].shape(), &[] as &[usize]);
        assert_eq!(example[3].to_vec::<f64>().unwrap(), vec![0.5]);
    }

    #[test]
    fn test_column_major_input_is_stored_row_major() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![Attribute::new("m", DType::Int32, vec![2, 3])],
            CompressionType::None,
        );

        // [[1, 2, 3], [4, 5, 6]] in Fortran order.
        let m = Array::from_vec(vec![2, 3], vec![1i32, 4, 2, 5, 3, 6])
            .unwrap()
            .with_memory_order(MemoryOrder::ColumnMajor);

        let mut writer = writer(&structure, &storage);
        writer.write(&example(vec![("m", m)])).unwrap();
        writer.close().unwrap();

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        assert_eq!(decoded[0][0].to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(decoded[0][0].shape(), &[2, 3]);
    }

    #[test]
    fn test_example_and_attribute_order() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![
                Attribute::new("c", DType::Int32, vec![]),
                Attribute::new("a", DType::Int32, vec![]),
                Attribute::new("b", DType::Int32, vec![]),
            ],
            CompressionType::Lz4,
        );

        let mut writer = writer(&structure, &storage);
        for i in 0..20i32 {
            writer
                .write(&example(vec![
                    ("a", Array::scalar(i * 10 + 1)),
                    ("b", Array::scalar(i * 10 + 2)),
                    ("c", Array::scalar(i * 10)),
                ]))
                .unwrap();
        }
        assert_eq!(writer.num_examples(), 20);
        writer.close().unwrap();

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        assert_eq!(decoded.len(), 20);
        for (i, example) in decoded.iter().enumerate() {
            let values: Vec<i32> = example
                .iter()
                .map(|a| a.to_vec::<i32>().unwrap()[0])
                .collect();
            let i = i as i32;
            assert_eq!(values, vec![i * 10, i * 10 + 1, i * 10 + 2]);
        }
    }

    #[test]
    fn test_write_does_not_mutate_input() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![Attribute::new("x", DType::Float64, vec![2, 2])],
            CompressionType::None,
        );

        let be: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let x = Array::from_bytes(DType::Float32, vec![2, 2], ByteOrder::Big, be)
            .unwrap()
            .with_memory_order(MemoryOrder::ColumnMajor);
        let input = example(vec![("x", x)]);
        let snapshot = input.clone();

        let mut writer = writer(&structure, &storage);
        writer.write(&input).unwrap();
        writer.close().unwrap();

        assert_eq!(input, snapshot);
        assert_eq!(input["x"].byte_order(), ByteOrder::Big);
        assert_eq!(input["x"].memory_order(), MemoryOrder::ColumnMajor);
    }

    #[test]
    fn test_missing_attribute() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![
                Attribute::new("x", DType::Int32, vec![2]),
                Attribute::new("y", DType::Int32, vec![]),
            ],
            CompressionType::None,
        );
        let mut writer = writer(&structure, &storage);

        let x = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
        let err = writer.write(&example(vec![("x", x)])).unwrap_err();
        assert!(matches!(err, ShardError::MissingAttribute { ref attribute } if attribute == "y"));
        assert_eq!(writer.num_examples(), 0);
        assert!(writer.close().unwrap().is_none());
    }

    #[test]
    fn test_shape_mismatch() {
        let (storage, _temp) = create_test_storage();
        let mut writer = writer(&int32_structure(CompressionType::None), &storage);

        let x = Array::from_vec(vec![3], vec![1i32, 2, 3]).unwrap();
        let err = writer.write(&example(vec![("x", x)])).unwrap_err();
        assert!(matches!(
            err,
            ShardError::ShapeMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_write_keeps_earlier_examples() {
        let (storage, _temp) = create_test_storage();
        let structure = int32_structure(CompressionType::Gzip);
        let mut writer = writer(&structure, &storage);

        let good = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
        writer.write(&example(vec![("x", good)])).unwrap();

        let bad = Array::from_vec(vec![2], vec![1u64, 2]).unwrap();
        assert!(writer.write(&example(vec![("x", bad)])).is_err());
        assert_eq!(writer.num_examples(), 1);

        let info = writer.close().unwrap().unwrap();
        assert_eq!(info.num_examples, 1);

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("shard_0.fb"))
            .unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0][0].to_vec::<i32>().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_close_io_failure_leaves_no_file() {
        let cases = [
            (FailAt::Rename, true),
            (FailAt::Finish, true),
            (FailAt::Finish, false),
        ];

        for (fail_at, atomic_writes) in cases {
            let temp_dir = TempDir::new().unwrap();
            let config = StorageConfig {
                base_path: temp_dir.path().to_path_buf(),
                ..Default::default()
            };
            let storage: Arc<dyn StorageBackend> = Arc::new(FailingStorage {
                inner: LocalStorage::new(&config).unwrap(),
                fail_at,
            });
            let mut writer = FlatBufferShardWriter::new(
                int32_structure(CompressionType::Zstd),
                "shard_0.fb",
                storage,
                WriterConfig {
                    atomic_writes,
                    ..Default::default()
                },
            )
            .unwrap();

            let x = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
            writer.write(&example(vec![("x", x)])).unwrap();

            let err = writer.close().unwrap_err();
            assert!(
                matches!(err, ShardError::Storage { .. }),
                "{fail_at:?}, atomic {atomic_writes}: {err}"
            );
            assert!(!temp_dir.path().join("shard_0.fb").exists());
            assert!(!temp_dir.path().join(".shard_0.fb.tmp").exists());
        }
    }

    #[test]
    fn test_buffer_limit_rolls_back_failed_example() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(
            vec![
                Attribute::new("a", DType::Int32, vec![1]),
                Attribute::new("b", DType::Int32, vec![64]),
            ],
            CompressionType::None,
        );
        let input = example(vec![
            ("a", Array::from_vec(vec![1], vec![7i32]).unwrap()),
            ("b", Array::from_vec(vec![64], (0..64).collect::<Vec<i32>>()).unwrap()),
        ]);

        // Room for one example and the shard root, but not for a second
        // example's large attribute.
        let config = WriterConfig {
            max_buffer_size: 400,
            ..Default::default()
        };
        let mut limited = FlatBufferShardWriter::new(
            structure.clone(),
            "limited.fb",
            storage.clone(),
            config,
        )
        .unwrap();
        limited.write(&input).unwrap();
        for _ in 0..2 {
            let err = limited.write(&input).unwrap_err();
            assert!(matches!(err, ShardError::BufferTooLarge { limit: 400, .. }));
            assert_eq!(limited.num_examples(), 1);
        }
        let limited_info = limited.close().unwrap().unwrap();
        assert_eq!(limited_info.num_examples, 1);

        let mut reference = FlatBufferShardWriter::new(
            structure.clone(),
            "reference.fb",
            storage.clone(),
            WriterConfig::default(),
        )
        .unwrap();
        reference.write(&input).unwrap();
        let reference_info = reference.close().unwrap().unwrap();

        // The rejected example left no bytes behind.
        assert_eq!(limited_info.uncompressed_size, reference_info.uncompressed_size);
        assert_eq!(limited_info.checksum, reference_info.checksum);

        let decoded = ShardReader::new(structure, storage)
            .unwrap()
            .read(Path::new("limited.fb"))
            .unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0][1].to_vec::<i32>().unwrap(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_close_writes_nothing() {
        let (storage, temp) = create_test_storage();
        let mut writer = writer(&int32_structure(CompressionType::Zstd), &storage);

        assert!(writer.close().unwrap().is_none());
        assert!(!storage.exists(Path::new("shard_0.fb")).unwrap());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_close_with_stale_file() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("shard_0.fb"), b"old").unwrap();

        let mut writer = writer(&int32_structure(CompressionType::None), &storage);
        let err = writer.close().unwrap_err();
        assert!(matches!(err, ShardError::StaleShardFile { .. }));
        assert_eq!(std::fs::read(temp.path().join("shard_0.fb")).unwrap(), b"old");
    }

    #[test]
    fn test_every_compression_roundtrip() {
        for &compression in FlatBufferShardWriter::supported_compressions() {
            let (storage, temp) = create_test_storage();
            let structure = int32_structure(compression);
            let mut writer = writer(&structure, &storage);

            for i in 0..50i32 {
                let x = Array::from_vec(vec![2], vec![i, -i]).unwrap();
                writer.write(&example(vec![("x", x)])).unwrap();
            }
            let info = writer.close().unwrap().unwrap();

            let on_disk = std::fs::read(temp.path().join("shard_0.fb")).unwrap();
            assert_eq!(info.compressed_size, on_disk.len() as u64, "{compression}");
            assert!(!temp.path().join(".shard_0.fb.tmp").exists());

            let decoded = ShardReader::new(structure, storage)
                .unwrap()
                .read(Path::new("shard_0.fb"))
                .unwrap();
            assert_eq!(decoded.len(), 50, "{compression}");
            assert_eq!(decoded[49][0].to_vec::<i32>().unwrap(), vec![49, -49]);
        }
    }

    #[test]
    fn test_non_atomic_write() {
        let (storage, temp) = create_test_storage();
        let config = WriterConfig {
            atomic_writes: false,
            ..Default::default()
        };
        let mut writer = FlatBufferShardWriter::new(
            int32_structure(CompressionType::None),
            "nested/shard.fb",
            storage,
            config,
        )
        .unwrap();

        let x = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
        writer.write(&example(vec![("x", x)])).unwrap();
        writer.close().unwrap();

        assert!(temp.path().join("nested/shard.fb").is_file());
    }

    #[test]
    fn test_invalid_structure_rejected() {
        let (storage, _temp) = create_test_storage();
        let structure = DatasetStructure::new(vec![], CompressionType::None);
        let result =
            FlatBufferShardWriter::new(structure, "s.fb", storage, WriterConfig::default());
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "closed shard writer")]
    fn test_write_after_close_panics() {
        let (storage, _temp) = create_test_storage();
        let mut writer = writer(&int32_structure(CompressionType::None), &storage);
        writer.close().unwrap();

        let x = Array::from_vec(vec![2], vec![1i32, 2]).unwrap();
        let _ = writer.write(&example(vec![("x", x)]));
    }

    #[test]
    #[should_panic(expected = "closed shard writer")]
    fn test_double_close_panics() {
        let (storage, _temp) = create_test_storage();
        let mut writer = writer(&int32_structure(CompressionType::None), &storage);
        writer.close().unwrap();
        let _ = writer.close();
    }
}
