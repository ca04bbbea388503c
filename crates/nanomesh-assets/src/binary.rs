//! Binary container
//!
//! Length-prefixed little helper format used by every artifact:
//! - POD values are copied as raw bytes
//! - POD slices are a `u32` element count followed by the raw bytes
//! - Strings are byte slices, options a `u8` tag plus payload
//! - Composite types recurse through [`BinarySerialize`]
//!
//! Raw copies make the format native-endian and layout-dependent: files are
//! only valid for builds of the same architecture.

use bytemuck::Pod;
use glam::{Quat, Vec3};

use crate::error::{AssetError, AssetResult};

/// Types that can be written to and read from the binary container
pub trait BinarySerialize: Sized {
    /// Append `self` to the writer
    fn write(&self, writer: &mut BinaryWriter);

    /// Read a value written by [`BinarySerialize::write`]
    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self>;
}

/// Growable output buffer
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one POD value
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytemuck::bytes_of(value));
    }

    /// Write a POD slice as count + raw bytes
    pub fn write_slice<T: Pod>(&mut self, values: &[T]) {
        self.write_pod(&(values.len() as u32));
        self.buffer.extend_from_slice(bytemuck::cast_slice(values));
    }

    /// Write a string as a byte slice
    pub fn write_str(&mut self, value: &str) {
        self.write_slice(value.as_bytes());
    }

    /// Write a composite value
    pub fn write<T: BinarySerialize>(&mut self, value: &T) {
        value.write(self);
    }

    /// Write a list of composite values
    pub fn write_vec<T: BinarySerialize>(&mut self, values: &[T]) {
        self.write_pod(&(values.len() as u32));
        for value in values {
            value.write(self);
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the uncompressed bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Cursor over an uncompressed buffer
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> AssetResult<&'a [u8]> {
        let available = self.data.len() - self.offset;
        if needed > available {
            return Err(AssetError::UnexpectedEof {
                offset: self.offset,
                needed,
                available,
            });
        }
        let bytes = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(bytes)
    }

    /// Read one POD value
    pub fn read_pod<T: Pod>(&mut self) -> AssetResult<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read a count-prefixed POD slice
    pub fn read_slice<T: Pod>(&mut self) -> AssetResult<Vec<T>> {
        let count = self.read_pod::<u32>()? as usize;
        let byte_len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| AssetError::InvalidData(format!("slice of {count} elements overflows")))?;
        let bytes = self.take(byte_len)?;
        Ok(bytemuck::pod_collect_to_vec(bytes))
    }

    /// Read a UTF-8 string
    pub fn read_string(&mut self) -> AssetResult<String> {
        let bytes = self.read_slice::<u8>()?;
        String::from_utf8(bytes).map_err(|err| AssetError::InvalidData(err.to_string()))
    }

    /// Read a composite value
    pub fn read<T: BinarySerialize>(&mut self) -> AssetResult<T> {
        T::read(self)
    }

    /// Read a list of composite values
    pub fn read_vec<T: BinarySerialize>(&mut self) -> AssetResult<Vec<T>> {
        let count = self.read_pod::<u32>()? as usize;
        // Every element takes at least one byte; a larger count is corrupt.
        if count > self.remaining() {
            return Err(AssetError::InvalidData(format!(
                "list of {count} elements in {} remaining bytes",
                self.remaining()
            )));
        }
        (0..count).map(|_| T::read(self)).collect()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Check if the whole buffer has been consumed
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }
}

macro_rules! impl_pod_serialize {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinarySerialize for $ty {
                fn write(&self, writer: &mut BinaryWriter) {
                    writer.write_pod(self);
                }

                fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
                    reader.read_pod()
                }
            }
        )*
    };
}

impl_pod_serialize!(u8, u32, u64, i32, f32, Vec3, Quat);

impl BinarySerialize for String {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(self);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        reader.read_string()
    }
}

impl<T: BinarySerialize> BinarySerialize for Option<T> {
    fn write(&self, writer: &mut BinaryWriter) {
        match self {
            Some(value) => {
                writer.write_pod(&1u8);
                value.write(writer);
            }
            None => writer.write_pod(&0u8),
        }
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        match reader.read_pod::<u8>()? {
            0 => Ok(None),
            1 => Ok(Some(T::read(reader)?)),
            tag => Err(AssetError::InvalidData(format!("invalid option tag {tag}"))),
        }
    }
}

impl<T: BinarySerialize> BinarySerialize for Vec<T> {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_vec(self);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        reader.read_vec()
    }
}

/// Compress a finished buffer; the uncompressed size goes in the frame
pub fn compress(bytes: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(bytes)
}

/// Undo [`compress`]
pub fn decompress(bytes: &[u8]) -> AssetResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(bytes).map_err(|err| AssetError::Decompression(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slices_and_strings() {
        let mut writer = BinaryWriter::new();
        writer.write_slice(&[1u32, 2, 3]);
        writer.write_str("bunny");
        writer.write_slice::<u8>(&[]);
        let bytes = writer.into_bytes();
        // 4 + 12, 4 + 5, 4
        assert_eq!(bytes.len(), 29);

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_slice::<u32>().unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.read_string().unwrap(), "bunny");
        assert!(reader.read_slice::<u8>().unwrap().is_empty());
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_options_and_nested_vectors() {
        let value: Vec<Option<String>> = vec![Some("a".into()), None, Some("bc".into())];
        let mut writer = BinaryWriter::new();
        writer.write(&value);
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes);
        let back: Vec<Option<String>> = reader.read().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_truncated_input() {
        let mut writer = BinaryWriter::new();
        writer.write_slice(&[1.0f32, 2.0, 3.0]);
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            reader.read_slice::<f32>(),
            Err(AssetError::UnexpectedEof { needed: 12, available: 11, .. })
        ));
    }

    #[test]
    fn test_invalid_option_tag() {
        let bytes = [7u8];
        let mut reader = BinaryReader::new(&bytes);
        assert!(matches!(reader.read::<Option<u32>>(), Err(AssetError::InvalidData(_))));
    }

    #[test]
    fn test_compression_round_trip() {
        let payload: Vec<u8> = (0..4096).map(|i| (i % 7) as u8).collect();
        let compressed = compress(&payload);
        assert!(compressed.len() < payload.len());
        assert_eq!(decompress(&compressed).unwrap(), payload);
        assert!(matches!(decompress(&[1, 2]), Err(AssetError::Decompression(_))));
    }
}
