//! # Byte Cursors
//!
//! Positional readers and writers over little-endian wire data.
//!
//! Every read is bounds-checked and fails with [`ProtocolError::OutOfBounds`]
//! instead of panicking. The [`Writer`] owns a buffer whose capacity is computed
//! up front by the schema codec; writing past that capacity is a bug in the
//! length computation and fails with [`ProtocolError::WriterOverflow`].
//!
//! Strings are null-terminated UTF-16LE code-unit sequences with no length prefix.

use crate::error::{ProtocolError, Result};
use tracing::warn;

/// Bounds-checked reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `data`
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a reader positioned at an absolute offset
    pub const fn at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Move the cursor relative to the current position
    pub fn skip(&mut self, delta: isize) {
        self.position = self.position.saturating_add_signed(delta);
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(ProtocolError::OutOfBounds {
                position: self.position,
                needed,
                available: self.data.len(),
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn bool(&mut self) -> Result<bool> {
        let value = self.byte()?;
        if value > 1 {
            warn!(value, position = self.position - 1, "bool byte is not 0 or 1");
        }
        Ok(value != 0)
    }

    pub fn byte(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read `n` raw bytes
    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read every byte up to the end of the buffer
    pub fn rest(&mut self) -> Vec<u8> {
        let start = self.position.min(self.data.len());
        self.position = self.data.len();
        self.data[start..].to_vec()
    }

    pub fn uint16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn int16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn uint32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn int32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Low word first, then high word
    pub fn uint64(&mut self) -> Result<u64> {
        let low = u64::from(self.uint32()?);
        let high = u64::from(self.uint32()?);
        Ok(low | (high << 32))
    }

    /// Low word unsigned, high word signed
    pub fn int64(&mut self) -> Result<i64> {
        let low = i64::from(self.uint32()?);
        let high = i64::from(self.int32()?);
        Ok(low | (high << 32))
    }

    pub fn float(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn double(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read UTF-16LE code units until a zero unit
    pub fn string(&mut self) -> Result<String> {
        let mut units = Vec::new();
        loop {
            match self.uint16()? {
                0 => break,
                unit => units.push(unit),
            }
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Fixed-capacity writer, pre-sized by the codec's length computation.
#[derive(Debug, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
    position: usize,
}

impl Writer {
    /// Allocate a zero-filled buffer of exactly `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity],
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn skip(&mut self, delta: isize) {
        self.position = self.position.saturating_add_signed(delta);
    }

    /// The written buffer (always `capacity` bytes long)
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn put(&mut self, data: &[u8]) -> Result<()> {
        let end = self
            .position
            .checked_add(data.len())
            .filter(|end| *end <= self.buffer.len())
            .ok_or(ProtocolError::WriterOverflow {
                position: self.position,
                needed: data.len(),
                capacity: self.buffer.len(),
            })?;
        self.buffer[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    pub fn bool(&mut self, value: bool) -> Result<()> {
        self.put(&[u8::from(value)])
    }

    pub fn byte(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    pub fn bytes(&mut self, data: &[u8]) -> Result<()> {
        self.put(data)
    }

    pub fn uint16(&mut self, value: u16) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn int16(&mut self, value: i16) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn uint32(&mut self, value: u32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn int32(&mut self, value: i32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn uint64(&mut self, value: u64) -> Result<()> {
        self.uint32(value as u32)?;
        self.uint32((value >> 32) as u32)
    }

    pub fn int64(&mut self, value: i64) -> Result<()> {
        self.uint64(value as u64)
    }

    pub fn float(&mut self, value: f32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn double(&mut self, value: f64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    /// Write UTF-16LE code units followed by a zero unit
    pub fn string(&mut self, value: &str) -> Result<()> {
        for unit in value.encode_utf16() {
            self.uint16(unit)?;
        }
        self.uint16(0)
    }

    /// Overwrite a u16 at `at`, then restore the cursor
    pub fn backpatch_u16(&mut self, at: usize, value: u16) -> Result<()> {
        let here = self.position;
        self.seek(at);
        let result = self.uint16(value);
        self.seek(here);
        result
    }
}

/// Serialized size of a UTF-16 string including its terminator
pub fn utf16_len(value: &str) -> usize {
    (value.encode_utf16().count() + 1) * 2
}
