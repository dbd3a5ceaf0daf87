//! Bytecode encoding and decoding utilities
//!
//! This module provides the low-level writer and reader the instruction
//! encoding, the unit container, and the function builder are layered on.
//! All multi-byte fields are little-endian.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid operand tag
    #[error("Invalid param tag {0} at offset {1}")]
    InvalidParamTag(u8, usize),

    /// Invalid constant tag
    #[error("Invalid constant tag {0} at offset {1}")]
    InvalidConstantTag(u8, usize),

    /// Invalid operation selector
    #[error("Invalid operation selector {0} at offset {1}")]
    InvalidOpSelector(u8, usize),
}

/// Bytecode writer for encoding instructions
///
/// Provides methods for emitting opcodes and their operands into a binary
/// buffer, plus reserve/patch support for forward jump displacements.
pub struct BytecodeWriter {
    /// Internal buffer containing the bytecode
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an opcode byte
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit a length-prefixed UTF-8 string (u32 length + bytes)
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    // ===== Patching (for forward jumps) =====

    /// Patch a previously emitted i32 value at the given offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Reserve space for an i32 value (returns offset for later patching)
    pub fn reserve_i32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_i32(0);
        offset
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding instructions
///
/// Provides methods for reading opcodes and their operands from a binary
/// buffer.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Seek to a specific position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    // ===== Basic Reading =====

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.position >= self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    /// Read a length-prefixed string (u32 length + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let at = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, at))
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_emission() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u32(0xABCD_EF01);

        let bytes = writer.buffer();
        assert_eq!(bytes[0], 0x42);
        assert_eq!(bytes[1], 0x01); // Little-endian
        assert_eq!(bytes[2], 0xEF);
        assert_eq!(bytes[3], 0xCD);
        assert_eq!(bytes[4], 0xAB);
    }

    #[test]
    fn test_reader_primitives() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u32(0xABCD_EF01);
        writer.emit_i32(-42);
        writer.emit_f64(3.25);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);

        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u32().unwrap(), 0xABCD_EF01);
        assert_eq!(reader.read_i32().unwrap(), -42);
        assert_eq!(reader.read_f64().unwrap(), 3.25);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_reader_bounds_checking() {
        let bytes = vec![0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert!(reader.read_u32().is_err());
        assert_eq!(reader.read_u8().unwrap(), 0x02);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut writer = BytecodeWriter::new();
        writer.emit_string("hello");
        writer.emit_string("");

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert_eq!(reader.read_string().unwrap(), "");
    }

    #[test]
    fn test_jump_patching() {
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::Jump);
        let patch_offset = writer.reserve_i32();
        writer.emit_opcode(Opcode::Ret);

        // Displacement is measured from the offset field itself
        let target = writer.offset();
        let displacement = target as i32 - patch_offset as i32;
        writer.patch_i32(patch_offset, displacement);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Jump);
        assert_eq!(reader.read_i32().unwrap(), displacement);
    }

    #[test]
    fn test_reader_opcode() {
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::Push);
        writer.emit_u32(3);
        writer.emit_opcode(Opcode::Ret);

        let bytes = writer.buffer();
        let mut reader = BytecodeReader::new(bytes);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Push);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Ret);
    }

    #[test]
    fn test_reader_invalid_opcode() {
        let bytes = vec![0xFF];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            reader.read_opcode(),
            Err(DecodeError::InvalidOpcode(0xFF, 0))
        ));
    }

    #[test]
    fn test_reader_seek_and_position() {
        let bytes = vec![0x01, 0x02, 0x03, 0x04];
        let mut reader = BytecodeReader::new(&bytes);

        reader.read_u8().unwrap();
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.remaining(), 3);
        reader.seek(3);
        assert_eq!(reader.read_u8().unwrap(), 0x04);
        assert!(!reader.has_more());
    }
}
