//! Operand addressing parameters
//!
//! A [`Param`] is a tagged reference to one of four storage classes: a
//! constant-pool slot (the embedded-literal storage), a positional call
//! argument, a named local-variable slot, or a temp register on the
//! current frame. Exactly one tag is active, and resolving a param to a
//! storage slot is a pure function of the tag, the index, the current
//! frame, and the current context.

use std::fmt;

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// Encoded size of a param: one tag byte + a little-endian u32 index
pub const PARAM_SIZE: usize = 5;

const TAG_CONST: u8 = 0;
const TAG_ARG: u8 = 1;
const TAG_LOCAL: u8 = 2;
const TAG_TEMP: u8 = 3;

/// A tagged operand reference
///
/// The constant-pool slot referenced by `Const` is immutable; a
/// well-formed instruction stream never requests a write through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    /// Constant-pool slot (embedded literal)
    Const(u32),
    /// Positional call argument
    Arg(u32),
    /// Named local-variable slot
    Local(u32),
    /// Temp register on the current frame
    Temp(u32),
}

impl Param {
    /// The index into the storage class this param addresses
    #[inline]
    pub fn index(self) -> u32 {
        match self {
            Self::Const(i) | Self::Arg(i) | Self::Local(i) | Self::Temp(i) => i,
        }
    }

    /// Whether this param addresses the constant pool
    #[inline]
    pub fn is_const(self) -> bool {
        matches!(self, Self::Const(_))
    }

    /// Whether this param addresses a temp register
    #[inline]
    pub fn is_temp(self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// Encode this param as a tag byte plus index
    pub fn encode(self, writer: &mut BytecodeWriter) {
        let (tag, index) = match self {
            Self::Const(i) => (TAG_CONST, i),
            Self::Arg(i) => (TAG_ARG, i),
            Self::Local(i) => (TAG_LOCAL, i),
            Self::Temp(i) => (TAG_TEMP, i),
        };
        writer.emit_u8(tag);
        writer.emit_u32(index);
    }

    /// Decode a param from the reader
    ///
    /// An unrecognized tag byte is an encoder defect and fails decoding;
    /// it is never a recoverable runtime condition.
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let at = reader.position();
        let tag = reader.read_u8()?;
        let index = reader.read_u32()?;
        match tag {
            TAG_CONST => Ok(Self::Const(index)),
            TAG_ARG => Ok(Self::Arg(index)),
            TAG_LOCAL => Ok(Self::Local(index)),
            TAG_TEMP => Ok(Self::Temp(index)),
            _ => Err(DecodeError::InvalidParamTag(tag, at)),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(i) => write!(f, "c{}", i),
            Self::Arg(i) => write!(f, "a{}", i),
            Self::Local(i) => write!(f, "l{}", i),
            Self::Temp(i) => write!(f, "t{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_roundtrip() {
        let params = [
            Param::Const(0),
            Param::Arg(7),
            Param::Local(12),
            Param::Temp(u32::MAX),
        ];
        let mut writer = BytecodeWriter::new();
        for p in params {
            p.encode(&mut writer);
        }
        assert_eq!(writer.offset(), params.len() * PARAM_SIZE);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        for p in params {
            assert_eq!(Param::decode(&mut reader).unwrap(), p);
        }
    }

    #[test]
    fn test_invalid_tag() {
        let bytes = [9u8, 0, 0, 0, 0];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            Param::decode(&mut reader),
            Err(DecodeError::InvalidParamTag(9, 0))
        ));
    }

    #[test]
    fn test_truncated_param() {
        let bytes = [TAG_TEMP, 1, 0];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(Param::decode(&mut reader).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Param::Const(3).to_string(), "c3");
        assert_eq!(Param::Arg(0).to_string(), "a0");
        assert_eq!(Param::Local(5).to_string(), "l5");
        assert_eq!(Param::Temp(2).to_string(), "t2");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Param::Temp(9).index(), 9);
        assert!(Param::Const(0).is_const());
        assert!(!Param::Const(0).is_temp());
        assert!(Param::Temp(0).is_temp());
    }
}
