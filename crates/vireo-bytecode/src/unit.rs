//! Compiled code-unit container format
//!
//! A [`CodeUnit`] is one compiled function: its instruction bytes, the
//! constant pool its `Const` params index, the name table its name-based
//! instructions index, and the nested function descriptors `LoadClosure`
//! builds closures over. Units serialize to a checksummed binary container
//! (`magic | version | flags | payload | crc32`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// Magic number for Vireo code-unit files: "VIRE"
pub const MAGIC: [u8; 4] = *b"VIRE";

/// Current container version
pub const VERSION: u32 = 1;

/// Container flags
pub mod flags {
    /// Unit carries a source path in its metadata
    pub const HAS_SOURCE: u32 = 1 << 0;
}

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected VIRE, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum recorded in the container
        expected: u32,
        /// Checksum recomputed over the payload
        actual: u32,
    },

    /// Container too short to hold the fixed header and trailer
    #[error("Truncated container: {0} bytes")]
    Truncated(usize),
}

/// A constant-pool entry
///
/// The engine materializes these into runtime values once per loaded
/// unit; `Const` params then resolve to the materialized slot without
/// allocating.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// A boolean literal
    Bool(bool),
    /// A numeric literal
    Number(f64),
    /// A string literal
    Str(String),
}

const CONST_UNDEFINED: u8 = 0;
const CONST_NULL: u8 = 1;
const CONST_BOOL_FALSE: u8 = 2;
const CONST_BOOL_TRUE: u8 = 3;
const CONST_NUMBER: u8 = 4;
const CONST_STR: u8 = 5;

impl Constant {
    fn encode(&self, w: &mut BytecodeWriter) {
        match self {
            Self::Undefined => w.emit_u8(CONST_UNDEFINED),
            Self::Null => w.emit_u8(CONST_NULL),
            Self::Bool(false) => w.emit_u8(CONST_BOOL_FALSE),
            Self::Bool(true) => w.emit_u8(CONST_BOOL_TRUE),
            Self::Number(n) => {
                w.emit_u8(CONST_NUMBER);
                w.emit_f64(*n);
            }
            Self::Str(s) => {
                w.emit_u8(CONST_STR);
                w.emit_string(s);
            }
        }
    }

    fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let at = r.position();
        match r.read_u8()? {
            CONST_UNDEFINED => Ok(Self::Undefined),
            CONST_NULL => Ok(Self::Null),
            CONST_BOOL_FALSE => Ok(Self::Bool(false)),
            CONST_BOOL_TRUE => Ok(Self::Bool(true)),
            CONST_NUMBER => Ok(Self::Number(r.read_f64()?)),
            CONST_STR => Ok(Self::Str(r.read_string()?)),
            tag => Err(DecodeError::InvalidConstantTag(tag, at)),
        }
    }
}

/// Unit metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Function name (diagnostic only)
    pub name: String,
    /// Source path the unit was compiled from, when known
    pub source: Option<String>,
}

/// A compiled function and its nested functions
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Unit metadata
    pub meta: Metadata,
    /// Number of declared parameters
    pub arg_count: u32,
    /// Number of declared local variables
    pub local_count: u32,
    /// Constant pool
    pub consts: Vec<Constant>,
    /// Name table for name-based instructions
    pub names: Vec<String>,
    /// Nested function descriptors for `LoadClosure`
    pub funcs: Vec<CodeUnit>,
    /// Encoded instruction stream
    pub code: Vec<u8>,
}

impl CodeUnit {
    /// Create an empty unit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: Metadata {
                name: name.into(),
                source: None,
            },
            arg_count: 0,
            local_count: 0,
            consts: Vec::new(),
            names: Vec::new(),
            funcs: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Serialize to the checksummed container format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = BytecodeWriter::new();
        w.emit_bytes(&MAGIC);
        w.emit_u32(VERSION);
        let mut unit_flags = 0;
        if self.meta.source.is_some() {
            unit_flags |= flags::HAS_SOURCE;
        }
        w.emit_u32(unit_flags);
        self.encode_into(&mut w);

        let checksum = crc32fast::hash(w.buffer());
        w.emit_u32(checksum);
        w.into_bytes()
    }

    /// Deserialize from the checksummed container format
    pub fn from_bytes(data: &[u8]) -> Result<Self, UnitError> {
        // Header (magic + version + flags) and checksum trailer
        if data.len() < 16 {
            return Err(UnitError::Truncated(data.len()));
        }
        let (payload, trailer) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(UnitError::ChecksumMismatch { expected, actual });
        }

        let mut r = BytecodeReader::new(payload);
        let magic = r.read_bytes(4)?;
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]));
        }
        let version = r.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }
        let _flags = r.read_u32()?;
        Ok(Self::decode_from(&mut r)?)
    }

    fn encode_into(&self, w: &mut BytecodeWriter) {
        w.emit_string(&self.meta.name);
        match &self.meta.source {
            Some(source) => {
                w.emit_u8(1);
                w.emit_string(source);
            }
            None => w.emit_u8(0),
        }
        w.emit_u32(self.arg_count);
        w.emit_u32(self.local_count);

        w.emit_u32(self.consts.len() as u32);
        for constant in &self.consts {
            constant.encode(w);
        }

        w.emit_u32(self.names.len() as u32);
        for name in &self.names {
            w.emit_string(name);
        }

        w.emit_u32(self.funcs.len() as u32);
        for func in &self.funcs {
            func.encode_into(w);
        }

        w.emit_u32(self.code.len() as u32);
        w.emit_bytes(&self.code);
    }

    fn decode_from(r: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = r.read_string()?;
        let source = if r.read_u8()? != 0 {
            Some(r.read_string()?)
        } else {
            None
        };
        let arg_count = r.read_u32()?;
        let local_count = r.read_u32()?;

        let const_count = r.read_u32()? as usize;
        let mut consts = Vec::with_capacity(const_count);
        for _ in 0..const_count {
            consts.push(Constant::decode(r)?);
        }

        let name_count = r.read_u32()? as usize;
        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            names.push(r.read_string()?);
        }

        let func_count = r.read_u32()? as usize;
        let mut funcs = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            funcs.push(Self::decode_from(r)?);
        }

        let code_len = r.read_u32()? as usize;
        let code = r.read_bytes(code_len)?;

        Ok(Self {
            meta: Metadata { name, source },
            arg_count,
            local_count,
            consts,
            names,
            funcs,
            code,
        })
    }
}
