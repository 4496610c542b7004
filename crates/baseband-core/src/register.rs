//! Typed field registry
//!
//! A [`RegisterMap`] is the table that maps settings paths such as
//! `fm.0.rf_frequency_khz` to a byte offset, a container width, an optional
//! bit range inside that container and an encoding. Maps are validated
//! once when they are built; after that every lookup is by path.
//!
//! All multi-byte containers are little-endian, matching the packed
//! structures in the board firmware.

use crate::error::{Error, Result};
use crate::settings::Value;
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error as ThisError;

/// Storage unit a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// One byte
    U8,
    /// Two bytes, little-endian
    U16,
    /// Four bytes, little-endian
    U32,
    /// Fixed-length byte string
    Bytes(usize),
}

impl Width {
    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::Bytes(n) => n,
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, Width::Bytes(_))
    }
}

/// How a field's raw bits map to a settings value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Plain unsigned integer with an inclusive range
    Unsigned {
        /// Smallest accepted value
        min: u32,
        /// Largest accepted value
        max: u32,
    },
    /// Single bit, exported as 0/1, accepts booleans too
    Flag,
    /// Fixed-point value: `value = raw * step`
    ///
    /// Inputs that are not a multiple of `step` are rounded to the nearest
    /// representable value, halves away from zero.
    Scaled {
        /// Value of one raw unit
        step: f64,
        /// Smallest accepted value
        min: f64,
        /// Largest accepted value
        max: f64,
    },
    /// Closed set of names, stored as the index
    Enum(&'static [&'static str]),
    /// NUL-padded text
    Text,
}

/// Raw contents of a field, before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raw {
    /// Integer fields
    Int(u64),
    /// Text fields
    Bytes(Vec<u8>),
}

/// One named field of a register map
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Dotted settings path
    pub path: String,
    /// Byte offset of the container within the map
    pub offset: usize,
    /// Container width
    pub width: Width,
    /// Bit range within the container as (lsb, length)
    pub bits: Option<(u8, u8)>,
    /// Encoding
    pub kind: FieldKind,
    /// Status fields that change on their own and are never written
    pub volatile: bool,
}

impl Field {
    /// Create a field occupying a whole container
    pub fn new(path: impl Into<String>, offset: usize, width: Width, kind: FieldKind) -> Self {
        Self {
            path: path.into(),
            offset,
            width,
            bits: None,
            kind,
            volatile: false,
        }
    }

    /// Restrict the field to `len` bits starting at `lsb`
    pub fn bits(mut self, lsb: u8, len: u8) -> Self {
        self.bits = Some((lsb, len));
        self
    }

    /// Mark the field as read-only status
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Byte range of the container within the map
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..self.offset + self.width.size()
    }

    /// Number of value bits
    pub fn bit_len(&self) -> u32 {
        match self.bits {
            Some((_, len)) => len as u32,
            None => self.width.size() as u32 * 8,
        }
    }

    /// Largest raw value that fits
    pub fn raw_max(&self) -> u64 {
        let len = self.bit_len();
        if len >= 64 {
            u64::MAX
        } else {
            (1u64 << len) - 1
        }
    }

    fn bit_offset(&self) -> u32 {
        self.bits.map(|(lsb, _)| lsb as u32).unwrap_or(0)
    }

    /// Pull the raw value out of its container bytes
    pub fn extract(&self, container: &[u8]) -> Raw {
        match self.width {
            Width::Bytes(_) => Raw::Bytes(container.to_vec()),
            _ => {
                let word = read_le(container);
                Raw::Int((word >> self.bit_offset()) & self.raw_max())
            }
        }
    }

    /// Store a raw value into its container bytes, keeping the other bits
    pub fn insert(&self, container: &mut [u8], raw: &Raw) {
        match raw {
            Raw::Bytes(bytes) => {
                container.fill(0);
                let n = bytes.len().min(container.len());
                container[..n].copy_from_slice(&bytes[..n]);
            }
            Raw::Int(v) => {
                let mask = self.raw_max() << self.bit_offset();
                let word = read_le(container);
                let word = (word & !mask) | ((v << self.bit_offset()) & mask);
                write_le(container, word);
            }
        }
    }

    /// Validate `value` against the field's domain and convert it to raw
    pub fn to_raw(&self, value: &Value) -> Result<Raw> {
        let reject = |reason: String| Error::validation(&self.path, value, reason);

        match &self.kind {
            FieldKind::Unsigned { min, max } => {
                let v = value
                    .as_integer()
                    .ok_or_else(|| reject("expected an integer".into()))?;
                if v < *min as i64 || v > *max as i64 {
                    return Err(reject(format!("expected {}..={}", min, max)));
                }
                Ok(Raw::Int(v as u64))
            }
            FieldKind::Flag => match value {
                Value::Bool(b) => Ok(Raw::Int(*b as u64)),
                _ => match value.as_integer() {
                    Some(v @ (0 | 1)) => Ok(Raw::Int(v as u64)),
                    _ => Err(reject("expected 0, 1, true or false".into())),
                },
            },
            FieldKind::Scaled { step, min, max } => {
                let v = value
                    .as_float()
                    .ok_or_else(|| reject("expected a number".into()))?;
                if !v.is_finite() || v < *min || v > *max {
                    return Err(reject(format!("expected {}..={}", min, max)));
                }
                // f64::round rounds halves away from zero
                let raw = (v / step).round();
                if raw < 0.0 || raw > self.raw_max() as f64 {
                    return Err(reject("does not fit the register".into()));
                }
                Ok(Raw::Int(raw as u64))
            }
            FieldKind::Enum(variants) => {
                let index = match value {
                    Value::Text(name) => variants
                        .iter()
                        .position(|v| v.eq_ignore_ascii_case(name.trim())),
                    // Spare codes have no name but still fit the bits
                    _ => value
                        .as_integer()
                        .filter(|i| *i >= 0 && (*i as u64) <= self.raw_max())
                        .map(|i| i as usize),
                };
                index.map(|i| Raw::Int(i as u64)).ok_or_else(|| {
                    reject(format!(
                        "expected one of {} or an index up to {}",
                        variants.join(", "),
                        self.raw_max()
                    ))
                })
            }
            FieldKind::Text => {
                let text = match value {
                    Value::Text(s) => s,
                    _ => return Err(reject("expected a string".into())),
                };
                let size = self.width.size();
                if text.len() > size {
                    return Err(reject(format!("longer than {} bytes", size)));
                }
                if text.bytes().any(|b| b == 0) {
                    return Err(reject("contains a NUL byte".into()));
                }
                Ok(Raw::Bytes(text.as_bytes().to_vec()))
            }
        }
    }

    /// Interpret a raw value
    ///
    /// Raw enum indices without a name are reported as integers so that
    /// unknown device values survive a read-modify-write cycle.
    pub fn from_raw(&self, raw: &Raw) -> Value {
        match (raw, &self.kind) {
            (Raw::Bytes(bytes), _) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Text(decode_text(&bytes[..end]))
            }
            (Raw::Int(v), FieldKind::Scaled { step, .. }) => {
                let scaled = *v as f64 * step;
                if step.fract() == 0.0 {
                    Value::Integer(scaled as i64)
                } else {
                    Value::Float(scaled)
                }
            }
            (Raw::Int(v), FieldKind::Enum(variants)) => match variants.get(*v as usize) {
                Some(name) => Value::Text((*name).to_string()),
                None => Value::Integer(*v as i64),
            },
            (Raw::Int(v), _) => Value::Integer(*v as i64),
        }
    }

    fn check_encoding(&self) -> std::result::Result<(), String> {
        match (&self.kind, self.width) {
            (FieldKind::Text, Width::Bytes(_)) if self.bits.is_none() => Ok(()),
            (FieldKind::Text, _) => Err("text needs a byte-string container".into()),
            (_, Width::Bytes(_)) => Err("byte-string container needs a text encoding".into()),
            (FieldKind::Unsigned { min, max }, _) => {
                if min > max || *max as u64 > self.raw_max() {
                    Err(format!("range {}..={} does not fit {} bits", min, max, self.bit_len()))
                } else {
                    Ok(())
                }
            }
            (FieldKind::Flag, _) if self.bit_len() == 1 => Ok(()),
            (FieldKind::Flag, _) => Err("flags are one bit wide".into()),
            (FieldKind::Scaled { step, min, max }, _) => {
                if *step <= 0.0 || min > max || *min < 0.0 {
                    Err("bad scale parameters".into())
                } else if (max / step).round() > self.raw_max() as f64 {
                    Err(format!("maximum {} does not fit {} bits", max, self.bit_len()))
                } else {
                    Ok(())
                }
            }
            (FieldKind::Enum(variants), _) => {
                if variants.is_empty() || variants.len() as u64 - 1 > self.raw_max() {
                    Err(format!("{} variants do not fit {} bits", variants.len(), self.bit_len()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Decode text, replacing each invalid UTF-8 sequence with a single `?`
///
/// The result is never longer in bytes than the input, so a name read from
/// the board always fits its field again.
fn decode_text(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                return text;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // valid_up_to() marks a UTF-8 boundary
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                text.push('?');
                let skip = e.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn write_le(bytes: &mut [u8], mut word: u64) {
    for b in bytes.iter_mut() {
        *b = word as u8;
        word >>= 8;
    }
}

/// A register map failed validation
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum LayoutError {
    /// Two fields share a path
    #[error("duplicate field path '{0}'")]
    DuplicatePath(String),
    /// A field extends past the block
    #[error("field '{path}' extends past the {size}-byte block")]
    OutOfBounds {
        /// Field path
        path: String,
        /// Block size
        size: usize,
    },
    /// Two fields claim the same bit
    #[error("fields '{first}' and '{second}' overlap")]
    Overlap {
        /// Field that claimed the bit first
        first: String,
        /// Field that claimed it again
        second: String,
    },
    /// Encoding does not fit the storage
    #[error("field '{path}': {reason}")]
    Encoding {
        /// Field path
        path: String,
        /// What is wrong
        reason: String,
    },
    /// The fields do not span the documented block size
    #[error("fields span {actual} bytes, block is {expected}")]
    SizeMismatch {
        /// Documented size
        expected: usize,
        /// Span covered by fields
        actual: usize,
    },
}

/// Ordered, validated set of fields at a fixed register window
#[derive(Debug, Clone)]
pub struct RegisterMap {
    name: &'static str,
    base: u16,
    size: usize,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl RegisterMap {
    /// Build and validate a map
    ///
    /// Fields must not overlap, must stay inside `size` bytes, must have
    /// encodings that fit their bits, and together must span exactly
    /// `size` bytes.
    pub fn new(
        name: &'static str,
        base: u16,
        size: usize,
        fields: Vec<Field>,
    ) -> std::result::Result<Self, LayoutError> {
        let mut index = HashMap::with_capacity(fields.len());
        // Owner of every bit in the block, by field index
        let mut owners: Vec<Option<usize>> = vec![None; size * 8];
        let mut span = 0;

        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.path.clone(), i).is_some() {
                return Err(LayoutError::DuplicatePath(field.path.clone()));
            }
            if field.byte_range().end > size {
                return Err(LayoutError::OutOfBounds {
                    path: field.path.clone(),
                    size,
                });
            }
            if let Some((lsb, len)) = field.bits {
                if !field.width.is_integer()
                    || len == 0
                    || lsb as usize + len as usize > field.width.size() * 8
                {
                    return Err(LayoutError::Encoding {
                        path: field.path.clone(),
                        reason: format!("bits {}+{} outside container", lsb, len),
                    });
                }
            }
            field.check_encoding().map_err(|reason| LayoutError::Encoding {
                path: field.path.clone(),
                reason,
            })?;

            let first_bit = field.offset * 8 + field.bit_offset() as usize;
            for bit in first_bit..first_bit + field.bit_len() as usize {
                if let Some(other) = owners[bit] {
                    return Err(LayoutError::Overlap {
                        first: fields[other].path.clone(),
                        second: field.path.clone(),
                    });
                }
                owners[bit] = Some(i);
            }
            span = span.max(field.byte_range().end);
        }

        if span != size {
            return Err(LayoutError::SizeMismatch {
                expected: size,
                actual: span,
            });
        }

        Ok(Self {
            name,
            base,
            size,
            fields,
            index,
        })
    }

    /// Map name for log messages
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register address of the first byte
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Block size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// All fields in layout order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Look up a field by exact path
    pub fn field(&self, path: &str) -> Option<&Field> {
        self.index.get(path).map(|&i| &self.fields[i])
    }

    /// Look up a field, failing with [`Error::UnknownField`]
    pub fn lookup(&self, path: &str) -> Result<&Field> {
        self.field(path)
            .ok_or_else(|| Error::UnknownField(path.to_string()))
    }

    /// Fields selected by a path or a path prefix
    ///
    /// `fm.1` selects every field of the second FM carrier; `name` selects
    /// just the name.
    pub fn select(&self, path: &str) -> Result<Vec<&Field>> {
        if let Some(field) = self.field(path) {
            return Ok(vec![field]);
        }
        let prefix = format!("{}.", path.trim_end_matches('.'));
        let selected: Vec<&Field> = self
            .fields
            .iter()
            .filter(|f| f.path.starts_with(&prefix))
            .collect();
        if selected.is_empty() {
            return Err(Error::UnknownField(path.to_string()));
        }
        Ok(selected)
    }

    /// Absolute register address of a field's container
    pub fn address_of(&self, field: &Field) -> u16 {
        self.base + field.offset as u16
    }
}
