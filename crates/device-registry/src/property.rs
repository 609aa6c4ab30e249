use crate::error::ProfileError;
use crate::types::{ByteOrder, MaskSpec, PropertyValue, ValueType};
use std::collections::BTreeMap;

pub const MAX_SIZE_NIBBLES: u32 = 32;
const DEFAULT_WORD_BYTES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Text,
    Bool,
}

impl ValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

impl From<ValueType> for ValueKind {
    fn from(t: ValueType) -> Self {
        match t {
            ValueType::Integer => ValueKind::Integer,
            ValueType::Float => ValueKind::Float,
            ValueType::String => ValueKind::Text,
            ValueType::Bool => ValueKind::Bool,
        }
    }
}

/// Register layout of a bit-encoded numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLayout {
    /// Total width in nibbles.
    pub size: u32,
    /// Nibbles per word, already capped at `size`.
    pub word: u32,
    pub order: ByteOrder,
    pub signed: bool,
    pub mask: u128,
    pub shift: u32,
}

impl BitLayout {
    pub fn bits(&self) -> u32 {
        self.size * 4
    }

    /// Width in bits of the field after masking and shifting.
    pub fn field_bits(&self) -> u32 {
        if self.mask == 0 {
            self.bits() - self.shift
        } else {
            128 - (self.mask >> self.shift).leading_zeros()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw value is a decimal number, or non-numeric text.
    Plain,
    Bits(BitLayout),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub base: f64,
    pub scale: f64,
    pub offset: f64,
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        self.base == 0.0 && self.scale == 1.0 && self.offset == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub fn parse(read_write: &str) -> Self {
        let rw = read_write.to_ascii_lowercase();
        Self {
            read: rw.contains('r'),
            write: rw.contains('w'),
        }
    }
}

/// Validated, immutable encoding of one object's value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub value_type: ValueType,
    pub kind: ValueKind,
    pub encoding: Encoding,
    pub transform: Transform,
    pub access: Access,
    pub default_value: Option<String>,
    pub assertion: Option<String>,
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub mappings: BTreeMap<String, String>,
}

impl PropertyDescriptor {
    pub fn compile(object: &str, value: &PropertyValue) -> Result<Self, ProfileError> {
        let invalid = |reason: String| ProfileError::InvalidProperty {
            object: object.to_string(),
            reason,
        };
        let kind = ValueKind::from(value.value_type);

        if value.size == Some(0) {
            return Err(invalid("size must be greater than zero".into()));
        }
        let mask = match &value.mask {
            None => 0,
            Some(spec) => parse_mask(spec).ok_or_else(|| invalid(format!("bad mask {spec:?}")))?,
        };
        if value.scale == 0.0 && kind.is_numeric() {
            return Err(invalid("scale must be non-zero".into()));
        }

        let bit_encoded = kind.is_numeric() && (value.byte_order.is_some() || value.size.is_some());
        let encoding = if bit_encoded {
            let order = value.byte_order.unwrap_or(ByteOrder::Msb);
            let size = value
                .size
                .ok_or_else(|| invalid("bit-encoded values need a size".into()))?;
            if size > MAX_SIZE_NIBBLES {
                return Err(invalid(format!(
                    "size {size} exceeds {MAX_SIZE_NIBBLES} nibbles"
                )));
            }
            let word_bytes = value.word.unwrap_or(DEFAULT_WORD_BYTES);
            if word_bytes == 0 {
                return Err(invalid("word must be greater than zero".into()));
            }
            if order == ByteOrder::Lsb && size % 2 != 0 {
                return Err(invalid("lsb byte order needs whole bytes".into()));
            }
            let bits = size * 4;
            if mask != 0 && bits < 128 && mask >> bits != 0 {
                return Err(invalid(format!("mask {mask:#x} wider than {bits} bits")));
            }
            if value.shift >= bits {
                return Err(invalid(format!("shift {} out of range", value.shift)));
            }
            if mask != 0 && mask >> value.shift == 0 {
                return Err(invalid(format!(
                    "mask {mask:#x} has no bits left after shift {}",
                    value.shift
                )));
            }
            Encoding::Bits(BitLayout {
                size,
                word: (word_bytes * 2).min(size),
                order,
                signed: value.signed,
                mask,
                shift: value.shift,
            })
        } else {
            if mask != 0 {
                return Err(invalid("mask needs a byte order and size".into()));
            }
            Encoding::Plain
        };

        Ok(Self {
            value_type: value.value_type,
            kind,
            encoding,
            transform: Transform {
                base: value.base,
                scale: value.scale,
                offset: value.offset,
            },
            access: Access::parse(&value.read_write),
            default_value: value.default_value.clone(),
            assertion: value.assertion.clone(),
            minimum: value.minimum.clone(),
            maximum: value.maximum.clone(),
            mappings: value.mappings.clone(),
        })
    }

    pub fn layout(&self) -> Option<&BitLayout> {
        match &self.encoding {
            Encoding::Bits(layout) => Some(layout),
            Encoding::Plain => None,
        }
    }

    pub fn is_masked(&self) -> bool {
        self.layout().map(|l| l.mask != 0).unwrap_or(false)
    }
}

fn parse_mask(spec: &MaskSpec) -> Option<u128> {
    match spec {
        MaskSpec::Int(v) => Some(u128::from(*v)),
        MaskSpec::Text(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u128::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
    }
}
