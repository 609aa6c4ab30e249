use crate::error::{CodecError, Result};
use crate::property::{BitLayout, Encoding, PropertyDescriptor, Transform, ValueKind};
use crate::types::ByteOrder;
use msg_transport::RawValue;

/// Whether decoded values go through base/scale/offset or stay as register integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    #[default]
    Transformed,
    Raw,
}

/// Turn a raw wire value into its engineering value.
///
/// Non-numeric kinds pass through. A declared assertion that does not match the
/// decoded value yields [`CodecError::AssertionFailed`].
pub fn decode(desc: &PropertyDescriptor, raw: &str, mode: DecodeMode) -> Result<String> {
    let value = match (&desc.encoding, desc.kind.is_numeric()) {
        (_, false) => raw.to_string(),
        (Encoding::Plain, true) => {
            let v: f64 = raw.trim().parse().map_err(|_| CodecError::InvalidRaw {
                raw: raw.to_string(),
                reason: "not a number",
            })?;
            match mode {
                DecodeMode::Raw => format_number(desc.kind, v),
                DecodeMode::Transformed => format_number(desc.kind, apply(&desc.transform, v)),
            }
        }
        (Encoding::Bits(layout), true) => {
            let field = extract_field(layout, parse_raw(layout, raw)?);
            match mode {
                DecodeMode::Raw => field.to_string(),
                DecodeMode::Transformed => {
                    format_number(desc.kind, apply(&desc.transform, field as f64))
                }
            }
        }
    };

    match &desc.assertion {
        Some(expected) if *expected != value => Err(CodecError::AssertionFailed {
            value,
            expected: expected.clone(),
        }),
        _ => Ok(value),
    }
}

/// Wire text for a received value. Device text passes through; a JSON number
/// aimed at a register is taken as the decimal register value and rendered as hex.
pub fn raw_text(desc: &PropertyDescriptor, raw: &RawValue) -> Result<String> {
    let (RawValue::Number(n), Some(layout)) = (raw, desc.layout()) else {
        return Ok(raw.as_str().to_string());
    };
    let invalid = |reason| CodecError::InvalidRaw {
        raw: n.clone(),
        reason,
    };
    let v: i128 = n.trim().parse().map_err(|_| invalid("not an integer"))?;
    let register = if v >= 0 {
        v as u128
    } else if layout.signed && layout.bits() < 128 && v >= -(1i128 << (layout.bits() - 1)) {
        (v + (1i128 << layout.bits())) as u128
    } else {
        return Err(invalid("negative value for unsigned register"));
    };
    format_raw(layout, register)
}

/// Register integer of a hex wire value, honouring word grouping and byte order.
pub fn parse_raw(layout: &BitLayout, raw: &str) -> Result<u128> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let invalid = |reason| CodecError::InvalidRaw {
        raw: raw.to_string(),
        reason,
    };
    if digits.is_empty() {
        return Err(invalid("empty"));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid("not hexadecimal"));
    }
    let size = layout.size as usize;
    if digits.len() > size {
        return Err(invalid("longer than declared size"));
    }
    let padded = format!("{digits:0>size$}");

    match layout.order {
        ByteOrder::Msb => u128::from_str_radix(&padded, 16).map_err(|_| invalid("not hexadecimal")),
        ByteOrder::Lsb => {
            let mut value: u128 = 0;
            for word in padded.as_bytes().chunks(layout.word as usize) {
                let mut reordered = String::with_capacity(word.len());
                for byte in word.chunks(2).rev() {
                    reordered.push_str(std::str::from_utf8(byte).map_err(|_| invalid("not ascii"))?);
                }
                let w = u128::from_str_radix(&reordered, 16).map_err(|_| invalid("not hexadecimal"))?;
                value = (value << (word.len() * 4)) | w;
            }
            Ok(value)
        }
    }
}

/// Inverse of [`parse_raw`]: zero-padded hex of exactly `size` nibbles, no prefix.
pub fn format_raw(layout: &BitLayout, value: u128) -> Result<String> {
    let bits = layout.bits();
    if bits < 128 && value >> bits != 0 {
        return Err(CodecError::Overflow {
            value: format!("{value:#x}"),
            bits,
        });
    }
    let size = layout.size as usize;
    let hex = format!("{value:0size$X}");
    match layout.order {
        ByteOrder::Msb => Ok(hex),
        ByteOrder::Lsb => {
            let mut out = String::with_capacity(size);
            for word in hex.as_bytes().chunks(layout.word as usize) {
                for byte in word.chunks(2).rev() {
                    out.extend(byte.iter().map(|b| char::from(*b)));
                }
            }
            Ok(out)
        }
    }
}

/// Mask, shift and sign-correct a register value.
///
/// Signed fields are two's complement over the declared width: when the top bit
/// is set, 2^bits is subtracted, so `FFFF` in a 4-nibble register reads as -1.
fn extract_field(layout: &BitLayout, register: u128) -> i128 {
    let mut v = register;
    if layout.mask != 0 {
        v &= layout.mask;
    }
    v >>= layout.shift;

    let bits = layout.bits();
    let bit_len = 128 - v.leading_zeros();
    if layout.signed && bit_len == bits {
        if bits >= 128 {
            v as i128
        } else {
            v as i128 - (1i128 << bits)
        }
    } else {
        v as i128
    }
}

fn apply(t: &Transform, v: f64) -> f64 {
    let v = if t.base != 0.0 { t.base.powf(v) } else { v };
    v * t.scale + t.offset
}

pub(crate) fn format_number(kind: ValueKind, v: f64) -> String {
    match kind {
        ValueKind::Float => {
            if v.fract() == 0.0 && v.abs() < 1e15 {
                format!("{v:.1}")
            } else {
                format!("{v}")
            }
        }
        _ => format!("{}", v.round() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyValue;

    fn desc(yaml: &str) -> PropertyDescriptor {
        let pv: PropertyValue = serde_yaml::from_str(yaml).unwrap();
        PropertyDescriptor::compile("obj", &pv).unwrap()
    }

    #[test]
    fn scaled_integer_register() {
        let d = desc("{type: i, size: 4, scale: 0.1}");
        assert_eq!(decode(&d, "0064", DecodeMode::Transformed).unwrap(), "10");
        assert_eq!(decode(&d, "0x0064", DecodeMode::Transformed).unwrap(), "10");
        assert_eq!(decode(&d, "0064", DecodeMode::Raw).unwrap(), "100");
    }

    #[test]
    fn lsb_words_are_byte_swapped() {
        let d = desc("{type: i, size: 8, word: 2, byte_order: lsb}");
        // words 0x3412 and 0x7856 concatenated high to low
        assert_eq!(decode(&d, "12345678", DecodeMode::Transformed).unwrap(), (0x3412_7856u64).to_string());
    }

    #[test]
    fn masked_signed_and_base() {
        let d = desc("{type: i, size: 4, byte_order: msb, mask: 0xF0, shift: 4}");
        assert_eq!(decode(&d, "00A5", DecodeMode::Transformed).unwrap(), "10");

        let d = desc("{type: i, size: 4, byte_order: msb, signed: true}");
        assert_eq!(decode(&d, "FFFF", DecodeMode::Transformed).unwrap(), "-1");
        assert_eq!(decode(&d, "7FFF", DecodeMode::Transformed).unwrap(), "32767");

        let d = desc("{type: f, size: 2, byte_order: msb, base: 10}");
        assert_eq!(decode(&d, "02", DecodeMode::Transformed).unwrap(), "100.0");
    }

    #[test]
    fn plain_and_text_values() {
        let d = desc("{type: f, scale: 2.5}");
        assert_eq!(decode(&d, "3", DecodeMode::Transformed).unwrap(), "7.5");
        let d = desc("{type: s}");
        assert_eq!(decode(&d, "hello", DecodeMode::Transformed).unwrap(), "hello");
        let d = desc("{type: b}");
        assert_eq!(decode(&d, "true", DecodeMode::Raw).unwrap(), "true");
    }

    #[test]
    fn assertion_mismatch_is_reported() {
        let d = desc("{type: i, size: 2, assertion: 1}");
        assert_eq!(decode(&d, "01", DecodeMode::Transformed).unwrap(), "1");
        let err = decode(&d, "02", DecodeMode::Transformed).unwrap_err();
        assert_eq!(
            err.sentinel().as_deref(),
            Some("Assertion failed with value: 2")
        );
    }

    #[test]
    fn rejects_malformed_raw() {
        let d = desc("{type: i, size: 4}");
        assert!(decode(&d, "xyz", DecodeMode::Transformed).is_err());
        assert!(decode(&d, "123456", DecodeMode::Transformed).is_err());
        assert!(decode(&d, "", DecodeMode::Transformed).is_err());
    }

    #[test]
    fn numeric_wire_values_become_register_text() {
        let d = desc("{type: i, size: 4, scale: 0.1}");
        let text = raw_text(&d, &RawValue::Number("100".into())).unwrap();
        assert_eq!(text, "0064");
        assert_eq!(decode(&d, &text, DecodeMode::Transformed).unwrap(), "10");
        // hex text from the device is untouched
        let text = raw_text(&d, &RawValue::Text("100".into())).unwrap();
        assert_eq!(decode(&d, &text, DecodeMode::Transformed).unwrap(), "26");

        let d = desc("{type: i, size: 4, byte_order: msb, signed: true}");
        let text = raw_text(&d, &RawValue::Number("-1".into())).unwrap();
        assert_eq!(text, "FFFF");
        assert_eq!(decode(&d, &text, DecodeMode::Transformed).unwrap(), "-1");

        let d = desc("{type: i, size: 2}");
        assert!(raw_text(&d, &RawValue::Number("-1".into())).is_err());
        assert!(raw_text(&d, &RawValue::Number("256".into())).is_err());
        assert!(raw_text(&d, &RawValue::Number("1.5".into())).is_err());

        let d = desc("{type: f, scale: 2.5}");
        let text = raw_text(&d, &RawValue::Number("3".into())).unwrap();
        assert_eq!(decode(&d, &text, DecodeMode::Transformed).unwrap(), "7.5");
    }

    #[test]
    fn format_raw_inverts_parse_raw() {
        let d = desc("{type: i, size: 8, word: 2, byte_order: lsb}");
        let layout = d.layout().unwrap();
        let v = parse_raw(layout, "12345678").unwrap();
        assert_eq!(format_raw(layout, v).unwrap(), "12345678");
        assert!(format_raw(layout, 1u128 << 40).is_err());
    }
}
