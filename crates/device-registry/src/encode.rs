use crate::decode::{format_number, format_raw, parse_raw};
use crate::error::{CodecError, Result};
use crate::property::{BitLayout, Encoding, PropertyDescriptor, Transform};
use crate::types::ResourceOperation;

/// A value about to be written, after argument resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteValue {
    pub value: String,
    /// Set when the value came out of a mapping table and is already in wire form.
    pub mapped: bool,
}

impl WriteValue {
    pub fn engineering(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mapped: false,
        }
    }
}

/// Pick the value for a write: the caller's argument, else the operation default,
/// else the property default. Operation mappings take precedence over property mappings.
pub fn resolve_argument(
    op: &ResourceOperation,
    desc: &PropertyDescriptor,
    supplied: Option<&str>,
) -> Option<WriteValue> {
    let value = supplied
        .map(str::to_string)
        .or_else(|| op.default.clone())
        .or_else(|| desc.default_value.clone())?;
    let mapped = op
        .mappings
        .get(&value)
        .or_else(|| desc.mappings.get(&value))
        .cloned();
    Some(match mapped {
        Some(raw) => WriteValue { value: raw, mapped: true },
        None => WriteValue::engineering(value),
    })
}

/// Wire form of a write value.
pub fn encode(desc: &PropertyDescriptor, arg: &WriteValue) -> Result<String> {
    if !desc.kind.is_numeric() || (arg.mapped && desc.layout().is_none()) {
        return Ok(arg.value.clone());
    }
    match &desc.encoding {
        Encoding::Plain => Ok(format_number(
            desc.kind,
            inverse(&desc.transform, &arg.value)?,
        )),
        Encoding::Bits(layout) => {
            let field = field_value(desc, arg)?;
            format_raw(layout, field << layout.shift)
        }
    }
}

/// Unshifted register field for a write value, in two's complement when negative.
pub fn field_value(desc: &PropertyDescriptor, arg: &WriteValue) -> Result<u128> {
    let layout = desc.layout().ok_or(CodecError::NoLayout)?;
    if arg.mapped {
        return parse_hex(&arg.value).ok_or_else(|| CodecError::InvalidValue {
            value: arg.value.clone(),
            reason: "mapped value is not hexadecimal",
        });
    }
    let v = inverse(&desc.transform, &arg.value)?.round();
    if !v.is_finite() || v.abs() >= 2f64.powi(127) {
        return Err(CodecError::InvalidValue {
            value: arg.value.clone(),
            reason: "out of range",
        });
    }
    to_field(layout, v as i128, &arg.value)
}

/// Read-modify-write of a partial register: bits outside the mask keep their
/// current value, `field` is shifted into the masked bits.
pub fn masked_merge(desc: &PropertyDescriptor, field: u128, current_raw: &str) -> Result<String> {
    let layout = desc.layout().ok_or(CodecError::NoLayout)?;
    let current = parse_raw(layout, current_raw)?;
    let positioned = field << layout.shift;
    let merged = if layout.mask == 0 {
        positioned
    } else {
        (current & !layout.mask) | (positioned & layout.mask)
    };
    format_raw(layout, merged)
}

fn inverse(t: &Transform, value: &str) -> Result<f64> {
    let invalid = |reason| CodecError::InvalidValue {
        value: value.to_string(),
        reason,
    };
    let x: f64 = value.trim().parse().map_err(|_| invalid("not a number"))?;
    let mut v = (x - t.offset) / t.scale;
    if t.base != 0.0 {
        if v <= 0.0 {
            return Err(invalid("no logarithm in the declared base"));
        }
        v = v.ln() / t.base.ln();
    }
    Ok(v)
}

fn to_field(layout: &BitLayout, v: i128, text: &str) -> Result<u128> {
    let width = layout.field_bits();
    let overflow = || CodecError::Overflow {
        value: text.to_string(),
        bits: width,
    };
    if width == 0 {
        return Err(overflow());
    }
    if v < 0 {
        if !layout.signed {
            return Err(CodecError::InvalidValue {
                value: text.to_string(),
                reason: "negative value for an unsigned field",
            });
        }
        if width >= 128 {
            return Ok(v as u128);
        }
        if v < -(1i128 << (width - 1)) {
            return Err(overflow());
        }
        Ok((v + (1i128 << width)) as u128)
    } else {
        let u = v as u128;
        if width < 128 && u >> width != 0 {
            return Err(overflow());
        }
        Ok(u)
    }
}

fn parse_hex(s: &str) -> Option<u128> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u128::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeMode};
    use crate::types::{Action, ByteOrder, PropertyValue};

    fn desc(yaml: &str) -> PropertyDescriptor {
        let pv: PropertyValue = serde_yaml::from_str(yaml).unwrap();
        PropertyDescriptor::compile("obj", &pv).unwrap()
    }

    fn eng(v: &str) -> WriteValue {
        WriteValue::engineering(v)
    }

    #[test]
    fn round_trips_unmasked_descriptors() {
        let cases = [
            ("{type: i, size: 4, scale: 0.1}", ["10", "0", "6553"]),
            ("{type: i, size: 4, signed: true}", ["-1", "-32768", "32767"]),
            ("{type: f, size: 4, scale: 0.5, offset: -20}", ["-20.0", "12.5", "0.5"]),
            ("{type: i, size: 8, word: 2, byte_order: lsb}", ["1", "305419896", "65536"]),
            ("{type: f, offset: 3}", ["4.5", "-1.0", "3.0"]),
        ];
        for (yaml, values) in cases {
            let d = desc(yaml);
            for v in values {
                let raw = encode(&d, &eng(v)).unwrap();
                assert_eq!(decode(&d, &raw, DecodeMode::Transformed).unwrap(), v, "{yaml} {v}");
            }
        }
    }

    #[test]
    fn pads_to_declared_size() {
        let d = desc("{type: i, size: 4}");
        assert_eq!(encode(&d, &eng("1")).unwrap(), "0001");
        assert!(encode(&d, &eng("70000")).is_err());
        assert!(encode(&d, &eng("-1")).is_err());
    }

    #[test]
    fn masked_merge_keeps_bits_outside_mask() {
        let d = desc("{type: i, size: 4, mask: 0xF0, shift: 4}");
        let mask = 0xF0u128;
        for current in [0u128, 0x00A5, 0xFFFF, 0x1234, 0x0F0F] {
            for field in 0u128..16 {
                let current_raw = format!("{current:04X}");
                let merged = masked_merge(&d, field, &current_raw).unwrap();
                let merged = u128::from_str_radix(&merged, 16).unwrap();
                assert_eq!(merged & !mask, current & !mask);
                assert_eq!((merged & mask) >> 4, field);
            }
        }
    }

    #[test]
    fn empty_field_rejects_every_value() {
        let layout = BitLayout {
            size: 4,
            word: 4,
            order: ByteOrder::Msb,
            signed: true,
            mask: 0x0F,
            shift: 4,
        };
        assert_eq!(layout.field_bits(), 0);
        for v in [-1, 0, 1] {
            let err = to_field(&layout, v, &v.to_string()).unwrap_err();
            assert!(matches!(err, CodecError::Overflow { bits: 0, .. }), "{err}");
        }
    }

    #[test]
    fn masked_write_differs_from_plain_padding() {
        let d = desc("{type: i, size: 4, mask: 0xF0, shift: 4}");
        let field = field_value(&d, &eng("1")).unwrap();
        let merged = masked_merge(&d, field, "0A05").unwrap();
        assert_eq!(merged, "0A15");
        assert_ne!(merged, "0001");
    }

    #[test]
    fn argument_resolution_order() {
        let d = desc("{type: i, size: 2, default_value: 7, mappings: {on: \"FF\"}}");
        let mut op = ResourceOperation::on_object(Action::Set, "obj");
        assert_eq!(resolve_argument(&op, &d, Some("3")), Some(eng("3")));
        assert_eq!(resolve_argument(&op, &d, None), Some(eng("7")));
        op.default = Some("5".into());
        assert_eq!(resolve_argument(&op, &d, None), Some(eng("5")));

        let mapped = resolve_argument(&op, &d, Some("on")).unwrap();
        assert!(mapped.mapped);
        assert_eq!(encode(&d, &mapped).unwrap(), "FF");

        op.mappings.insert("on".into(), "01".into());
        let mapped = resolve_argument(&op, &d, Some("on")).unwrap();
        assert_eq!(encode(&d, &mapped).unwrap(), "01");
    }

    #[test]
    fn non_numeric_passes_through() {
        let d = desc("{type: s}");
        assert_eq!(encode(&d, &eng("open")).unwrap(), "open");
        assert!(field_value(&d, &eng("open")).is_err());
    }
}
