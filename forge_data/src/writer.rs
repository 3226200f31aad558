//! Package object writer: the generic, descriptor-driven serializer and
//! the integer encodings shared with the reader.

use std::any::Any;
use std::io::{Read, Write};

use forge_common::{BinaryBlob, Error, Result};

use crate::builder::SourceWriter;
use crate::schema::{
    ConfigNameIndex, ConfigurableRead, EnumSlot, MainType, NumberBits, NumberRepr, NumberSlot,
    NumericType, ObjectPtrSlot, ObjectRef, ObjectSpanSlot, ReflectEnum, Scalar, StructType, Value,
    ValueType, CONFIGURABLE_STATE_CONFIGURED, CONFIGURABLE_STATE_DEFAULT,
    CONFIGURABLE_STATE_EXPLICIT, VALUE_TYPE_TAG_COMPOUND, VALUE_TYPE_TAG_NUMERIC,
    VALUE_TYPE_TAG_STRUCTURE, VALUE_TYPE_TAG_VECTOR,
};

/// Encodes `value` as the smallest of u8/u16/u32/u64 holding
/// `(value << 2) | tag`, where the low two bits select the width.
pub fn write_compact_index(out: &mut dyn Write, value: u64) -> Result<()> {
    if value <= 0x3f {
        out.write_all(&[((value as u8) << 2)])?;
    } else if value <= 0x3fff {
        out.write_all(&((((value as u16) << 2) | 1).to_le_bytes()))?;
    } else if value <= 0x3fff_ffff {
        out.write_all(&((((value as u32) << 2) | 2).to_le_bytes()))?;
    } else if value <= 0x3fff_ffff_ffff_ffff {
        out.write_all(&(((value << 2) | 3).to_le_bytes()))?;
    } else {
        return Err(Error::IntegerOverflow);
    }

    Ok(())
}

pub fn read_compact_index(input: &mut dyn Read) -> Result<u64> {
    let mut first = [0u8; 1];
    input.read_exact(&mut first)?;

    let tag = first[0] & 3;
    let extra = match tag {
        0 => 0,
        1 => 1,
        2 => 3,
        _ => 7,
    };

    let mut bytes = [0u8; 8];
    bytes[0] = first[0];
    input.read_exact(&mut bytes[1..1 + extra])?;

    Ok(u64::from_le_bytes(bytes) >> 2)
}

/// Writes `value` with the narrowest unsigned width admitting `max`.
pub fn write_uint_for_size(out: &mut dyn Write, value: u64, max: u64) -> Result<()> {
    if max <= 0xff {
        out.write_all(&(value as u8).to_le_bytes())?;
    } else if max <= 0xffff {
        out.write_all(&(value as u16).to_le_bytes())?;
    } else if max <= 0xffff_ffff {
        out.write_all(&(value as u32).to_le_bytes())?;
    } else {
        out.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

pub fn read_uint_for_size(input: &mut dyn Read, max: u64) -> Result<u64> {
    let width = if max <= 0xff {
        1
    } else if max <= 0xffff {
        2
    } else if max <= 0xffff_ffff {
        4
    } else {
        8
    };

    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes[..width])?;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn write_struct(
    src: &mut SourceWriter<'_>,
    ty: &'static StructType,
    obj: &dyn Any,
    out: &mut BinaryBlob,
) -> Result<()> {
    for field in ty.fields {
        write_value(src, (field.get)(obj), out)?;
    }

    Ok(())
}

fn write_value(src: &mut SourceWriter<'_>, value: Value<'_>, out: &mut BinaryBlob) -> Result<()> {
    match value {
        Value::Enum(slot) => write_enum(src, slot, out),
        Value::Number(slot) => write_number(src, slot, out),
        Value::Struct { ty, obj } => write_struct(src, ty, obj, out),
        Value::ValueType(value_type) => write_value_type(src, value_type, out),
        Value::GlobalString(index) => {
            let resolver = src.resolver();
            let text = resolver.global_string(index.0)?;
            let pooled = src.index_string(text);
            write_compact_index(out, pooled as u64)
        }
        Value::TempString(index) => {
            if !src.writes_temp_strings() {
                return Ok(());
            }

            let resolver = src.resolver();
            let text = resolver.temp_string(index.0)?;
            let pooled = src.index_string(text);
            write_compact_index(out, pooled as u64)
        }
        Value::ObjectPtr(slot) => write_object_ptr(src, slot, out),
        Value::ObjectSpan(slot) => write_object_span(src, slot, out),
        Value::BinaryContent(index) => {
            let resolver = src.resolver();
            let bytes = resolver.binary_content(index.0)?.to_vec();
            let pooled = src.index_binary_content(BinaryBlob::from_vec(bytes));
            write_compact_index(out, pooled as u64)
        }
    }
}

fn write_enum(src: &mut SourceWriter<'_>, slot: &dyn EnumSlot, out: &mut BinaryBlob) -> Result<()> {
    let ty = slot.enum_type();
    let max = ty.max_value_exclusive - 1;

    match slot.read() {
        ConfigurableRead::Plain(value) => write_uint_for_size(out, value, max),
        ConfigurableRead::Default => {
            out.append(&[CONFIGURABLE_STATE_DEFAULT]);
            Ok(())
        }
        ConfigurableRead::Configured(key) => {
            out.append(&[CONFIGURABLE_STATE_CONFIGURED]);
            write_config_ref(src, key, ty.main_type, out)
        }
        ConfigurableRead::Explicit(value) => {
            out.append(&[CONFIGURABLE_STATE_EXPLICIT]);
            write_uint_for_size(out, value, max)
        }
    }
}

fn write_number(
    src: &mut SourceWriter<'_>,
    slot: &dyn NumberSlot,
    out: &mut BinaryBlob,
) -> Result<()> {
    let ty = slot.number_type();

    match slot.read() {
        ConfigurableRead::Plain(scalar) => write_scalar(ty.repr, ty.bits, scalar, out),
        ConfigurableRead::Default => {
            out.append(&[CONFIGURABLE_STATE_DEFAULT]);
            Ok(())
        }
        ConfigurableRead::Configured(key) => {
            out.append(&[CONFIGURABLE_STATE_CONFIGURED]);
            write_config_ref(src, key, ty.main_type, out)
        }
        ConfigurableRead::Explicit(scalar) => {
            out.append(&[CONFIGURABLE_STATE_EXPLICIT]);
            write_scalar(ty.repr, ty.bits, scalar, out)
        }
    }
}

fn write_scalar(repr: NumberRepr, bits: NumberBits, scalar: Scalar, out: &mut BinaryBlob) -> Result<()> {
    match (repr, scalar) {
        (NumberRepr::Float, Scalar::Float(value)) => match bits {
            NumberBits::Bits32 => out.append(&(value as f32).to_le_bytes()),
            NumberBits::Bits64 => out.append(&value.to_le_bytes()),
            _ => return Err(Error::Internal),
        },
        (NumberRepr::SignedInt, Scalar::SInt(value)) => match bits {
            NumberBits::Bits8 => out.append(&(value as i8).to_le_bytes()),
            NumberBits::Bits16 => out.append(&(value as i16).to_le_bytes()),
            NumberBits::Bits32 => out.append(&(value as i32).to_le_bytes()),
            NumberBits::Bits64 => out.append(&value.to_le_bytes()),
            _ => return Err(Error::Internal),
        },
        (NumberRepr::UnsignedInt, Scalar::UInt(value)) => match bits {
            NumberBits::Bits1 | NumberBits::Bits8 => out.append(&(value as u8).to_le_bytes()),
            NumberBits::Bits16 => out.append(&(value as u16).to_le_bytes()),
            NumberBits::Bits32 => out.append(&(value as u32).to_le_bytes()),
            NumberBits::Bits64 => out.append(&value.to_le_bytes()),
        },
        _ => return Err(Error::Internal),
    }

    Ok(())
}

pub(crate) fn read_scalar(repr: NumberRepr, bits: NumberBits, input: &mut dyn Read) -> Result<Scalar> {
    fn read_bytes<const N: usize>(input: &mut dyn Read) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        input.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    let scalar = match repr {
        NumberRepr::Float => match bits {
            NumberBits::Bits32 => Scalar::Float(f32::from_le_bytes(read_bytes(input)?) as f64),
            NumberBits::Bits64 => Scalar::Float(f64::from_le_bytes(read_bytes(input)?)),
            _ => return Err(Error::MalformedFile),
        },
        NumberRepr::SignedInt => match bits {
            NumberBits::Bits8 => Scalar::SInt(i8::from_le_bytes(read_bytes(input)?) as i64),
            NumberBits::Bits16 => Scalar::SInt(i16::from_le_bytes(read_bytes(input)?) as i64),
            NumberBits::Bits32 => Scalar::SInt(i32::from_le_bytes(read_bytes(input)?) as i64),
            NumberBits::Bits64 => Scalar::SInt(i64::from_le_bytes(read_bytes(input)?)),
            _ => return Err(Error::MalformedFile),
        },
        NumberRepr::UnsignedInt => match bits {
            NumberBits::Bits1 | NumberBits::Bits8 => {
                Scalar::UInt(u8::from_le_bytes(read_bytes(input)?) as u64)
            }
            NumberBits::Bits16 => Scalar::UInt(u16::from_le_bytes(read_bytes(input)?) as u64),
            NumberBits::Bits32 => Scalar::UInt(u32::from_le_bytes(read_bytes(input)?) as u64),
            NumberBits::Bits64 => Scalar::UInt(u64::from_le_bytes(read_bytes(input)?)),
        },
    };

    Ok(scalar)
}

fn write_config_ref(
    src: &mut SourceWriter<'_>,
    key: ConfigNameIndex,
    main_type: MainType,
    out: &mut BinaryBlob,
) -> Result<()> {
    let resolver = src.resolver();
    let name = resolver.config_key_name(key.0)?;

    let string_index = src.index_string(name);
    let key_index = src.index_config_key(string_index, main_type)?;

    write_compact_index(out, key_index as u64)
}

fn write_ptr_ref(
    src: &mut SourceWriter<'_>,
    obj: Option<ObjectRef<'_>>,
    nullable: bool,
    out: &mut BinaryBlob,
) -> Result<()> {
    match obj {
        None => {
            if !nullable {
                return Err(Error::Internal);
            }

            write_compact_index(out, 0)
        }
        Some(obj) => {
            let index = src.index_object_ref(obj, true)? as u64;
            write_compact_index(out, if nullable { index + 1 } else { index })
        }
    }
}

fn write_object_ptr(
    src: &mut SourceWriter<'_>,
    slot: &dyn ObjectPtrSlot,
    out: &mut BinaryBlob,
) -> Result<()> {
    write_ptr_ref(src, slot.read(), slot.nullable(), out)
}

fn write_object_span(
    src: &mut SourceWriter<'_>,
    slot: &dyn ObjectSpanSlot,
    out: &mut BinaryBlob,
) -> Result<()> {
    let element_ty = slot.element_type();
    let items = slot.read();

    let mut span_blob = BinaryBlob::new();
    write_compact_index(&mut span_blob, items.len() as u64)?;

    for item in items {
        write_ptr_ref(src, item, true, &mut span_blob)?;
    }

    let span_index = src.index_span_blob(element_ty.indexable, span_blob);
    write_compact_index(out, span_index as u64)
}

fn write_value_type(
    src: &mut SourceWriter<'_>,
    value_type: &ValueType,
    out: &mut BinaryBlob,
) -> Result<()> {
    match value_type {
        ValueType::Numeric(numeric) => {
            out.append(&[VALUE_TYPE_TAG_NUMERIC]);
            write_uint_for_size(
                out,
                numeric.to_raw(),
                <NumericType as ReflectEnum>::TYPE.max_value_exclusive - 1,
            )
        }
        ValueType::Vector(vector) => {
            out.append(&[VALUE_TYPE_TAG_VECTOR]);
            write_ptr_ref(src, Some(ObjectRef::from_arc(vector)), false, out)
        }
        ValueType::Compound(compound) => {
            out.append(&[VALUE_TYPE_TAG_COMPOUND]);
            write_ptr_ref(src, Some(ObjectRef::from_arc(compound)), false, out)
        }
        ValueType::Structure(structure) => {
            out.append(&[VALUE_TYPE_TAG_STRUCTURE]);
            write_ptr_ref(src, Some(ObjectRef::from_arc(structure)), false, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{read_compact_index, read_uint_for_size, write_compact_index, write_uint_for_size};

    fn encode(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact_index(&mut out, value).unwrap();
        out
    }

    #[test]
    fn compact_index_widths_and_first_bytes() {
        // Width boundaries: low two bits of the first byte are the tag.
        let cases: &[(u64, usize, u8)] = &[
            (0x0, 1, 0x00),
            (0x1, 1, 0x04),
            (0x3f, 1, 0xfc),
            (0x40, 2, 0x01),
            (0x3fff, 2, 0xfd),
            (0x4000, 4, 0x02),
            (0x3fff_ffff, 4, 0xfe),
            (0x4000_0000, 8, 0x03),
        ];

        for &(value, len, first) in cases {
            let bytes = encode(value);
            assert_eq!(bytes.len(), len, "length of {value:#x}");
            assert_eq!(bytes[0], first, "first byte of {value:#x}");
        }
    }

    #[test]
    fn compact_index_round_trip() {
        let values = [
            0u64,
            1,
            0x3f,
            0x40,
            0x3fff,
            0x4000,
            0x3fff_ffff,
            0x4000_0000,
            0x1234_5678_9abc,
            0x3fff_ffff_ffff_ffff,
        ];

        for value in values {
            let bytes = encode(value);
            let decoded = read_compact_index(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn compact_index_rejects_oversized() {
        let mut out = Vec::new();
        assert!(write_compact_index(&mut out, 0x4000_0000_0000_0000).is_err());
    }

    #[test]
    fn uint_for_size_width_follows_max() {
        let cases: &[(u64, u64, usize)] = &[
            (3, 0xff, 1),
            (3, 0x100, 2),
            (3, 0xffff, 2),
            (3, 0x10000, 4),
            (3, 0xffff_ffff, 4),
            (3, 0x1_0000_0000, 8),
        ];

        for &(value, max, len) in cases {
            let mut out = Vec::new();
            write_uint_for_size(&mut out, value, max).unwrap();
            assert_eq!(out.len(), len, "width for max {max:#x}");

            let decoded = read_uint_for_size(&mut Cursor::new(out), max).unwrap();
            assert_eq!(decoded, value);
        }
    }
}
