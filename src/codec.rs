//! Per-field value codec.
//!
//! Decodes and encodes one instance's fields in schema order:
//!
//! * array fields align to 4, read an `i32` count, then align every element to
//!   the field alignment (no padding at all when the count is 0);
//! * struct fields recurse into an inline instance of the `original_type` class;
//! * strings are length-prefixed UTF-16 (`String`, `Resource`) or ASCII
//!   (`RuntimeType`);
//! * references are plain `i32` indices, left raw until unflatten;
//! * ambiguous 4-byte `Data` fields are classified on first sight and the
//!   classification is locked into the shared field descriptor.

use crate::error::{RszError, Result};
use crate::graph::{RszInstance, RszRef, RszValue};
use crate::io::ByteCursor;
use crate::options::RszOptions;
use crate::schema::{RszClass, RszField, RszFieldType, SchemaRegistry};

/// Magnitude range accepted by the float plausibility test.
const FLOAT_MIN_MAGNITUDE: f32 = 1e-6;
const FLOAT_MAX_MAGNITUDE: f32 = 1e7;

/// State threaded through the decode of one instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecodeContext<'r> {
    pub registry: &'r SchemaRegistry,
    pub options: RszOptions,
    /// List index of the instance being decoded (struct fields inherit the
    /// owner's index).
    pub owner_index: i32,
}

/// Classifies the raw bits of an ambiguous blob.
pub(crate) fn classify_blob(bits: u32, owner_index: i32, window: i32) -> RszFieldType {
    let as_int = bits as i32;
    if as_int > 0 && as_int < owner_index && as_int > owner_index - window {
        RszFieldType::Object
    } else if looks_like_float(bits) {
        RszFieldType::F32
    } else {
        RszFieldType::S32
    }
}

fn looks_like_float(bits: u32) -> bool {
    let value = f32::from_bits(bits);
    value.is_normal() && (FLOAT_MIN_MAGNITUDE..=FLOAT_MAX_MAGNITUDE).contains(&value.abs())
}

fn conflicts(locked: RszFieldType, observed: RszFieldType) -> bool {
    matches!(
        (locked, observed),
        (RszFieldType::Object, RszFieldType::F32) | (RszFieldType::F32, RszFieldType::Object)
    )
}

/// Type the codec uses for `field` right now. Unlocked ambiguous fields of a
/// frozen registry read as plain integers.
fn effective_type(field: &RszField) -> RszFieldType {
    if field.needs_inference() {
        RszFieldType::S32
    } else {
        field.ty()
    }
}

fn check_count(count: i32, max: usize, what: &str) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .filter(|c| *c <= max)
        .ok_or_else(|| RszError::Format(format!("{what} count {count} out of range (max {max})")))
}

/// Decodes every field of `class` at the cursor position.
pub(crate) fn read_values(
    cursor: &mut ByteCursor<'_>,
    class: &RszClass,
    ctx: DecodeContext<'_>,
) -> Result<Vec<RszValue>> {
    class
        .fields
        .iter()
        .map(|field| read_field(cursor, class, field, ctx))
        .collect()
}

fn read_field(
    cursor: &mut ByteCursor<'_>,
    class: &RszClass,
    field: &RszField,
    ctx: DecodeContext<'_>,
) -> Result<RszValue> {
    let inferring = field.needs_inference() && !ctx.registry.is_frozen();
    if !field.array {
        cursor.align(field.align);
        if inferring {
            infer(cursor, class, field, ctx, true)?;
        }
        return read_element(cursor, field, ctx);
    }

    cursor.align(4);
    let count = check_count(cursor.read_i32()?, ctx.options.max_array_len, "array")?;
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        cursor.align(field.align);
        if inferring {
            infer(cursor, class, field, ctx, i == 0)?;
        }
        items.push(read_element(cursor, field, ctx)?);
    }
    Ok(RszValue::Array(items))
}

/// Peeks the next 4 bytes and classifies them. The first observation locks the
/// descriptor; later elements of the same array only check for consistency.
fn infer(
    cursor: &mut ByteCursor<'_>,
    class: &RszClass,
    field: &RszField,
    ctx: DecodeContext<'_>,
    first: bool,
) -> Result<()> {
    let bits = cursor.read_at(cursor.tell(), |c| c.read_u32())?;
    let guess = classify_blob(bits, ctx.owner_index, ctx.options.backref_window);
    if first {
        tracing::trace!(
            class = %class.name,
            field = %field.name,
            bits,
            owner = ctx.owner_index,
            ?guess,
            "locked ambiguous field type"
        );
        field.lock_type(guess);
    } else if conflicts(field.ty(), guess) {
        return Err(RszError::InferenceConflict {
            class: class.name.clone(),
            field: field.name.clone(),
        });
    }
    Ok(())
}

fn read_element(
    cursor: &mut ByteCursor<'_>,
    field: &RszField,
    ctx: DecodeContext<'_>,
) -> Result<RszValue> {
    let value = match effective_type(field) {
        RszFieldType::Object | RszFieldType::UserData => RszValue::Ref(RszRef::Raw(cursor.read_i32()?)),
        RszFieldType::Struct => {
            let class = ctx.registry.class_by_name(&field.original_type).ok_or_else(|| {
                RszError::Schema(format!(
                    "struct class {:?} of field {:?} is not in the registry",
                    field.original_type, field.name
                ))
            })?;
            let values = read_values(cursor, &class, ctx)?;
            RszValue::Struct(Box::new(RszInstance::new_struct(class, values)))
        }
        RszFieldType::Bool => RszValue::Bool(cursor.read_u8()? != 0),
        RszFieldType::S8 => RszValue::S8(cursor.read_i8()?),
        RszFieldType::U8 => RszValue::U8(cursor.read_u8()?),
        RszFieldType::S16 => RszValue::S16(cursor.read_i16()?),
        RszFieldType::U16 => RszValue::U16(cursor.read_u16()?),
        RszFieldType::S32 => RszValue::S32(cursor.read_i32()?),
        RszFieldType::U32 => RszValue::U32(cursor.read_u32()?),
        RszFieldType::S64 => RszValue::S64(cursor.read_i64()?),
        RszFieldType::U64 => RszValue::U64(cursor.read_u64()?),
        RszFieldType::F32 => RszValue::F32(cursor.read_f32()?),
        RszFieldType::F64 => RszValue::F64(cursor.read_f64()?),
        RszFieldType::String | RszFieldType::Resource => {
            cursor.align(4);
            let units = check_count(cursor.read_i32()?, ctx.options.max_string_len, "string")?;
            RszValue::String(cursor.read_utf16(units)?)
        }
        RszFieldType::RuntimeType => {
            cursor.align(4);
            let len = check_count(cursor.read_i32()?, ctx.options.max_string_len, "string")?;
            RszValue::Ascii(cursor.read_ascii(len)?)
        }
        _ => RszValue::Bytes(cursor.read_bytes(field.size)?.to_vec()),
    };
    Ok(value)
}

/// Encodes every field of `instance`. `resolve` maps a reference to the list
/// index written on disk.
pub(crate) fn write_values(
    cursor: &mut ByteCursor<'_>,
    instance: &RszInstance,
    resolve: &dyn Fn(RszRef) -> Result<i32>,
) -> Result<()> {
    let class = instance.class();
    if instance.values.len() != class.fields.len() {
        return Err(RszError::Write(format!(
            "instance of {:?} has {} values for {} fields",
            class.name,
            instance.values.len(),
            class.fields.len()
        )));
    }
    for (field, value) in class.fields.iter().zip(&instance.values) {
        write_field(cursor, class, field, value, resolve)?;
    }
    Ok(())
}

fn write_field(
    cursor: &mut ByteCursor<'_>,
    class: &RszClass,
    field: &RszField,
    value: &RszValue,
    resolve: &dyn Fn(RszRef) -> Result<i32>,
) -> Result<()> {
    if !field.array {
        cursor.align_write(field.align);
        return write_element(cursor, class, field, value, resolve);
    }
    let RszValue::Array(items) = value else {
        return Err(mismatch(class, field, value));
    };
    cursor.align_write(4);
    let count = i32::try_from(items.len())
        .map_err(|_| RszError::Write(format!("array {:?} is too long", field.name)))?;
    cursor.write_i32(count);
    for item in items {
        cursor.align_write(field.align);
        write_element(cursor, class, field, item, resolve)?;
    }
    Ok(())
}

fn mismatch(class: &RszClass, field: &RszField, value: &RszValue) -> RszError {
    let kind = match value {
        RszValue::Array(_) => "array".to_string(),
        RszValue::Struct(inner) => format!("struct {}", inner.class_name()),
        other => format!("{other:?}"),
    };
    RszError::Write(format!(
        "{}.{} ({:?}{}) cannot hold {kind}",
        class.name,
        field.name,
        field.ty(),
        if field.array { " array" } else { "" },
    ))
}

fn write_element(
    cursor: &mut ByteCursor<'_>,
    class: &RszClass,
    field: &RszField,
    value: &RszValue,
    resolve: &dyn Fn(RszRef) -> Result<i32>,
) -> Result<()> {
    // Ambiguous blobs accept whichever 4-byte shape the value carries, so graphs
    // built before inference ran still encode.
    if field.declared_type == RszFieldType::Data && field.size == 4 {
        match value {
            RszValue::S32(v) => cursor.write_i32(*v),
            RszValue::F32(v) => cursor.write_f32(*v),
            RszValue::Ref(r) => cursor.write_i32(resolve(*r)?),
            RszValue::Bytes(b) if b.len() == 4 => cursor.write_bytes(b),
            _ => return Err(mismatch(class, field, value)),
        }
        return Ok(());
    }

    match (effective_type(field), value) {
        (RszFieldType::Object | RszFieldType::UserData, RszValue::Ref(r)) => {
            cursor.write_i32(resolve(*r)?);
        }
        (RszFieldType::Struct, RszValue::Struct(inner)) => {
            if inner.class_name() != field.original_type {
                return Err(mismatch(class, field, value));
            }
            write_values(cursor, inner, resolve)?;
        }
        (RszFieldType::Bool, RszValue::Bool(v)) => cursor.write_u8(u8::from(*v)),
        (RszFieldType::S8, RszValue::S8(v)) => cursor.write_i8(*v),
        (RszFieldType::U8, RszValue::U8(v)) => cursor.write_u8(*v),
        (RszFieldType::S16, RszValue::S16(v)) => cursor.write_i16(*v),
        (RszFieldType::U16, RszValue::U16(v)) => cursor.write_u16(*v),
        (RszFieldType::S32, RszValue::S32(v)) => cursor.write_i32(*v),
        (RszFieldType::U32, RszValue::U32(v)) => cursor.write_u32(*v),
        (RszFieldType::S64, RszValue::S64(v)) => cursor.write_i64(*v),
        (RszFieldType::U64, RszValue::U64(v)) => cursor.write_u64(*v),
        (RszFieldType::F32, RszValue::F32(v)) => cursor.write_f32(*v),
        (RszFieldType::F64, RszValue::F64(v)) => cursor.write_f64(*v),
        (RszFieldType::String | RszFieldType::Resource, RszValue::String(text)) => {
            cursor.align_write(4);
            let units = text.encode_utf16().count() + 1;
            cursor.write_i32(i32::try_from(units).map_err(|_| {
                RszError::Write(format!("string in {:?} is too long", field.name))
            })?);
            cursor.write_utf16(text);
        }
        (RszFieldType::RuntimeType, RszValue::Ascii(text)) => {
            cursor.align_write(4);
            let len = i32::try_from(text.len() + 1).map_err(|_| {
                RszError::Write(format!("string in {:?} is too long", field.name))
            })?;
            cursor.write_i32(len);
            cursor.write_ascii(text)?;
        }
        (ty, RszValue::Bytes(bytes)) if is_blob_type(ty) && bytes.len() == field.size => {
            cursor.write_bytes(bytes);
        }
        _ => return Err(mismatch(class, field, value)),
    }
    Ok(())
}

fn is_blob_type(ty: RszFieldType) -> bool {
    !matches!(
        ty,
        RszFieldType::Object
            | RszFieldType::UserData
            | RszFieldType::Struct
            | RszFieldType::Bool
            | RszFieldType::S8
            | RszFieldType::U8
            | RszFieldType::S16
            | RszFieldType::U16
            | RszFieldType::S32
            | RszFieldType::U32
            | RszFieldType::S64
            | RszFieldType::U64
            | RszFieldType::F32
            | RszFieldType::F64
            | RszFieldType::String
            | RszFieldType::Resource
            | RszFieldType::RuntimeType
    )
}

/// Default value for a freshly created instance.
pub(crate) fn default_value(field: &RszField, registry: &SchemaRegistry) -> Result<RszValue> {
    if field.array {
        return Ok(RszValue::Array(Vec::new()));
    }
    let value = match effective_type(field) {
        RszFieldType::Object | RszFieldType::UserData => RszValue::Ref(RszRef::NULL),
        RszFieldType::Struct => {
            let class = registry.class_by_name(&field.original_type).ok_or_else(|| {
                RszError::Schema(format!(
                    "struct class {:?} of field {:?} is not in the registry",
                    field.original_type, field.name
                ))
            })?;
            let values = default_values(&class, registry)?;
            RszValue::Struct(Box::new(RszInstance::new_struct(class, values)))
        }
        RszFieldType::Bool => RszValue::Bool(false),
        RszFieldType::S8 => RszValue::S8(0),
        RszFieldType::U8 => RszValue::U8(0),
        RszFieldType::S16 => RszValue::S16(0),
        RszFieldType::U16 => RszValue::U16(0),
        RszFieldType::S32 => RszValue::S32(0),
        RszFieldType::U32 => RszValue::U32(0),
        RszFieldType::S64 => RszValue::S64(0),
        RszFieldType::U64 => RszValue::U64(0),
        RszFieldType::F32 => RszValue::F32(0.0),
        RszFieldType::F64 => RszValue::F64(0.0),
        RszFieldType::String | RszFieldType::Resource => RszValue::String(String::new()),
        RszFieldType::RuntimeType => RszValue::Ascii(String::new()),
        _ => RszValue::Bytes(vec![0; field.size]),
    };
    Ok(value)
}

/// Default values for every field of `class`.
pub(crate) fn default_values(class: &RszClass, registry: &SchemaRegistry) -> Result<Vec<RszValue>> {
    class
        .fields
        .iter()
        .map(|field| default_value(field, registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn registry_with(fields: Vec<RszField>) -> (SchemaRegistry, Rc<RszClass>) {
        let mut registry = SchemaRegistry::new();
        let class = registry.register(RszClass::new(0x10, 1, "app.Probe", fields));
        (registry, class)
    }

    fn ctx(registry: &SchemaRegistry, owner_index: i32) -> DecodeContext<'_> {
        DecodeContext {
            registry,
            options: RszOptions::default(),
            owner_index,
        }
    }

    #[test]
    fn classification_windows() {
        assert_eq!(classify_blob(3, 10, 101), RszFieldType::Object);
        assert_eq!(classify_blob(0, 10, 101), RszFieldType::S32);
        assert_eq!(classify_blob(10, 10, 101), RszFieldType::S32);
        assert_eq!(classify_blob(5, 200, 101), RszFieldType::S32);
        assert_eq!(classify_blob(150, 200, 101), RszFieldType::Object);
        assert_eq!(classify_blob(1.5f32.to_bits(), 10, 101), RszFieldType::F32);
        assert_eq!(classify_blob(u32::MAX, 10, 101), RszFieldType::S32);
        assert_eq!(classify_blob(1e12f32.to_bits(), 10, 101), RszFieldType::S32);
    }

    #[test]
    fn empty_array_consumes_only_the_count() -> Result<()> {
        let (registry, class) =
            registry_with(vec![RszField::new("items", RszFieldType::Vec4).array()]);
        // One pad byte so the 16-byte element alignment would be visible.
        let bytes = [0u8, 0, 0, 0, 0, 0, 0, 0, 0xAA];
        let mut cursor = ByteCursor::from_slice(&bytes);
        let values = read_values(&mut cursor, &class, ctx(&registry, 1))?;
        assert_eq!(cursor.tell(), 4);
        assert!(values[0].as_array().is_some_and(|a| a.is_empty()));

        let mut out = ByteCursor::new();
        let instance = RszInstance::new(Rc::clone(&class), values);
        write_values(&mut out, &instance, &|_| Ok(0))?;
        assert_eq!(out.len(), 4);
        Ok(())
    }

    #[test]
    fn array_elements_are_aligned() -> Result<()> {
        let (registry, class) = registry_with(vec![
            RszField::new("flag", RszFieldType::U8),
            RszField::new("points", RszFieldType::Vec2).array().with_layout(8, 8),
        ]);
        let instance = RszInstance::new(
            Rc::clone(&class),
            vec![
                RszValue::U8(1),
                RszValue::Array(vec![RszValue::Bytes(vec![1; 8]), RszValue::Bytes(vec![2; 8])]),
            ],
        );
        let mut out = ByteCursor::new();
        write_values(&mut out, &instance, &|_| Ok(0))?;
        // flag(1) pad(3) count(4) elements(2 x 8)
        assert_eq!(out.len(), 24);

        let bytes = out.into_inner();
        let mut cursor = ByteCursor::from_slice(&bytes);
        let values = read_values(&mut cursor, &class, ctx(&registry, 1))?;
        assert_eq!(values[1].as_array().map(<[RszValue]>::len), Some(2));
        Ok(())
    }

    #[test]
    fn negative_and_oversized_counts_are_rejected() {
        let (registry, class) = registry_with(vec![RszField::new("items", RszFieldType::S32).array()]);
        for count in [-1i32, 40_000] {
            let bytes = count.to_le_bytes();
            let mut cursor = ByteCursor::from_slice(&bytes);
            let result = read_values(&mut cursor, &class, ctx(&registry, 1));
            assert!(matches!(result, Err(RszError::Format(_))));
        }
    }

    #[test]
    fn ambiguous_array_conflict() {
        let (registry, class) = registry_with(vec![RszField::new("blob", RszFieldType::Data)
            .array()
            .with_layout(4, 4)]);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&2.5f32.to_le_bytes());
        let mut cursor = ByteCursor::from_slice(&bytes);
        let result = read_values(&mut cursor, &class, ctx(&registry, 9));
        assert!(matches!(result, Err(RszError::InferenceConflict { .. })));
    }

    #[test]
    fn frozen_registry_reads_unlocked_blobs_as_int() -> Result<()> {
        let (registry, class) =
            registry_with(vec![RszField::new("blob", RszFieldType::Data).with_layout(4, 4)]);
        registry.freeze();
        let bytes = 1.5f32.to_le_bytes();
        let mut cursor = ByteCursor::from_slice(&bytes);
        let values = read_values(&mut cursor, &class, ctx(&registry, 3))?;
        assert_eq!(values[0].as_i32(), Some(1.5f32.to_bits() as i32));
        assert!(class.fields[0].needs_inference());
        Ok(())
    }

    #[test]
    fn writer_rejects_mismatched_values() {
        let (_registry, class) = registry_with(vec![RszField::new("hp", RszFieldType::S32)]);
        let instance = RszInstance::new(Rc::clone(&class), vec![RszValue::String("x".into())]);
        let mut out = ByteCursor::new();
        assert!(matches!(
            write_values(&mut out, &instance, &|_| Ok(0)),
            Err(RszError::Write(_))
        ));
    }
}
