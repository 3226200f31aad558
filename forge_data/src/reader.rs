//! Generic package reader.
//!
//! Mirrors the writer: parses the container tables, then materializes the
//! typed object graph in two passes (descriptor-driven field decode, then
//! pointer fixup in dependency order). Cyclic packages fail to resolve and
//! are rejected.

use std::any::Any;
use std::io::Read;
use std::sync::Arc;

use forge_common::{Error, Result};

use crate::builder::StringResolver;
use crate::schema::{
    struct_type_for, ArcAny, BinaryContentIndex, BoxAny, CompoundNumericType, ConfigNameIndex,
    GlobalStringIndex, IndexableStructType, MainType, NumericType, ReflectEnum, ReflectStruct,
    Scalar, StructType, StructureType, TempStringIndex, ValueMut, ValueType, VectorNumericType,
    CONFIGURABLE_STATE_CONFIGURED, CONFIGURABLE_STATE_DEFAULT, CONFIGURABLE_STATE_EXPLICIT,
    VALUE_TYPE_TAG_COMPOUND, VALUE_TYPE_TAG_NUMERIC, VALUE_TYPE_TAG_STRUCTURE,
    VALUE_TYPE_TAG_VECTOR,
};
use crate::writer::{read_compact_index, read_scalar, read_uint_for_size};
use crate::{PACKAGE_IDENTIFIER, PACKAGE_VERSION};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfigKeyEntry {
    pub string_index: usize,
    pub main_type: MainType,
}

/// A fully loaded package.
pub struct Package {
    version: u32,
    strings: Vec<String>,
    config_keys: Vec<ConfigKeyEntry>,
    content_sizes: Vec<u64>,
    objects: Vec<Vec<ArcAny>>,
}

#[derive(Copy, Clone)]
enum Fix {
    None,
    Ptr {
        target: IndexableStructType,
        index: Option<usize>,
    },
    Span {
        element: IndexableStructType,
        index: usize,
    },
    ValueTypePtr {
        tag: u8,
        index: usize,
    },
}

impl Fix {
    fn value_type_target(tag: u8) -> Result<IndexableStructType> {
        match tag {
            VALUE_TYPE_TAG_VECTOR => Ok(IndexableStructType::VectorNumericType),
            VALUE_TYPE_TAG_COMPOUND => Ok(IndexableStructType::CompoundNumericType),
            VALUE_TYPE_TAG_STRUCTURE => Ok(IndexableStructType::StructureType),
            _ => Err(Error::MalformedFile),
        }
    }
}

struct LoadLimits {
    string_count: usize,
    config_key_count: usize,
    content_count: usize,
    object_counts: Vec<usize>,
    span_counts: Vec<usize>,
    allow_temp_strings: bool,
}

impl Package {
    /// Loads a package from a sequential stream.
    ///
    /// With `allow_temp_strings` unset, temp-string fields are expected to
    /// be absent from the wire (the writer skips them symmetrically).
    /// Binary content payloads are only consumed when `binary_content` is
    /// provided.
    pub fn load<R: Read>(
        mut input: R,
        allow_temp_strings: bool,
        binary_content: Option<&mut Vec<Vec<u8>>>,
    ) -> Result<Self> {
        let input: &mut dyn Read = &mut input;

        let identifier = read_u32(input)?;
        if identifier == 0 {
            // A zero identifier at byte 0 marks an incomplete write.
            tracing::error!("package was not completely written");
            return Err(Error::MalformedFile);
        }
        if identifier != PACKAGE_IDENTIFIER {
            return Err(Error::MalformedFile);
        }

        let version = read_u32(input)?;
        if version != PACKAGE_VERSION {
            return Err(Error::MalformedFile);
        }

        let string_count = read_count(input)?;
        let config_key_count = read_count(input)?;
        let content_count = read_count(input)?;

        let mut string_lengths = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            string_lengths.push(read_count(input)?);
        }

        let mut strings = Vec::with_capacity(string_count);
        for length in string_lengths {
            let mut bytes = vec![0u8; length + 1];
            input.read_exact(&mut bytes)?;

            if bytes.pop() != Some(0) {
                return Err(Error::MalformedFile);
            }

            strings.push(String::from_utf8(bytes).map_err(|_| Error::InvalidUnicode)?);
        }

        let mut config_keys = Vec::with_capacity(config_key_count);
        for _ in 0..config_key_count {
            let string_index = read_count(input)?;
            if string_index >= strings.len() {
                return Err(Error::MalformedFile);
            }

            let main_type = MainType::from_raw(read_uint_for_size(input, MainType::COUNT - 1)?)
                .ok_or(Error::MalformedFile)?;

            config_keys.push(ConfigKeyEntry {
                string_index,
                main_type,
            });
        }

        let mut content_sizes = Vec::with_capacity(content_count);
        for _ in 0..content_count {
            content_sizes.push(read_compact_index(input)?);
        }

        let mut span_counts = Vec::with_capacity(IndexableStructType::COUNT);
        let mut object_counts = Vec::with_capacity(IndexableStructType::COUNT);
        for _ in 0..IndexableStructType::COUNT {
            span_counts.push(read_count(input)?);
            object_counts.push(read_count(input)?);
        }

        let limits = LoadLimits {
            string_count: strings.len(),
            config_key_count: config_keys.len(),
            content_count,
            object_counts,
            span_counts,
            allow_temp_strings,
        };

        // Span bodies: per element type, a count followed by nullable
        // element references.
        let mut spans: Vec<Vec<Vec<Option<usize>>>> = Vec::with_capacity(IndexableStructType::COUNT);
        for (type_index, &span_count) in limits.span_counts.iter().enumerate() {
            let mut type_spans = Vec::with_capacity(span_count);

            for _ in 0..span_count {
                let element_count = read_count(input)?;
                let mut elements = Vec::with_capacity(element_count);

                for _ in 0..element_count {
                    let raw = read_compact_index(input)? as usize;
                    let element = match raw {
                        0 => None,
                        _ => {
                            let index = raw - 1;
                            if index >= limits.object_counts[type_index] {
                                return Err(Error::MalformedFile);
                            }
                            Some(index)
                        }
                    };

                    elements.push(element);
                }

                type_spans.push(elements);
            }

            spans.push(type_spans);
        }

        // Object bodies, pass 1: field decode with recorded pointer fixes.
        let mut pending: Vec<(usize, usize, BoxAny, Vec<Fix>)> = Vec::new();
        for (type_index, &object_count) in limits.object_counts.iter().enumerate() {
            let ty = struct_type_for(IndexableStructType::ALL[type_index]);

            for object_index in 0..object_count {
                let mut obj = (ty.create)();
                let mut fixes = Vec::new();
                decode_struct(input, &limits, ty, &mut *obj, &mut fixes)?;
                pending.push((type_index, object_index, obj, fixes));
            }
        }

        // Pass 2: resolve pointers in dependency order. No progress in a
        // full sweep means the package encodes a reference cycle.
        let mut materialized: Vec<Vec<Option<ArcAny>>> = limits
            .object_counts
            .iter()
            .map(|&count| vec![None; count])
            .collect();

        while !pending.is_empty() {
            let mut remaining = Vec::with_capacity(pending.len());
            let mut progressed = false;

            for (type_index, object_index, mut obj, fixes) in pending {
                if !fixes_ready(&fixes, &materialized, &spans) {
                    remaining.push((type_index, object_index, obj, fixes));
                    continue;
                }

                let ty = struct_type_for(IndexableStructType::ALL[type_index]);
                let mut cursor = 0;
                apply_struct(ty, &mut *obj, &fixes, &mut cursor, &materialized, &spans)?;

                materialized[type_index][object_index] = Some(Arc::from(obj));
                progressed = true;
            }

            if !progressed {
                tracing::error!("package object graph contains a reference cycle");
                return Err(Error::MalformedFile);
            }

            pending = remaining;
        }

        let objects = materialized
            .into_iter()
            .map(|list| list.into_iter().map(|obj| obj.expect("resolved")).collect())
            .collect();

        if let Some(out) = binary_content {
            out.clear();
            for &size in &content_sizes {
                let mut bytes = vec![0u8; size as usize];
                input.read_exact(&mut bytes)?;
                out.push(bytes);
            }
        }

        Ok(Self {
            version,
            strings,
            config_keys,
            content_sizes,
            objects,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn string(&self, index: usize) -> Result<&str> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(Error::KeyNotFound)
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn config_key(&self, index: usize) -> Result<ConfigKeyEntry> {
        self.config_keys.get(index).copied().ok_or(Error::KeyNotFound)
    }

    pub fn config_key_count(&self) -> usize {
        self.config_keys.len()
    }

    pub fn binary_content_count(&self) -> usize {
        self.content_sizes.len()
    }

    pub fn objects(&self, ty: IndexableStructType) -> &[ArcAny] {
        &self.objects[ty.index()]
    }

    pub fn objects_of<T: ReflectStruct>(&self) -> Result<Vec<Arc<T>>> {
        self.objects(T::TYPE.indexable)
            .iter()
            .map(|obj| Arc::clone(obj).downcast::<T>().map_err(|_| Error::Internal))
            .collect()
    }
}

fn read_u32(input: &mut dyn Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_count(input: &mut dyn Read) -> Result<usize> {
    let value = read_compact_index(input)?;
    usize::try_from(value).map_err(|_| Error::IntegerOverflow)
}

fn decode_struct(
    input: &mut dyn Read,
    limits: &LoadLimits,
    ty: &'static StructType,
    obj: &mut dyn Any,
    fixes: &mut Vec<Fix>,
) -> Result<()> {
    for field in ty.fields {
        decode_value(input, limits, (field.get_mut)(obj), fixes)?;
    }

    Ok(())
}

fn decode_value(
    input: &mut dyn Read,
    limits: &LoadLimits,
    value: ValueMut<'_>,
    fixes: &mut Vec<Fix>,
) -> Result<()> {
    match value {
        ValueMut::Enum(slot) => {
            let ty = slot.enum_type();
            let max = ty.max_value_exclusive - 1;

            if slot.is_configurable() {
                match read_u8(input)? {
                    CONFIGURABLE_STATE_DEFAULT => {}
                    CONFIGURABLE_STATE_CONFIGURED => {
                        let index = read_count(input)?;
                        check_config_key(limits, index)?;
                        slot.set_configured(ConfigNameIndex(index))?;
                    }
                    CONFIGURABLE_STATE_EXPLICIT => {
                        slot.set_explicit(read_uint_for_size(input, max)?)?;
                    }
                    _ => return Err(Error::MalformedFile),
                }
            } else {
                slot.set_explicit(read_uint_for_size(input, max)?)?;
            }

            Ok(())
        }
        ValueMut::Number(slot) => {
            let ty = slot.number_type();

            if slot.is_configurable() {
                match read_u8(input)? {
                    CONFIGURABLE_STATE_DEFAULT => {}
                    CONFIGURABLE_STATE_CONFIGURED => {
                        let index = read_count(input)?;
                        check_config_key(limits, index)?;
                        slot.set_configured(ConfigNameIndex(index))?;
                    }
                    CONFIGURABLE_STATE_EXPLICIT => {
                        slot.set_explicit(read_scalar(ty.repr, ty.bits, input)?)?;
                    }
                    _ => return Err(Error::MalformedFile),
                }
            } else {
                slot.set_explicit(read_scalar(ty.repr, ty.bits, input)?)?;
            }

            Ok(())
        }
        ValueMut::Struct { ty, obj } => decode_struct(input, limits, ty, obj, fixes),
        ValueMut::ValueType(slot) => {
            let tag = read_u8(input)?;

            if tag == VALUE_TYPE_TAG_NUMERIC {
                let raw = read_uint_for_size(
                    input,
                    <NumericType as ReflectEnum>::TYPE.max_value_exclusive - 1,
                )?;
                *slot = ValueType::Numeric(NumericType::from_raw(raw).ok_or(Error::MalformedFile)?);
                fixes.push(Fix::None);
                return Ok(());
            }

            let target = Fix::value_type_target(tag)?;
            let index = read_count(input)?;
            if index >= limits.object_counts[target.index()] {
                return Err(Error::MalformedFile);
            }

            fixes.push(Fix::ValueTypePtr { tag, index });
            Ok(())
        }
        ValueMut::GlobalString(slot) => {
            let index = read_count(input)?;
            if index >= limits.string_count {
                return Err(Error::MalformedFile);
            }

            *slot = GlobalStringIndex(index);
            Ok(())
        }
        ValueMut::TempString(slot) => {
            if !limits.allow_temp_strings {
                return Ok(());
            }

            let index = read_count(input)?;
            if index >= limits.string_count {
                return Err(Error::MalformedFile);
            }

            *slot = TempStringIndex(index);
            Ok(())
        }
        ValueMut::ObjectPtr(slot) => {
            let target = slot.target_type().indexable;
            let raw = read_count(input)?;

            let index = if slot.nullable() {
                match raw {
                    0 => None,
                    _ => Some(raw - 1),
                }
            } else {
                Some(raw)
            };

            if let Some(index) = index {
                if index >= limits.object_counts[target.index()] {
                    return Err(Error::MalformedFile);
                }
            }

            fixes.push(Fix::Ptr { target, index });
            Ok(())
        }
        ValueMut::ObjectSpan(slot) => {
            let element = slot.element_type().indexable;
            let index = read_count(input)?;
            if index >= limits.span_counts[element.index()] {
                return Err(Error::MalformedFile);
            }

            fixes.push(Fix::Span { element, index });
            Ok(())
        }
        ValueMut::BinaryContent(slot) => {
            let index = read_count(input)?;
            if index >= limits.content_count {
                return Err(Error::MalformedFile);
            }

            *slot = BinaryContentIndex(index);
            Ok(())
        }
    }
}

fn read_u8(input: &mut dyn Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    input.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn check_config_key(limits: &LoadLimits, index: usize) -> Result<()> {
    if index >= limits.config_key_count {
        return Err(Error::MalformedFile);
    }

    Ok(())
}

fn fixes_ready(
    fixes: &[Fix],
    materialized: &[Vec<Option<ArcAny>>],
    spans: &[Vec<Vec<Option<usize>>>],
) -> bool {
    fixes.iter().all(|fix| match fix {
        Fix::None => true,
        Fix::Ptr { index: None, .. } => true,
        Fix::Ptr {
            target,
            index: Some(index),
        } => materialized[target.index()][*index].is_some(),
        Fix::Span { element, index } => spans[element.index()][*index]
            .iter()
            .all(|entry| match entry {
                None => true,
                Some(object_index) => materialized[element.index()][*object_index].is_some(),
            }),
        Fix::ValueTypePtr { tag, index } => {
            let target = Fix::value_type_target(*tag).expect("validated at decode");
            materialized[target.index()][*index].is_some()
        }
    })
}

fn apply_struct(
    ty: &'static StructType,
    obj: &mut dyn Any,
    fixes: &[Fix],
    cursor: &mut usize,
    materialized: &[Vec<Option<ArcAny>>],
    spans: &[Vec<Vec<Option<usize>>>],
) -> Result<()> {
    for field in ty.fields {
        apply_value((field.get_mut)(obj), fixes, cursor, materialized, spans)?;
    }

    Ok(())
}

fn next_fix<'f>(fixes: &'f [Fix], cursor: &mut usize) -> Result<&'f Fix> {
    let fix = fixes.get(*cursor).ok_or(Error::Internal)?;
    *cursor += 1;
    Ok(fix)
}

fn resolve(materialized: &[Vec<Option<ArcAny>>], ty: IndexableStructType, index: usize) -> Result<ArcAny> {
    materialized[ty.index()][index]
        .as_ref()
        .map(Arc::clone)
        .ok_or(Error::Internal)
}

fn apply_value(
    value: ValueMut<'_>,
    fixes: &[Fix],
    cursor: &mut usize,
    materialized: &[Vec<Option<ArcAny>>],
    spans: &[Vec<Vec<Option<usize>>>],
) -> Result<()> {
    match value {
        ValueMut::Struct { ty, obj } => apply_struct(ty, obj, fixes, cursor, materialized, spans),
        ValueMut::ValueType(slot) => {
            match *next_fix(fixes, cursor)? {
                Fix::None => {}
                Fix::ValueTypePtr { tag, index } => {
                    let target = Fix::value_type_target(tag)?;
                    let any = resolve(materialized, target, index)?;

                    *slot = match tag {
                        VALUE_TYPE_TAG_VECTOR => ValueType::Vector(
                            any.downcast::<VectorNumericType>().map_err(|_| Error::Internal)?,
                        ),
                        VALUE_TYPE_TAG_COMPOUND => ValueType::Compound(
                            any.downcast::<CompoundNumericType>().map_err(|_| Error::Internal)?,
                        ),
                        VALUE_TYPE_TAG_STRUCTURE => ValueType::Structure(
                            any.downcast::<StructureType>().map_err(|_| Error::Internal)?,
                        ),
                        _ => return Err(Error::Internal),
                    };
                }
                _ => return Err(Error::Internal),
            }

            Ok(())
        }
        ValueMut::ObjectPtr(slot) => {
            let Fix::Ptr { target, index } = *next_fix(fixes, cursor)? else {
                return Err(Error::Internal);
            };

            let obj = match index {
                None => None,
                Some(index) => Some(resolve(materialized, target, index)?),
            };

            slot.set(obj)
        }
        ValueMut::ObjectSpan(slot) => {
            let Fix::Span { element, index } = *next_fix(fixes, cursor)? else {
                return Err(Error::Internal);
            };

            let items = spans[element.index()][index]
                .iter()
                .map(|entry| match entry {
                    None => Ok(None),
                    Some(object_index) => resolve(materialized, element, *object_index).map(Some),
                })
                .collect::<Result<Vec<_>>>()?;

            slot.set(items)
        }
        _ => Ok(()),
    }
}

/// Resolver over a loaded package, optionally extended with binary content
/// appended after the package's own (used when recompiling a pipeline with
/// freshly produced SPIR-V).
pub struct PackageResolver<'a> {
    package: &'a Package,
    binary_content: &'a [Vec<u8>],
    extra_binary_content: &'a [Vec<u8>],
}

impl<'a> PackageResolver<'a> {
    pub fn new(package: &'a Package, binary_content: &'a [Vec<u8>]) -> Self {
        Self {
            package,
            binary_content,
            extra_binary_content: &[],
        }
    }

    pub fn with_extra_content(
        package: &'a Package,
        binary_content: &'a [Vec<u8>],
        extra_binary_content: &'a [Vec<u8>],
    ) -> Self {
        Self {
            package,
            binary_content,
            extra_binary_content,
        }
    }
}

impl StringResolver for PackageResolver<'_> {
    fn global_string(&self, index: usize) -> Result<&str> {
        self.package.string(index)
    }

    fn config_key_name(&self, index: usize) -> Result<&str> {
        self.package.string(self.package.config_key(index)?.string_index)
    }

    fn temp_string(&self, index: usize) -> Result<&str> {
        // Packages written with temp strings fold them into the global
        // string table.
        self.package.string(index)
    }

    fn binary_content(&self, index: usize) -> Result<&[u8]> {
        if index < self.binary_content.len() {
            return Ok(&self.binary_content[index]);
        }

        self.extra_binary_content
            .get(index - self.binary_content.len())
            .map(Vec::as_slice)
            .ok_or(Error::KeyNotFound)
    }
}
