//! Descriptor core for the reflected render schema.
//!
//! Every serializable type carries a static descriptor: enums list their
//! options, structs list their fields with get/set thunks over `dyn Any`.
//! Storage-specific behavior (plain vs `Configurable`, `Option<Arc<T>>` vs
//! `Vec<Arc<T>>`) lives in slot trait impls so the descriptor tables stay
//! declarative.

#[macro_use]
mod macros;
mod render;
mod slots;

pub use render::*;
pub use slots::{EnumSlot, NumberSlot, ObjectPtrSlot, ObjectSpanSlot};

use std::any::Any;
use std::sync::Arc;

use forge_common::{Error, Result};

/// A shared, type-erased schema object.
pub type ArcAny = Arc<dyn Any + Send + Sync>;
/// An owned, type-erased schema object (pre-freeze during package loading).
pub type BoxAny = Box<dyn Any + Send + Sync>;

/// Index into the global string pool of a source or package.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalStringIndex(pub usize);

/// Index into the per-source temp string table. Only valid for the source
/// that created it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TempStringIndex(pub usize);

/// Index into the config-key table of a source or package.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConfigNameIndex(pub usize);

/// Index into the binary-content table of a source or package.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BinaryContentIndex(pub usize);

main_types! {
    Invalid,
    // Numbers.
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    SInt8,
    SInt16,
    SInt32,
    SInt64,
    Float32,
    Float64,
    // Enums.
    Filter,
    MipMapMode,
    AddressMode,
    AnisotropicFiltering,
    ComparisonFunction,
    BorderColor,
    StencilOp,
    CullMode,
    FillMode,
    PrimitiveTopology,
    ColorBlendFactor,
    AlphaBlendFactor,
    BlendOp,
    ReadWriteAccess,
    VertexInputStepping,
    DescriptorType,
    NumericType,
    VectorDimension,
    VectorOrScalarDimension,
    StageVisibility,
    RenderPassLoadOp,
    RenderPassStoreOp,
    RenderTargetFormat,
    DepthStencilFormat,
    // Structs.
    SamplerDesc,
    PushConstantDesc,
    PushConstantListDesc,
    StructureMemberDesc,
    StructureType,
    VectorNumericType,
    CompoundNumericType,
    VectorOrScalarNumericType,
    InputLayoutVertexFeedDesc,
    InputLayoutVertexInputDesc,
    InputLayoutDesc,
    DescriptorDesc,
    DescriptorLayoutDesc,
    PipelineLayoutDesc,
    ShaderDesc,
    ContentKey,
    DepthStencilOperationDesc,
    DepthStencilTargetDesc,
    RenderTargetDesc,
    RenderOperationDesc,
    RenderPassDesc,
    GraphicsPipelineDesc,
    GraphicsPipelineNameLookup,
    RenderPassNameLookup,
    // Special.
    ValueType,
}

indexable_struct_types! {
    SamplerDesc,
    PushConstantDesc,
    PushConstantListDesc,
    StructureMemberDesc,
    StructureType,
    VectorNumericType,
    CompoundNumericType,
    VectorOrScalarNumericType,
    InputLayoutVertexFeedDesc,
    InputLayoutVertexInputDesc,
    InputLayoutDesc,
    DescriptorDesc,
    DescriptorLayoutDesc,
    PipelineLayoutDesc,
    ShaderDesc,
    ContentKey,
    DepthStencilOperationDesc,
    DepthStencilTargetDesc,
    RenderTargetDesc,
    RenderOperationDesc,
    RenderPassDesc,
    GraphicsPipelineDesc,
    GraphicsPipelineNameLookup,
    RenderPassNameLookup,
}

/// Static descriptor of a reflected enum.
pub struct EnumType {
    pub name: &'static str,
    pub main_type: MainType,
    pub options: &'static [EnumOption],
    pub max_value_exclusive: u64,
}

pub struct EnumOption {
    pub name: &'static str,
    pub value: u64,
}

/// A reflected enum type. Implemented by `reflect_enum!`.
pub trait ReflectEnum: Copy + Send + Sync + 'static {
    const TYPE: &'static EnumType;

    fn to_raw(self) -> u64;
    fn from_raw(raw: u64) -> Option<Self>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NumberRepr {
    Float,
    SignedInt,
    UnsignedInt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NumberBits {
    Bits1,
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

#[derive(Copy, Clone, Debug)]
pub struct NumberType {
    pub main_type: MainType,
    pub repr: NumberRepr,
    pub bits: NumberBits,
}

/// A scalar in its widest representation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Scalar {
    UInt(u64),
    SInt(i64),
    Float(f64),
}

/// A reflected number type.
pub trait ReflectNumber: Copy + Send + Sync + 'static {
    const TYPE: NumberType;

    fn to_scalar(self) -> Scalar;
    fn from_scalar(scalar: Scalar) -> Result<Self>;
}

/// A value that may be left at its runtime default, bound to a named
/// configuration key, or given explicitly.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Configurable<T> {
    #[default]
    Default,
    Configured(ConfigNameIndex),
    Explicit(T),
}

impl<T> Configurable<T> {
    pub fn set(&mut self, value: T) {
        *self = Configurable::Explicit(value);
    }

    pub fn explicit(&self) -> Option<&T> {
        match self {
            Configurable::Explicit(value) => Some(value),
            _ => None,
        }
    }
}

/// Wire values of the configurable state byte.
pub const CONFIGURABLE_STATE_DEFAULT: u8 = 0;
pub const CONFIGURABLE_STATE_CONFIGURED: u8 = 1;
pub const CONFIGURABLE_STATE_EXPLICIT: u8 = 2;

/// The read-side view of a possibly-configurable value.
#[derive(Copy, Clone, Debug)]
pub enum ConfigurableRead<T> {
    /// The storage is not configurable; this is the plain value.
    Plain(T),
    Default,
    Configured(ConfigNameIndex),
    Explicit(T),
}

/// Static descriptor of a reflected struct.
pub struct StructType {
    pub name: &'static str,
    pub main_type: MainType,
    pub indexable: IndexableStructType,
    pub fields: &'static [FieldDef],
    pub create: fn() -> BoxAny,
}

/// One field of a reflected struct.
///
/// `visible` controls whether the text parser accepts the field by name;
/// hidden fields are populated by code but still serialized.
pub struct FieldDef {
    pub name: &'static str,
    pub visible: bool,
    pub get: for<'a> fn(&'a dyn Any) -> Value<'a>,
    pub get_mut: for<'a> fn(&'a mut dyn Any) -> ValueMut<'a>,
}

/// A reflected struct type. Implemented by `reflect_struct!`.
pub trait ReflectStruct: Any + Send + Sync + Default {
    const TYPE: &'static StructType;
}

/// Borrowed view of a reflected object, with the address identity used by
/// the per-source object cache.
#[derive(Copy, Clone)]
pub struct ObjectRef<'a> {
    pub obj: &'a dyn Any,
    pub ty: &'static StructType,
    pub identity: usize,
}

impl<'a> ObjectRef<'a> {
    pub fn from_arc<T: ReflectStruct>(arc: &'a Arc<T>) -> Self {
        Self {
            obj: &**arc,
            ty: T::TYPE,
            identity: Arc::as_ptr(arc) as usize,
        }
    }
}

/// Read access to one field's storage.
pub enum Value<'a> {
    Enum(&'a dyn EnumSlot),
    Number(&'a dyn NumberSlot),
    Struct {
        ty: &'static StructType,
        obj: &'a dyn Any,
    },
    ValueType(&'a ValueType),
    GlobalString(GlobalStringIndex),
    TempString(TempStringIndex),
    ObjectPtr(&'a dyn ObjectPtrSlot),
    ObjectSpan(&'a dyn ObjectSpanSlot),
    BinaryContent(BinaryContentIndex),
}

/// Write access to one field's storage.
pub enum ValueMut<'a> {
    Enum(&'a mut dyn EnumSlot),
    Number(&'a mut dyn NumberSlot),
    Struct {
        ty: &'static StructType,
        obj: &'a mut dyn Any,
    },
    ValueType(&'a mut ValueType),
    GlobalString(&'a mut GlobalStringIndex),
    TempString(&'a mut TempStringIndex),
    ObjectPtr(&'a mut dyn ObjectPtrSlot),
    ObjectSpan(&'a mut dyn ObjectSpanSlot),
    BinaryContent(&'a mut BinaryContentIndex),
}

pub(crate) fn cast<T: 'static>(obj: &dyn Any) -> &T {
    obj.downcast_ref::<T>()
        .expect("schema descriptor applied to an object of the wrong type")
}

pub(crate) fn cast_mut<T: 'static>(obj: &mut dyn Any) -> &mut T {
    obj.downcast_mut::<T>()
        .expect("schema descriptor applied to an object of the wrong type")
}

pub(crate) fn struct_value<T: ReflectStruct>(obj: &T) -> Value<'_> {
    Value::Struct {
        ty: T::TYPE,
        obj,
    }
}

pub(crate) fn struct_value_mut<T: ReflectStruct>(obj: &mut T) -> ValueMut<'_> {
    ValueMut::Struct {
        ty: T::TYPE,
        obj,
    }
}

impl StructType {
    /// Finds a parser-visible field by its spelled name.
    pub fn find_visible_field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields
            .iter()
            .find(|field| field.visible && field.name == name)
    }
}

impl EnumType {
    /// Matches a token against the option names.
    pub fn option_by_name(&self, name: &str) -> Option<u64> {
        self.options
            .iter()
            .find(|option| option.name == name)
            .map(|option| option.value)
    }
}

pub(crate) fn downcast_arc<T: ReflectStruct>(any: ArcAny) -> Result<Arc<T>> {
    any.downcast::<T>().map_err(|_| Error::Internal)
}

/// The struct descriptor owning the given per-type object table.
pub fn struct_type_for(indexable: IndexableStructType) -> &'static StructType {
    match indexable {
        IndexableStructType::SamplerDesc => SamplerDesc::TYPE,
        IndexableStructType::PushConstantDesc => PushConstantDesc::TYPE,
        IndexableStructType::PushConstantListDesc => PushConstantListDesc::TYPE,
        IndexableStructType::StructureMemberDesc => StructureMemberDesc::TYPE,
        IndexableStructType::StructureType => StructureType::TYPE,
        IndexableStructType::VectorNumericType => VectorNumericType::TYPE,
        IndexableStructType::CompoundNumericType => CompoundNumericType::TYPE,
        IndexableStructType::VectorOrScalarNumericType => VectorOrScalarNumericType::TYPE,
        IndexableStructType::InputLayoutVertexFeedDesc => InputLayoutVertexFeedDesc::TYPE,
        IndexableStructType::InputLayoutVertexInputDesc => InputLayoutVertexInputDesc::TYPE,
        IndexableStructType::InputLayoutDesc => InputLayoutDesc::TYPE,
        IndexableStructType::DescriptorDesc => DescriptorDesc::TYPE,
        IndexableStructType::DescriptorLayoutDesc => DescriptorLayoutDesc::TYPE,
        IndexableStructType::PipelineLayoutDesc => PipelineLayoutDesc::TYPE,
        IndexableStructType::ShaderDesc => ShaderDesc::TYPE,
        IndexableStructType::ContentKey => ContentKey::TYPE,
        IndexableStructType::DepthStencilOperationDesc => DepthStencilOperationDesc::TYPE,
        IndexableStructType::DepthStencilTargetDesc => DepthStencilTargetDesc::TYPE,
        IndexableStructType::RenderTargetDesc => RenderTargetDesc::TYPE,
        IndexableStructType::RenderOperationDesc => RenderOperationDesc::TYPE,
        IndexableStructType::RenderPassDesc => RenderPassDesc::TYPE,
        IndexableStructType::GraphicsPipelineDesc => GraphicsPipelineDesc::TYPE,
        IndexableStructType::GraphicsPipelineNameLookup => GraphicsPipelineNameLookup::TYPE,
        IndexableStructType::RenderPassNameLookup => RenderPassNameLookup::TYPE,
    }
}
