//! The concrete render schema: every enum and struct that can travel
//! through a package, with its reflection descriptor.
//!
//! Field names are the spellings the pipeline-library text language uses.
//! `hidden` fields are populated by the analyzer or a compiler, never by a
//! source file.

use std::sync::Arc;

use super::{BinaryContentIndex, Configurable, GlobalStringIndex, TempStringIndex};

reflect_enum! {
    pub enum Filter : Filter {
        Nearest,
        Linear,
    }
}

reflect_enum! {
    pub enum MipMapMode : MipMapMode {
        Nearest,
        Linear,
    }
}

reflect_enum! {
    pub enum AddressMode : AddressMode {
        Repeat,
        MirrorRepeat,
        ClampEdge,
        ClampBorder,
    }
}

reflect_enum! {
    pub enum AnisotropicFiltering : AnisotropicFiltering {
        Disabled,
        Anisotropic1,
        Anisotropic2,
        Anisotropic4,
        Anisotropic8,
        Anisotropic16,
    }
}

reflect_enum! {
    pub enum ComparisonFunction : ComparisonFunction {
        Disabled,
        Never,
        Less,
        Equal,
        LessOrEqual,
        Greater,
        NotEqual,
        GreaterOrEqual,
        Always,
    }
}

reflect_enum! {
    pub enum BorderColor : BorderColor {
        TransparentBlack,
        OpaqueBlack,
        OpaqueWhite,
    }
}

reflect_enum! {
    pub enum StencilOp : StencilOp {
        Keep,
        Zero,
        Replace,
        IncrementSaturate,
        DecrementSaturate,
        Invert,
        Increment,
        Decrement,
    }
}

reflect_enum! {
    pub enum CullMode : CullMode {
        None,
        Front,
        Back,
    }
}

reflect_enum! {
    pub enum FillMode : FillMode {
        Wireframe,
        Solid,
    }
}

reflect_enum! {
    pub enum PrimitiveTopology : PrimitiveTopology {
        PointList,
        LineList,
        LineStrip,
        TriangleList,
        TriangleStrip,
    }
}

reflect_enum! {
    pub enum ColorBlendFactor : ColorBlendFactor {
        Zero,
        One,
        SrcColor,
        InvSrcColor,
        SrcAlpha,
        InvSrcAlpha,
        DstAlpha,
        InvDstAlpha,
        DstColor,
        InvDstColor,
        ConstantColor,
        InvConstantColor,
        ConstantAlpha,
        InvConstantAlpha,
    }
}

reflect_enum! {
    pub enum AlphaBlendFactor : AlphaBlendFactor {
        Zero,
        One,
        SrcAlpha,
        InvSrcAlpha,
        DstAlpha,
        InvDstAlpha,
        ConstantAlpha,
        InvConstantAlpha,
    }
}

reflect_enum! {
    pub enum BlendOp : BlendOp {
        Add,
        Subtract,
        ReverseSubtract,
        Min,
        Max,
    }
}

reflect_enum! {
    pub enum ReadWriteAccess : ReadWriteAccess {
        Read,
        Write,
        ReadWrite,
    }
}

reflect_enum! {
    pub enum VertexInputStepping : VertexInputStepping {
        Vertex,
        Instance,
    }
}

reflect_enum! {
    pub enum DescriptorType : DescriptorType {
        Sampler,
        StaticConstantBuffer,
        DynamicConstantBuffer,
        Buffer,
        RWBuffer,
        ByteAddressBuffer,
        RWByteAddressBuffer,
        Texture1D,
        Texture1DArray,
        Texture2D,
        Texture2DArray,
        Texture2DMS,
        Texture2DMSArray,
        Texture3D,
        TextureCube,
        TextureCubeArray,
        RWTexture1D,
        RWTexture1DArray,
        RWTexture2D,
        RWTexture2DArray,
        RWTexture3D,
    }
}

reflect_enum! {
    pub enum NumericType : NumericType {
        Float16,
        Float32,
        Float64,
        SInt8,
        SInt16,
        SInt32,
        SInt64,
        UInt8,
        UInt16,
        UInt32,
        UInt64,
        SNorm8,
        SNorm16,
        UNorm8,
        UNorm16,
        Bool,
    }
}

reflect_enum! {
    pub enum VectorDimension : VectorDimension {
        Dimension2,
        Dimension3,
        Dimension4,
    }
}

reflect_enum! {
    pub enum VectorOrScalarDimension : VectorOrScalarDimension {
        Scalar,
        Dimension2,
        Dimension3,
        Dimension4,
    }
}

reflect_enum! {
    pub enum StageVisibility : StageVisibility {
        All,
        Vertex,
        Pixel,
    }
}

reflect_enum! {
    pub enum RenderPassLoadOp : RenderPassLoadOp {
        Discard,
        Clear,
        Load,
    }
}

reflect_enum! {
    pub enum RenderPassStoreOp : RenderPassStoreOp {
        Discard,
        Store,
    }
}

reflect_enum! {
    pub enum RenderTargetFormat : RenderTargetFormat {
        RGBA8UNorm,
        RGBA8UNormSRGB,
        BGRA8UNorm,
        RGBA16Float,
        RGB10A2UNorm,
        RG16Float,
        R32Float,
    }
}

reflect_enum! {
    pub enum DepthStencilFormat : DepthStencilFormat {
        D16UNorm,
        D24UNormS8,
        D32Float,
        D32FloatS8,
    }
}

/// The type of a shader-visible value: a scalar, a vector, a matrix, or a
/// user-defined structure.
#[derive(Clone, Debug)]
pub enum ValueType {
    Numeric(NumericType),
    Vector(Arc<VectorNumericType>),
    Compound(Arc<CompoundNumericType>),
    Structure(Arc<StructureType>),
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Numeric(NumericType::default())
    }
}

/// Wire tags of [`ValueType`].
pub const VALUE_TYPE_TAG_NUMERIC: u8 = 0;
pub const VALUE_TYPE_TAG_VECTOR: u8 = 1;
pub const VALUE_TYPE_TAG_COMPOUND: u8 = 2;
pub const VALUE_TYPE_TAG_STRUCTURE: u8 = 3;

reflect_struct! {
    #[derive(PartialEq)]
    pub struct VectorNumericType : VectorNumericType / VectorNumericType {
        hidden "NumericType" enum_v numeric_type: NumericType,
        hidden "Cols" enum_v cols: VectorDimension,
    }
}

reflect_struct! {
    #[derive(PartialEq)]
    pub struct CompoundNumericType : CompoundNumericType / CompoundNumericType {
        hidden "NumericType" enum_v numeric_type: NumericType,
        hidden "Rows" enum_v rows: VectorDimension,
        hidden "Cols" enum_v cols: VectorDimension,
    }
}

reflect_struct! {
    #[derive(PartialEq)]
    pub struct VectorOrScalarNumericType : VectorOrScalarNumericType / VectorOrScalarNumericType {
        hidden "NumericType" enum_v numeric_type: NumericType,
        hidden "Cols" enum_v cols: VectorOrScalarDimension,
    }
}

reflect_struct! {
    pub struct SamplerDesc : SamplerDesc / SamplerDesc {
        visible "MinFilter" enum_v min_filter: Configurable<Filter>,
        visible "MagFilter" enum_v mag_filter: Configurable<Filter>,
        visible "MipMapMode" enum_v mip_map_mode: Configurable<MipMapMode>,
        visible "AddressModeU" enum_v address_mode_u: Configurable<AddressMode>,
        visible "AddressModeV" enum_v address_mode_v: Configurable<AddressMode>,
        visible "AddressModeW" enum_v address_mode_w: Configurable<AddressMode>,
        visible "MipLodBias" number mip_lod_bias: Configurable<f32>,
        visible "MinLod" number min_lod: Configurable<f32>,
        visible "MaxLod" number max_lod: Configurable<f32>,
        visible "Anisotropy" enum_v anisotropy: Configurable<AnisotropicFiltering>,
        visible "CompareFunction" enum_v compare_function: Configurable<ComparisonFunction>,
        visible "BorderColor" enum_v border_color: Configurable<BorderColor>,
    }
}

reflect_struct! {
    pub struct PushConstantDesc : PushConstantDesc / PushConstantDesc {
        hidden "Name" temp_str name: TempStringIndex,
        visible "Type" value_type value_type: ValueType,
        visible "StageVisibility" enum_v stage_visibility: Configurable<StageVisibility>,
    }
}

reflect_struct! {
    pub struct PushConstantListDesc : PushConstantListDesc / PushConstantListDesc {
        hidden "PushConstants" span push_constants: Vec<Arc<PushConstantDesc>>,
    }
}

reflect_struct! {
    pub struct StructureMemberDesc : StructureMemberDesc / StructureMemberDesc {
        hidden "Name" temp_str name: TempStringIndex,
        hidden "Type" value_type value_type: ValueType,
    }
}

reflect_struct! {
    pub struct StructureType : StructureType / StructureType {
        hidden "Members" span members: Vec<Arc<StructureMemberDesc>>,
    }
}

reflect_struct! {
    pub struct InputLayoutVertexFeedDesc : InputLayoutVertexFeedDesc / InputLayoutVertexFeedDesc {
        hidden "FeedName" temp_str feed_name: TempStringIndex,
        hidden "InputSlot" number input_slot: u32,
        hidden "ByteStride" number byte_stride: Configurable<u32>,
        hidden "Stepping" enum_v stepping: Configurable<VertexInputStepping>,
    }
}

reflect_struct! {
    pub struct InputLayoutVertexInputDesc : InputLayoutVertexInputDesc / InputLayoutVertexInputDesc {
        hidden "InputFeed" ptr input_feed: Option<Arc<InputLayoutVertexFeedDesc>>,
        hidden "MemberName" temp_str member_name: TempStringIndex,
        hidden "ByteOffset" number byte_offset: u32,
        hidden "NumericType" ptr numeric_type: Option<Arc<VectorOrScalarNumericType>>,
    }
}

reflect_struct! {
    pub struct InputLayoutDesc : InputLayoutDesc / InputLayoutDesc {
        hidden "VertexInputs" span vertex_inputs: Vec<Arc<InputLayoutVertexInputDesc>>,
    }
}

reflect_struct! {
    pub struct DescriptorDesc : DescriptorDesc / DescriptorDesc {
        hidden "Name" temp_str name: TempStringIndex,
        hidden "Type" enum_v descriptor_type: DescriptorType,
        hidden "ArraySize" number array_size: u32,
        hidden "ValueType" value_type value_type: ValueType,
        hidden "Sampler" ptr static_sampler: Option<Arc<SamplerDesc>>,
    }
}

reflect_struct! {
    pub struct DescriptorLayoutDesc : DescriptorLayoutDesc / DescriptorLayoutDesc {
        hidden "Descriptors" span descriptors: Vec<Arc<DescriptorDesc>>,
    }
}

reflect_struct! {
    pub struct PipelineLayoutDesc : PipelineLayoutDesc / PipelineLayoutDesc {
        hidden "DescriptorLayouts" span descriptor_layouts: Vec<Arc<DescriptorLayoutDesc>>,
        hidden "PushConstantList" ptr push_constant_list: Option<Arc<PushConstantListDesc>>,
    }
}

reflect_struct! {
    pub struct ShaderDesc : ShaderDesc / ShaderDesc {
        visible "Source" temp_str source: TempStringIndex,
        visible "EntryPoint" temp_str entry_point: TempStringIndex,
    }
}

reflect_struct! {
    pub struct ContentKey : ContentKey / ContentKey {
        hidden "Content" content content: BinaryContentIndex,
    }
}

reflect_struct! {
    pub struct DepthStencilOperationDesc : DepthStencilOperationDesc / DepthStencilOperationDesc {
        visible "DepthTest" number depth_test: Configurable<bool>,
        visible "DepthWrite" number depth_write: Configurable<bool>,
        visible "DepthCompareOp" enum_v depth_compare_op: Configurable<ComparisonFunction>,
        visible "StencilTest" number stencil_test: Configurable<bool>,
        visible "StencilCompareOp" enum_v stencil_compare_op: Configurable<ComparisonFunction>,
        visible "StencilPassOp" enum_v stencil_pass_op: Configurable<StencilOp>,
        visible "StencilFailOp" enum_v stencil_fail_op: Configurable<StencilOp>,
        visible "StencilDepthFailOp" enum_v stencil_depth_fail_op: Configurable<StencilOp>,
        visible "StencilReadMask" number stencil_read_mask: Configurable<u32>,
        visible "StencilWriteMask" number stencil_write_mask: Configurable<u32>,
    }
}

reflect_struct! {
    pub struct DepthStencilTargetDesc : DepthStencilTargetDesc / DepthStencilTargetDesc {
        visible "Format" enum_v format: Configurable<DepthStencilFormat>,
        visible "LoadOp" enum_v load_op: Configurable<RenderPassLoadOp>,
        visible "StoreOp" enum_v store_op: Configurable<RenderPassStoreOp>,
        visible "StencilLoadOp" enum_v stencil_load_op: Configurable<RenderPassLoadOp>,
        visible "StencilStoreOp" enum_v stencil_store_op: Configurable<RenderPassStoreOp>,
    }
}

reflect_struct! {
    pub struct RenderTargetDesc : RenderTargetDesc / RenderTargetDesc {
        hidden "Name" temp_str name: TempStringIndex,
        visible "Format" enum_v format: Configurable<RenderTargetFormat>,
        visible "LoadOp" enum_v load_op: Configurable<RenderPassLoadOp>,
        visible "StoreOp" enum_v store_op: Configurable<RenderPassStoreOp>,
    }
}

reflect_struct! {
    pub struct RenderOperationDesc : RenderOperationDesc / RenderOperationDesc {
        visible "Access" enum_v access: ReadWriteAccess,
        visible "SrcBlend" enum_v src_blend: ColorBlendFactor,
        visible "DstBlend" enum_v dst_blend: ColorBlendFactor,
        visible "ColorBlendOp" enum_v color_blend_op: BlendOp,
        visible "SrcAlphaBlend" enum_v src_alpha_blend: AlphaBlendFactor,
        visible "DstAlphaBlend" enum_v dst_alpha_blend: AlphaBlendFactor,
        visible "AlphaBlendOp" enum_v alpha_blend_op: BlendOp,
        visible "WriteRed" number write_red: bool,
        visible "WriteGreen" number write_green: bool,
        visible "WriteBlue" number write_blue: bool,
        visible "WriteAlpha" number write_alpha: bool,
    }
}

impl RenderOperationDesc {
    /// The operation used for render-pass targets a pipeline leaves
    /// unbound: read-only, no blending, no channel writes.
    pub fn unbound_default() -> Self {
        Self {
            access: ReadWriteAccess::Read,
            src_blend: ColorBlendFactor::Zero,
            dst_blend: ColorBlendFactor::One,
            color_blend_op: BlendOp::Add,
            src_alpha_blend: AlphaBlendFactor::Zero,
            dst_alpha_blend: AlphaBlendFactor::One,
            alpha_blend_op: BlendOp::Add,
            write_red: false,
            write_green: false,
            write_blue: false,
            write_alpha: false,
        }
    }
}

reflect_struct! {
    pub struct RenderPassDesc : RenderPassDesc / RenderPassDesc {
        hidden "RenderTargets" span render_targets: Vec<Arc<RenderTargetDesc>>,
        hidden "DepthStencil" ptr depth_stencil_target: Option<Arc<DepthStencilTargetDesc>>,
    }
}

reflect_struct! {
    pub struct GraphicsPipelineDesc : GraphicsPipelineDesc / GraphicsPipelineDesc {
        hidden "PipelineLayout" ptr pipeline_layout: Option<Arc<PipelineLayoutDesc>>,
        hidden "ExecuteInPass" ptr execute_in_pass: Option<Arc<RenderPassDesc>>,
        hidden "InputLayout" ptr input_layout: Option<Arc<InputLayoutDesc>>,
        hidden "VertexShader" ptr vertex_shader: Option<Arc<ShaderDesc>>,
        hidden "PixelShader" ptr pixel_shader: Option<Arc<ShaderDesc>>,
        hidden "DepthStencil" ptr depth_stencil: Option<Arc<DepthStencilOperationDesc>>,
        hidden "RenderTargets" span render_targets: Vec<Arc<RenderOperationDesc>>,
        hidden "CompiledContentKeys" span compiled_content_keys: Vec<Option<Arc<ContentKey>>>,
        visible "PrimitiveTopology" enum_v primitive_topology: Configurable<PrimitiveTopology>,
        visible "CullMode" enum_v cull_mode: Configurable<CullMode>,
        visible "FillMode" enum_v fill_mode: Configurable<FillMode>,
    }
}

reflect_struct! {
    pub struct GraphicsPipelineNameLookup : GraphicsPipelineNameLookup / GraphicsPipelineNameLookup {
        hidden "Name" global_str name: GlobalStringIndex,
        hidden "Pipeline" ptr pipeline: Option<Arc<GraphicsPipelineDesc>>,
    }
}

reflect_struct! {
    pub struct RenderPassNameLookup : RenderPassNameLookup / RenderPassNameLookup {
        hidden "Name" global_str name: GlobalStringIndex,
        hidden "RenderPass" ptr render_pass: Option<Arc<RenderPassDesc>>,
    }
}
