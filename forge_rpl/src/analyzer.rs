//! The pipeline-library analyzer: parses the text language into typed
//! entities, then exports per-pipeline packages, the render-pass globals
//! package and the small library index.

use std::any::Any;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use forge_build::node::{CompilerFeedback, NodeKey};
use forge_build::vfs::{BuildFileLocation, OutputStream};
use forge_build::DEFAULT_NAMESPACE;
use forge_common::{BuildPath, Error, Result};
use forge_data::pools::{ConfigKeyPool, StringPool, TempStringPool};
use forge_data::schema::{
    CompoundNumericType, ConfigNameIndex, Configurable, DepthStencilOperationDesc, DescriptorDesc,
    DescriptorLayoutDesc, DescriptorType, EnumSlot, GlobalStringIndex, GraphicsPipelineDesc,
    GraphicsPipelineNameLookup, InputLayoutDesc, InputLayoutVertexFeedDesc,
    InputLayoutVertexInputDesc, MainType, NumberBits, NumberRepr, NumberSlot, NumericType,
    PipelineLayoutDesc, PushConstantDesc, PushConstantListDesc, ReflectEnum, ReflectStruct,
    RenderOperationDesc, RenderPassDesc, RenderPassNameLookup, RenderTargetDesc, SamplerDesc,
    Scalar, ShaderDesc, StructType, StructureMemberDesc, StructureType, TempStringIndex, ValueMut,
    ValueType, VectorDimension, VectorNumericType, VectorOrScalarDimension,
    VectorOrScalarNumericType,
};
use forge_data::{PackageBuilder, StringResolver};

use crate::parser::{is_valid_identifier, parse_uint_constant, resolve_quoted_string, TextParser};
use crate::{
    globals_path, graphics_pipeline_path, index_path, GRAPHICS_PIPELINE_NODE_TYPE,
    LIBRARY_INDEX_MAGIC, LIBRARY_INDEX_VERSION,
};

const NUMERIC_RESOLUTIONS: &[(&str, NumericType)] = &[
    ("float", NumericType::Float32),
    ("half", NumericType::Float16),
    ("int", NumericType::SInt32),
    ("uint", NumericType::UInt32),
    ("double", NumericType::Float64),
    ("ulong", NumericType::UInt64),
    ("long", NumericType::SInt64),
    ("bool", NumericType::Bool),
    ("byte", NumericType::UInt8),
    ("sbyte", NumericType::SInt8),
    ("short", NumericType::SInt16),
    ("ushort", NumericType::UInt16),
    ("nbyte", NumericType::UNorm8),
    ("nushort", NumericType::UNorm16),
    ("nsbyte", NumericType::SNorm8),
    ("nshort", NumericType::SNorm16),
];

enum Entity {
    StaticSampler(Arc<SamplerDesc>),
    PushConstants(Arc<PushConstantListDesc>),
    StructDef(Arc<StructureType>),
    InputLayout(Arc<InputLayoutDesc>),
    DescriptorLayout(Arc<DescriptorLayoutDesc>),
    GraphicsPipeline(Arc<GraphicsPipelineDesc>),
    RenderPass(Arc<RenderPassDesc>),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum DescriptorClass {
    Sampler,
    ConstantBuffer,
    Buffer,
    ByteAddressBuffer,
    Texture,
}

fn classify_descriptor_type(descriptor_type: DescriptorType) -> DescriptorClass {
    use DescriptorType::*;

    match descriptor_type {
        Sampler => DescriptorClass::Sampler,
        StaticConstantBuffer | DynamicConstantBuffer => DescriptorClass::ConstantBuffer,
        Buffer | RWBuffer => DescriptorClass::Buffer,
        ByteAddressBuffer | RWByteAddressBuffer => DescriptorClass::ByteAddressBuffer,
        Texture1D | Texture1DArray | Texture2D | Texture2DArray | Texture2DMS | Texture2DMSArray
        | Texture3D | TextureCube | TextureCubeArray | RWTexture1D | RWTexture1DArray
        | RWTexture2D | RWTexture2DArray | RWTexture3D => DescriptorClass::Texture,
    }
}

struct IncludeStackItem {
    location: BuildFileLocation,
    path: BuildPath,
    can_try_alternate: bool,
    parser: Option<TextParser>,
}

/// Analyzes one pipeline-library source tree.
pub struct LibraryAnalyzer<'f> {
    feedback: &'f mut dyn CompilerFeedback,

    strings: StringPool,
    temp: TempStringPool,
    config: ConfigKeyPool,

    entities: HashMap<String, Entity>,

    include_stack: Vec<IncludeStackItem>,
    included: HashSet<(BuildFileLocation, BuildPath)>,

    graphics_pipelines: Vec<Arc<GraphicsPipelineNameLookup>>,
    render_passes: Vec<Arc<RenderPassNameLookup>>,

    vector_types: Vec<Arc<VectorNumericType>>,
    compound_types: Vec<Arc<CompoundNumericType>>,
    vector_or_scalar_types: Vec<Arc<VectorOrScalarNumericType>>,
}

impl<'f> LibraryAnalyzer<'f> {
    pub fn new(feedback: &'f mut dyn CompilerFeedback) -> Self {
        Self {
            feedback,
            strings: StringPool::new(),
            temp: TempStringPool::new(),
            config: ConfigKeyPool::new(),
            entities: HashMap::new(),
            include_stack: Vec::new(),
            included: HashSet::new(),
            graphics_pipelines: Vec::new(),
            render_passes: Vec::new(),
            vector_types: Vec::new(),
            compound_types: Vec::new(),
            vector_or_scalar_types: Vec::new(),
        }
    }

    pub fn run(&mut self, key: &NodeKey) -> Result<()> {
        // Temp string 0 is the implicit shader entry point.
        self.temp_str("main");

        self.include_stack.push(IncludeStackItem {
            location: key.location,
            path: key.identifier.clone(),
            can_try_alternate: false,
            parser: None,
        });

        while !self.include_stack.is_empty() {
            self.feedback.check_fault()?;

            let top = self.include_stack.len() - 1;
            if self.include_stack[top].parser.is_none() {
                self.scan_top_item()?;
            } else {
                self.parse_top_item()?;
            }
        }

        self.export_packages(key)
    }

    pub fn graphics_pipeline_count(&self) -> usize {
        self.graphics_pipelines.len()
    }

    fn scan_top_item(&mut self) -> Result<()> {
        let top = self.include_stack.len() - 1;
        let item_key = (
            self.include_stack[top].location,
            self.include_stack[top].path.clone(),
        );

        // Each (location, path) is parsed at most once.
        if self.included.contains(&item_key) {
            self.include_stack.pop();
            return Ok(());
        }
        self.included.insert(item_key);

        let location = self.include_stack[top].location;
        let path = self.include_stack[top].path.clone();

        let stream = self.feedback.try_open_input(location, &path)?;

        let Some(mut stream) = stream else {
            if self.include_stack[top].can_try_alternate
                && location == BuildFileLocation::IntermediateDir
            {
                // Generated includes fall back to the source tree once.
                self.include_stack[top].location = BuildFileLocation::SourceDir;
                return Ok(());
            }

            tracing::error!("could not open input file '{}'", path);
            return Err(Error::FileOpen(path.as_str().to_owned()));
        };

        let mut contents = String::new();
        stream
            .read_to_string(&mut contents)
            .map_err(|_| Error::InvalidUnicode)?;

        self.include_stack[top].parser = Some(TextParser::new(Arc::from(contents.as_str())));
        Ok(())
    }

    fn parse_top_item(&mut self) -> Result<()> {
        let top = self.include_stack.len() - 1;
        let mut parser = self.include_stack[top].parser.take().ok_or(Error::Internal)?;
        let blame = self.include_stack[top].path.clone();

        loop {
            let depth_before = self.include_stack.len();

            if !self.parse_directive(&blame, &mut parser)? {
                // Parsing completed.
                self.include_stack.pop();
                return Ok(());
            }

            if self.include_stack.len() != depth_before {
                // An include pushed a new item; resume this file later.
                self.include_stack[top].parser = Some(parser);
                return Ok(());
            }
        }
    }

    fn parse_directive(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<bool> {
        let Some(directive) = parser.read_token()? else {
            return Ok(false);
        };

        match &*directive {
            "include" => self.parse_include_directive(blame, parser)?,
            "StaticSampler" => self.parse_named_entity(blame, parser, |analyzer, blame, parser, _| {
                Ok(Entity::StaticSampler(Arc::new(
                    analyzer.parse_static_sampler(blame, parser)?,
                )))
            })?,
            "PushConstants" => self.parse_named_entity(blame, parser, |analyzer, blame, parser, _| {
                Ok(Entity::PushConstants(Arc::new(
                    analyzer.parse_push_constants(blame, parser)?,
                )))
            })?,
            "struct" => self.parse_named_entity(blame, parser, |analyzer, blame, parser, _| {
                Ok(Entity::StructDef(Arc::new(
                    analyzer.parse_struct_def(blame, parser)?,
                )))
            })?,
            "InputLayout" => self.parse_named_entity(blame, parser, |analyzer, blame, parser, _| {
                Ok(Entity::InputLayout(Arc::new(
                    analyzer.parse_input_layout(blame, parser)?,
                )))
            })?,
            "DescriptorLayout" => {
                self.parse_named_entity(blame, parser, |analyzer, blame, parser, _| {
                    Ok(Entity::DescriptorLayout(Arc::new(
                        analyzer.parse_descriptor_layout(blame, parser)?,
                    )))
                })?
            }
            "GraphicsPipeline" => {
                self.parse_named_entity(blame, parser, |analyzer, blame, parser, name| {
                    let pipeline =
                        Arc::new(analyzer.parse_graphics_pipeline(blame, parser, name)?);
                    Ok(Entity::GraphicsPipeline(pipeline))
                })?
            }
            "RenderPass" => self.parse_named_entity(blame, parser, |analyzer, blame, parser, name| {
                let pass = Arc::new(analyzer.parse_render_pass(blame, parser)?);

                let name_index = analyzer.global_str(name);
                analyzer.render_passes.push(Arc::new(RenderPassNameLookup {
                    name: name_index,
                    render_pass: Some(Arc::clone(&pass)),
                }));

                Ok(Entity::RenderPass(pass))
            })?,
            _ => {
                return Err(self.err_at(blame, parser, "invalid directive"));
            }
        }

        Ok(true)
    }

    fn parse_named_entity<F>(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        build: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Self, &BuildPath, &mut TextParser, &str) -> Result<Entity>,
    {
        let name = parser.require_token()?;
        self.check_identifier(blame, parser, &name)?;

        if self.entities.contains_key(&*name) {
            return Err(self.err_at(blame, parser, "object with this name already exists"));
        }

        let entity = build(self, blame, parser, &name)?;
        self.entities.insert(name.to_string(), entity);

        Ok(())
    }

    fn parse_include_directive(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<()> {
        let token = parser.require_token()?;
        let raw_path = resolve_quoted_string(&token)
            .map_err(|_| self.err_at(blame, parser, "expected quoted include path"))?;

        let path = BuildPath::new(&raw_path)
            .map_err(|_| self.err_at(blame, parser, "invalid file path"))?;

        let location = self
            .include_stack
            .last()
            .map(|item| item.location)
            .ok_or(Error::Internal)?;

        self.include_stack.push(IncludeStackItem {
            location,
            path,
            can_try_alternate: true,
            parser: None,
        });

        Ok(())
    }

    fn parse_static_sampler(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<SamplerDesc> {
        let mut desc = SamplerDesc::default();
        self.parse_struct_body(blame, parser, SamplerDesc::TYPE, &mut desc)?;
        Ok(desc)
    }

    fn parse_push_constants(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
    ) -> Result<PushConstantListDesc> {
        parser.expect_token("{")?;

        let mut push_constants: Vec<Arc<PushConstantDesc>> = Vec::new();

        loop {
            let name = parser.require_token()?;
            if &*name == "}" {
                break;
            }

            self.check_identifier(blame, parser, &name)?;
            let name_index = self.temp_str(&name);

            if push_constants.iter().any(|pc| pc.name == name_index) {
                return Err(self.err_at(blame, parser, "push constant with this name already exists"));
            }

            parser.expect_token("=")?;

            let mut desc = PushConstantDesc {
                name: name_index,
                ..Default::default()
            };
            self.parse_struct_body(blame, parser, PushConstantDesc::TYPE, &mut desc)?;

            push_constants.push(Arc::new(desc));
        }

        Ok(PushConstantListDesc { push_constants })
    }

    fn parse_struct_def(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<StructureType> {
        parser.expect_token("{")?;

        let mut members: Vec<Arc<StructureMemberDesc>> = Vec::new();

        loop {
            let type_token = parser.require_token()?;
            if &*type_token == "}" {
                break;
            }

            self.check_identifier(blame, parser, &type_token)?;
            let value_type = self.parse_value_type(blame, parser, &type_token)?;

            let name = parser.require_token()?;
            self.check_identifier(blame, parser, &name)?;
            let name_index = self.temp_str(&name);

            if members.iter().any(|member| member.name == name_index) {
                return Err(self.err_at(blame, parser, "struct member with this name already exists"));
            }

            members.push(Arc::new(StructureMemberDesc {
                name: name_index,
                value_type,
            }));
        }

        Ok(StructureType { members })
    }

    fn parse_input_layout(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<InputLayoutDesc> {
        parser.expect_token("{")?;

        struct FeedMapping {
            name: Arc<str>,
            desc: InputLayoutVertexFeedDesc,
            stride_is_set: bool,
            stride_is_automatic: bool,
        }

        struct PendingInput {
            feed: usize,
            member_name: TempStringIndex,
            byte_offset: u32,
            numeric_type: Arc<VectorOrScalarNumericType>,
        }

        let mut feeds: Vec<FeedMapping> = Vec::new();
        let mut pending: Vec<PendingInput> = Vec::new();

        let mut has_numbered = false;
        let mut has_sequential = false;
        let mut next_slot: u32 = 0;

        loop {
            let section = parser.require_token()?;
            if &*section == "}" {
                break;
            }

            match &*section {
                "VertexInputFeeds" => {
                    parser.expect_token("=")?;
                    parser.expect_token("{")?;

                    let mut token = parser.require_token()?;

                    loop {
                        if &*token == "}" {
                            break;
                        }

                        self.check_identifier(blame, parser, &token)?;

                        let mut mapping = FeedMapping {
                            name: Arc::clone(&token),
                            desc: InputLayoutVertexFeedDesc {
                                feed_name: self.temp_str(&token),
                                ..Default::default()
                            },
                            stride_is_set: false,
                            stride_is_automatic: false,
                        };

                        token = parser.require_token()?;

                        let mut explicitly_numbered = false;
                        if &*token == "=" {
                            parser.expect_token("{")?;

                            loop {
                                let property = parser.require_token()?;
                                match &*property {
                                    "}" => break,
                                    "InputSlot" => {
                                        parser.expect_token("=")?;
                                        let value = parser.require_token()?;
                                        let slot = parse_uint_constant(&value, u32::MAX as u64)
                                            .map_err(|_| {
                                                self.err_at(blame, parser, "expected numeric constant")
                                            })?;

                                        explicitly_numbered = true;
                                        mapping.desc.input_slot = slot as u32;
                                    }
                                    "Stride" => {
                                        parser.expect_token("=")?;
                                        let value = parser.require_token()?;
                                        let stride = parse_uint_constant(&value, u32::MAX as u64)
                                            .map_err(|_| {
                                                self.err_at(blame, parser, "expected numeric constant")
                                            })?;

                                        mapping.stride_is_set = true;
                                        mapping.desc.byte_stride =
                                            Configurable::Explicit(stride as u32);
                                    }
                                    "Stepping" => {
                                        parser.expect_token("=")?;
                                        self.parse_enum(blame, parser, &mut mapping.desc.stepping)?;
                                    }
                                    _ => {
                                        return Err(self.err_at(
                                            blame,
                                            parser,
                                            "unknown field for input feed",
                                        ));
                                    }
                                }
                            }

                            token = parser.require_token()?;
                        }

                        if explicitly_numbered {
                            if has_sequential {
                                return Err(self.err_at(
                                    blame,
                                    parser,
                                    "can't mix numbered and sequential input feed mappings",
                                ));
                            }
                            has_numbered = true;

                            if feeds
                                .iter()
                                .any(|existing| existing.desc.input_slot == mapping.desc.input_slot)
                            {
                                return Err(self.err_at(
                                    blame,
                                    parser,
                                    "multiple feeds mapped to the same slot",
                                ));
                            }
                        } else {
                            if has_numbered {
                                return Err(self.err_at(
                                    blame,
                                    parser,
                                    "can't mix numbered and sequential input feed mappings",
                                ));
                            }
                            has_sequential = true;

                            if next_slot == u32::MAX {
                                return Err(self.err_at(blame, parser, "too many input slots"));
                            }

                            mapping.desc.input_slot = next_slot;
                            next_slot += 1;
                        }

                        feeds.push(mapping);
                    }
                }
                "VertexInputs" => {
                    parser.expect_token("=")?;
                    parser.expect_token("{")?;

                    loop {
                        let input_name = parser.require_token()?;
                        if &*input_name == "}" {
                            break;
                        }

                        self.check_identifier(blame, parser, &input_name)?;

                        parser.expect_token("=")?;
                        parser.expect_token("{")?;

                        let mut base_offset: u32 = 0;
                        let mut sources: Option<ValueType> = None;
                        let mut feed_index: Option<usize> = None;

                        loop {
                            let field = parser.require_token()?;
                            match &*field {
                                "}" => break,
                                "InputFeed" => {
                                    parser.expect_token("=")?;
                                    let feed_name = parser.require_token()?;

                                    feed_index = feeds
                                        .iter()
                                        .position(|mapping| *mapping.name == *feed_name);

                                    if feed_index.is_none() {
                                        return Err(self.err_at(blame, parser, "unknown input feed"));
                                    }
                                }
                                "InputSources" => {
                                    parser.expect_token("=")?;
                                    let type_token = parser.require_token()?;
                                    sources =
                                        Some(self.parse_value_type(blame, parser, &type_token)?);
                                }
                                "BaseOffset" => {
                                    parser.expect_token("=")?;
                                    let value = parser.require_token()?;
                                    base_offset = parse_uint_constant(&value, u32::MAX as u64)
                                        .map_err(|_| {
                                            self.err_at(blame, parser, "expected numeric constant")
                                        })?
                                        as u32;
                                }
                                _ => {
                                    return Err(self.err_at(
                                        blame,
                                        parser,
                                        "invalid field for vertex input",
                                    ));
                                }
                            }
                        }

                        let Some(feed_index) = feed_index else {
                            return Err(self.err_at(blame, parser, "no input feeds were defined"));
                        };
                        let Some(sources) = sources else {
                            return Err(self.err_at(blame, parser, "no input source type was defined"));
                        };

                        let mut offset = base_offset;
                        let mut leaves = Vec::new();
                        self.flatten_vertex_inputs(blame, parser, "", &sources, &mut offset, &mut leaves)?;

                        for (member_name, byte_offset, numeric_type) in leaves {
                            pending.push(PendingInput {
                                feed: feed_index,
                                member_name,
                                byte_offset,
                                numeric_type,
                            });
                        }

                        // The packed size of the source type determines the
                        // feed stride unless one was given explicitly, and
                        // every user of the feed must agree.
                        let auto_stride = packed_value_type_size(&sources);
                        let mapping = &mut feeds[feed_index];

                        if mapping.stride_is_set {
                            if mapping.desc.byte_stride != Configurable::Explicit(auto_stride) {
                                return Err(self.err_at(blame, parser, "stride mismatch"));
                            }
                        } else {
                            mapping.stride_is_set = true;
                            mapping.stride_is_automatic = true;
                            mapping.desc.byte_stride = Configurable::Explicit(auto_stride);
                        }
                    }
                }
                _ => {
                    return Err(self.err_at(blame, parser, "invalid entry type in InputLayout"));
                }
            }
        }

        for mapping in &feeds {
            if !mapping.stride_is_set {
                return Err(self.err_at(
                    blame,
                    parser,
                    format!("feed mapping '{}' had no stride", mapping.name),
                ));
            }
        }

        let feed_arcs: Vec<Arc<InputLayoutVertexFeedDesc>> =
            feeds.into_iter().map(|mapping| Arc::new(mapping.desc)).collect();

        let vertex_inputs = pending
            .into_iter()
            .map(|input| {
                Arc::new(InputLayoutVertexInputDesc {
                    input_feed: Some(Arc::clone(&feed_arcs[input.feed])),
                    member_name: input.member_name,
                    byte_offset: input.byte_offset,
                    numeric_type: Some(input.numeric_type),
                })
            })
            .collect();

        Ok(InputLayoutDesc { vertex_inputs })
    }

    /// Flattens an input-source type into `(name, offset, type)` leaves.
    /// Structures recurse with `<outer>_` name prefixes; a bare scalar or
    /// vector becomes a single leaf named `Value`.
    fn flatten_vertex_inputs(
        &mut self,
        blame: &BuildPath,
        parser: &TextParser,
        name_base: &str,
        value_type: &ValueType,
        offset: &mut u32,
        out: &mut Vec<(TempStringIndex, u32, Arc<VectorOrScalarNumericType>)>,
    ) -> Result<()> {
        match value_type {
            ValueType::Compound(_) => {
                Err(self.err_at(blame, parser, "matrix types aren't allowed in vertex inputs"))
            }
            ValueType::Numeric(numeric) => {
                self.push_vertex_leaf(name_base, *numeric, VectorOrScalarDimension::Scalar, offset, out);
                Ok(())
            }
            ValueType::Vector(vector) => {
                self.push_vertex_leaf(
                    name_base,
                    vector.numeric_type,
                    to_maybe_scalar(vector.cols),
                    offset,
                    out,
                );
                Ok(())
            }
            ValueType::Structure(structure) => {
                for member in &structure.members {
                    let member_name = self.temp_to_string(member.name)?;

                    if matches!(member.value_type, ValueType::Structure(_)) {
                        let nested_base = format!("{name_base}{member_name}_");
                        self.flatten_vertex_inputs(
                            blame,
                            parser,
                            &nested_base,
                            &member.value_type,
                            offset,
                            out,
                        )?;
                    } else {
                        let leaf_name = format!("{name_base}{member_name}");
                        self.flatten_vertex_inputs(
                            blame,
                            parser,
                            &leaf_name,
                            &member.value_type,
                            offset,
                            out,
                        )?;
                    }
                }

                Ok(())
            }
        }
    }

    fn push_vertex_leaf(
        &mut self,
        name_base: &str,
        numeric_type: NumericType,
        cols: VectorOrScalarDimension,
        offset: &mut u32,
        out: &mut Vec<(TempStringIndex, u32, Arc<VectorOrScalarNumericType>)>,
    ) {
        let name = if name_base.is_empty() { "Value" } else { name_base };
        let member_name = self.temp_str(name);

        let deduplicated = self.dedup_vector_or_scalar(VectorOrScalarNumericType {
            numeric_type,
            cols,
        });

        let size = vector_or_scalar_size(numeric_type, cols);

        out.push((member_name, *offset, deduplicated));
        *offset += size;
    }

    fn parse_descriptor_layout(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
    ) -> Result<DescriptorLayoutDesc> {
        parser.expect_token("{")?;

        let mut descriptors: Vec<Arc<DescriptorDesc>> = Vec::new();

        loop {
            let name = parser.require_token()?;
            if &*name == "}" {
                break;
            }

            let name_index = self.temp_str(&name);
            if descriptors.iter().any(|desc| desc.name == name_index) {
                return Err(self.err_at(blame, parser, "descriptor with that name already exists"));
            }

            parser.expect_token("=")?;
            parser.expect_token("{")?;

            let mut desc = DescriptorDesc {
                name: name_index,
                array_size: 1,
                ..Default::default()
            };

            let mut type_specified = false;
            let mut token = parser.require_token()?;

            loop {
                if &*token == "}" {
                    break;
                }

                match &*token {
                    "Type" => {
                        if type_specified {
                            return Err(self.err_at(blame, parser, "type was already specified"));
                        }
                        type_specified = true;

                        parser.expect_token("=")?;
                        let type_token = parser.require_token()?;

                        let value = <DescriptorType as ReflectEnum>::TYPE
                            .option_by_name(&type_token)
                            .and_then(DescriptorType::from_raw)
                            .ok_or_else(|| self.err_at(blame, parser, "invalid descriptor type"))?;

                        desc.descriptor_type = value;

                        match classify_descriptor_type(value) {
                            DescriptorClass::Texture => {
                                token = parser.require_token()?;

                                if &*token == "<" {
                                    let element = parser.require_token()?;
                                    desc.value_type =
                                        self.parse_value_type(blame, parser, &element)?;
                                    parser.expect_token(">")?;

                                    if !matches!(
                                        desc.value_type,
                                        ValueType::Numeric(_) | ValueType::Vector(_)
                                    ) {
                                        return Err(self.err_at(
                                            blame,
                                            parser,
                                            "invalid type for texture",
                                        ));
                                    }

                                    token = parser.require_token()?;
                                }
                            }
                            DescriptorClass::Buffer | DescriptorClass::ConstantBuffer => {
                                parser.expect_token("<")?;
                                let element = parser.require_token()?;
                                desc.value_type = self.parse_value_type(blame, parser, &element)?;
                                parser.expect_token(">")?;

                                token = parser.require_token()?;
                            }
                            DescriptorClass::ByteAddressBuffer | DescriptorClass::Sampler => {
                                token = parser.require_token()?;
                            }
                        }

                        if &*token == "[" {
                            let bound = parser.require_token()?;

                            if &*bound == "]" {
                                // Empty brackets: unbounded array.
                                desc.array_size = 0;
                            } else {
                                let size = parse_uint_constant(&bound, u32::MAX as u64).map_err(
                                    |_| self.err_at(blame, parser, "expected numeric constant"),
                                )?;

                                if size < 2 {
                                    return Err(self.err_at(
                                        blame,
                                        parser,
                                        "invalid descriptor array size",
                                    ));
                                }

                                desc.array_size = size as u32;
                                parser.expect_token("]")?;
                            }

                            token = parser.require_token()?;
                        }
                    }
                    "Sampler" => {
                        if !type_specified {
                            return Err(self.err_at(blame, parser, "static sampler must be after type"));
                        }

                        if classify_descriptor_type(desc.descriptor_type) != DescriptorClass::Texture
                        {
                            return Err(self.err_at(
                                blame,
                                parser,
                                "static sampler is only valid for texture types",
                            ));
                        }

                        parser.expect_token("=")?;
                        let sampler_name = parser.require_token()?;

                        let Some(Entity::StaticSampler(sampler)) =
                            self.entities.get(&*sampler_name)
                        else {
                            return Err(self.err_at(blame, parser, "unknown static sampler"));
                        };

                        desc.static_sampler = Some(Arc::clone(sampler));

                        token = parser.require_token()?;
                    }
                    _ => {
                        return Err(self.err_at(blame, parser, "invalid descriptor desc property"));
                    }
                }
            }

            if !type_specified {
                return Err(self.err_at(blame, parser, "descriptor missing type"));
            }

            descriptors.push(Arc::new(desc));
        }

        Ok(DescriptorLayoutDesc { descriptors })
    }

    fn parse_graphics_pipeline(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        name: &str,
    ) -> Result<GraphicsPipelineDesc> {
        parser.expect_token("{")?;

        let mut desc = GraphicsPipelineDesc::default();
        let mut descriptor_layouts: Vec<Arc<DescriptorLayoutDesc>> = Vec::new();
        let mut push_constant_list: Option<Arc<PushConstantListDesc>> = None;
        let mut operations_by_name: Vec<(Arc<str>, Arc<RenderOperationDesc>)> = Vec::new();

        loop {
            let token = parser.require_token()?;
            if &*token == "}" {
                break;
            }

            match &*token {
                "DescriptorLayouts" => {
                    parser.expect_token("=")?;
                    parser.expect_token("{")?;

                    loop {
                        let layout_name = parser.require_token()?;
                        if &*layout_name == "}" {
                            break;
                        }

                        let Some(Entity::DescriptorLayout(layout)) =
                            self.entities.get(&*layout_name)
                        else {
                            return Err(self.err_at(blame, parser, "couldn't resolve descriptor layout"));
                        };

                        descriptor_layouts.push(Arc::clone(layout));
                    }
                }
                "PushConstants" => {
                    parser.expect_token("=")?;
                    let list_name = parser.require_token()?;

                    let Some(Entity::PushConstants(list)) = self.entities.get(&*list_name) else {
                        return Err(self.err_at(blame, parser, "unknown push constants identifier"));
                    };

                    push_constant_list = Some(Arc::clone(list));
                }
                "RenderTargets" => {
                    parser.expect_token("=")?;
                    parser.expect_token("{")?;

                    loop {
                        let target_name = parser.require_token()?;
                        if &*target_name == "}" {
                            break;
                        }

                        self.check_identifier(blame, parser, &target_name)?;

                        if operations_by_name.iter().any(|(existing, _)| **existing == *target_name)
                        {
                            return Err(self.err_at(
                                blame,
                                parser,
                                format!("render target '{target_name}' was specified multiple times"),
                            ));
                        }

                        parser.expect_token("=")?;

                        let mut operation = RenderOperationDesc::default();
                        self.parse_struct_body(
                            blame,
                            parser,
                            RenderOperationDesc::TYPE,
                            &mut operation,
                        )?;

                        operations_by_name.push((target_name, Arc::new(operation)));
                    }
                }
                "InputLayout" => {
                    parser.expect_token("=")?;
                    let layout_name = parser.require_token()?;

                    let Some(Entity::InputLayout(layout)) = self.entities.get(&*layout_name) else {
                        return Err(self.err_at(blame, parser, "unknown input layout identifier"));
                    };

                    desc.input_layout = Some(Arc::clone(layout));
                }
                "VertexShader" | "PixelShader" => {
                    let is_vertex = &*token == "VertexShader";

                    parser.expect_token("=")?;

                    let mut shader = ShaderDesc::default();
                    self.parse_struct_body(blame, parser, ShaderDesc::TYPE, &mut shader)?;

                    let shader = Arc::new(shader);
                    if is_vertex {
                        desc.vertex_shader = Some(shader);
                    } else {
                        desc.pixel_shader = Some(shader);
                    }
                }
                "DepthStencil" => {
                    parser.expect_token("=")?;

                    let mut depth_stencil = DepthStencilOperationDesc::default();
                    self.parse_struct_body(
                        blame,
                        parser,
                        DepthStencilOperationDesc::TYPE,
                        &mut depth_stencil,
                    )?;

                    desc.depth_stencil = Some(Arc::new(depth_stencil));
                }
                "ExecuteInPass" => {
                    parser.expect_token("=")?;
                    let pass_name = parser.require_token()?;

                    let Some(Entity::RenderPass(pass)) = self.entities.get(&*pass_name) else {
                        return Err(self.err_at(blame, parser, "unknown execute in pass identifier"));
                    };

                    desc.execute_in_pass = Some(Arc::clone(pass));
                }
                _ => {
                    self.parse_struct_member(
                        blame,
                        parser,
                        &token,
                        GraphicsPipelineDesc::TYPE,
                        &mut desc,
                    )?;
                }
            }
        }

        desc.pipeline_layout = Some(Arc::new(PipelineLayoutDesc {
            descriptor_layouts,
            push_constant_list,
        }));

        let Some(render_pass) = desc.execute_in_pass.clone() else {
            return Err(self.err_at(blame, parser, "pipeline did not specify ExecuteInPass"));
        };

        if render_pass.depth_stencil_target.is_none() && desc.depth_stencil.is_some() {
            return Err(self.err_at(
                blame,
                parser,
                "pipeline has depth/stencil operations but there is no depth/stencil in the corresponding render pass",
            ));
        }

        if render_pass.depth_stencil_target.is_some() && desc.depth_stencil.is_none() {
            // The pass forces depth/stencil state; inject the no-test,
            // no-write block.
            desc.depth_stencil = Some(Arc::new(DepthStencilOperationDesc {
                depth_test: Configurable::Explicit(false),
                depth_write: Configurable::Explicit(false),
                ..Default::default()
            }));
        }

        let pass_targets = &render_pass.render_targets;
        let mut operations: Vec<Option<Arc<RenderOperationDesc>>> = vec![None; pass_targets.len()];

        for (target_name, operation) in operations_by_name {
            let name_index = self.temp_str(&target_name);

            let position = pass_targets
                .iter()
                .position(|target| target.name == name_index);

            match position {
                Some(index) => operations[index] = Some(operation),
                None => {
                    return Err(self.err_at(
                        blame,
                        parser,
                        format!("pipeline target '{target_name}' didn't exist in the render pass"),
                    ));
                }
            }
        }

        // Unbound targets share one read-only, no-write operation.
        let mut unbound_default: Option<Arc<RenderOperationDesc>> = None;
        desc.render_targets = operations
            .into_iter()
            .map(|operation| {
                operation.unwrap_or_else(|| {
                    Arc::clone(unbound_default.get_or_insert_with(|| {
                        Arc::new(RenderOperationDesc::unbound_default())
                    }))
                })
            })
            .collect();

        let name_index = self.global_str(name);
        self.graphics_pipelines.push(Arc::new(GraphicsPipelineNameLookup {
            name: name_index,
            pipeline: None, // patched at export once the desc is shared
        }));

        Ok(desc)
    }

    fn parse_render_pass(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<RenderPassDesc> {
        parser.expect_token("{")?;

        let mut desc = RenderPassDesc::default();

        loop {
            let token = parser.require_token()?;
            if &*token == "}" {
                break;
            }

            match &*token {
                "RenderTargets" => {
                    parser.expect_token("=")?;
                    parser.expect_token("{")?;

                    loop {
                        let target_name = parser.require_token()?;
                        if &*target_name == "}" {
                            break;
                        }

                        self.check_identifier(blame, parser, &target_name)?;

                        let mut target = RenderTargetDesc {
                            name: self.temp_str(&target_name),
                            ..Default::default()
                        };

                        parser.expect_token("=")?;
                        self.parse_struct_body(blame, parser, RenderTargetDesc::TYPE, &mut target)?;

                        desc.render_targets.push(Arc::new(target));
                    }
                }
                "DepthStencil" => {
                    parser.expect_token("=")?;

                    let mut target = forge_data::schema::DepthStencilTargetDesc::default();
                    self.parse_struct_body(
                        blame,
                        parser,
                        forge_data::schema::DepthStencilTargetDesc::TYPE,
                        &mut target,
                    )?;

                    desc.depth_stencil_target = Some(Arc::new(target));
                }
                _ => {
                    self.parse_struct_member(blame, parser, &token, RenderPassDesc::TYPE, &mut desc)?;
                }
            }
        }

        Ok(desc)
    }

    fn parse_struct_body(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        ty: &'static StructType,
        obj: &mut dyn Any,
    ) -> Result<()> {
        parser.expect_token("{")?;

        loop {
            let name = parser.require_token()?;
            if &*name == "}" {
                break;
            }

            self.check_identifier(blame, parser, &name)?;
            self.parse_struct_member(blame, parser, &name, ty, obj)?;
        }

        Ok(())
    }

    fn parse_struct_member(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        member_name: &str,
        ty: &'static StructType,
        obj: &mut dyn Any,
    ) -> Result<()> {
        let Some(field) = ty.find_visible_field(member_name) else {
            return Err(self.err_at(blame, parser, format!("invalid field '{member_name}'")));
        };

        parser.expect_token("=")?;
        self.parse_value(blame, parser, (field.get_mut)(obj))
    }

    fn parse_value(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        slot: ValueMut<'_>,
    ) -> Result<()> {
        match slot {
            ValueMut::Enum(slot) => self.parse_enum(blame, parser, slot),
            ValueMut::Number(slot) => self.parse_number(blame, parser, slot),
            ValueMut::Struct { ty, obj } => self.parse_struct_body(blame, parser, ty, obj),
            ValueMut::ValueType(value_type) => {
                let token = parser.require_token()?;
                self.check_identifier(blame, parser, &token)?;
                *value_type = self.parse_value_type(blame, parser, &token)?;
                Ok(())
            }
            ValueMut::TempString(slot) => {
                let text = self.parse_string_literal(blame, parser)?;
                *slot = self.temp_str(&text);
                Ok(())
            }
            ValueMut::GlobalString(slot) => {
                let text = self.parse_string_literal(blame, parser)?;
                *slot = self.global_str(&text);
                Ok(())
            }
            _ => Err(Error::Internal),
        }
    }

    fn parse_string_literal(&mut self, blame: &BuildPath, parser: &mut TextParser) -> Result<String> {
        let token = parser.require_token()?;

        if !token.starts_with('"') {
            return Err(self.err_at(blame, parser, "expected string constant"));
        }

        resolve_quoted_string(&token)
            .map_err(|_| self.err_at(blame, parser, "invalid string constant"))
    }

    fn parse_enum(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        slot: &mut dyn EnumSlot,
    ) -> Result<()> {
        let token = parser.require_token()?;

        if &*token == "Config" {
            if !slot.is_configurable() {
                return Err(self.err_at(blame, parser, "option is not configurable"));
            }

            let key = self.parse_config_reference(blame, parser, slot.enum_type().main_type)?;
            return slot.set_configured(key);
        }

        match slot.enum_type().option_by_name(&token) {
            Some(value) => slot.set_explicit(value),
            None => Err(self.err_at(blame, parser, "invalid value")),
        }
    }

    fn parse_number(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        slot: &mut dyn NumberSlot,
    ) -> Result<()> {
        let token = parser.require_token()?;

        if &*token == "Config" {
            if !slot.is_configurable() {
                return Err(self.err_at(blame, parser, "option is not configurable"));
            }

            let key = self.parse_config_reference(blame, parser, slot.number_type().main_type)?;
            return slot.set_configured(key);
        }

        let ty = slot.number_type();
        let scalar = match ty.repr {
            // Boolean literals use the legacy inverted encoding.
            NumberRepr::UnsignedInt if ty.bits == NumberBits::Bits1 => match &*token {
                "true" => Scalar::UInt(0),
                "false" => Scalar::UInt(1),
                _ => return Err(self.err_at(blame, parser, "invalid boolean value")),
            },
            NumberRepr::UnsignedInt => {
                let max = match ty.bits {
                    NumberBits::Bits1 | NumberBits::Bits8 => u8::MAX as u64,
                    NumberBits::Bits16 => u16::MAX as u64,
                    NumberBits::Bits32 => u32::MAX as u64,
                    NumberBits::Bits64 => u64::MAX,
                };

                Scalar::UInt(
                    parse_uint_constant(&token, max)
                        .map_err(|_| self.err_at(blame, parser, "expected numeric constant"))?,
                )
            }
            NumberRepr::SignedInt => {
                let (digits, negative) = match token.strip_prefix('-') {
                    Some(rest) => (rest, true),
                    None => (&*token, false),
                };

                let magnitude = parse_uint_constant(digits, i64::MAX as u64)
                    .map_err(|_| self.err_at(blame, parser, "expected numeric constant"))?;

                let value = if negative {
                    -(magnitude as i64)
                } else {
                    magnitude as i64
                };

                Scalar::SInt(value)
            }
            NumberRepr::Float => Scalar::Float(
                token
                    .parse::<f64>()
                    .map_err(|_| self.err_at(blame, parser, "expected numeric constant"))?,
            ),
        };

        slot.set_explicit(scalar)
            .map_err(|_| self.err_at(blame, parser, "value out of range"))
    }

    fn parse_config_reference(
        &mut self,
        blame: &BuildPath,
        parser: &mut TextParser,
        main_type: MainType,
    ) -> Result<ConfigNameIndex> {
        parser.expect_token("(")?;
        let name = parser.require_token()?;
        self.check_identifier(blame, parser, &name)?;
        parser.expect_token(")")?;

        let global = self.global_str(&name);

        self.config.index(global, main_type).map_err(|_| {
            self.err_at(
                blame,
                parser,
                format!("config key '{name}' was already used for a different type"),
            )
        })
    }

    /// Resolves a type token: a scalar name, a `TN` vector, a `TNxM`
    /// matrix, or a previously declared `struct` entity.
    fn parse_value_type(
        &mut self,
        blame: &BuildPath,
        parser: &TextParser,
        token: &str,
    ) -> Result<ValueType> {
        for &(name, numeric_type) in NUMERIC_RESOLUTIONS {
            let Some(suffix) = token.strip_prefix(name) else {
                continue;
            };

            match suffix.len() {
                0 => return Ok(ValueType::Numeric(numeric_type)),
                1 => {
                    let c0 = suffix.as_bytes()[0];
                    if (b'2'..=b'4').contains(&c0) {
                        let vector = self.dedup_vector(VectorNumericType {
                            numeric_type,
                            cols: dimension_from_digit(c0),
                        });

                        return Ok(ValueType::Vector(vector));
                    }
                }
                3 => {
                    let bytes = suffix.as_bytes();
                    if (b'2'..=b'4').contains(&bytes[0])
                        && bytes[1] == b'x'
                        && (b'2'..=b'4').contains(&bytes[2])
                    {
                        let compound = self.dedup_compound(CompoundNumericType {
                            numeric_type,
                            cols: dimension_from_digit(bytes[0]),
                            rows: dimension_from_digit(bytes[2]),
                        });

                        return Ok(ValueType::Compound(compound));
                    }
                }
                _ => {}
            }
        }

        match self.entities.get(token) {
            Some(Entity::StructDef(structure)) => Ok(ValueType::Structure(Arc::clone(structure))),
            Some(_) => Err(self.err_at(blame, parser, "identifier does not resolve to a structure")),
            None => Err(self.err_at(blame, parser, "unknown type identifier")),
        }
    }

    fn dedup_vector(&mut self, value: VectorNumericType) -> Arc<VectorNumericType> {
        if let Some(existing) = self.vector_types.iter().find(|candidate| ***candidate == value) {
            return Arc::clone(existing);
        }

        let arc = Arc::new(value);
        self.vector_types.push(Arc::clone(&arc));
        arc
    }

    fn dedup_compound(&mut self, value: CompoundNumericType) -> Arc<CompoundNumericType> {
        if let Some(existing) = self.compound_types.iter().find(|candidate| ***candidate == value) {
            return Arc::clone(existing);
        }

        let arc = Arc::new(value);
        self.compound_types.push(Arc::clone(&arc));
        arc
    }

    fn dedup_vector_or_scalar(
        &mut self,
        value: VectorOrScalarNumericType,
    ) -> Arc<VectorOrScalarNumericType> {
        if let Some(existing) = self
            .vector_or_scalar_types
            .iter()
            .find(|candidate| ***candidate == value)
        {
            return Arc::clone(existing);
        }

        let arc = Arc::new(value);
        self.vector_or_scalar_types.push(Arc::clone(&arc));
        arc
    }

    fn check_identifier(&self, blame: &BuildPath, parser: &TextParser, token: &str) -> Result<()> {
        if !is_valid_identifier(token) {
            return Err(self.err_at(blame, parser, "expected identifier"));
        }

        Ok(())
    }

    fn err_at(&self, blame: &BuildPath, parser: &TextParser, message: impl Into<String>) -> Error {
        let (line, col) = parser.location();

        Error::TextParse {
            path: blame.as_str().to_owned(),
            line,
            col,
            message: message.into(),
        }
    }

    fn global_str(&mut self, value: &str) -> GlobalStringIndex {
        self.strings.index(value)
    }

    fn temp_str(&mut self, value: &str) -> TempStringIndex {
        let global = self.strings.index(value);
        self.temp.index(global)
    }

    fn temp_to_string(&self, index: TempStringIndex) -> Result<String> {
        let global = self.temp.get(index)?;
        Ok(self.strings.get(global)?.to_owned())
    }

    /// Writes one package per graphics pipeline, the render-pass globals
    /// package and the library index, declaring a per-pipeline node
    /// dependency for the backend compiler.
    fn export_packages(&mut self, key: &NodeKey) -> Result<()> {
        // Patch the name lookups now that the pipeline entities are
        // shared.
        let lookups: Vec<Arc<GraphicsPipelineNameLookup>> = self
            .graphics_pipelines
            .iter()
            .map(|lookup| {
                let name = self.strings.get(lookup.name).map(str::to_owned)?;
                let Some(Entity::GraphicsPipeline(pipeline)) = self.entities.get(&name) else {
                    return Err(Error::Internal);
                };

                Ok(Arc::new(GraphicsPipelineNameLookup {
                    name: lookup.name,
                    pipeline: Some(Arc::clone(pipeline)),
                }))
            })
            .collect::<Result<_>>()?;
        self.graphics_pipelines = lookups;

        for (pipeline_index, lookup) in self.graphics_pipelines.clone().iter().enumerate() {
            let mut builder = PackageBuilder::new(true);

            {
                let mut source = builder.begin_source(&*self);
                source.index_object(lookup, true)?;
            }

            let out_path = graphics_pipeline_path(&key.identifier, pipeline_index);
            let mut bytes = Cursor::new(Vec::new());
            builder.write_package(&mut bytes)?;

            let mut stream = self
                .feedback
                .open_output(BuildFileLocation::IntermediateDir, &out_path)?;
            stream
                .write_all(&bytes.into_inner())
                .map_err(Error::IoWrite)?;
            stream.commit()?;

            self.feedback.add_node_dependency(
                DEFAULT_NAMESPACE,
                GRAPHICS_PIPELINE_NODE_TYPE,
                BuildFileLocation::IntermediateDir,
                out_path,
            )?;
        }

        // Globals package: every render-pass name lookup.
        {
            let mut builder = PackageBuilder::new(false);

            {
                let passes = self.render_passes.clone();
                let mut source = builder.begin_source(&*self);
                for lookup in &passes {
                    source.index_object(lookup, true)?;
                }
            }

            let out_path = globals_path(&key.identifier);
            let mut bytes = Cursor::new(Vec::new());
            builder.write_package(&mut bytes)?;

            let mut stream = self
                .feedback
                .open_output(BuildFileLocation::IntermediateDir, &out_path)?;
            stream
                .write_all(&bytes.into_inner())
                .map_err(Error::IoWrite)?;
            stream.commit()?;
        }

        // The 16-byte library index.
        {
            let mut stream = self
                .feedback
                .open_output(BuildFileLocation::IntermediateDir, &index_path(&key.identifier))?;

            stream
                .write_all(&LIBRARY_INDEX_MAGIC.to_le_bytes())
                .map_err(Error::IoWrite)?;
            stream
                .write_all(&LIBRARY_INDEX_VERSION.to_le_bytes())
                .map_err(Error::IoWrite)?;
            stream
                .write_all(&(self.graphics_pipelines.len() as u64).to_le_bytes())
                .map_err(Error::IoWrite)?;
            stream.commit()?;
        }

        Ok(())
    }
}

impl StringResolver for LibraryAnalyzer<'_> {
    fn global_string(&self, index: usize) -> Result<&str> {
        self.strings.get(GlobalStringIndex(index))
    }

    fn config_key_name(&self, index: usize) -> Result<&str> {
        let key = self.config.get(ConfigNameIndex(index))?;
        self.strings.get(key.name)
    }

    fn temp_string(&self, index: usize) -> Result<&str> {
        let global = self.temp.get(TempStringIndex(index))?;
        self.strings.get(global)
    }

    fn binary_content(&self, _index: usize) -> Result<&[u8]> {
        // The analyzer never emits binary content.
        Err(Error::KeyNotFound)
    }
}

fn dimension_from_digit(digit: u8) -> VectorDimension {
    match digit {
        b'2' => VectorDimension::Dimension2,
        b'3' => VectorDimension::Dimension3,
        _ => VectorDimension::Dimension4,
    }
}

fn to_maybe_scalar(dimension: VectorDimension) -> VectorOrScalarDimension {
    match dimension {
        VectorDimension::Dimension2 => VectorOrScalarDimension::Dimension2,
        VectorDimension::Dimension3 => VectorOrScalarDimension::Dimension3,
        VectorDimension::Dimension4 => VectorOrScalarDimension::Dimension4,
    }
}

fn numeric_type_size(numeric_type: NumericType) -> u32 {
    match numeric_type {
        NumericType::SInt8 | NumericType::UInt8 | NumericType::SNorm8 | NumericType::UNorm8 => 1,
        NumericType::Float16
        | NumericType::SInt16
        | NumericType::UInt16
        | NumericType::SNorm16
        | NumericType::UNorm16 => 2,
        NumericType::Float32 | NumericType::SInt32 | NumericType::UInt32 => 4,
        NumericType::Float64 | NumericType::SInt64 | NumericType::UInt64 => 8,
        NumericType::Bool => 1,
    }
}

fn dimension_count(dimension: VectorDimension) -> u32 {
    match dimension {
        VectorDimension::Dimension2 => 2,
        VectorDimension::Dimension3 => 3,
        VectorDimension::Dimension4 => 4,
    }
}

fn vector_or_scalar_size(numeric_type: NumericType, cols: VectorOrScalarDimension) -> u32 {
    let dimension = match cols {
        VectorOrScalarDimension::Scalar => 1,
        VectorOrScalarDimension::Dimension2 => 2,
        VectorOrScalarDimension::Dimension3 => 3,
        VectorOrScalarDimension::Dimension4 => 4,
    };

    numeric_type_size(numeric_type) * dimension
}

/// Packed byte size of a value type in a vertex feed.
fn packed_value_type_size(value_type: &ValueType) -> u32 {
    match value_type {
        ValueType::Numeric(numeric) => numeric_type_size(*numeric),
        ValueType::Vector(vector) => {
            numeric_type_size(vector.numeric_type) * dimension_count(vector.cols)
        }
        ValueType::Compound(compound) => {
            numeric_type_size(compound.numeric_type)
                * dimension_count(compound.rows)
                * dimension_count(compound.cols)
        }
        ValueType::Structure(structure) => structure
            .members
            .iter()
            .map(|member| packed_value_type_size(&member.value_type))
            .sum(),
    }
}
