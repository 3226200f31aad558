//! End-to-end package tests: build an object graph the way the analyzer
//! does, write it, load it back and re-serialize it the way the combiner
//! does.

use std::io::Cursor;
use std::sync::Arc;

use forge_common::Result;
use forge_data::pools::{ConfigKeyPool, StringPool, TempStringPool};
use forge_data::schema::{
    AddressMode, ConfigNameIndex, Configurable, ContentKey, DepthStencilTargetDesc, DescriptorDesc,
    DescriptorLayoutDesc, DescriptorType, Filter, GlobalStringIndex, GraphicsPipelineDesc,
    GraphicsPipelineNameLookup, MainType, NumericType, PipelineLayoutDesc, RenderOperationDesc,
    RenderPassDesc, RenderPassNameLookup, RenderTargetDesc, SamplerDesc, ShaderDesc,
    StructureMemberDesc, StructureType, TempStringIndex, ValueType, VectorDimension,
    VectorNumericType, BinaryContentIndex,
};
use forge_data::{Package, PackageBuilder, PackageResolver, StringResolver};

#[derive(Default)]
struct SourcePools {
    strings: StringPool,
    temp: TempStringPool,
    config: ConfigKeyPool,
    content: Vec<Vec<u8>>,
}

impl SourcePools {
    fn global(&mut self, value: &str) -> GlobalStringIndex {
        self.strings.index(value)
    }

    fn temp_str(&mut self, value: &str) -> TempStringIndex {
        let global = self.strings.index(value);
        self.temp.index(global)
    }

    fn config_key(&mut self, name: &str, main_type: MainType) -> ConfigNameIndex {
        let global = self.strings.index(name);
        self.config.index(global, main_type).unwrap()
    }

    fn add_content(&mut self, bytes: Vec<u8>) -> BinaryContentIndex {
        self.content.push(bytes);
        BinaryContentIndex(self.content.len() - 1)
    }
}

impl StringResolver for SourcePools {
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

    fn binary_content(&self, index: usize) -> Result<&[u8]> {
        Ok(&self.content[index])
    }
}

struct PipelineFixture {
    pools: SourcePools,
    pipeline_lookup: Arc<GraphicsPipelineNameLookup>,
    pass_lookup: Arc<RenderPassNameLookup>,
}

fn build_fixture() -> PipelineFixture {
    let mut pools = SourcePools::default();

    let sampler = Arc::new(SamplerDesc {
        min_filter: Configurable::Explicit(Filter::Linear),
        address_mode_u: Configurable::Explicit(AddressMode::ClampEdge),
        max_lod: Configurable::Configured(pools.config_key("lod_cap", MainType::Float32)),
        ..Default::default()
    });

    let position_type = Arc::new(VectorNumericType {
        numeric_type: NumericType::Float32,
        cols: VectorDimension::Dimension3,
    });

    let vertex_struct = Arc::new(StructureType {
        members: vec![Arc::new(StructureMemberDesc {
            name: pools.temp_str("position"),
            value_type: ValueType::Vector(Arc::clone(&position_type)),
        })],
    });

    let descriptor_layout = Arc::new(DescriptorLayoutDesc {
        descriptors: vec![Arc::new(DescriptorDesc {
            name: pools.temp_str("albedo"),
            descriptor_type: DescriptorType::Texture2D,
            array_size: 1,
            value_type: ValueType::Structure(Arc::clone(&vertex_struct)),
            static_sampler: Some(Arc::clone(&sampler)),
        })],
    });

    let pipeline_layout = Arc::new(PipelineLayoutDesc {
        descriptor_layouts: vec![Arc::clone(&descriptor_layout)],
        push_constant_list: None,
    });

    let render_pass = Arc::new(RenderPassDesc {
        render_targets: vec![Arc::new(RenderTargetDesc {
            name: pools.temp_str("color"),
            ..Default::default()
        })],
        depth_stencil_target: Some(Arc::new(DepthStencilTargetDesc::default())),
    });

    let content = pools.add_content(vec![3, 2, 0, 2, 7, 0, 0, 1]);

    let pipeline = Arc::new(GraphicsPipelineDesc {
        pipeline_layout: Some(pipeline_layout),
        execute_in_pass: Some(Arc::clone(&render_pass)),
        vertex_shader: Some(Arc::new(ShaderDesc {
            source: pools.temp_str("shaders/world.vs.glsl"),
            entry_point: pools.temp_str("main"),
        })),
        render_targets: vec![Arc::new(RenderOperationDesc::unbound_default())],
        compiled_content_keys: vec![Some(Arc::new(ContentKey { content })), None],
        ..Default::default()
    });

    let pipeline_lookup = Arc::new(GraphicsPipelineNameLookup {
        name: pools.global("world_opaque"),
        pipeline: Some(pipeline),
    });

    let pass_lookup = Arc::new(RenderPassNameLookup {
        name: pools.global("main_pass"),
        render_pass: Some(render_pass),
    });

    PipelineFixture {
        pools,
        pipeline_lookup,
        pass_lookup,
    }
}

fn write_fixture_package(fixture: &mut PipelineFixture) -> Vec<u8> {
    let mut builder = PackageBuilder::new(true);

    let mut source = builder.begin_source(&fixture.pools);
    source.index_object(&fixture.pipeline_lookup, true).unwrap();
    source.index_object(&fixture.pass_lookup, true).unwrap();

    let mut bytes = Cursor::new(Vec::new());
    builder.write_package(&mut bytes).unwrap();
    bytes.into_inner()
}

#[test]
fn package_round_trip() {
    let mut fixture = build_fixture();
    let bytes = write_fixture_package(&mut fixture);

    let mut content = Vec::new();
    let package = Package::load(Cursor::new(&bytes), true, Some(&mut content)).unwrap();

    let lookups = package.objects_of::<GraphicsPipelineNameLookup>().unwrap();
    assert_eq!(lookups.len(), 1);
    assert_eq!(
        package.string(lookups[0].name.0).unwrap(),
        "world_opaque"
    );

    let pipeline = lookups[0].pipeline.as_ref().unwrap();

    let shader = pipeline.vertex_shader.as_ref().unwrap();
    assert_eq!(
        package.string(shader.source.0).unwrap(),
        "shaders/world.vs.glsl"
    );
    assert_eq!(package.string(shader.entry_point.0).unwrap(), "main");
    assert!(pipeline.pixel_shader.is_none());

    // Configured values keep their key binding and its declared type.
    let layout = pipeline.pipeline_layout.as_ref().unwrap();
    let sampler = layout.descriptor_layouts[0].descriptors[0]
        .static_sampler
        .as_ref()
        .unwrap();
    assert_eq!(
        sampler.min_filter,
        Configurable::Explicit(Filter::Linear)
    );
    let Configurable::Configured(key) = sampler.max_lod else {
        panic!("expected configured max lod");
    };
    let entry = package.config_key(key.0).unwrap();
    assert_eq!(entry.main_type, MainType::Float32);
    assert_eq!(package.string(entry.string_index).unwrap(), "lod_cap");

    // The render pass is shared between the pipeline and the pass lookup.
    let pass_lookups = package.objects_of::<RenderPassNameLookup>().unwrap();
    assert_eq!(pass_lookups.len(), 1);
    assert!(Arc::ptr_eq(
        pass_lookups[0].render_pass.as_ref().unwrap(),
        pipeline.execute_in_pass.as_ref().unwrap()
    ));

    // Binary content and the content-key span with its null slot.
    assert_eq!(content, vec![vec![3, 2, 0, 2, 7, 0, 0, 1]]);
    assert_eq!(pipeline.compiled_content_keys.len(), 2);
    assert!(pipeline.compiled_content_keys[0].is_some());
    assert!(pipeline.compiled_content_keys[1].is_none());
}

#[test]
fn incomplete_package_is_rejected() {
    let mut fixture = build_fixture();
    let mut bytes = write_fixture_package(&mut fixture);

    // Clearing the back-patched identifier marks the write incomplete.
    bytes[..4].fill(0);

    assert!(Package::load(Cursor::new(&bytes), true, None).is_err());
}

#[test]
fn identical_serializations_share_an_index() {
    let mut pools = SourcePools::default();
    let name = pools.temp_str("shared");

    let a = Arc::new(ShaderDesc {
        source: name,
        entry_point: name,
    });
    let b = Arc::new(ShaderDesc {
        source: name,
        entry_point: name,
    });

    let mut builder = PackageBuilder::new(true);
    let mut source = builder.begin_source(&pools);

    let index_a = source.index_object(&a, true).unwrap();
    let index_b = source.index_object(&b, true).unwrap();
    assert_eq!(index_a, index_b);

    // Identity-cache hit: indexing the same pointer again must not change
    // the answer either.
    assert_eq!(source.index_object(&a, true).unwrap(), index_a);
}

#[test]
fn identity_cache_is_flushed_per_source() {
    let mut first = SourcePools::default();
    first.temp_str("first");

    let mut second = SourcePools::default();
    second.temp_str("second");

    let shader = Arc::new(ShaderDesc::default());

    let mut builder = PackageBuilder::new(true);

    let mut source = builder.begin_source(&first);
    let index_first = source.index_object(&shader, true).unwrap();

    // Same pointer, new source with different strings behind the same temp
    // index: a stale identity hit would wrongly return the old index.
    let mut source = builder.begin_source(&second);
    let index_second = source.index_object(&shader, true).unwrap();

    assert_ne!(index_first, index_second);
}

#[test]
fn combiner_style_reindex_preserves_names() {
    let mut fixture = build_fixture();
    let bytes = write_fixture_package(&mut fixture);

    let mut content = Vec::new();
    let package = Package::load(Cursor::new(&bytes), true, Some(&mut content)).unwrap();

    let mut combined = PackageBuilder::new(false);
    let resolver = PackageResolver::new(&package, &content);
    let mut source = combined.begin_source(&resolver);

    for lookup in package.objects_of::<GraphicsPipelineNameLookup>().unwrap() {
        source.index_object(&lookup, true).unwrap();
    }
    for lookup in package.objects_of::<RenderPassNameLookup>().unwrap() {
        source.index_object(&lookup, true).unwrap();
    }

    let mut out = Cursor::new(Vec::new());
    combined.write_package(&mut out).unwrap();

    let reloaded = Package::load(Cursor::new(out.into_inner()), false, None).unwrap();
    let lookups = reloaded.objects_of::<GraphicsPipelineNameLookup>().unwrap();
    assert_eq!(lookups.len(), 1);
    assert_eq!(reloaded.string(lookups[0].name.0).unwrap(), "world_opaque");
}
