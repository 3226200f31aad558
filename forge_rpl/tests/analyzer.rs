//! End-to-end analyzer tests: parse pipeline-library sources, inspect the
//! exported packages, and combine them.

use std::io::Cursor;
use std::sync::Arc;

use forge_build::node::{CompilerFeedback, NodeKey};
use forge_build::vfs::{BuildFileLocation, BuildFileSystem, FileStatus, OutputStream};
use forge_build::{MemoryFileSystem, DEFAULT_NAMESPACE};
use forge_common::stream::SeekRead;
use forge_common::{BuildPath, Error, Result};
use forge_data::schema::{
    Configurable, Filter, GraphicsPipelineNameLookup, MainType, PrimitiveTopology,
    RenderPassNameLookup,
};
use forge_data::{Package, PackageBuilder, PackageResolver};
use forge_rpl::{LibraryAnalyzer, PipelineLibraryCombiner, GRAPHICS_PIPELINE_NODE_TYPE, RPL_NODE_TYPE};

struct MockFeedback {
    fs: MemoryFileSystem,
    deps: Vec<NodeKey>,
    private_data: Vec<u8>,
}

impl CompilerFeedback for MockFeedback {
    fn check_fault(&self) -> Result<()> {
        Ok(())
    }

    fn file_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>> {
        self.fs.resolve_status(location, path, allow_directories)
    }

    fn try_open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>> {
        self.fs.open_read(location, path)
    }

    fn open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn SeekRead>> {
        self.try_open_input(location, path)?
            .ok_or_else(|| Error::FileOpen(path.as_str().to_owned()))
    }

    fn open_output(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>> {
        self.fs.open_write(location, path)
    }

    fn enumerate(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        list_files: bool,
        list_directories: bool,
    ) -> Result<Vec<FileStatus>> {
        self.fs.enumerate(location, path, list_files, list_directories)
    }

    fn add_node_dependency(
        &mut self,
        namespace: u32,
        node_type: u32,
        location: BuildFileLocation,
        identifier: BuildPath,
    ) -> Result<()> {
        self.deps.push(NodeKey {
            namespace,
            node_type,
            location,
            identifier,
        });
        Ok(())
    }

    fn node_type_for_extension(&self, _extension: &str) -> Option<(u32, u32)> {
        None
    }

    fn private_data(&self) -> &[u8] {
        &self.private_data
    }

    fn set_private_data(&mut self, data: Vec<u8>) {
        self.private_data = data;
    }
}

fn analyze_at(
    sources: &[(&str, &str)],
    location: BuildFileLocation,
    root: &str,
) -> Result<(MemoryFileSystem, Vec<NodeKey>)> {
    let fs = MemoryFileSystem::new();
    for (path, text) in sources {
        fs.insert(BuildFileLocation::SourceDir, path, text.as_bytes().to_vec());
    }

    analyze_in(fs, location, root)
}

fn analyze_in(
    fs: MemoryFileSystem,
    location: BuildFileLocation,
    root: &str,
) -> Result<(MemoryFileSystem, Vec<NodeKey>)> {
    let mut feedback = MockFeedback {
        fs: fs.clone(),
        deps: Vec::new(),
        private_data: Vec::new(),
    };

    let key = NodeKey {
        namespace: DEFAULT_NAMESPACE,
        node_type: RPL_NODE_TYPE,
        location,
        identifier: BuildPath::new(root)?,
    };

    let mut analyzer = LibraryAnalyzer::new(&mut feedback);
    analyzer.run(&key)?;

    Ok((fs, feedback.deps))
}

fn analyze(sources: &[(&str, &str)], root: &str) -> Result<(MemoryFileSystem, Vec<NodeKey>)> {
    analyze_at(sources, BuildFileLocation::SourceDir, root)
}

const FULL_LIBRARY: &str = r#"
// A representative library: sampler, vertex struct, layouts, one pass,
// one pipeline.
StaticSampler AlbedoSampler {
    MinFilter = Linear
    MagFilter = Linear
    MaxLod = Config(lod_cap)
}

struct Vertex {
    float3 position
    float2 uv
}

InputLayout MeshLayout {
    VertexInputFeeds = {
        mesh = { Stepping = Vertex }
    }
    VertexInputs = {
        vertex = {
            InputFeed = mesh
            InputSources = Vertex
        }
    }
}

DescriptorLayout MaterialLayout {
    albedo = {
        Type = Texture2D<float4>
        Sampler = AlbedoSampler
    }
    params = {
        Type = StaticConstantBuffer<float4>
    }
}

RenderPass ForwardPass {
    RenderTargets = {
        color = {
            LoadOp = Clear
            StoreOp = Store
        }
    }
    DepthStencil = {
        Format = D32Float
    }
}

GraphicsPipeline WorldOpaque {
    DescriptorLayouts = { MaterialLayout }
    InputLayout = MeshLayout
    VertexShader = { Source = "world.vs.glsl" }
    PixelShader = { Source = "world.ps.glsl" }
    ExecuteInPass = ForwardPass
    RenderTargets = {
        color = {
            Access = ReadWrite
            WriteRed = true
            WriteGreen = true
            WriteBlue = true
            WriteAlpha = true
        }
    }
    PrimitiveTopology = TriangleList
}
"#;

#[test]
fn full_library_export() {
    let (fs, deps) = analyze(&[("root.rpl", FULL_LIBRARY)], "root.rpl").unwrap();

    // One per-pipeline dependency on the backend compiler.
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].node_type, GRAPHICS_PIPELINE_NODE_TYPE);
    assert_eq!(deps[0].location, BuildFileLocation::IntermediateDir);
    assert_eq!(deps[0].identifier.as_str(), "rpll/g_0/root.rpl");

    // The 16-byte index: magic, version, pipeline count.
    let index = fs
        .get(BuildFileLocation::IntermediateDir, "rpll/idx/root.rpl")
        .unwrap();
    assert_eq!(index.len(), 16);
    assert_eq!(&index[0..4], b"RPLI");
    assert_eq!(u32::from_le_bytes(index[4..8].try_into().unwrap()), 1);
    assert_eq!(u64::from_le_bytes(index[8..16].try_into().unwrap()), 1);

    // The per-pipeline analysis package.
    let bytes = fs
        .get(BuildFileLocation::IntermediateDir, "rpll/g_0/root.rpl")
        .unwrap();
    let package = Package::load(Cursor::new(bytes), true, None).unwrap();

    let lookups = package.objects_of::<GraphicsPipelineNameLookup>().unwrap();
    assert_eq!(lookups.len(), 1);
    assert_eq!(package.string(lookups[0].name.0).unwrap(), "WorldOpaque");

    let pipeline = lookups[0].pipeline.as_ref().unwrap();

    let vertex_shader = pipeline.vertex_shader.as_ref().unwrap();
    assert_eq!(
        package.string(vertex_shader.source.0).unwrap(),
        "world.vs.glsl"
    );
    // The implicit entry point.
    assert_eq!(package.string(vertex_shader.entry_point.0).unwrap(), "main");

    assert_eq!(
        pipeline.primitive_topology,
        Configurable::Explicit(PrimitiveTopology::TriangleList)
    );

    // Pass declares depth/stencil, pipeline didn't: the no-test, no-write
    // block is injected.
    let depth_stencil = pipeline.depth_stencil.as_ref().unwrap();
    assert_eq!(depth_stencil.depth_test, Configurable::Explicit(false));
    assert_eq!(depth_stencil.depth_write, Configurable::Explicit(false));

    // Boolean literals keep the legacy inverted encoding: a spelled
    // `true` stores bit 0.
    let color_op = &pipeline.render_targets[0];
    assert!(!color_op.write_red);
    assert!(!color_op.write_green);
    assert!(!color_op.write_blue);
    assert!(!color_op.write_alpha);

    // Struct flattening: two leaves at packed offsets, stride 20.
    let input_layout = pipeline.input_layout.as_ref().unwrap();
    assert_eq!(input_layout.vertex_inputs.len(), 2);

    let position = &input_layout.vertex_inputs[0];
    let uv = &input_layout.vertex_inputs[1];
    assert_eq!(package.string(position.member_name.0).unwrap(), "position");
    assert_eq!(position.byte_offset, 0);
    assert_eq!(package.string(uv.member_name.0).unwrap(), "uv");
    assert_eq!(uv.byte_offset, 12);

    let feed = position.input_feed.as_ref().unwrap();
    assert_eq!(feed.byte_stride, Configurable::Explicit(20));
    assert!(Arc::ptr_eq(feed, uv.input_feed.as_ref().unwrap()));

    // Descriptor layout: the albedo texture is bound to the static
    // sampler, which keeps its config-key binding.
    let layout = pipeline.pipeline_layout.as_ref().unwrap();
    let descriptors = &layout.descriptor_layouts[0].descriptors;
    assert_eq!(descriptors.len(), 2);
    assert_eq!(package.string(descriptors[0].name.0).unwrap(), "albedo");
    assert_eq!(descriptors[0].array_size, 1);

    let sampler = descriptors[0].static_sampler.as_ref().unwrap();
    assert_eq!(sampler.min_filter, Configurable::Explicit(Filter::Linear));

    let Configurable::Configured(key) = sampler.max_lod else {
        panic!("expected configured max lod");
    };
    let entry = package.config_key(key.0).unwrap();
    assert_eq!(entry.main_type, MainType::Float32);
    assert_eq!(package.string(entry.string_index).unwrap(), "lod_cap");

    assert!(descriptors[1].static_sampler.is_none());

    // The globals package carries the render-pass lookup.
    let globals = fs
        .get(BuildFileLocation::IntermediateDir, "rpll/globs/root.rpl")
        .unwrap();
    let globals = Package::load(Cursor::new(globals), false, None).unwrap();
    let passes = globals.objects_of::<RenderPassNameLookup>().unwrap();
    assert_eq!(passes.len(), 1);
    assert_eq!(globals.string(passes[0].name.0).unwrap(), "ForwardPass");
    assert_eq!(
        passes[0].render_pass.as_ref().unwrap().render_targets.len(),
        1
    );
}

#[test]
fn includes_are_visited_once() {
    // A -> B, A -> C, B -> C: if C were parsed twice its sampler would be
    // a duplicate entity.
    let (fs, _) = analyze(
        &[
            (
                "a.rpl",
                "include \"b.rpl\"\ninclude \"c.rpl\"\nDescriptorLayout L { t = { Type = Texture2D Sampler = S } }",
            ),
            ("b.rpl", "include \"c.rpl\""),
            ("c.rpl", "StaticSampler S { }"),
        ],
        "a.rpl",
    )
    .unwrap();

    assert!(fs.contains(BuildFileLocation::IntermediateDir, "rpll/globs/a.rpl"));
}

#[test]
fn include_falls_back_from_intermediate_to_source() {
    let fs = MemoryFileSystem::new();
    fs.insert(
        BuildFileLocation::IntermediateDir,
        "gen/root.rpl",
        b"include \"shared.rpl\"".to_vec(),
    );
    fs.insert(
        BuildFileLocation::SourceDir,
        "shared.rpl",
        b"StaticSampler S { }".to_vec(),
    );

    analyze_in(fs, BuildFileLocation::IntermediateDir, "gen/root.rpl").unwrap();
}

#[test]
fn parse_errors_carry_location() {
    let err = analyze(&[("root.rpl", "\n  Bogus")], "root.rpl").unwrap_err();

    let Error::TextParse { path, line, col, .. } = err else {
        panic!("expected a parse error, got {err}");
    };
    assert_eq!(path, "root.rpl");
    assert_eq!(line, 2);
    assert_eq!(col, 3);
}

#[test]
fn pipeline_depth_stencil_without_pass_target_is_rejected() {
    let source = r#"
RenderPass Flat {
    RenderTargets = {
        color = { }
    }
}

GraphicsPipeline Bad {
    ExecuteInPass = Flat
    DepthStencil = { DepthTest = true }
}
"#;

    assert!(analyze(&[("root.rpl", source)], "root.rpl").is_err());
}

#[test]
fn unknown_pipeline_target_is_rejected() {
    let source = r#"
RenderPass Flat {
    RenderTargets = {
        color = { }
    }
}

GraphicsPipeline Bad {
    ExecuteInPass = Flat
    RenderTargets = {
        glow = { }
    }
}
"#;

    assert!(analyze(&[("root.rpl", source)], "root.rpl").is_err());
}

#[test]
fn mixing_numbered_and_sequential_feeds_is_rejected() {
    let source = r#"
InputLayout Broken {
    VertexInputFeeds = {
        a = { InputSlot = 3 }
        b
    }
}
"#;

    assert!(analyze(&[("root.rpl", source)], "root.rpl").is_err());
}

/// What the backend compile does to an analysis package, minus the
/// SPIR-V: strip temp strings by re-indexing through a resolver.
fn strip_temp_strings(bytes: Vec<u8>) -> Vec<u8> {
    let mut content = Vec::new();
    let package = Package::load(Cursor::new(bytes), true, Some(&mut content)).unwrap();

    let mut builder = PackageBuilder::new(false);
    let resolver = PackageResolver::new(&package, &content);
    let mut source = builder.begin_source(&resolver);

    for lookup in package.objects_of::<GraphicsPipelineNameLookup>().unwrap() {
        source.index_object(&lookup, true).unwrap();
    }

    let mut out = Cursor::new(Vec::new());
    builder.write_package(&mut out).unwrap();
    out.into_inner()
}

#[test]
fn combiner_rejects_duplicate_pipeline_names() {
    let (fs_a, _) = analyze(&[("root.rpl", FULL_LIBRARY)], "root.rpl").unwrap();
    let (fs_b, _) = analyze(&[("other.rpl", FULL_LIBRARY)], "other.rpl").unwrap();

    let package_a = strip_temp_strings(
        fs_a.get(BuildFileLocation::IntermediateDir, "rpll/g_0/root.rpl").unwrap(),
    );
    let package_b = strip_temp_strings(
        fs_b.get(BuildFileLocation::IntermediateDir, "rpll/g_0/other.rpl").unwrap(),
    );

    let mut combiner = PipelineLibraryCombiner::new();
    combiner.add_input(&mut Cursor::new(package_a)).unwrap();

    let err = combiner.add_input(&mut Cursor::new(package_b)).unwrap_err();
    let Error::OperationFailed(message) = err else {
        panic!("expected OperationFailed, got {err}");
    };
    assert!(message.contains("WorldOpaque"));
}

#[test]
fn combiner_merges_pipelines_and_passes() {
    let (fs, _) = analyze(&[("root.rpl", FULL_LIBRARY)], "root.rpl").unwrap();

    let pipeline_package = strip_temp_strings(
        fs.get(BuildFileLocation::IntermediateDir, "rpll/g_0/root.rpl").unwrap(),
    );
    let globals_package = fs
        .get(BuildFileLocation::IntermediateDir, "rpll/globs/root.rpl")
        .unwrap();

    let mut combiner = PipelineLibraryCombiner::new();
    combiner.add_input(&mut Cursor::new(pipeline_package)).unwrap();
    combiner.add_input(&mut Cursor::new(globals_package)).unwrap();

    let combined = combiner.write_package_bytes().unwrap();
    let package = Package::load(Cursor::new(combined), false, None).unwrap();

    let pipelines = package.objects_of::<GraphicsPipelineNameLookup>().unwrap();
    let passes = package.objects_of::<RenderPassNameLookup>().unwrap();

    assert_eq!(pipelines.len(), 1);
    assert_eq!(package.string(pipelines[0].name.0).unwrap(), "WorldOpaque");
    assert_eq!(passes.len(), 1);
    assert_eq!(package.string(passes[0].name.0).unwrap(), "ForwardPass");
}
