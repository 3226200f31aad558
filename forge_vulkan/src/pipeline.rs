//! The per-pipeline compiler node.
//!
//! Analysis inspects the analyzer's package and adds one stage node per
//! present shader stage; compile ingests the per-stage SPIR-V blobs as
//! binary content, attaches content keys, and rewrites the package into
//! the compiled-pipeline tree.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use forge_build::node::{CompilerFeedback, NodeCompiler, NodeKey};
use forge_build::vfs::{BuildFileLocation, OutputStream};
use forge_build::DEFAULT_NAMESPACE;
use forge_common::{Error, Result};
use forge_data::schema::{
    BinaryContentIndex, ContentKey, GraphicsPipelineDesc, GraphicsPipelineNameLookup, ShaderDesc,
};
use forge_data::{Package, PackageBuilder, PackageResolver};
use forge_rpl::compiled_pipeline_path;

use crate::{stage_node_type, stage_output_path, GraphicPipelineStage};

pub struct RenderPipelineCompiler;

pub(crate) fn load_pipeline_package(
    feedback: &mut dyn CompilerFeedback,
    key: &NodeKey,
    binary_content: Option<&mut Vec<Vec<u8>>>,
) -> Result<Package> {
    let mut stream = feedback.open_input(BuildFileLocation::IntermediateDir, &key.identifier)?;
    Package::load(&mut stream, true, binary_content)
}

pub(crate) fn single_pipeline(
    package: &Package,
) -> Result<(Arc<GraphicsPipelineNameLookup>, Arc<GraphicsPipelineDesc>)> {
    let lookups = package.objects_of::<GraphicsPipelineNameLookup>()?;
    let pipelines = package.objects_of::<GraphicsPipelineDesc>()?;

    if lookups.len() != 1 || pipelines.len() != 1 {
        tracing::error!("pipeline package doesn't contain exactly one graphics pipeline");
        return Err(Error::MalformedFile);
    }

    let lookup = lookups.into_iter().next().ok_or(Error::Internal)?;
    let pipeline = pipelines.into_iter().next().ok_or(Error::Internal)?;
    Ok((lookup, pipeline))
}

pub(crate) fn shader_for_stage(
    pipeline: &GraphicsPipelineDesc,
    stage: GraphicPipelineStage,
) -> Option<&Arc<ShaderDesc>> {
    match stage {
        GraphicPipelineStage::Vertex => pipeline.vertex_shader.as_ref(),
        GraphicPipelineStage::Pixel => pipeline.pixel_shader.as_ref(),
    }
}

impl NodeCompiler for RenderPipelineCompiler {
    fn has_analysis_stage(&self) -> bool {
        true
    }

    fn version(&self) -> u32 {
        1
    }

    fn run_analysis(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        let package = load_pipeline_package(feedback, key, None)?;
        let (_, pipeline) = single_pipeline(&package)?;

        for &stage in GraphicPipelineStage::ALL {
            if shader_for_stage(&pipeline, stage).is_some() {
                feedback.add_node_dependency(
                    DEFAULT_NAMESPACE,
                    stage_node_type(stage),
                    BuildFileLocation::IntermediateDir,
                    key.identifier.clone(),
                )?;
            }
        }

        Ok(())
    }

    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        let mut binary_content = Vec::new();
        let package = load_pipeline_package(feedback, key, Some(&mut binary_content))?;
        let (lookup, pipeline) = single_pipeline(&package)?;

        // Stage blobs append after the package's own binary content; the
        // content keys index into that combined space.
        let base_content_index = package.binary_content_count();
        let mut extra_content: Vec<Vec<u8>> = vec![Vec::new(); GraphicPipelineStage::ALL.len()];
        let mut content_keys: Vec<Option<Arc<ContentKey>>> =
            vec![None; GraphicPipelineStage::ALL.len()];

        for &stage in GraphicPipelineStage::ALL {
            if shader_for_stage(&pipeline, stage).is_none() {
                continue;
            }

            let spv_path = stage_output_path(&key.identifier, stage);
            let Some(mut stream) =
                feedback.try_open_input(BuildFileLocation::IntermediateDir, &spv_path)?
            else {
                tracing::error!("failed to open SPIR-V input '{}'", spv_path);
                return Err(Error::OperationFailed(format!(
                    "failed to open SPIR-V input '{spv_path}'"
                )));
            };

            let slot = stage.index() as usize;
            stream
                .read_to_end(&mut extra_content[slot])
                .map_err(Error::IoRead)?;

            content_keys[slot] = Some(Arc::new(ContentKey {
                content: BinaryContentIndex(base_content_index + slot),
            }));
        }

        let mut compiled = (*pipeline).clone();
        compiled.compiled_content_keys = content_keys;
        let compiled = Arc::new(compiled);

        let compiled_lookup = Arc::new(GraphicsPipelineNameLookup {
            name: lookup.name,
            pipeline: Some(Arc::clone(&compiled)),
        });

        let mut builder = PackageBuilder::new(false);
        {
            let resolver =
                PackageResolver::with_extra_content(&package, &binary_content, &extra_content);
            let mut source = builder.begin_source(&resolver);
            source.index_object(&compiled_lookup, true)?;
        }

        let mut bytes = Cursor::new(Vec::new());
        builder.write_package(&mut bytes)?;

        let out_path = compiled_pipeline_path(&key.identifier);
        let mut output = feedback.open_output(BuildFileLocation::IntermediateDir, &out_path)?;
        output
            .write_all(&bytes.into_inner())
            .map_err(Error::IoWrite)?;
        output.commit()?;

        feedback.check_fault()
    }
}
