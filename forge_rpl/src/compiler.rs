//! The pipeline-library node compiler.
//!
//! Analysis parses the source tree and emits per-pipeline analysis
//! packages; compile re-reads the library index and merges the backend's
//! compiled per-pipeline packages with the globals package into the
//! combined library for this source.

use std::io::Read;

use forge_build::node::{CompilerFeedback, NodeCompiler, NodeKey};
use forge_build::vfs::{BuildFileLocation, OutputStream};
use forge_common::{Error, Result};

use crate::analyzer::LibraryAnalyzer;
use crate::combiner::PipelineLibraryCombiner;
use crate::{
    combined_output_path, compiled_pipeline_path, globals_path, graphics_pipeline_path, index_path,
    LIBRARY_INDEX_MAGIC, LIBRARY_INDEX_VERSION,
};

pub struct RenderPipelineLibraryCompiler;

impl NodeCompiler for RenderPipelineLibraryCompiler {
    fn has_analysis_stage(&self) -> bool {
        true
    }

    fn version(&self) -> u32 {
        1
    }

    fn run_analysis(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        let mut analyzer = LibraryAnalyzer::new(feedback);
        analyzer.run(key)?;

        tracing::debug!(
            "analyzed '{}': {} graphics pipelines",
            key.identifier,
            analyzer.graphics_pipeline_count()
        );

        feedback.check_fault()
    }

    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        let num_graphics_pipelines = {
            let mut index_file =
                feedback.open_input(BuildFileLocation::IntermediateDir, &index_path(&key.identifier))?;

            let mut header = [0u8; 16];
            index_file.read_exact(&mut header).map_err(Error::IoRead)?;

            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if magic != LIBRARY_INDEX_MAGIC || version != LIBRARY_INDEX_VERSION {
                tracing::error!("invalid library index header for '{}'", key.identifier);
                return Err(Error::MalformedFile);
            }

            u64::from_le_bytes(header[8..16].try_into().map_err(|_| Error::Internal)?)
        };

        let mut combiner = PipelineLibraryCombiner::new();

        for pipeline_index in 0..num_graphics_pipelines {
            let pipeline_path = graphics_pipeline_path(&key.identifier, pipeline_index as usize);
            let compiled_path = compiled_pipeline_path(&pipeline_path);

            let mut stream =
                feedback.open_input(BuildFileLocation::IntermediateDir, &compiled_path)?;
            combiner.add_input(&mut stream)?;
        }

        {
            let mut stream =
                feedback.open_input(BuildFileLocation::IntermediateDir, &globals_path(&key.identifier))?;
            combiner.add_input(&mut stream)?;
        }

        let mut output = feedback.open_output(
            BuildFileLocation::IntermediateDir,
            &combined_output_path(&key.identifier),
        )?;
        combiner.write_package(&mut output)?;
        output.commit()?;

        feedback.check_fault()
    }
}
