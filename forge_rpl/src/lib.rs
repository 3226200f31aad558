//! The render-pipeline-library compiler: a hermetic text-language
//! analyzer, per-pipeline package export and the library combiner.

pub mod analyzer;
pub mod combiner;
pub mod compiler;
pub mod parser;

pub use analyzer::LibraryAnalyzer;
pub use combiner::{ExportPipelineLibraries, PipelineLibraryCombiner};
pub use compiler::RenderPipelineLibraryCompiler;

use forge_build::{BuildSystemAddOn, BuildSystemInstance, DEFAULT_NAMESPACE};
use forge_common::{BuildPath, Result};
use forge_data::fourcc;

/// Node type of the pipeline-library compiler.
pub const RPL_NODE_TYPE: u32 = fourcc(*b"RPLL");

/// Node type of the per-pipeline graphics compiler (registered by a
/// backend add-on).
pub const GRAPHICS_PIPELINE_NODE_TYPE: u32 = fourcc(*b"VPLG");

/// Identifier of the 16-byte library index file.
pub const LIBRARY_INDEX_MAGIC: u32 = fourcc(*b"RPLI");
pub const LIBRARY_INDEX_VERSION: u32 = 1;

/// Intermediate base the backend writes compiled per-pipeline packages
/// under.
pub const COMPILED_PIPELINE_BASE: &str = "vk_plc";

pub fn graphics_pipeline_path(identifier: &BuildPath, pipeline_index: usize) -> BuildPath {
    BuildPath::new(&format!("rpll/g_{pipeline_index}/{identifier}"))
        .expect("derived from a valid identifier")
}

pub fn globals_path(identifier: &BuildPath) -> BuildPath {
    BuildPath::new(&format!("rpll/globs/{identifier}")).expect("derived from a valid identifier")
}

pub fn index_path(identifier: &BuildPath) -> BuildPath {
    BuildPath::new(&format!("rpll/idx/{identifier}")).expect("derived from a valid identifier")
}

pub fn combined_output_path(identifier: &BuildPath) -> BuildPath {
    BuildPath::new(&format!("rpll/out/{identifier}")).expect("derived from a valid identifier")
}

pub fn compiled_pipeline_path(identifier: &BuildPath) -> BuildPath {
    BuildPath::new(&format!("{COMPILED_PIPELINE_BASE}/{identifier}"))
        .expect("derived from a valid identifier")
}

/// Registers the pipeline-library compiler and its source extension.
pub struct RplAddOn;

impl BuildSystemAddOn for RplAddOn {
    fn register(&self, instance: &mut BuildSystemInstance) -> Result<()> {
        instance.register_compiler(DEFAULT_NAMESPACE, RPL_NODE_TYPE, RenderPipelineLibraryCompiler)?;
        instance.register_extension("rpl", DEFAULT_NAMESPACE, RPL_NODE_TYPE)
    }
}
