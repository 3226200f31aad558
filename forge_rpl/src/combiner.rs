//! Combines fully-written pipeline packages into a single library
//! package by re-indexing their name-lookup records.

use std::io::{Cursor, Read, Seek, Write};

use hashbrown::HashSet;

use forge_build::vfs::{BuildFileLocation, OutputStream};
use forge_build::{PostBuildAction, PostBuildContext, DEFAULT_NAMESPACE};
use forge_common::{BuildPath, Error, Result};
use forge_data::schema::{GraphicsPipelineNameLookup, RenderPassNameLookup};
use forge_data::{Package, PackageBuilder, PackageResolver};

use crate::RPL_NODE_TYPE;

pub struct PipelineLibraryCombiner {
    builder: PackageBuilder,
    graphics_pipeline_names: HashSet<String>,
}

impl Default for PipelineLibraryCombiner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineLibraryCombiner {
    pub fn new() -> Self {
        Self {
            builder: PackageBuilder::new(false),
            graphics_pipeline_names: HashSet::new(),
        }
    }

    /// Re-indexes one input package's graphics-pipeline and render-pass
    /// lookups. Two inputs naming the same graphics pipeline are a fatal
    /// error.
    pub fn add_input<R: Read>(&mut self, stream: &mut R) -> Result<()> {
        let mut binary_content = Vec::new();
        let package = Package::load(stream, false, Some(&mut binary_content))?;

        let pipeline_lookups = package.objects_of::<GraphicsPipelineNameLookup>()?;
        let pass_lookups = package.objects_of::<RenderPassNameLookup>()?;

        for lookup in &pipeline_lookups {
            let name = package.string(lookup.name.0)?;

            if !self.graphics_pipeline_names.insert(name.to_owned()) {
                tracing::error!("duplicate graphics pipeline name '{}'", name);
                return Err(Error::OperationFailed(format!(
                    "duplicate graphics pipeline name '{name}'"
                )));
            }
        }

        let resolver = PackageResolver::new(&package, &binary_content);
        let mut source = self.builder.begin_source(&resolver);

        for lookup in &pipeline_lookups {
            source.index_object(lookup, true)?;
        }

        for lookup in &pass_lookups {
            source.index_object(lookup, true)?;
        }

        Ok(())
    }

    pub fn write_package<W: Write + Seek>(&self, stream: &mut W) -> Result<()> {
        self.builder.write_package(stream)
    }

    pub fn write_package_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Cursor::new(Vec::new());
        self.write_package(&mut bytes)?;
        Ok(bytes.into_inner())
    }
}

/// Post-build action: merge every pipeline-library node's combined
/// package into one library in the output location.
///
/// Skipped entirely when no library was recompiled this run.
pub struct ExportPipelineLibraries {
    output_name: BuildPath,
}

impl ExportPipelineLibraries {
    pub fn new(output_name: &str) -> Result<Self> {
        Ok(Self {
            output_name: BuildPath::new(output_name)?,
        })
    }
}

impl PostBuildAction for ExportPipelineLibraries {
    fn run(&mut self, ctx: &mut PostBuildContext<'_>) -> Result<()> {
        let mut products = Vec::new();
        let mut rebuilt_any = false;

        for node in ctx.relevant_nodes() {
            if node.key.namespace != DEFAULT_NAMESPACE || node.key.node_type != RPL_NODE_TYPE {
                continue;
            }

            if node.was_compiled {
                rebuilt_any = true;
            }

            for product in &node.compile_products {
                products.push((product.location, product.path.clone()));
            }
        }

        if !rebuilt_any {
            return Ok(());
        }

        tracing::info!("combining pipeline libraries");

        let mut combiner = PipelineLibraryCombiner::new();

        for (location, path) in products {
            let Some(mut stream) = ctx.fs.open_read(location, &path)? else {
                tracing::error!("failed to open pipeline '{}' for merge", path);
                return Err(Error::OperationFailed(format!(
                    "failed to open pipeline '{path}' for merge"
                )));
            };

            combiner.add_input(&mut stream)?;
        }

        let mut output = ctx
            .fs
            .open_write(BuildFileLocation::OutputDir, &self.output_name)?;
        combiner.write_package(&mut output)?;
        output.commit()
    }
}
