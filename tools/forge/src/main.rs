//! Asset build driver.
//!
//! Compiles the declarative sources under the source directory into
//! packaged binary artifacts: intermediate products land in the
//! intermediate directory, final data in the output directory.

use std::path::PathBuf;

use clap::Parser;

use forge_build::{
    BuildFileLocation, BuildSystemInstance, DiskFileSystem, DEFAULT_NAMESPACE, DEPS_NODE_TYPE,
};
use forge_common::{BuildPath, Result};
use forge_rpl::{ExportPipelineLibraries, RplAddOn};
use forge_vulkan::VulkanBuildAddOn;

/// Root dependency list expected in the source directory.
const ROOT_DEPS_FILE: &str = "rootfiles.deps";

/// Final pipeline library written to the data directory.
const PIPELINE_LIBRARY_NAME: &str = "pipelines_vk.rkp";

#[derive(Parser)]
#[command(name = "forge", about = "Game asset build system")]
struct Args {
    /// Run the asset build.
    #[arg(long = "build")]
    build: bool,

    /// Source directory holding game data sources and archives.
    #[arg(long = "sdir")]
    source_dir: PathBuf,

    /// Intermediate directory for incremental build state.
    #[arg(long = "idir")]
    intermediate_dir: PathBuf,

    /// Output directory for final packaged data.
    #[arg(long = "ddir")]
    data_dir: PathBuf,
}

fn run(args: &Args) -> Result<()> {
    let mut fs = DiskFileSystem::new(&args.source_dir, &args.intermediate_dir, &args.data_dir)?;

    let mut instance = BuildSystemInstance::new();
    instance.register_add_on(&RplAddOn)?;
    instance.register_add_on(&VulkanBuildAddOn)?;

    instance.load_cache(&mut fs)?;

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        DEPS_NODE_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new(ROOT_DEPS_FILE)?,
    );
    instance.add_root_node(root);

    instance.add_post_build_action(Box::new(ExportPipelineLibraries::new(
        PIPELINE_LIBRARY_NAME,
    )?));

    instance.build(&mut fs)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !args.build {
        tracing::info!("nothing to do (pass --build to run the asset build)");
        return;
    }

    if let Err(err) = run(&args) {
        tracing::error!("{}", err);
        std::process::exit(err.exit_code());
    }

    tracing::info!("build completed");
}
