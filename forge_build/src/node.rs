//! Dependency-graph node types and the compiler contracts.

use forge_common::stream::SeekRead;
use forge_common::{BuildPath, Result};

use crate::vfs::{BuildFileLocation, FileStatus, OutputStream};

/// Primary key of a dependency node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub namespace: u32,
    pub node_type: u32,
    pub location: BuildFileLocation,
    pub identifier: BuildPath,
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}:{:08x}:{:?}:{}",
            self.namespace, self.node_type, self.location, self.identifier
        )
    }
}

/// One unit of work in the build graph.
///
/// The `compiled` flag is advisory: the engine recomputes freshness by
/// comparing every recorded input against live file-system state before
/// scheduling.
#[derive(Clone, Debug)]
pub struct DependencyNode {
    pub key: NodeKey,
    pub compiler_version: u32,
    pub compiled: bool,
    pub inputs: Vec<FileStatus>,
    pub analysis_products: Vec<FileStatus>,
    pub compile_products: Vec<FileStatus>,
    pub dependencies: Vec<NodeKey>,
    pub private_data: Vec<u8>,

    /// Whether this node's compile stage ran during the current build.
    pub was_compiled: bool,
    /// Whether this node was reached from a root during the current build.
    pub relevant: bool,
}

impl DependencyNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            compiler_version: 0,
            compiled: false,
            inputs: Vec::new(),
            analysis_products: Vec::new(),
            compile_products: Vec::new(),
            dependencies: Vec::new(),
            private_data: Vec::new(),
            was_compiled: false,
            relevant: false,
        }
    }
}

/// A per-node-type compiler. Registered per `(namespace, node_type)`.
pub trait NodeCompiler: Send + Sync {
    fn has_analysis_stage(&self) -> bool;
    fn version(&self) -> u32;

    fn run_analysis(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()>;
    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()>;
}

/// The interface a node compiler uses to probe the file system, declare
/// dependencies, open inputs and write outputs.
///
/// Every successfully opened or probed input is recorded into the node's
/// fingerprint set; every opened output becomes a compile product.
pub trait CompilerFeedback {
    fn check_fault(&self) -> Result<()>;

    fn file_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>>;

    fn try_open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>>;

    fn open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn SeekRead>>;

    fn open_output(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>>;

    fn enumerate(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        list_files: bool,
        list_directories: bool,
    ) -> Result<Vec<FileStatus>>;

    fn add_node_dependency(
        &mut self,
        namespace: u32,
        node_type: u32,
        location: BuildFileLocation,
        identifier: BuildPath,
    ) -> Result<()>;

    /// The node type registered for a source-file extension, if any.
    fn node_type_for_extension(&self, extension: &str) -> Option<(u32, u32)>;

    fn private_data(&self) -> &[u8];
    fn set_private_data(&mut self, data: Vec<u8>);
}
