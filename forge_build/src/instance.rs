//! The build-system facade and the dependency-graph evaluation engine.
//!
//! Evaluation is a re-entrant topological traversal: a node's recorded
//! dependencies are brought up to date first, then its freshness is
//! decided from its compiler version and recorded input fingerprints, and
//! stale nodes run analysis (which may grow the graph) followed by
//! compile.

use std::sync::Arc;

use hashbrown::HashMap;

use forge_common::jobs::{FaultState, JobQueue};
use forge_common::stream::SeekRead;
use forge_common::{BuildPath, Error, Result};

use crate::cache;
use crate::deps::DepsNodeCompiler;
use crate::node::{CompilerFeedback, DependencyNode, NodeCompiler, NodeKey};
use crate::vfs::{BuildFileLocation, BuildFileSystem, FileStatus, OutputStream};
use crate::{DEFAULT_NAMESPACE, DEPS_NODE_TYPE};

/// Registers compilers, extensions and post-build actions for one backend
/// or game.
pub trait BuildSystemAddOn {
    fn register(&self, instance: &mut BuildSystemInstance) -> Result<()>;
}

/// A hook run after the graph is fully up to date, in registration order.
/// Any action failure faults the whole build.
pub trait PostBuildAction: Send {
    fn run(&mut self, ctx: &mut PostBuildContext<'_>) -> Result<()>;
}

pub struct PostBuildContext<'a> {
    pub fs: &'a mut dyn BuildFileSystem,
    nodes: &'a [DependencyNode],
}

impl PostBuildContext<'_> {
    /// Every node reached from a root during this build.
    pub fn relevant_nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter().filter(|node| node.relevant)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum EvalState {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Stage {
    Analysis,
    Compile,
}

/// Handle to a node owned by the instance.
pub type NodeId = usize;

pub struct BuildSystemInstance {
    jobs: JobQueue,
    nodes: Vec<DependencyNode>,
    node_index: HashMap<NodeKey, NodeId>,
    compilers: HashMap<(u32, u32), Arc<dyn NodeCompiler>>,
    extensions: HashMap<String, (u32, u32)>,
    roots: Vec<NodeId>,
    post_build: Vec<Box<dyn PostBuildAction>>,
}

impl Default for BuildSystemInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildSystemInstance {
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);

        let mut instance = Self {
            jobs: JobQueue::new(workers),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            compilers: HashMap::new(),
            extensions: HashMap::new(),
            roots: Vec::new(),
            post_build: Vec::new(),
        };

        instance
            .register_compiler(DEFAULT_NAMESPACE, DEPS_NODE_TYPE, DepsNodeCompiler)
            .and_then(|()| {
                instance.register_extension("deps", DEFAULT_NAMESPACE, DEPS_NODE_TYPE)
            })
            .expect("fresh registry");

        instance
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.jobs
    }

    /// Registers `compiler` for `(namespace, node_type)`. Registering two
    /// compilers for the same type is a fatal parameter error.
    pub fn register_compiler<C>(&mut self, namespace: u32, node_type: u32, compiler: C) -> Result<()>
    where
        C: NodeCompiler + 'static,
    {
        match self.compilers.entry((namespace, node_type)) {
            hashbrown::hash_map::Entry::Occupied(_) => {
                tracing::error!(
                    "a compiler is already registered for {:08x}:{:08x}",
                    namespace,
                    node_type
                );
                Err(Error::InvalidParameter("duplicate compiler registration"))
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(Arc::new(compiler));
                Ok(())
            }
        }
    }

    /// Registers a source-file extension handled by `(namespace, node_type)`.
    pub fn register_extension(&mut self, extension: &str, namespace: u32, node_type: u32) -> Result<()> {
        match self.extensions.entry(extension.to_ascii_lowercase()) {
            hashbrown::hash_map::Entry::Occupied(_) => {
                tracing::error!("extension '{}' is already registered", extension);
                Err(Error::InvalidParameter("duplicate extension registration"))
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert((namespace, node_type));
                Ok(())
            }
        }
    }

    pub fn register_add_on(&mut self, add_on: &dyn BuildSystemAddOn) -> Result<()> {
        add_on.register(self)
    }

    pub fn add_post_build_action(&mut self, action: Box<dyn PostBuildAction>) {
        self.post_build.push(action);
    }

    /// Restores the cached node graph. Records for keys that already exist
    /// in this instance are ignored.
    pub fn load_cache(&mut self, fs: &mut dyn BuildFileSystem) -> Result<()> {
        for node in cache::load_nodes(fs)? {
            if self.node_index.contains_key(&node.key) {
                continue;
            }

            let index = self.nodes.len();
            self.node_index.insert(node.key.clone(), index);
            self.nodes.push(node);
        }

        Ok(())
    }

    pub fn find_or_create_named_node(
        &mut self,
        namespace: u32,
        node_type: u32,
        location: BuildFileLocation,
        identifier: BuildPath,
    ) -> NodeId {
        self.intern_node(NodeKey {
            namespace,
            node_type,
            location,
            identifier,
        })
    }

    pub fn find_node(&self, key: &NodeKey) -> Option<&DependencyNode> {
        self.node_index.get(key).map(|&index| &self.nodes[index])
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn add_root_node(&mut self, node: NodeId) {
        self.roots.push(node);
    }

    /// Runs the build: brings every root up to date, fires post-build
    /// actions and persists the node cache. Any error faults the run.
    pub fn build(&mut self, fs: &mut dyn BuildFileSystem) -> Result<()> {
        match self.build_inner(fs) {
            Ok(()) => self.jobs.wait_idle(),
            Err(err) => {
                tracing::error!("build failed: {}", err);
                self.jobs.fault().raise(err);
                self.jobs.check_fault()?;
                Err(Error::Internal)
            }
        }
    }

    fn build_inner(&mut self, fs: &mut dyn BuildFileSystem) -> Result<()> {
        let mut states = vec![EvalState::Unvisited; self.nodes.len()];

        let roots = self.roots.clone();
        for root in roots {
            self.evaluate(root, fs, &mut states)?;
        }

        let mut actions = std::mem::take(&mut self.post_build);
        for action in &mut actions {
            let mut ctx = PostBuildContext {
                fs: &mut *fs,
                nodes: &self.nodes,
            };
            action.run(&mut ctx)?;
        }

        for node in &self.nodes {
            if node.relevant && node.compiled {
                cache::save_node(fs, node)?;
            }
        }

        Ok(())
    }

    fn intern_node(&mut self, key: NodeKey) -> NodeId {
        if let Some(&index) = self.node_index.get(&key) {
            return index;
        }

        let index = self.nodes.len();
        self.node_index.insert(key.clone(), index);
        self.nodes.push(DependencyNode::new(key));
        index
    }

    fn evaluate(
        &mut self,
        index: NodeId,
        fs: &mut dyn BuildFileSystem,
        states: &mut Vec<EvalState>,
    ) -> Result<()> {
        self.jobs.check_fault()?;

        if states.len() < self.nodes.len() {
            states.resize(self.nodes.len(), EvalState::Unvisited);
        }

        match states[index] {
            EvalState::Done => return Ok(()),
            EvalState::InProgress => {
                tracing::error!("dependency cycle through node {}", self.nodes[index].key);
                return Err(Error::OperationFailed(format!(
                    "dependency cycle through node {}",
                    self.nodes[index].key
                )));
            }
            EvalState::Unvisited => {}
        }

        states[index] = EvalState::InProgress;
        self.nodes[index].relevant = true;

        let key = self.nodes[index].key.clone();
        let compiler = self
            .compilers
            .get(&(key.namespace, key.node_type))
            .cloned()
            .ok_or_else(|| {
                tracing::error!("no compiler registered for node {}", key);
                Error::KeyNotFound
            })?;

        // Recorded dependencies first; their rebuilds invalidate us.
        let recorded_deps = self.nodes[index].dependencies.clone();
        for dep in recorded_deps {
            let dep_index = self.intern_node(dep);
            self.evaluate(dep_index, fs, states)?;
        }

        if self.is_up_to_date(index, fs, compiler.as_ref())? {
            tracing::debug!("{} is up to date", key);
            states[index] = EvalState::Done;
            return Ok(());
        }

        tracing::info!("building {}", key);

        {
            let node = &mut self.nodes[index];
            node.compiled = false;
            node.inputs.clear();
            node.analysis_products.clear();
            node.compile_products.clear();
            node.dependencies.clear();
        }

        if compiler.has_analysis_stage() {
            let outcome =
                self.run_stage(index, fs, |feedback| compiler.run_analysis(&key, feedback))?;
            let new_deps = self.apply_outcome(index, outcome, Stage::Analysis);

            // Analysis may have created new nodes; re-enter the loop.
            for dep_index in new_deps {
                self.evaluate_declared(dep_index, fs, states)?;
            }
        }

        let outcome = self.run_stage(index, fs, |feedback| compiler.run_compile(&key, feedback))?;
        let new_deps = self.apply_outcome(index, outcome, Stage::Compile);

        {
            let node = &mut self.nodes[index];
            node.compiler_version = compiler.version();
            node.compiled = true;
            node.was_compiled = true;
        }
        states[index] = EvalState::Done;

        for dep_index in new_deps {
            self.evaluate_declared(dep_index, fs, states)?;
        }

        Ok(())
    }

    /// Evaluates a dependency declared by a stage that just ran.
    ///
    /// A node visited earlier in this build may have been invalidated in
    /// the meantime by that stage's outputs (the declaring node's analysis
    /// products are the dependency's inputs), so a completed node is
    /// re-checked and re-opened if its fingerprints no longer hold.
    fn evaluate_declared(
        &mut self,
        index: NodeId,
        fs: &mut dyn BuildFileSystem,
        states: &mut Vec<EvalState>,
    ) -> Result<()> {
        if states.len() < self.nodes.len() {
            states.resize(self.nodes.len(), EvalState::Unvisited);
        }

        if states[index] == EvalState::Done {
            if self.inputs_current(index, fs)? {
                return Ok(());
            }

            states[index] = EvalState::Unvisited;
        }

        self.evaluate(index, fs, states)
    }

    /// Whether a node's recorded input fingerprints still hold.
    fn inputs_current(&self, index: NodeId, fs: &mut dyn BuildFileSystem) -> Result<bool> {
        for input in &self.nodes[index].inputs {
            match fs.resolve_status(input.location, &input.path, true)? {
                None => return Ok(false),
                Some(current) => {
                    if !input.fingerprint_matches(&current) {
                        return Ok(false);
                    }
                }
            }
        }

        Ok(true)
    }

    fn is_up_to_date(
        &self,
        index: NodeId,
        fs: &mut dyn BuildFileSystem,
        compiler: &dyn NodeCompiler,
    ) -> Result<bool> {
        let node = &self.nodes[index];

        if !node.compiled || node.compiler_version != compiler.version() {
            return Ok(false);
        }

        for dep in &node.dependencies {
            let Some(&dep_index) = self.node_index.get(dep) else {
                return Ok(false);
            };

            if self.nodes[dep_index].was_compiled {
                return Ok(false);
            }
        }

        self.inputs_current(index, fs)
    }

    fn run_stage<F>(
        &self,
        index: NodeId,
        fs: &mut dyn BuildFileSystem,
        stage: F,
    ) -> Result<StageOutcome>
    where
        F: FnOnce(&mut dyn CompilerFeedback) -> Result<()>,
    {
        let mut feedback = FeedbackImpl {
            fs: &mut *fs,
            fault: self.jobs.fault(),
            extensions: &self.extensions,
            private_data: self.nodes[index].private_data.clone(),
            private_dirty: false,
            outcome: StageOutcome::default(),
        };

        stage(&mut feedback)?;
        feedback.fault.check()?;

        let private_dirty = feedback.private_dirty;
        let private_data = std::mem::take(&mut feedback.private_data);
        let mut outcome = std::mem::take(&mut feedback.outcome);
        drop(feedback);

        if private_dirty {
            outcome.private_data = Some(private_data);
        }

        // Products were recorded by path when their streams were opened;
        // fingerprint them now that the stage has committed. A stream
        // that was dropped without committing never became a file and is
        // not a product.
        let mut outputs = Vec::with_capacity(outcome.outputs.len());
        for output in outcome.outputs {
            if let Some(status) = fs.resolve_status(output.location, &output.path, false)? {
                outputs.push(status);
            }
        }
        outcome.outputs = outputs;

        Ok(outcome)
    }

    /// Folds a stage's recorded reads, writes and dependency declarations
    /// into the node; returns the indices of its (possibly new) deps.
    fn apply_outcome(&mut self, index: NodeId, outcome: StageOutcome, stage: Stage) -> Vec<NodeId> {
        let mut dep_indices = Vec::with_capacity(outcome.new_deps.len());
        for dep in outcome.new_deps {
            dep_indices.push(self.intern_node(dep.clone()));

            let node = &mut self.nodes[index];
            if !node.dependencies.contains(&dep) {
                node.dependencies.push(dep);
            }
        }

        let node = &mut self.nodes[index];

        for input in outcome.inputs {
            if !node
                .inputs
                .iter()
                .any(|existing| existing.location == input.location && existing.path == input.path)
            {
                node.inputs.push(input);
            }
        }

        let products = match stage {
            Stage::Analysis => &mut node.analysis_products,
            Stage::Compile => &mut node.compile_products,
        };

        for output in outcome.outputs {
            if !products
                .iter()
                .any(|existing| existing.location == output.location && existing.path == output.path)
            {
                products.push(output);
            }
        }

        if let Some(private_data) = outcome.private_data {
            node.private_data = private_data;
        }

        dep_indices
    }
}

#[derive(Default)]
struct StageOutcome {
    inputs: Vec<FileStatus>,
    outputs: Vec<FileStatus>,
    new_deps: Vec<NodeKey>,
    private_data: Option<Vec<u8>>,
}

struct FeedbackImpl<'a> {
    fs: &'a mut dyn BuildFileSystem,
    fault: &'a FaultState,
    extensions: &'a HashMap<String, (u32, u32)>,
    private_data: Vec<u8>,
    private_dirty: bool,
    outcome: StageOutcome,
}

impl FeedbackImpl<'_> {
    fn record_input(&mut self, status: FileStatus) {
        if !self
            .outcome
            .inputs
            .iter()
            .any(|existing| existing.location == status.location && existing.path == status.path)
        {
            self.outcome.inputs.push(status);
        }
    }
}

impl CompilerFeedback for FeedbackImpl<'_> {
    fn check_fault(&self) -> Result<()> {
        self.fault.check()
    }

    fn file_status(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
        allow_directories: bool,
    ) -> Result<Option<FileStatus>> {
        let status = self.fs.resolve_status(location, path, allow_directories)?;

        if let Some(status) = &status {
            self.record_input(status.clone());
        }

        Ok(status)
    }

    fn try_open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Option<Box<dyn SeekRead>>> {
        let Some(status) = self.fs.resolve_status(location, path, false)? else {
            return Ok(None);
        };

        self.record_input(status);
        self.fs.open_read(location, path)
    }

    fn open_input(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn SeekRead>> {
        match self.try_open_input(location, path)? {
            Some(stream) => Ok(stream),
            None => {
                tracing::error!("could not open input file '{}'", path);
                Err(Error::FileOpen(path.as_str().to_owned()))
            }
        }
    }

    fn open_output(
        &mut self,
        location: BuildFileLocation,
        path: &BuildPath,
    ) -> Result<Box<dyn OutputStream>> {
        let stream = self.fs.open_write(location, path)?;

        // Only the identity is known here; the size/mtime fingerprint is
        // filled in after the stage commits.
        self.outcome.outputs.push(FileStatus {
            location,
            path: path.clone(),
            size: 0,
            mtime: 0,
            is_directory: false,
        });

        Ok(stream)
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
        self.outcome.new_deps.push(NodeKey {
            namespace,
            node_type,
            location,
            identifier,
        });

        Ok(())
    }

    fn node_type_for_extension(&self, extension: &str) -> Option<(u32, u32)> {
        self.extensions.get(&extension.to_ascii_lowercase()).copied()
    }

    fn private_data(&self) -> &[u8] {
        &self.private_data
    }

    fn set_private_data(&mut self, data: Vec<u8>) {
        self.private_data = data;
        self.private_dirty = true;
    }
}
