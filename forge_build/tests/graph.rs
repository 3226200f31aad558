//! Dependency-graph engine tests over the in-memory file system.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use forge_build::node::{CompilerFeedback, NodeCompiler, NodeKey};
use forge_build::{
    BuildFileLocation, BuildSystemInstance, MemoryFileSystem, OutputStream, PostBuildAction,
    PostBuildContext, DEFAULT_NAMESPACE,
};
use forge_common::{BuildPath, Error, Result};
use forge_data::fourcc;

const COPY_TYPE: u32 = fourcc(*b"COPY");
const SCAN_TYPE: u32 = fourcc(*b"SCAN");
const LOOP_TYPE: u32 = fourcc(*b"LOOP");

fn out_path(identifier: &BuildPath) -> BuildPath {
    BuildPath::new(&format!("out/{identifier}")).unwrap()
}

/// Copies its source input into the intermediate tree.
struct CopyCompiler {
    version: u32,
    runs: Arc<AtomicUsize>,
}

impl NodeCompiler for CopyCompiler {
    fn has_analysis_stage(&self) -> bool {
        false
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn run_analysis(&self, _key: &NodeKey, _feedback: &mut dyn CompilerFeedback) -> Result<()> {
        Err(Error::Internal)
    }

    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let mut contents = Vec::new();
        feedback
            .open_input(key.location, &key.identifier)?
            .read_to_end(&mut contents)?;

        let mut output =
            feedback.open_output(BuildFileLocation::IntermediateDir, &out_path(&key.identifier))?;
        output.write_all(&contents).map_err(Error::IoWrite)?;
        output.commit()
    }
}

/// Declares one copy-node dependency during analysis, then consumes its
/// output during compile.
struct ScanCompiler {
    child: &'static str,
    compiles: Arc<AtomicUsize>,
}

impl NodeCompiler for ScanCompiler {
    fn has_analysis_stage(&self) -> bool {
        true
    }

    fn version(&self) -> u32 {
        1
    }

    fn run_analysis(&self, _key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        feedback.set_private_data(b"scanned".to_vec());
        feedback.add_node_dependency(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            BuildFileLocation::SourceDir,
            BuildPath::new(self.child).unwrap(),
        )
    }

    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        self.compiles.fetch_add(1, Ordering::SeqCst);

        assert_eq!(feedback.private_data(), b"scanned");

        // The child's output must exist before our compile runs.
        let child_out = out_path(&BuildPath::new(self.child).unwrap());
        let mut contents = Vec::new();
        feedback
            .open_input(BuildFileLocation::IntermediateDir, &child_out)?
            .read_to_end(&mut contents)?;

        let mut output =
            feedback.open_output(BuildFileLocation::IntermediateDir, &out_path(&key.identifier))?;
        output.write_all(&contents).map_err(Error::IoWrite)?;
        output.commit()
    }
}

struct SelfLoopCompiler;

impl NodeCompiler for SelfLoopCompiler {
    fn has_analysis_stage(&self) -> bool {
        true
    }

    fn version(&self) -> u32 {
        1
    }

    fn run_analysis(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        feedback.add_node_dependency(
            key.namespace,
            key.node_type,
            key.location,
            key.identifier.clone(),
        )
    }

    fn run_compile(&self, _key: &NodeKey, _feedback: &mut dyn CompilerFeedback) -> Result<()> {
        Ok(())
    }
}

fn build_copy(fs: &MemoryFileSystem, version: u32, runs: &Arc<AtomicUsize>) -> Result<()> {
    let mut fs = fs.clone();

    let mut instance = BuildSystemInstance::new();
    instance.load_cache(&mut fs)?;
    instance.register_compiler(
        DEFAULT_NAMESPACE,
        COPY_TYPE,
        CopyCompiler {
            version,
            runs: Arc::clone(runs),
        },
    )?;

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        COPY_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("data/input.txt").unwrap(),
    );
    instance.add_root_node(root);

    instance.build(&mut fs)
}

#[test]
fn node_reruns_only_when_stale() {
    let fs = MemoryFileSystem::new();
    fs.insert(BuildFileLocation::SourceDir, "data/input.txt", b"v1".to_vec());

    let runs = Arc::new(AtomicUsize::new(0));

    build_copy(&fs, 1, &runs).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        fs.get(BuildFileLocation::IntermediateDir, "out/data/input.txt").unwrap(),
        b"v1"
    );

    // Unchanged input, same compiler version: a fresh instance restores
    // the cache and skips the compile.
    build_copy(&fs, 1, &runs).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Touching the input changes its fingerprint.
    fs.insert(BuildFileLocation::SourceDir, "data/input.txt", b"v2".to_vec());
    build_copy(&fs, 1, &runs).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        fs.get(BuildFileLocation::IntermediateDir, "out/data/input.txt").unwrap(),
        b"v2"
    );

    // A compiler version bump invalidates even unchanged inputs.
    build_copy(&fs, 2, &runs).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn analysis_dependencies_build_before_compile() {
    let fs = MemoryFileSystem::new();
    fs.insert(BuildFileLocation::SourceDir, "data/child.txt", b"payload".to_vec());
    fs.insert(BuildFileLocation::SourceDir, "data/parent.scan", b"".to_vec());

    let runs = Arc::new(AtomicUsize::new(0));
    let compiles = Arc::new(AtomicUsize::new(0));

    let mut fs_handle = fs.clone();
    let mut instance = BuildSystemInstance::new();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            CopyCompiler {
                version: 1,
                runs: Arc::clone(&runs),
            },
        )
        .unwrap();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            SCAN_TYPE,
            ScanCompiler {
                child: "data/child.txt",
                compiles: Arc::clone(&compiles),
            },
        )
        .unwrap();

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        SCAN_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("data/parent.scan").unwrap(),
    );
    instance.add_root_node(root);

    instance.build(&mut fs_handle).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
    assert_eq!(
        fs.get(BuildFileLocation::IntermediateDir, "out/data/parent.scan").unwrap(),
        b"payload"
    );

    // Compile products carry the committed file's real fingerprint, not a
    // placeholder.
    let parent = instance
        .nodes()
        .iter()
        .find(|node| node.key.node_type == SCAN_TYPE)
        .unwrap();
    assert_eq!(parent.compile_products.len(), 1);
    assert_eq!(parent.compile_products[0].path.as_str(), "out/data/parent.scan");
    assert_eq!(parent.compile_products[0].size, b"payload".len() as u64);
    assert_ne!(parent.compile_products[0].mtime, 0);

    // Rebuilding the child (its input changed) invalidates the parent.
    fs.insert(BuildFileLocation::SourceDir, "data/child.txt", b"payload2".to_vec());

    let mut fs_handle = fs.clone();
    let mut instance = BuildSystemInstance::new();
    instance.load_cache(&mut fs_handle).unwrap();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            CopyCompiler {
                version: 1,
                runs: Arc::clone(&runs),
            },
        )
        .unwrap();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            SCAN_TYPE,
            ScanCompiler {
                child: "data/child.txt",
                compiles: Arc::clone(&compiles),
            },
        )
        .unwrap();

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        SCAN_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("data/parent.scan").unwrap(),
    );
    instance.add_root_node(root);
    instance.build(&mut fs_handle).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
}

#[test]
fn dependency_cycles_are_fatal() {
    let fs = MemoryFileSystem::new();
    fs.insert(BuildFileLocation::SourceDir, "data/cycle.loop", b"".to_vec());

    let mut fs_handle = fs.clone();
    let mut instance = BuildSystemInstance::new();
    instance
        .register_compiler(DEFAULT_NAMESPACE, LOOP_TYPE, SelfLoopCompiler)
        .unwrap();

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        LOOP_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("data/cycle.loop").unwrap(),
    );
    instance.add_root_node(root);

    assert!(instance.build(&mut fs_handle).is_err());
}

#[test]
fn duplicate_compiler_registration_is_rejected() {
    let runs = Arc::new(AtomicUsize::new(0));

    let mut instance = BuildSystemInstance::new();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            CopyCompiler {
                version: 1,
                runs: Arc::clone(&runs),
            },
        )
        .unwrap();

    let result = instance.register_compiler(
        DEFAULT_NAMESPACE,
        COPY_TYPE,
        CopyCompiler {
            version: 2,
            runs: Arc::clone(&runs),
        },
    );

    assert!(matches!(result, Err(Error::InvalidParameter(_))));
}

#[test]
fn deps_list_drives_children_by_extension() {
    let fs = MemoryFileSystem::new();
    fs.insert(
        BuildFileLocation::SourceDir,
        "rootfiles.deps",
        b"# root file list\ndata/one.txt\ndata/two.txt # trailing comment\n\n".to_vec(),
    );
    fs.insert(BuildFileLocation::SourceDir, "data/one.txt", b"1".to_vec());
    fs.insert(BuildFileLocation::SourceDir, "data/two.txt", b"2".to_vec());

    let runs = Arc::new(AtomicUsize::new(0));

    let mut fs_handle = fs.clone();
    let mut instance = BuildSystemInstance::new();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            CopyCompiler {
                version: 1,
                runs: Arc::clone(&runs),
            },
        )
        .unwrap();
    instance
        .register_extension("txt", DEFAULT_NAMESPACE, COPY_TYPE)
        .unwrap();

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        forge_build::DEPS_NODE_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("rootfiles.deps").unwrap(),
    );
    instance.add_root_node(root);

    instance.build(&mut fs_handle).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(fs.contains(BuildFileLocation::IntermediateDir, "out/data/one.txt"));
    assert!(fs.contains(BuildFileLocation::IntermediateDir, "out/data/two.txt"));
}

struct CollectAction {
    compiled: Arc<AtomicUsize>,
    fail: bool,
}

impl PostBuildAction for CollectAction {
    fn run(&mut self, ctx: &mut PostBuildContext<'_>) -> Result<()> {
        let compiled = ctx
            .relevant_nodes()
            .filter(|node| node.was_compiled)
            .count();
        self.compiled.store(compiled, Ordering::SeqCst);

        if self.fail {
            return Err(Error::OperationFailed("post-build failure".into()));
        }

        Ok(())
    }
}

#[test]
fn post_build_actions_observe_compiled_nodes_and_can_fault() {
    let fs = MemoryFileSystem::new();
    fs.insert(BuildFileLocation::SourceDir, "data/input.txt", b"x".to_vec());

    let runs = Arc::new(AtomicUsize::new(0));
    let compiled = Arc::new(AtomicUsize::new(0));

    let mut fs_handle = fs.clone();
    let mut instance = BuildSystemInstance::new();
    instance
        .register_compiler(
            DEFAULT_NAMESPACE,
            COPY_TYPE,
            CopyCompiler {
                version: 1,
                runs: Arc::clone(&runs),
            },
        )
        .unwrap();

    let root = instance.find_or_create_named_node(
        DEFAULT_NAMESPACE,
        COPY_TYPE,
        BuildFileLocation::SourceDir,
        BuildPath::new("data/input.txt").unwrap(),
    );
    instance.add_root_node(root);
    instance.add_post_build_action(Box::new(CollectAction {
        compiled: Arc::clone(&compiled),
        fail: false,
    }));
    instance.add_post_build_action(Box::new(CollectAction {
        compiled: Arc::new(AtomicUsize::new(0)),
        fail: true,
    }));

    assert!(instance.build(&mut fs_handle).is_err());
    assert_eq!(compiled.load(Ordering::SeqCst), 1);
}
