//! The per-stage compiler node: GLSL to SPIR-V through `shaderc` with a
//! controlled include callback.
//!
//! The compiled translation unit is synthetic; the real shader source is
//! pulled in through an include so the prefix and suffix buffers can wrap
//! it:
//!
//! ```text
//! #extension GL_ARB_shading_language_include : enable
//! #include <GlslShaderPrefix>
//! #include "./<sourcePath>"
//! #include <GlslShaderSuffix>
//! ```
//!
//! The two system includes resolve to in-memory buffers; local includes
//! resolve relative to the includer's directory first and then through
//! the include-path list, all under the shader source base in the source
//! tree. `shaderc` requires its include callback to be `'static`, so the
//! include graph is walked up front through the compiler feedback (which
//! also records the exact input fingerprints) and the callback serves the
//! resulting owned snapshot.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Read, Write};

use forge_build::node::{CompilerFeedback, NodeCompiler, NodeKey};
use forge_build::vfs::{BuildFileLocation, OutputStream};
use forge_common::{BuildPath, Error, Result};

use crate::pipeline::{load_pipeline_package, shader_for_stage, single_pipeline};
use crate::{stage_output_path, GraphicPipelineStage};

/// Shader sources live here in the source tree.
pub const SHADER_SOURCE_BASE: &str = "shaders";

const PREFIX_INCLUDE: &str = "GlslShaderPrefix";
const SUFFIX_INCLUDE: &str = "GlslShaderSuffix";

pub struct RenderPipelineStageCompiler {
    stage: GraphicPipelineStage,
}

impl RenderPipelineStageCompiler {
    pub fn new(stage: GraphicPipelineStage) -> Self {
        Self { stage }
    }
}

impl NodeCompiler for RenderPipelineStageCompiler {
    fn has_analysis_stage(&self) -> bool {
        false
    }

    fn version(&self) -> u32 {
        1
    }

    fn run_analysis(&self, _key: &NodeKey, _feedback: &mut dyn CompilerFeedback) -> Result<()> {
        Err(Error::Internal)
    }

    fn run_compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<()> {
        let package = load_pipeline_package(feedback, key, None)?;
        let (_, pipeline) = single_pipeline(&package)?;

        let Some(shader) = shader_for_stage(&pipeline, self.stage) else {
            return Err(Error::OperationFailed(format!(
                "pipeline has no {} stage",
                self.stage.name()
            )));
        };

        let source_path = package.string(shader.source.0)?.to_owned();
        let entry_point = package.string(shader.entry_point.0)?.to_owned();

        let job = StageBuildJob {
            stage: self.stage,
            source_path,
            entry_point,
            include_paths: Vec::new(),
        };

        let spirv = job.compile(key, feedback)?;

        let mut output = feedback.open_output(
            BuildFileLocation::IntermediateDir,
            &stage_output_path(&key.identifier, self.stage),
        )?;

        // Little-endian 32-bit words.
        let mut bytes = Vec::with_capacity(spirv.len() * 4);
        for word in spirv {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        output.write_all(&bytes).map_err(Error::IoWrite)?;
        output.commit()?;

        feedback.check_fault()
    }
}

/// An include directive found while scanning a shader source.
struct IncludeDirective {
    name: String,
    system: bool,
}

struct StageBuildJob {
    stage: GraphicPipelineStage,
    source_path: String,
    entry_point: String,
    include_paths: Vec<String>,
}

impl StageBuildJob {
    fn compile(&self, key: &NodeKey, feedback: &mut dyn CompilerFeedback) -> Result<Vec<u32>> {
        let source_text = synthetic_source(&self.source_path);

        // Everything the callback needs is owned: the snapshot of the
        // reachable include graph plus the generated wrapper buffers.
        let sources = self.collect_sources(feedback)?;
        let prefix = self.prefix_buffer();
        let suffix = String::new();
        let include_paths = self.include_paths.clone();

        let shader_kind = match self.stage {
            GraphicPipelineStage::Vertex => shaderc::ShaderKind::Vertex,
            GraphicPipelineStage::Pixel => shaderc::ShaderKind::Fragment,
        };

        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::OperationFailed("failed to initialize shader compiler".into()))?;
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| Error::OperationFailed("failed to initialize shader compiler".into()))?;

        options.set_source_language(shaderc::SourceLanguage::GLSL);
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        options.set_forced_version_profile(450, shaderc::GlslProfile::Core);

        options.set_include_callback(move |name, include_type, includer, _depth| {
            resolve_include(&sources, &include_paths, &prefix, &suffix, name, include_type, includer)
        });

        let artifact = compiler
            .compile_into_spirv(
                &source_text,
                shader_kind,
                key.identifier.as_str(),
                &self.entry_point,
                Some(&options),
            )
            .map_err(|err| {
                tracing::error!("{}", err);
                Error::OperationFailed(format!(
                    "shader compilation failed for '{}'",
                    self.source_path
                ))
            })?;

        if artifact.get_num_warnings() > 0 {
            tracing::warn!("{}", artifact.get_warning_messages());
        }

        Ok(artifact.as_binary().to_vec())
    }

    /// Generated prelude seen by every shader of this pipeline.
    fn prefix_buffer(&self) -> String {
        let mut prefix = String::new();

        let _ = writeln!(
            prefix,
            "#define FORGE_STAGE_{} 1",
            self.stage.name().to_ascii_uppercase()
        );
        let _ = writeln!(prefix, "#define FORGE_ENTRY_POINT {}", self.entry_point);

        prefix
    }

    /// Walks the include graph from the stage's source file and snapshots
    /// every reachable file.
    ///
    /// Every file probe and read goes through the feedback, so exactly the
    /// consumed sources land in the node's input fingerprints. Names that
    /// cannot be resolved here are left out; the compiler reports them
    /// with a proper diagnostic if they are actually reached.
    fn collect_sources(
        &self,
        feedback: &mut dyn CompilerFeedback,
    ) -> Result<HashMap<String, String>> {
        let root = normalize_include_path(&self.source_path)
            .map_err(|_| Error::InvalidPath(self.source_path.clone()))?;

        let mut sources = HashMap::new();
        let mut queue = vec![root.clone()];

        while let Some(path) = queue.pop() {
            if sources.contains_key(&path) {
                continue;
            }

            let contents = match read_shader_source(feedback, &path)? {
                Some(contents) => contents,
                None => {
                    if path == root {
                        tracing::error!("could not open shader source '{}'", path);
                        return Err(Error::FileOpen(path));
                    }
                    continue;
                }
            };

            for directive in scan_include_directives(&contents) {
                if directive.system {
                    continue;
                }

                if let Some(resolved) =
                    self.resolve_candidate(feedback, &directive.name, &path, &sources)?
                {
                    queue.push(resolved);
                }
            }

            sources.insert(path, contents);
        }

        Ok(sources)
    }

    /// First existing candidate for an include name, in resolution order:
    /// `./` absolute, includer-relative, then the include-path list.
    fn resolve_candidate(
        &self,
        feedback: &mut dyn CompilerFeedback,
        name: &str,
        includer: &str,
        sources: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        for candidate in include_candidates(name, includer, &self.include_paths) {
            if sources.contains_key(&candidate) {
                return Ok(None);
            }

            let Ok(full) = BuildPath::new(&format!("{SHADER_SOURCE_BASE}/{candidate}")) else {
                continue;
            };

            if feedback
                .file_status(BuildFileLocation::SourceDir, &full, false)?
                .is_some()
            {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }
}

fn read_shader_source(
    feedback: &mut dyn CompilerFeedback,
    path: &str,
) -> Result<Option<String>> {
    let Ok(full) = BuildPath::new(&format!("{SHADER_SOURCE_BASE}/{path}")) else {
        return Ok(None);
    };

    let Some(mut stream) = feedback.try_open_input(BuildFileLocation::SourceDir, &full)? else {
        return Ok(None);
    };

    let mut contents = String::new();
    stream
        .read_to_string(&mut contents)
        .map_err(|_| Error::InvalidUnicode)?;

    Ok(Some(contents))
}

/// `#include "name"` and `#include <name>` directives of a GLSL source.
fn scan_include_directives(contents: &str) -> Vec<IncludeDirective> {
    let mut out = Vec::new();

    for line in contents.lines() {
        let Some(rest) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix("include") else {
            continue;
        };

        let rest = rest.trim_start();

        let (close, system) = match rest.chars().next() {
            Some('"') => ('"', false),
            Some('<') => ('>', true),
            _ => continue,
        };

        if let Some(name) = rest[1..].split(close).next() {
            if !name.is_empty() {
                out.push(IncludeDirective {
                    name: name.to_owned(),
                    system,
                });
            }
        }
    }

    out
}

/// Normalized candidate paths for an include name, in resolution order.
fn include_candidates(name: &str, includer: &str, include_paths: &[String]) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(absolute) = name.strip_prefix("./") {
        if let Ok(path) = normalize_include_path(absolute) {
            candidates.push(path);
        }

        return candidates;
    }

    // Relative to the includer's directory first.
    let includer_dir = match includer.rfind('/') {
        Some(index) => &includer[..index + 1],
        None => "",
    };

    if let Ok(path) = normalize_include_path(&format!("{includer_dir}{name}")) {
        candidates.push(path);
    }

    // Then through the include-path search list.
    if let Ok(normalized) = normalize_include_path(name) {
        for include_path in include_paths {
            if let Ok(path) = normalize_include_path(&format!("{include_path}/{normalized}")) {
                candidates.push(path);
            }
        }
    }

    candidates
}

/// Resolves one include against the pre-collected source snapshot.
fn resolve_include(
    sources: &HashMap<String, String>,
    include_paths: &[String],
    prefix: &str,
    suffix: &str,
    name: &str,
    include_type: shaderc::IncludeType,
    includer: &str,
) -> std::result::Result<shaderc::ResolvedInclude, String> {
    if include_type == shaderc::IncludeType::Standard {
        // System includes name the in-memory wrapper buffers.
        let content = match name {
            PREFIX_INCLUDE => prefix,
            SUFFIX_INCLUDE => suffix,
            _ => return Err(format!("unknown system include '{name}'")),
        };

        return Ok(shaderc::ResolvedInclude {
            resolved_name: name.to_owned(),
            content: content.to_owned(),
        });
    }

    for candidate in include_candidates(name, includer, include_paths) {
        if let Some(content) = sources.get(&candidate) {
            return Ok(shaderc::ResolvedInclude {
                resolved_name: candidate,
                content: content.clone(),
            });
        }
    }

    Err(format!("could not open include '{name}'"))
}

pub(crate) fn synthetic_source(source_path: &str) -> String {
    format!(
        "#extension GL_ARB_shading_language_include : enable\n\
         #include <{PREFIX_INCLUDE}>\n\
         #include \"./{source_path}\"\n\
         #include <{SUFFIX_INCLUDE}>\n"
    )
}

/// Normalizes an include path: `\` is rejected, components may not be
/// empty or `.`, and `..` pops exactly one directory.
pub fn normalize_include_path(path: &str) -> Result<String> {
    if path.contains('\\') {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => return Err(Error::InvalidPath(path.to_owned())),
            ".." => {
                if components.pop().is_none() {
                    return Err(Error::InvalidPath(path.to_owned()));
                }
            }
            _ => components.push(component),
        }
    }

    if components.is_empty() {
        return Err(Error::InvalidPath(path.to_owned()));
    }

    Ok(components.join("/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        include_candidates, normalize_include_path, resolve_include, scan_include_directives,
        synthetic_source,
    };

    #[test]
    fn synthetic_source_wraps_the_real_shader() {
        let text = synthetic_source("world.vs.glsl");

        assert_eq!(
            text,
            "#extension GL_ARB_shading_language_include : enable\n\
             #include <GlslShaderPrefix>\n\
             #include \"./world.vs.glsl\"\n\
             #include <GlslShaderSuffix>\n"
        );
    }

    #[test]
    fn include_path_normalization() {
        assert_eq!(normalize_include_path("lib/math.glsl").unwrap(), "lib/math.glsl");
        assert_eq!(
            normalize_include_path("lib/../common/util.glsl").unwrap(),
            "common/util.glsl"
        );

        assert!(normalize_include_path("lib\\math.glsl").is_err());
        assert!(normalize_include_path("lib//math.glsl").is_err());
        assert!(normalize_include_path("./math.glsl").is_err());
        assert!(normalize_include_path("../escape.glsl").is_err());
        assert!(normalize_include_path("").is_err());
    }

    #[test]
    fn scans_include_directives() {
        let source = "\
            #version 450\n\
            #include \"lib/math.glsl\"\n\
            # include <GlslShaderPrefix>\n\
            // #include \"skipped.glsl\" does not start with '#'\n\
            void main() {}\n";

        let directives = scan_include_directives(source);
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].name, "lib/math.glsl");
        assert!(!directives[0].system);
        assert_eq!(directives[1].name, "GlslShaderPrefix");
        assert!(directives[1].system);
    }

    #[test]
    fn candidate_order_is_relative_then_search_paths() {
        let include_paths = vec!["common".to_owned()];

        let candidates = include_candidates("util.glsl", "lib/math.glsl", &include_paths);
        assert_eq!(candidates, ["lib/util.glsl", "common/util.glsl"]);

        // `./` names resolve absolutely and skip the search list.
        let candidates = include_candidates("./world.vs.glsl", "ignored.glsl", &include_paths);
        assert_eq!(candidates, ["world.vs.glsl"]);

        // `..` pops one directory relative to the includer.
        let candidates = include_candidates("../shared.glsl", "lib/math.glsl", &[]);
        assert_eq!(candidates, ["shared.glsl"]);
    }

    #[test]
    fn resolves_from_snapshot() {
        let mut sources = HashMap::new();
        sources.insert("world.vs.glsl".to_owned(), "void main() {}".to_owned());
        sources.insert("lib/math.glsl".to_owned(), "float pi();".to_owned());

        let prefix = "#define FORGE_STAGE_VERTEX 1\n";

        let resolved = resolve_include(
            &sources,
            &[],
            prefix,
            "",
            "GlslShaderPrefix",
            shaderc::IncludeType::Standard,
            "",
        )
        .unwrap();
        assert_eq!(resolved.content, prefix);

        let resolved = resolve_include(
            &sources,
            &[],
            prefix,
            "",
            "./world.vs.glsl",
            shaderc::IncludeType::Relative,
            "root",
        )
        .unwrap();
        assert_eq!(resolved.resolved_name, "world.vs.glsl");

        let resolved = resolve_include(
            &sources,
            &[],
            prefix,
            "",
            "math.glsl",
            shaderc::IncludeType::Relative,
            "lib/other.glsl",
        )
        .unwrap();
        assert_eq!(resolved.resolved_name, "lib/math.glsl");

        assert!(resolve_include(
            &sources,
            &[],
            prefix,
            "",
            "missing.glsl",
            shaderc::IncludeType::Relative,
            "world.vs.glsl",
        )
        .is_err());
    }
}
