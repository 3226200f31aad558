//! The root dependency-list compiler.
//!
//! A `.deps` file lists one source identifier per line (`#` starts a
//! comment); each entry becomes a node dependency whose type is resolved
//! through the extension registry.

use std::io::Read;

use forge_common::{BuildPath, Error, Result};

use crate::node::{CompilerFeedback, NodeCompiler, NodeKey};
use crate::vfs::BuildFileLocation;

pub struct DepsNodeCompiler;

impl NodeCompiler for DepsNodeCompiler {
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
        let mut stream = feedback.open_input(key.location, &key.identifier)?;

        let mut text = String::new();
        stream
            .read_to_string(&mut text)
            .map_err(|_| Error::InvalidUnicode)?;

        for (line_index, raw_line) in text.lines().enumerate() {
            feedback.check_fault()?;

            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let parse_error = |message: String| Error::TextParse {
                path: key.identifier.as_str().to_owned(),
                line: line_index + 1,
                col: 1,
                message,
            };

            let path = BuildPath::new(line)
                .map_err(|_| parse_error(format!("invalid file path '{line}'")))?;

            let Some(extension) = path.extension() else {
                return Err(parse_error(format!("entry '{path}' has no extension")));
            };

            let Some((namespace, node_type)) = feedback.node_type_for_extension(extension) else {
                return Err(parse_error(format!(
                    "no compiler registered for extension '{extension}'"
                )));
            };

            feedback.add_node_dependency(namespace, node_type, BuildFileLocation::SourceDir, path)?;
        }

        Ok(())
    }
}
