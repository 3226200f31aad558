//! Vulkan build backend: compiles analyzed pipeline packages into
//! packaged SPIR-V via GLSL, one node per pipeline plus one node per
//! graphics stage.

pub mod pipeline;
pub mod stage;

pub use pipeline::RenderPipelineCompiler;
pub use stage::RenderPipelineStageCompiler;

use forge_build::{BuildSystemAddOn, BuildSystemInstance, DEFAULT_NAMESPACE};
use forge_common::{BuildPath, Result};
use forge_rpl::GRAPHICS_PIPELINE_NODE_TYPE;

/// Graphics pipeline stages the backend compiles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GraphicPipelineStage {
    Vertex,
    Pixel,
}

impl GraphicPipelineStage {
    pub const ALL: &'static [GraphicPipelineStage] =
        &[GraphicPipelineStage::Vertex, GraphicPipelineStage::Pixel];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            GraphicPipelineStage::Vertex => "Vertex",
            GraphicPipelineStage::Pixel => "Pixel",
        }
    }
}

/// Node type of a per-stage compiler: `VG` followed by the two-digit
/// stage number, with a leading zero rendered as `P`.
pub fn stage_node_type(stage: GraphicPipelineStage) -> u32 {
    let stage = stage.index();

    let mut c2 = b'0' + stage / 10;
    let c3 = b'0' + stage % 10;

    if c2 == b'0' {
        c2 = b'P';
    }

    u32::from_le_bytes([b'V', b'G', c2, c3])
}

/// Intermediate path of a stage's compiled SPIR-V words.
pub fn stage_output_path(identifier: &BuildPath, stage: GraphicPipelineStage) -> BuildPath {
    BuildPath::new(&format!("vk_pl_g_{}/{identifier}", stage.index()))
        .expect("derived from a valid identifier")
}

/// Registers the per-pipeline and per-stage compilers.
pub struct VulkanBuildAddOn;

impl BuildSystemAddOn for VulkanBuildAddOn {
    fn register(&self, instance: &mut BuildSystemInstance) -> Result<()> {
        instance.register_compiler(
            DEFAULT_NAMESPACE,
            GRAPHICS_PIPELINE_NODE_TYPE,
            RenderPipelineCompiler,
        )?;

        for &stage in GraphicPipelineStage::ALL {
            instance.register_compiler(
                DEFAULT_NAMESPACE,
                stage_node_type(stage),
                RenderPipelineStageCompiler::new(stage),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{stage_node_type, GraphicPipelineStage};

    #[test]
    fn stage_node_types_render_leading_zero_as_p() {
        assert_eq!(
            stage_node_type(GraphicPipelineStage::Vertex),
            u32::from_le_bytes(*b"VGP0")
        );
        assert_eq!(
            stage_node_type(GraphicPipelineStage::Pixel),
            u32::from_le_bytes(*b"VGP1")
        );
    }
}
