use super::PipelineLayout;
use crate::shader::Shader;

define_handle! {
    /// Resource that describes whole compute pipeline state.
    pub struct ComputePipeline(ComputePipelineDesc);
}

/// Compute pipeline state definition.
#[derive(Clone, Debug)]
pub struct ComputePipelineInfo {
    /// Compute shader for the pipeline.
    pub shader: Shader,

    /// Pipeline layout.
    pub layout: PipelineLayout,
}

/// State retained by a created compute pipeline.
/// Shader modules are not retained.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComputePipelineDesc {
    pub entry: Box<str>,
    pub layout: PipelineLayout,
}

impl ComputePipelineInfo {
    pub fn desc(&self) -> ComputePipelineDesc {
        ComputePipelineDesc {
            entry: self.shader.entry.clone(),
            layout: self.layout.clone(),
        }
    }
}
