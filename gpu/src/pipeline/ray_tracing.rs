use super::PipelineLayout;
use crate::{
    buffer::StridedBufferRegion,
    shader::{Shader, ShaderStage},
};

define_handle! {
    /// Resource that describes whole ray-tracing pipeline state.
    pub struct RayTracingPipeline(RayTracingPipelineDesc);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RayTracingPipelineInfo {
    /// Array of shaders referenced by indices in shader groups below.
    pub shaders: Vec<Shader>,

    /// Pipeline-creation-time layer of indirection between individual shaders
    /// and acceleration structures.
    pub groups: Vec<RayTracingShaderGroupInfo>,

    /// Maximum recursion depth to trace rays.
    pub max_recursion_depth: u32,

    /// Pipeline layout.
    pub layout: PipelineLayout,
}

/// State retained by a created ray-tracing pipeline.
/// Shader modules are not retained.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RayTracingPipelineDesc {
    pub stages: Vec<ShaderStage>,
    pub groups: Vec<RayTracingShaderGroupInfo>,
    pub max_recursion_depth: u32,
    pub layout: PipelineLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum RayTracingShaderGroupInfo {
    Raygen {
        /// Index of raygen shader in `RayTracingPipelineInfo::shaders`.
        raygen: u32,
    },
    Miss {
        /// Index of miss shader in `RayTracingPipelineInfo::shaders`.
        miss: u32,
    },
    Triangles {
        /// Index of any-hit shader in `RayTracingPipelineInfo::shaders`.
        any_hit: Option<u32>,
        /// Index of closest-hit shader in `RayTracingPipelineInfo::shaders`.
        closest_hit: Option<u32>,
    },
    Procedural {
        /// Index of intersection shader in `RayTracingPipelineInfo::shaders`.
        intersection: u32,
        any_hit: Option<u32>,
        closest_hit: Option<u32>,
    },
}

/// Shader group references a shader that is missing or of the wrong stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Group {group} expects {expected:?} shader at index {index}")]
pub struct InvalidShaderGroup {
    pub group: usize,
    pub index: u32,
    pub expected: ShaderStage,
}

impl RayTracingShaderGroupInfo {
    fn references(&self) -> impl Iterator<Item = (u32, ShaderStage)> {
        let refs: [Option<(u32, ShaderStage)>; 3] = match *self {
            Self::Raygen { raygen } => {
                [Some((raygen, ShaderStage::Raygen)), None, None]
            }
            Self::Miss { miss } => [Some((miss, ShaderStage::Miss)), None, None],
            Self::Triangles {
                any_hit,
                closest_hit,
            } => [
                any_hit.map(|i| (i, ShaderStage::AnyHit)),
                closest_hit.map(|i| (i, ShaderStage::ClosestHit)),
                None,
            ],
            Self::Procedural {
                intersection,
                any_hit,
                closest_hit,
            } => [
                Some((intersection, ShaderStage::Intersection)),
                any_hit.map(|i| (i, ShaderStage::AnyHit)),
                closest_hit.map(|i| (i, ShaderStage::ClosestHit)),
            ],
        };

        refs.into_iter().flatten()
    }
}

impl RayTracingPipelineInfo {
    /// Checks every group index against shader list.
    pub fn validate(&self) -> Result<(), InvalidShaderGroup> {
        for (group, info) in self.groups.iter().enumerate() {
            for (index, expected) in info.references() {
                match self.shaders.get(index as usize) {
                    Some(shader) if shader.stage == expected => {}
                    _ => {
                        return Err(InvalidShaderGroup {
                            group,
                            index,
                            expected,
                        })
                    }
                }
            }
        }

        Ok(())
    }

    pub fn desc(&self) -> RayTracingPipelineDesc {
        RayTracingPipelineDesc {
            stages: self.shaders.iter().map(|s| s.stage).collect(),
            groups: self.groups.clone(),
            max_recursion_depth: self.max_recursion_depth,
            layout: self.layout.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderBindingTable {
    pub raygen: Option<StridedBufferRegion>,
    pub miss: Option<StridedBufferRegion>,
    pub hit: Option<StridedBufferRegion>,
    pub callable: Option<StridedBufferRegion>,
}
