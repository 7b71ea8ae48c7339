use {
    crate::{context::Context, shaders},
    eyre::Report,
    lumen_gpu::{
        ComputePipeline, ComputePipelineInfo, DescriptorSetLayout, Extent2d,
        PipelineLayout, PipelineLayoutInfo, ShaderStage,
    },
    std::path::Path,
};

/// Edge of the square workgroup of the post-process shader.
pub const WORKGROUP_SIZE: u32 = 16;

/// Compute pass turning accumulated radiance into the final image.
#[derive(Debug)]
pub struct PostProcessPipeline {
    layout: PipelineLayout,
    pipeline: ComputePipeline,
}

impl PostProcessPipeline {
    #[tracing::instrument(skip(ctx, set_layout))]
    pub fn new(
        ctx: &Context,
        shader_dir: &Path,
        set_layout: &DescriptorSetLayout,
    ) -> Result<Self, Report> {
        let layout = ctx.create_pipeline_layout(PipelineLayoutInfo {
            sets: vec![set_layout.clone()],
        })?;

        let pipeline = ctx.create_compute_pipeline(ComputePipelineInfo {
            shader: shaders::load(ctx, shader_dir, shaders::FINAL, ShaderStage::Compute)?,
            layout: layout.clone(),
        })?;

        tracing::trace!("Post-process pipeline created");

        Ok(PostProcessPipeline { layout, pipeline })
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn pipeline(&self) -> &ComputePipeline {
        &self.pipeline
    }
}

/// Workgroups covering every pixel of `extent`.
pub fn workgroups(extent: Extent2d) -> (u32, u32) {
    let groups = |pixels: u32| (pixels + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
    (groups(extent.width), groups(extent.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_round_up() {
        let extent = |width, height| Extent2d { width, height };

        assert_eq!(workgroups(extent(16, 16)), (1, 1));
        assert_eq!(workgroups(extent(17, 1)), (2, 1));
        assert_eq!(workgroups(extent(640, 360)), (40, 23));
    }
}
