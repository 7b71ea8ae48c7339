use {
    crate::{context::Context, shaders},
    eyre::Report,
    lumen_gpu::{
        Buffer, BufferInfo, BufferUsage, DescriptorSetLayout, MemoryUsageFlags,
        PipelineLayout, PipelineLayoutInfo, RayTracingPipeline,
        RayTracingPipelineInfo, RayTracingShaderGroupInfo, ShaderBindingTable,
        ShaderStage, StridedBufferRegion,
    },
    std::path::Path,
};

/// Shader groups in shader binding table order.
pub const SHADER_GROUPS: [RayTracingShaderGroupInfo; 5] = [
    RayTracingShaderGroupInfo::Raygen { raygen: 0 },
    RayTracingShaderGroupInfo::Miss { miss: 1 },
    RayTracingShaderGroupInfo::Miss { miss: 2 },
    RayTracingShaderGroupInfo::Triangles {
        any_hit: None,
        closest_hit: Some(3),
    },
    RayTracingShaderGroupInfo::Procedural {
        intersection: 4,
        any_hit: None,
        closest_hit: Some(5),
    },
];

/// Secondary rays are traced from hit shaders, not by recursion.
pub const MAX_RECURSION_DEPTH: u32 = 1;

/// Ray tracing pipeline with its shader binding table.
#[derive(Debug)]
pub struct TracePipeline {
    layout: PipelineLayout,
    pipeline: RayTracingPipeline,
    shader_binding_table: ShaderBindingTable,
}

impl TracePipeline {
    #[tracing::instrument(skip(ctx, set_layout))]
    pub fn new(
        ctx: &Context,
        shader_dir: &Path,
        set_layout: &DescriptorSetLayout,
    ) -> Result<Self, Report> {
        let layout = ctx.create_pipeline_layout(PipelineLayoutInfo {
            sets: vec![set_layout.clone()],
        })?;

        let load = |name, stage| shaders::load(ctx, shader_dir, name, stage);

        // Modules are released once the pipeline is created.
        let pipeline = ctx.create_ray_tracing_pipeline(RayTracingPipelineInfo {
            shaders: vec![
                load(shaders::RAYGEN, ShaderStage::Raygen)?,
                load(shaders::MISS, ShaderStage::Miss)?,
                load(shaders::MISS_SHADOW, ShaderStage::Miss)?,
                load(shaders::CLOSEST_HIT_TRIANGLES, ShaderStage::ClosestHit)?,
                load(shaders::INTERSECTION_SPHERES, ShaderStage::Intersection)?,
                load(shaders::CLOSEST_HIT_SPHERES, ShaderStage::ClosestHit)?,
            ],
            groups: SHADER_GROUPS.to_vec(),
            max_recursion_depth: MAX_RECURSION_DEPTH,
            layout: layout.clone(),
        })?;

        let shader_binding_table = create_shader_binding_table(ctx, &pipeline)?;

        tracing::trace!("RT pipeline created");

        Ok(TracePipeline {
            layout,
            pipeline,
            shader_binding_table,
        })
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn pipeline(&self) -> &RayTracingPipeline {
        &self.pipeline
    }

    pub fn shader_binding_table(&self) -> &ShaderBindingTable {
        &self.shader_binding_table
    }

    /// Buffer holding one handle per shader group.
    pub fn shader_binding_table_buffer(&self) -> &Buffer {
        let raygen = self
            .shader_binding_table
            .raygen
            .as_ref()
            .expect("Raygen region is always present");
        &raygen.buffer
    }
}

/// Raygen record at 0, miss records at 1 and 2, hit records at 3 and 4, all
/// strided by the handle size.
fn create_shader_binding_table(
    ctx: &Context,
    pipeline: &RayTracingPipeline,
) -> Result<ShaderBindingTable, Report> {
    let group_count = SHADER_GROUPS.len() as u32;
    let handle_size = u64::from(ctx.properties().shader_group_handle_size);

    let handles =
        ctx.get_ray_tracing_shader_group_handles(pipeline, 0, group_count)?;
    debug_assert_eq!(handles.len() as u64, handle_size * u64::from(group_count));

    let buffer = ctx.create_buffer_static(
        BufferInfo {
            align: 63,
            size: handles.len() as u64,
            usage: BufferUsage::TRANSFER_SRC
                | BufferUsage::RAY_TRACING
                | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory: MemoryUsageFlags::UPLOAD | MemoryUsageFlags::DEVICE_ADDRESS,
        },
        &handles[..],
    )?;

    let region = |first: u64, count: u64| StridedBufferRegion {
        buffer: buffer.clone(),
        offset: first * handle_size,
        size: count * handle_size,
        stride: handle_size,
    };

    Ok(ShaderBindingTable {
        raygen: Some(region(0, 1)),
        miss: Some(region(1, 2)),
        hit: Some(region(3, 2)),
        callable: None,
    })
}
