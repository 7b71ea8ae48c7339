use {
    crate::{context::Context, scene::Scene},
    eyre::Report,
    lumen_gpu::{
        Buffer, DescriptorBindingFlags, DescriptorPoolInfo, DescriptorSet,
        DescriptorSetInfo, DescriptorSetLayout, DescriptorSetLayoutBinding,
        DescriptorSetLayoutInfo, DescriptorType, Descriptors, ShaderStageFlags,
        WriteDescriptorSet,
    },
    smallvec::SmallVec,
};

pub const TLAS_BINDING: u32 = 0;
pub const PARAMS_BINDING: u32 = 1;
pub const TRIANGLES_BINDING: u32 = 2;
pub const SPHERES_BINDING: u32 = 3;
pub const RAND_STATES_BINDING: u32 = 4;

/// The single descriptor set shared by the ray tracing and post-process
/// pipelines.
///
/// Dropping it releases the set, then its pool, then the layout.
#[derive(Debug)]
pub struct ResourceBindingSet {
    set: DescriptorSet,
    layout: DescriptorSetLayout,
}

impl ResourceBindingSet {
    pub fn layout_info() -> DescriptorSetLayoutInfo {
        let binding = |binding, ty, stages, flags| DescriptorSetLayoutBinding {
            binding,
            ty,
            count: 1,
            stages,
            flags,
        };

        DescriptorSetLayoutInfo {
            bindings: vec![
                binding(
                    TLAS_BINDING,
                    DescriptorType::AccelerationStructure,
                    ShaderStageFlags::RAYGEN,
                    DescriptorBindingFlags::empty(),
                ),
                binding(
                    PARAMS_BINDING,
                    DescriptorType::UniformBuffer,
                    ShaderStageFlags::RAYGEN | ShaderStageFlags::COMPUTE,
                    DescriptorBindingFlags::empty(),
                ),
                // Metadata of an empty hit group is left unwritten.
                binding(
                    TRIANGLES_BINDING,
                    DescriptorType::StorageBuffer,
                    ShaderStageFlags::CLOSEST_HIT,
                    DescriptorBindingFlags::PARTIALLY_BOUND,
                ),
                binding(
                    SPHERES_BINDING,
                    DescriptorType::StorageBuffer,
                    ShaderStageFlags::CLOSEST_HIT,
                    DescriptorBindingFlags::PARTIALLY_BOUND,
                ),
                binding(
                    RAND_STATES_BINDING,
                    DescriptorType::StorageBuffer,
                    ShaderStageFlags::RAYGEN,
                    DescriptorBindingFlags::empty(),
                ),
            ],
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn new(
        ctx: &Context,
        scene: &Scene,
        params: &Buffer,
        rand_states: &Buffer,
    ) -> Result<Self, Report> {
        let layout_info = Self::layout_info();
        let pool_info = DescriptorPoolInfo::for_layout(&layout_info, 1);

        let layout = ctx.create_descriptor_set_layout(layout_info)?;
        let pool = ctx.create_descriptor_pool(pool_info)?;
        let set = ctx.create_descriptor_set(DescriptorSetInfo {
            pool,
            layout: layout.clone(),
        })?;

        let whole = |buffer: &Buffer| [(buffer.clone(), 0, buffer.info().size)];

        let tlas = [scene.tlas().structure().clone()];
        let params = whole(params);
        let rand_states = whole(rand_states);
        let triangles = scene.triangle_views().map(whole);
        let spheres = scene.sphere_views().map(whole);

        let mut writes: SmallVec<[WriteDescriptorSet<'_>; 5]> = SmallVec::new();
        let mut write = |binding, descriptors| {
            writes.push(WriteDescriptorSet {
                set: &set,
                binding,
                element: 0,
                descriptors,
            })
        };

        write(TLAS_BINDING, Descriptors::AccelerationStructure(&tlas));
        write(PARAMS_BINDING, Descriptors::UniformBuffer(&params));
        if let Some(triangles) = &triangles {
            write(TRIANGLES_BINDING, Descriptors::StorageBuffer(triangles));
        }
        if let Some(spheres) = &spheres {
            write(SPHERES_BINDING, Descriptors::StorageBuffer(spheres));
        }
        write(RAND_STATES_BINDING, Descriptors::StorageBuffer(&rand_states));

        ctx.update_descriptor_sets(&writes)?;
        drop(writes);

        tracing::trace!("Resource binding set written");

        Ok(ResourceBindingSet { set, layout })
    }

    pub fn set(&self) -> &DescriptorSet {
        &self.set
    }

    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }
}
