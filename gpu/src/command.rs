use crate::{
    accel::AccelerationStructureBuildGeometryInfo,
    buffer::{Buffer, BufferCopy},
    descriptor::DescriptorSet,
    pipeline::{
        ComputePipeline, PipelineLayout, RayTracingPipeline, ShaderBindingTable,
    },
    queue::QueueCapabilityFlags,
    stage::{MemoryBarrier, PipelineStageFlags},
    Extent3d, OutOfMemory,
};
use std::{any::TypeId, fmt::Debug};

#[derive(Debug)]
pub enum Command<'a> {
    BindRayTracingPipeline {
        pipeline: &'a RayTracingPipeline,
    },

    BindComputePipeline {
        pipeline: &'a ComputePipeline,
    },

    BindRayTracingDescriptorSets {
        layout: &'a PipelineLayout,
        first_set: u32,
        sets: &'a [DescriptorSet],
    },

    BindComputeDescriptorSets {
        layout: &'a PipelineLayout,
        first_set: u32,
        sets: &'a [DescriptorSet],
    },

    FillBuffer {
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
        data: u32,
    },

    UpdateBuffer {
        buffer: &'a Buffer,
        offset: u64,
        data: &'a [u8],
    },

    CopyBuffer {
        src_buffer: &'a Buffer,
        dst_buffer: &'a Buffer,
        regions: &'a [BufferCopy],
    },

    BuildAccelerationStructure {
        infos: &'a [AccelerationStructureBuildGeometryInfo<'a>],
    },

    TraceRays {
        shader_binding_table: &'a ShaderBindingTable,
        extent: Extent3d,
    },

    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },

    PipelineBarrier {
        src: PipelineStageFlags,
        dst: PipelineStageFlags,
        memory: Option<MemoryBarrier>,
    },
}

/// Records commands for later writing into a `CommandBuffer`.
#[derive(Debug)]
pub struct Encoder<'a> {
    capabilities: QueueCapabilityFlags,
    commands: Vec<Command<'a>>,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(capabilities: QueueCapabilityFlags) -> Self {
        Encoder {
            capabilities,
            commands: Vec::new(),
        }
    }

    /// Commands recorded so far.
    pub fn commands(&self) -> &[Command<'a>] {
        &self.commands
    }

    pub fn bind_ray_tracing_pipeline(
        &mut self,
        pipeline: &'a RayTracingPipeline,
    ) {
        assert!(self.capabilities.supports_compute());

        self.commands
            .push(Command::BindRayTracingPipeline { pipeline })
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: &'a ComputePipeline) {
        assert!(self.capabilities.supports_compute());

        self.commands
            .push(Command::BindComputePipeline { pipeline })
    }

    pub fn bind_ray_tracing_descriptor_sets(
        &mut self,
        layout: &'a PipelineLayout,
        first_set: u32,
        sets: &'a [DescriptorSet],
    ) {
        assert!(self.capabilities.supports_compute());

        self.commands.push(Command::BindRayTracingDescriptorSets {
            layout,
            first_set,
            sets,
        });
    }

    pub fn bind_compute_descriptor_sets(
        &mut self,
        layout: &'a PipelineLayout,
        first_set: u32,
        sets: &'a [DescriptorSet],
    ) {
        assert!(self.capabilities.supports_compute());

        self.commands.push(Command::BindComputeDescriptorSets {
            layout,
            first_set,
            sets,
        });
    }

    /// Fills `size` bytes at `offset` with repeated `data` word.
    pub fn fill_buffer(
        &mut self,
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
        data: u32,
    ) {
        assert_eq!(offset & 3, 0, "Fill offset must be multiple of 4");
        assert_eq!(size & 3, 0, "Fill size must be multiple of 4");

        self.commands.push(Command::FillBuffer {
            buffer,
            offset,
            size,
            data,
        })
    }

    /// Updates a buffer's contents from host memory.
    pub fn update_buffer<T>(
        &mut self,
        buffer: &'a Buffer,
        offset: u64,
        data: &'a [T],
    ) where
        T: bytemuck::Pod,
    {
        self.commands.push(Command::UpdateBuffer {
            buffer,
            offset,
            data: bytemuck::cast_slice(data),
        })
    }

    pub fn copy_buffer(
        &mut self,
        src_buffer: &'a Buffer,
        dst_buffer: &'a Buffer,
        regions: &'a [BufferCopy],
    ) {
        self.commands.push(Command::CopyBuffer {
            src_buffer,
            dst_buffer,
            regions,
        })
    }

    /// Builds acceleration structures.
    pub fn build_acceleration_structure(
        &mut self,
        infos: &'a [AccelerationStructureBuildGeometryInfo<'a>],
    ) {
        assert!(self.capabilities.supports_compute());

        if infos.is_empty() {
            return;
        }

        for (i, info) in infos.iter().enumerate() {
            if let Some(src) = &info.src {
                for (j, info) in infos[..i].iter().enumerate() {
                    assert_ne!(
                        &info.dst, src,
                        "`infos[{}].src` and `infos[{}].dst` collision",
                        i, j,
                    );
                }
            }

            let dst = &info.dst;

            for (j, info) in infos[..i].iter().enumerate() {
                assert_ne!(
                    info.src.as_ref(),
                    Some(dst),
                    "`infos[{}].src` and `infos[{}].dst` collision",
                    j,
                    i,
                );
            }

            assert!(
                info.geometries.len() <= dst.info().geometries.len(),
                "Wrong number of geometries supplied to build: {}. Acceleration structure has: {}",
                info.geometries.len(),
                dst.info().geometries.len()
            );
        }

        self.commands
            .push(Command::BuildAccelerationStructure { infos })
    }

    pub fn trace_rays(
        &mut self,
        shader_binding_table: &'a ShaderBindingTable,
        extent: Extent3d,
    ) {
        assert!(self.capabilities.supports_compute());

        self.commands.push(Command::TraceRays {
            shader_binding_table,
            extent,
        })
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        assert!(self.capabilities.supports_compute());

        self.commands.push(Command::Dispatch { x, y, z })
    }

    /// Execution dependency without memory barrier.
    pub fn pipeline_barrier(
        &mut self,
        src: PipelineStageFlags,
        dst: PipelineStageFlags,
    ) {
        self.commands.push(Command::PipelineBarrier {
            src,
            dst,
            memory: None,
        });
    }

    pub fn memory_barrier(
        &mut self,
        src: PipelineStageFlags,
        dst: PipelineStageFlags,
        barrier: MemoryBarrier,
    ) {
        self.commands.push(Command::PipelineBarrier {
            src,
            dst,
            memory: Some(barrier),
        });
    }

    /// Writes recorded commands into `command_buffer` replacing its previous
    /// content.
    pub fn record(
        self,
        command_buffer: &mut CommandBuffer,
    ) -> Result<(), OutOfMemory> {
        command_buffer.inner.write(&self.commands)
    }
}

/// Reusable buffer of encoded commands submittable to the `Queue`.
#[derive(Debug)]
pub struct CommandBuffer {
    inner: Box<dyn CommandBufferTrait>,
}

impl CommandBuffer {
    pub fn new(inner: Box<dyn CommandBufferTrait>) -> Self {
        CommandBuffer { inner }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        let inner: &dyn CommandBufferTrait = &*self.inner;

        if CommandBufferTrait::type_id(inner) == TypeId::of::<T>() {
            // Relying on `CommandBufferTrait::type_id`.
            // Which is part of `CommandBufferTrait` unsafe contract.
            Some(unsafe { &*(inner as *const dyn CommandBufferTrait as *const T) })
        } else {
            None
        }
    }
}

/// # Safety
///
/// `type_id` must return `TypeId::of::<Self>()`.
pub unsafe trait CommandBufferTrait: Debug + Send + Sync + 'static {
    fn type_id(&self) -> TypeId;

    /// Replace content of the buffer with `commands`.
    fn write(&mut self, commands: &[Command<'_>]) -> Result<(), OutOfMemory>;
}
