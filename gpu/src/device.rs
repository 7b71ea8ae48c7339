use crate::{
    accel::{
        AccelerationStructure, AccelerationStructureInfo,
        AccelerationStructureMemoryRequirementsType, MemoryRequirements,
    },
    arith_ne, assert_error, assert_object,
    buffer::{Buffer, BufferInfo, BufferUsage},
    descriptor::{
        DescriptorPool, DescriptorPoolInfo, DescriptorSet, DescriptorSetInfo,
        DescriptorSetLayout, DescriptorSetLayoutInfo, InvalidDescriptorWrite,
        WriteDescriptorSet,
    },
    pipeline::{
        ComputePipeline, ComputePipelineInfo, InvalidShaderGroup,
        PipelineLayout, PipelineLayoutInfo, RayTracingPipeline,
        RayTracingPipelineInfo,
    },
    queue::DeviceLost,
    shader::{
        CreateShaderModuleError, ShaderModule, ShaderModuleInfo, ShaderStage,
    },
    DeviceAddress, MappingError, OutOfMemory,
};
use bytemuck::{cast_slice, cast_slice_mut, Pod};
use std::{
    fmt::{self, Debug},
    mem::size_of_val,
    sync::Arc,
};

/// Limits of ray-tracing capable device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceProperties {
    /// Size in bytes of a shader group handle.
    pub shader_group_handle_size: u32,

    /// Maximum recursion depth for ray-tracing pipelines.
    pub max_recursion_depth: u32,
}

/// Possible error returned by `Device::bind_acceleration_structure_memory`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BindMemoryError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("Acceleration structure memory is already bound")]
    AlreadyBound,

    #[error("Buffer must have `RAY_TRACING` usage")]
    MissingUsage,

    #[error("Acceleration structure requires {required} bytes, {available} available")]
    RegionTooSmall { required: u64, available: u64 },
}

/// Possible error returned by `Device::create_descriptor_set`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CreateDescriptorSetError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("Descriptor pool is exhausted")]
    OutOfPoolMemory,
}

/// Possible error returned by `Device::create_ray_tracing_pipeline`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CreatePipelineError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("{source}")]
    InvalidShaderGroup {
        #[from]
        source: InvalidShaderGroup,
    },

    #[error("Recursion depth {requested} exceeds device limit {limit}")]
    RecursionTooDeep { requested: u32, limit: u32 },
}

/// Opaque value that represents graphics API device.
/// It is used to manage (create, destroy, check state) most of the device
/// resources.
#[derive(Clone)]
pub struct Device {
    inner: Arc<dyn DeviceTrait>,
}

impl Debug for Device {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Device")
            .field("inner", &&*self.inner)
            .finish()
    }
}

impl Device {
    pub fn new(inner: Arc<impl DeviceTrait>) -> Self {
        Device { inner }
    }

    pub fn properties(&self) -> DeviceProperties {
        self.inner.properties()
    }

    /// Creates buffer with uninitialized content.
    #[tracing::instrument]
    pub fn create_buffer(&self, info: BufferInfo) -> Result<Buffer, OutOfMemory> {
        assert!(info.is_valid(), "Invalid buffer info {:?}", info);
        self.inner.clone().create_buffer(info)
    }

    /// Creates host visible buffer with preinitialized content from `data`.
    ///
    /// # Panics
    ///
    /// Function will panic if creating buffer size does not equal data size.
    /// E.g. if `info.size != std::mem::size_of(data)`.
    #[tracing::instrument(skip(data))]
    pub fn create_buffer_static<T>(
        &self,
        info: BufferInfo,
        data: &[T],
    ) -> Result<Buffer, OutOfMemory>
    where
        T: Pod,
    {
        assert!(info.is_valid(), "Invalid buffer info {:?}", info);
        assert!(info.memory.host_visible());
        if arith_ne(info.size, size_of_val(data)) {
            panic!(
                "Buffer size {} does not match data size {}",
                info.size,
                size_of_val(data)
            );
        }

        self.inner
            .clone()
            .create_buffer_static(info, cast_slice(data))
    }

    /// Returns buffers device address.
    /// `None` if buffer was created without `SHADER_DEVICE_ADDRESS` usage.
    #[tracing::instrument]
    pub fn get_buffer_device_address(
        &self,
        buffer: &Buffer,
    ) -> Option<DeviceAddress> {
        if buffer
            .info()
            .usage
            .contains(BufferUsage::SHADER_DEVICE_ADDRESS)
        {
            self.inner.get_buffer_device_address(buffer)
        } else {
            None
        }
    }

    /// Copies `data` into host visible buffer memory at `offset`.
    #[tracing::instrument(skip(data))]
    pub fn write_memory<T>(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[T],
    ) -> Result<(), MappingError>
    where
        T: Pod,
    {
        self.inner.write_memory(buffer, offset, cast_slice(data))
    }

    /// Copies host visible buffer memory at `offset` into `data`.
    #[tracing::instrument(skip(data))]
    pub fn read_memory<T>(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &mut [T],
    ) -> Result<(), MappingError>
    where
        T: Pod,
    {
        self.inner.read_memory(buffer, offset, cast_slice_mut(data))
    }

    /// Creates acceleration structure without memory.
    #[tracing::instrument]
    pub fn create_acceleration_structure(
        &self,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory> {
        assert!(info.is_valid(), "Invalid acceleration structure info");
        self.inner.clone().create_acceleration_structure(info)
    }

    #[tracing::instrument]
    pub fn get_acceleration_structure_memory_requirements(
        &self,
        acceleration_structure: &AccelerationStructure,
        ty: AccelerationStructureMemoryRequirementsType,
    ) -> MemoryRequirements {
        self.inner
            .get_acceleration_structure_memory_requirements(
                acceleration_structure,
                ty,
            )
    }

    /// Binds region of `buffer` starting at `offset` as storage of the
    /// acceleration structure.
    #[tracing::instrument]
    pub fn bind_acceleration_structure_memory(
        &self,
        acceleration_structure: &AccelerationStructure,
        buffer: &Buffer,
        offset: u64,
    ) -> Result<(), BindMemoryError> {
        if !buffer.info().usage.contains(BufferUsage::RAY_TRACING) {
            return Err(BindMemoryError::MissingUsage);
        }

        self.inner.bind_acceleration_structure_memory(
            acceleration_structure,
            buffer,
            offset,
        )
    }

    /// Returns opaque handle of acceleration structure to be referenced from
    /// instance records. `None` until memory is bound.
    #[tracing::instrument]
    pub fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> Option<DeviceAddress> {
        self.inner
            .get_acceleration_structure_device_address(acceleration_structure)
    }

    #[tracing::instrument]
    pub fn create_descriptor_set_layout(
        &self,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory> {
        self.inner.clone().create_descriptor_set_layout(info)
    }

    #[tracing::instrument]
    pub fn create_descriptor_pool(
        &self,
        info: DescriptorPoolInfo,
    ) -> Result<DescriptorPool, OutOfMemory> {
        self.inner.clone().create_descriptor_pool(info)
    }

    #[tracing::instrument]
    pub fn create_descriptor_set(
        &self,
        info: DescriptorSetInfo,
    ) -> Result<DescriptorSet, CreateDescriptorSetError> {
        self.inner.clone().create_descriptor_set(info)
    }

    #[tracing::instrument]
    pub fn update_descriptor_sets(
        &self,
        writes: &[WriteDescriptorSet<'_>],
    ) -> Result<(), InvalidDescriptorWrite> {
        for write in writes {
            write.validate()?;
        }

        self.inner.update_descriptor_sets(writes);
        Ok(())
    }

    #[tracing::instrument]
    pub fn create_shader_module(
        &self,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError> {
        info.validate()?;
        self.inner.clone().create_shader_module(info)
    }

    #[tracing::instrument]
    pub fn create_pipeline_layout(
        &self,
        info: PipelineLayoutInfo,
    ) -> Result<PipelineLayout, OutOfMemory> {
        self.inner.clone().create_pipeline_layout(info)
    }

    #[tracing::instrument]
    pub fn create_ray_tracing_pipeline(
        &self,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, CreatePipelineError> {
        info.validate()?;

        let limit = self.inner.properties().max_recursion_depth;
        if info.max_recursion_depth > limit {
            return Err(CreatePipelineError::RecursionTooDeep {
                requested: info.max_recursion_depth,
                limit,
            });
        }

        self.inner.clone().create_ray_tracing_pipeline(info)
    }

    /// Returns `group_count` opaque shader group handles starting with
    /// `first_group`, packed tightly.
    #[tracing::instrument]
    pub fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, OutOfMemory> {
        assert!(
            first_group as usize + group_count as usize
                <= pipeline.info().groups.len(),
            "Pipeline has only {} groups",
            pipeline.info().groups.len()
        );

        self.inner.get_ray_tracing_shader_group_handles(
            pipeline,
            first_group,
            group_count,
        )
    }

    #[tracing::instrument]
    pub fn create_compute_pipeline(
        &self,
        info: ComputePipelineInfo,
    ) -> Result<ComputePipeline, CreatePipelineError> {
        assert_eq!(info.shader.stage, ShaderStage::Compute);
        self.inner.clone().create_compute_pipeline(info)
    }

    /// Blocks until all queues of the device are idle.
    #[tracing::instrument]
    pub fn wait_idle(&self) -> Result<(), DeviceLost> {
        self.inner.wait_idle()
    }
}

pub trait DeviceTrait: Debug + Send + Sync + 'static {
    fn properties(&self) -> DeviceProperties;

    fn create_buffer(
        self: Arc<Self>,
        info: BufferInfo,
    ) -> Result<Buffer, OutOfMemory>;

    fn create_buffer_static(
        self: Arc<Self>,
        info: BufferInfo,
        data: &[u8],
    ) -> Result<Buffer, OutOfMemory>;

    fn get_buffer_device_address(&self, buffer: &Buffer) -> Option<DeviceAddress>;

    fn write_memory(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), MappingError>;

    fn read_memory(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), MappingError>;

    fn create_acceleration_structure(
        self: Arc<Self>,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory>;

    fn get_acceleration_structure_memory_requirements(
        &self,
        acceleration_structure: &AccelerationStructure,
        ty: AccelerationStructureMemoryRequirementsType,
    ) -> MemoryRequirements;

    fn bind_acceleration_structure_memory(
        &self,
        acceleration_structure: &AccelerationStructure,
        buffer: &Buffer,
        offset: u64,
    ) -> Result<(), BindMemoryError>;

    fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> Option<DeviceAddress>;

    fn create_descriptor_set_layout(
        self: Arc<Self>,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory>;

    fn create_descriptor_pool(
        self: Arc<Self>,
        info: DescriptorPoolInfo,
    ) -> Result<DescriptorPool, OutOfMemory>;

    fn create_descriptor_set(
        self: Arc<Self>,
        info: DescriptorSetInfo,
    ) -> Result<DescriptorSet, CreateDescriptorSetError>;

    fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet<'_>]);

    fn create_shader_module(
        self: Arc<Self>,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError>;

    fn create_pipeline_layout(
        self: Arc<Self>,
        info: PipelineLayoutInfo,
    ) -> Result<PipelineLayout, OutOfMemory>;

    fn create_ray_tracing_pipeline(
        self: Arc<Self>,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, CreatePipelineError>;

    fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, OutOfMemory>;

    fn create_compute_pipeline(
        self: Arc<Self>,
        info: ComputePipelineInfo,
    ) -> Result<ComputePipeline, CreatePipelineError>;

    fn wait_idle(&self) -> Result<(), DeviceLost>;
}

#[allow(dead_code)]
fn check() {
    assert_object::<Device>();
    assert_error::<BindMemoryError>();
    assert_error::<CreateDescriptorSetError>();
    assert_error::<CreatePipelineError>();
    assert_error::<MappingError>();
}
