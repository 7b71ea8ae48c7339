use crate::{
    device::SoftDevice,
    handle::SoftResource as _,
    inspect::{BindPoint, BoundDescriptor, Region, SoftEvent},
};
use lumen_gpu::{
    AccelerationStructure, AccelerationStructureFlags,
    AccelerationStructureGeometry, AccelerationStructureInstance,
    AccelerationStructureLevel, AccelerationStructureMemoryRequirementsType,
    Buffer, BufferCopy, Command, CommandBufferTrait, ComputePipeline,
    DescriptorBindingFlags, DescriptorSet, DeviceAddress, Extent3d,
    MemoryBarrier, OutOfMemory, PipelineLayout, PipelineStageFlags,
    RayTracingPipeline, RayTracingShaderGroupInfo, ShaderBindingTable,
    StridedBufferRegion,
};
use smallvec::SmallVec;
use std::{
    any::TypeId,
    mem::size_of,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Command with owned references to the resources it uses.
#[derive(Debug)]
pub(crate) enum Op {
    BindRayTracingPipeline {
        pipeline: RayTracingPipeline,
    },
    BindComputePipeline {
        pipeline: ComputePipeline,
    },
    BindDescriptorSets {
        bind_point: BindPoint,
        layout: PipelineLayout,
        first_set: u32,
        sets: SmallVec<[DescriptorSet; 4]>,
    },
    FillBuffer {
        buffer: Buffer,
        offset: u64,
        size: u64,
        data: u32,
    },
    UpdateBuffer {
        buffer: Buffer,
        offset: u64,
        data: Box<[u8]>,
    },
    CopyBuffer {
        src_buffer: Buffer,
        dst_buffer: Buffer,
        regions: SmallVec<[BufferCopy; 4]>,
    },
    BuildAccelerationStructure {
        builds: Vec<Build>,
    },
    TraceRays {
        shader_binding_table: ShaderBindingTable,
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

#[derive(Debug)]
pub(crate) struct Build {
    src: Option<AccelerationStructure>,
    dst: AccelerationStructure,
    geometries: SmallVec<[AccelerationStructureGeometry; 4]>,
    scratch: DeviceAddress,
}

impl Op {
    fn from_command(command: &Command<'_>) -> Self {
        match *command {
            Command::BindRayTracingPipeline { pipeline } => {
                Op::BindRayTracingPipeline {
                    pipeline: pipeline.clone(),
                }
            }
            Command::BindComputePipeline { pipeline } => {
                Op::BindComputePipeline {
                    pipeline: pipeline.clone(),
                }
            }
            Command::BindRayTracingDescriptorSets {
                layout,
                first_set,
                sets,
            } => Op::BindDescriptorSets {
                bind_point: BindPoint::RayTracing,
                layout: layout.clone(),
                first_set,
                sets: sets.iter().cloned().collect(),
            },
            Command::BindComputeDescriptorSets {
                layout,
                first_set,
                sets,
            } => Op::BindDescriptorSets {
                bind_point: BindPoint::Compute,
                layout: layout.clone(),
                first_set,
                sets: sets.iter().cloned().collect(),
            },
            Command::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => Op::FillBuffer {
                buffer: buffer.clone(),
                offset,
                size,
                data,
            },
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => Op::UpdateBuffer {
                buffer: buffer.clone(),
                offset,
                data: data.into(),
            },
            Command::CopyBuffer {
                src_buffer,
                dst_buffer,
                regions,
            } => Op::CopyBuffer {
                src_buffer: src_buffer.clone(),
                dst_buffer: dst_buffer.clone(),
                regions: regions.iter().copied().collect(),
            },
            Command::BuildAccelerationStructure { infos } => {
                Op::BuildAccelerationStructure {
                    builds: infos
                        .iter()
                        .map(|info| Build {
                            src: info.src.clone(),
                            dst: info.dst.clone(),
                            geometries: info.geometries.iter().copied().collect(),
                            scratch: info.scratch,
                        })
                        .collect(),
                }
            }
            Command::TraceRays {
                shader_binding_table,
                extent,
            } => Op::TraceRays {
                shader_binding_table: shader_binding_table.clone(),
                extent,
            },
            Command::Dispatch { x, y, z } => Op::Dispatch { x, y, z },
            Command::PipelineBarrier { src, dst, memory } => {
                Op::PipelineBarrier { src, dst, memory }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct SoftCommandBuffer {
    ops: Vec<Op>,
    in_flight: Arc<AtomicBool>,
}

impl SoftCommandBuffer {
    pub fn new() -> Self {
        SoftCommandBuffer {
            ops: Vec::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn in_flight(&self) -> &Arc<AtomicBool> {
        &self.in_flight
    }
}

unsafe impl CommandBufferTrait for SoftCommandBuffer {
    fn type_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    fn write(&mut self, commands: &[Command<'_>]) -> Result<(), OutOfMemory> {
        assert!(
            !self.in_flight.load(Ordering::Acquire),
            "Command buffer is rewritten while its execution is pending"
        );

        self.ops.clear();
        self.ops.try_reserve(commands.len()).map_err(|_| OutOfMemory)?;
        self.ops.extend(commands.iter().map(Op::from_command));
        Ok(())
    }
}

/// Reasons the soft device rejects a command.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Invalid {
    #[error("Range {offset}..+{size} exceeds buffer of {buffer_size} bytes")]
    BufferRange {
        offset: u64,
        size: u64,
        buffer_size: u64,
    },

    #[error("Address {address:#x} does not point into a live buffer")]
    UnresolvedAddress { address: u64 },

    #[error("{what} needs {required} bytes at {address:#x}, {available} available")]
    DataTooSmall {
        what: &'static str,
        address: u64,
        required: u64,
        available: u64,
    },

    #[error("Acceleration structure has no memory bound")]
    MemoryNotBound,

    #[error("Geometry {index} does not fit acceleration structure info")]
    GeometryMismatch { index: usize },

    #[error("Source of update is not built")]
    SourceNotBuilt,

    #[error("Source of update was not created with `ALLOW_UPDATE`")]
    UpdateNotAllowed,

    #[error("Instance {index} references {reference:#x} which is not a built bottom level structure")]
    InvalidInstanceReference { index: usize, reference: u64 },

    #[error("No {0:?} pipeline bound")]
    PipelineNotBound(BindPoint),

    #[error("Set {set} layout does not match pipeline layout")]
    SetLayoutMismatch { set: u32 },

    #[error("Set {set} is not bound")]
    SetNotBound { set: u32 },

    #[error("Binding {binding} of set {set} is not fully written")]
    BindingNotWritten { set: u32, binding: u32 },

    #[error("Acceleration structure at binding {binding} of set {set} is not built")]
    AccelerationStructureNotBuilt { set: u32, binding: u32 },

    #[error("Shader binding table has no raygen region")]
    MissingRaygenRegion,

    #[error("{region} region is out of shader binding table buffer bounds")]
    RegionOutOfBounds { region: &'static str },

    #[error("{region} region stride {stride} is less than handle size {handle_size}")]
    StrideTooSmall {
        region: &'static str,
        stride: u64,
        handle_size: u64,
    },

    #[error("{region} record {record} does not hold a matching shader group handle")]
    WrongShaderGroup { region: &'static str, record: u64 },

    #[error("Trace extent {0:?} is empty")]
    EmptyExtent(Extent3d),
}

#[derive(Debug)]
struct Bound<P> {
    pipeline: Option<P>,
    sets: Vec<Option<DescriptorSet>>,
}

impl<P> Bound<P> {
    fn bind_sets(&mut self, first_set: u32, sets: &[DescriptorSet]) {
        let end = first_set as usize + sets.len();
        if self.sets.len() < end {
            self.sets.resize(end, None);
        }

        for (slot, set) in self.sets[first_set as usize..].iter_mut().zip(sets) {
            *slot = Some(set.clone());
        }
    }
}

/// Executes ops of one submission in order, validating each against the
/// device state left by previous ones.
pub(crate) struct Executor<'a> {
    device: &'a SoftDevice,
    ray_tracing: Bound<RayTracingPipeline>,
    compute: Bound<ComputePipeline>,
}

impl<'a> Executor<'a> {
    pub fn new(device: &'a SoftDevice) -> Self {
        Executor {
            device,
            ray_tracing: Bound {
                pipeline: None,
                sets: Vec::new(),
            },
            compute: Bound {
                pipeline: None,
                sets: Vec::new(),
            },
        }
    }

    /// Runs all ops. On failure returns index of the rejected op.
    pub fn run(&mut self, ops: &[Op]) -> Result<(), (usize, Invalid)> {
        for (index, op) in ops.iter().enumerate() {
            self.execute(op).map_err(|err| (index, err))?;
        }
        Ok(())
    }

    fn execute(&mut self, op: &Op) -> Result<(), Invalid> {
        match op {
            Op::BindRayTracingPipeline { pipeline } => {
                pipeline.soft_ref(self.device);
                self.ray_tracing.pipeline = Some(pipeline.clone());
                self.device.event(SoftEvent::BindPipeline {
                    bind_point: BindPoint::RayTracing,
                });
            }
            Op::BindComputePipeline { pipeline } => {
                pipeline.soft_ref(self.device);
                self.compute.pipeline = Some(pipeline.clone());
                self.device.event(SoftEvent::BindPipeline {
                    bind_point: BindPoint::Compute,
                });
            }
            Op::BindDescriptorSets {
                bind_point,
                layout,
                first_set,
                sets,
            } => {
                for (index, set) in (*first_set..).zip(sets) {
                    set.soft_ref(self.device);
                    if layout.info().sets.get(index as usize)
                        != Some(&set.info().layout)
                    {
                        return Err(Invalid::SetLayoutMismatch { set: index });
                    }
                }

                match bind_point {
                    BindPoint::RayTracing => {
                        self.ray_tracing.bind_sets(*first_set, sets)
                    }
                    BindPoint::Compute => self.compute.bind_sets(*first_set, sets),
                }

                self.device.event(SoftEvent::BindDescriptorSets {
                    bind_point: *bind_point,
                    first_set: *first_set,
                    count: sets.len() as u32,
                });
            }
            Op::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => {
                let soft = buffer.soft_ref(self.device);
                check_range(buffer, *offset, *size)?;

                let word = data.to_le_bytes();
                let start = *offset as usize;
                let mut memory = soft.memory.lock();
                for chunk in memory[start..start + *size as usize].chunks_mut(4) {
                    chunk.copy_from_slice(&word[..chunk.len()]);
                }
                drop(memory);

                self.device.event(SoftEvent::FillBuffer {
                    buffer: soft.address,
                    offset: *offset,
                    size: *size,
                    data: *data,
                });
            }
            Op::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let soft = buffer.soft_ref(self.device);
                check_range(buffer, *offset, data.len() as u64)?;

                let start = *offset as usize;
                soft.memory.lock()[start..start + data.len()]
                    .copy_from_slice(data);

                self.device.event(SoftEvent::UpdateBuffer {
                    buffer: soft.address,
                    offset: *offset,
                    size: data.len() as u64,
                });
            }
            Op::CopyBuffer {
                src_buffer,
                dst_buffer,
                regions,
            } => {
                let src = src_buffer.soft_ref(self.device);
                let dst = dst_buffer.soft_ref(self.device);

                for region in regions {
                    check_range(src_buffer, region.src_offset, region.size)?;
                    check_range(dst_buffer, region.dst_offset, region.size)?;
                }

                for region in regions {
                    let size = region.size as usize;
                    let from = region.src_offset as usize;
                    let to = region.dst_offset as usize;

                    let bytes = src.memory.lock()[from..from + size].to_vec();
                    dst.memory.lock()[to..to + size].copy_from_slice(&bytes);
                }

                self.device.event(SoftEvent::CopyBuffer {
                    src: src.address,
                    dst: dst.address,
                    size: regions.iter().map(|r| r.size).sum(),
                });
            }
            Op::BuildAccelerationStructure { builds } => {
                for build in builds {
                    self.build(build)?;
                }
            }
            Op::TraceRays {
                shader_binding_table,
                extent,
            } => self.trace_rays(shader_binding_table, *extent)?,
            Op::Dispatch { x, y, z } => {
                let pipeline = self
                    .compute
                    .pipeline
                    .as_ref()
                    .ok_or(Invalid::PipelineNotBound(BindPoint::Compute))?;

                self.check_sets(&pipeline.info().layout, &self.compute.sets)?;

                self.device.event(SoftEvent::Dispatch {
                    x: *x,
                    y: *y,
                    z: *z,
                });
            }
            Op::PipelineBarrier { src, dst, memory } => {
                self.device.event(SoftEvent::PipelineBarrier {
                    src: *src,
                    dst: *dst,
                    memory: *memory,
                });
            }
        }

        Ok(())
    }

    fn build(&self, build: &Build) -> Result<(), Invalid> {
        let dst = build.dst.soft_ref(self.device);
        let info = build.dst.info();

        if dst.state.lock().memory.is_none() {
            return Err(Invalid::MemoryNotBound);
        }

        let scratch_type = match &build.src {
            Some(src) => {
                let src_state = src.soft_ref(self.device).state.lock();
                if !src_state.built {
                    return Err(Invalid::SourceNotBuilt);
                }
                if !src
                    .info()
                    .flags
                    .contains(AccelerationStructureFlags::ALLOW_UPDATE)
                {
                    return Err(Invalid::UpdateNotAllowed);
                }
                AccelerationStructureMemoryRequirementsType::UpdateScratch
            }
            None => AccelerationStructureMemoryRequirementsType::BuildScratch,
        };

        let scratch = SoftDevice::requirements(info, scratch_type).size;
        self.check_data("Scratch", build.scratch, scratch)?;

        let mut primitive_count = 0;
        let mut instances = Vec::new();

        for (index, geometry) in build.geometries.iter().enumerate() {
            match info.geometries.get(index) {
                Some(geometry_info) if geometry.fits(geometry_info) => {}
                _ => return Err(Invalid::GeometryMismatch { index }),
            }

            primitive_count += geometry.primitive_count();

            match *geometry {
                AccelerationStructureGeometry::Triangles {
                    vertex_format,
                    vertex_data,
                    vertex_stride,
                    vertex_count,
                    first_vertex,
                    primitive_count,
                    index_data,
                    transform_data,
                    ..
                } => {
                    if vertex_count > 0 {
                        let last = u64::from(first_vertex + vertex_count - 1);
                        self.check_data(
                            "Vertex data",
                            vertex_data,
                            last * vertex_stride + vertex_format.size(),
                        )?;
                    }

                    if let Some(index_data) = index_data {
                        let index_size = u64::from(index_data.index_type().size());
                        self.check_data(
                            "Index data",
                            index_data.address(),
                            u64::from(primitive_count) * 3 * index_size,
                        )?;
                    }

                    if let Some(transform_data) = transform_data {
                        self.check_data("Transform data", transform_data, 48)?;
                    }
                }
                AccelerationStructureGeometry::AABBs {
                    data,
                    stride,
                    primitive_count,
                    ..
                } => {
                    if primitive_count > 0 {
                        self.check_data(
                            "AABB data",
                            data,
                            u64::from(primitive_count - 1) * stride + 24,
                        )?;
                    }
                }
                AccelerationStructureGeometry::Instances {
                    data,
                    primitive_count,
                    ..
                } => {
                    let instance_size = size_of::<AccelerationStructureInstance>();
                    let size = primitive_count as usize * instance_size;
                    self.check_data("Instance data", data, size as u64)?;

                    let bytes = self.read(data, size)?;
                    for chunk in bytes.chunks_exact(instance_size) {
                        let instance: AccelerationStructureInstance =
                            bytemuck::pod_read_unaligned(chunk);

                        let reference = instance.acceleration_structure_reference;
                        if !self.is_built_bottom_level(reference) {
                            return Err(Invalid::InvalidInstanceReference {
                                index: instances.len(),
                                reference,
                            });
                        }

                        instances.push(instance);
                    }
                }
            }
        }

        let mut state = dst.state.lock();
        state.built = true;
        state.primitive_count = primitive_count;
        state.instances = instances;
        drop(state);

        tracing::trace!(
            "{:?} acceleration structure built with {} primitives",
            info.level,
            primitive_count
        );

        self.device.event(SoftEvent::BuildAccelerationStructure {
            level: info.level,
            primitive_count,
            update: build.src.is_some(),
        });

        Ok(())
    }

    fn is_built_bottom_level(&self, reference: u64) -> bool {
        match self.device.acceleration_structure_by_reference(reference) {
            Some((AccelerationStructureLevel::Bottom, state)) => {
                let built = state.lock().built;
                built
            }
            _ => false,
        }
    }

    fn check_data(
        &self,
        what: &'static str,
        address: DeviceAddress,
        required: u64,
    ) -> Result<(), Invalid> {
        let resolved = self
            .device
            .resolve(address)
            .ok_or(Invalid::UnresolvedAddress {
                address: address.get(),
            })?;

        let available = resolved.available(address);
        if available < required {
            return Err(Invalid::DataTooSmall {
                what,
                address: address.get(),
                required,
                available,
            });
        }

        Ok(())
    }

    fn read(&self, address: DeviceAddress, size: usize) -> Result<Vec<u8>, Invalid> {
        let resolved = self
            .device
            .resolve(address)
            .ok_or(Invalid::UnresolvedAddress {
                address: address.get(),
            })?;

        let start = (address.get() - resolved.base) as usize;
        let memory = resolved.memory.lock();
        Ok(memory[start..start + size].to_vec())
    }

    fn check_sets(
        &self,
        layout: &PipelineLayout,
        bound: &[Option<DescriptorSet>],
    ) -> Result<(), Invalid> {
        for (index, expected) in layout.info().sets.iter().enumerate() {
            let set_index = index as u32;
            let set = bound
                .get(index)
                .and_then(Option::as_ref)
                .ok_or(Invalid::SetNotBound { set: set_index })?;

            let soft = set.soft_ref(self.device);
            if soft.layout != *expected {
                return Err(Invalid::SetLayoutMismatch { set: set_index });
            }

            let writes = soft.writes.lock();

            for binding in &expected.info().bindings {
                let partially_bound = binding
                    .flags
                    .contains(DescriptorBindingFlags::PARTIALLY_BOUND);

                for element in 0..binding.count {
                    match writes.get(&(binding.binding, element)) {
                        None if partially_bound => {}
                        None => {
                            return Err(Invalid::BindingNotWritten {
                                set: set_index,
                                binding: binding.binding,
                            })
                        }
                        Some(BoundDescriptor::AccelerationStructure(
                            acceleration_structure,
                        )) => {
                            let soft = acceleration_structure.soft_ref(self.device);
                            let built = soft.state.lock().built;
                            if !built {
                                return Err(
                                    Invalid::AccelerationStructureNotBuilt {
                                        set: set_index,
                                        binding: binding.binding,
                                    },
                                );
                            }
                        }
                        Some(BoundDescriptor::Buffer { .. }) => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn trace_rays(
        &self,
        shader_binding_table: &ShaderBindingTable,
        extent: Extent3d,
    ) -> Result<(), Invalid> {
        let pipeline = self
            .ray_tracing
            .pipeline
            .as_ref()
            .ok_or(Invalid::PipelineNotBound(BindPoint::RayTracing))?;

        self.check_sets(&pipeline.info().layout, &self.ray_tracing.sets)?;

        let raygen_region = shader_binding_table
            .raygen
            .as_ref()
            .ok_or(Invalid::MissingRaygenRegion)?;

        let raygen = self.check_region("Raygen", raygen_region, pipeline, |g| {
            matches!(g, RayTracingShaderGroupInfo::Raygen { .. })
        })?;

        let miss = shader_binding_table
            .miss
            .as_ref()
            .map(|region| {
                self.check_region("Miss", region, pipeline, |g| {
                    matches!(g, RayTracingShaderGroupInfo::Miss { .. })
                })
            })
            .transpose()?;

        let hit = shader_binding_table
            .hit
            .as_ref()
            .map(|region| {
                self.check_region("Hit", region, pipeline, |g| {
                    matches!(
                        g,
                        RayTracingShaderGroupInfo::Triangles { .. }
                            | RayTracingShaderGroupInfo::Procedural { .. }
                    )
                })
            })
            .transpose()?;

        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(Invalid::EmptyExtent(extent));
        }

        self.device.event(SoftEvent::TraceRays {
            extent,
            raygen,
            miss,
            hit,
        });

        Ok(())
    }

    /// Checks that every record of `region` starts with a handle of a group
    /// accepted by `kind`.
    fn check_region(
        &self,
        name: &'static str,
        region: &StridedBufferRegion,
        pipeline: &RayTracingPipeline,
        kind: impl Fn(&RayTracingShaderGroupInfo) -> bool,
    ) -> Result<Region, Invalid> {
        let handle_size = u64::from(self.device.config().shader_group_handle_size);

        if !region.buffer.info().contains(region.offset, region.size)
            || region.size < handle_size
        {
            return Err(Invalid::RegionOutOfBounds { region: name });
        }

        if region.stride < handle_size {
            return Err(Invalid::StrideTooSmall {
                region: name,
                stride: region.stride,
                handle_size,
            });
        }

        let serial = pipeline.soft_ref(self.device).serial;
        let groups = &pipeline.info().groups;
        let memory = region.buffer.soft_ref(self.device).memory.lock();

        let records = (region.size - handle_size) / region.stride + 1;
        for record in 0..records {
            let start = (region.offset + record * region.stride) as usize;
            let handle = &memory[start..start + handle_size as usize];

            let group = u32::from_le_bytes([handle[4], handle[5], handle[6], handle[7]]);

            let matches = groups.get(group as usize).map_or(false, &kind)
                && *handle == *self.device.group_handle(serial, group);

            if !matches {
                return Err(Invalid::WrongShaderGroup {
                    region: name,
                    record,
                });
            }
        }

        Ok(Region {
            offset: region.offset,
            size: region.size,
            stride: region.stride,
        })
    }
}

fn check_range(buffer: &Buffer, offset: u64, size: u64) -> Result<(), Invalid> {
    if buffer.info().contains(offset, size) {
        Ok(())
    } else {
        Err(Invalid::BufferRange {
            offset,
            size,
            buffer_size: buffer.info().size,
        })
    }
}
