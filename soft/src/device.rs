use crate::{
    handle::{
        AccelerationStructureState, SoftAccelerationStructure, SoftBuffer,
        SoftDescriptorPool, SoftDescriptorSet, SoftRayTracingPipeline,
        SoftResource, Tracked,
    },
    inspect::{BoundDescriptor, ResourceKind, SoftEvent},
    SoftConfig,
};
use lumen_gpu::{
    align_up, AccelerationStructure, AccelerationStructureInfo,
    AccelerationStructureLevel, AccelerationStructureMemoryRequirementsType,
    BindMemoryError, Buffer, BufferInfo, ComputePipeline, ComputePipelineInfo,
    CreateDescriptorSetError, CreatePipelineError, CreateShaderModuleError,
    DescriptorPool, DescriptorPoolInfo, DescriptorSet, DescriptorSetInfo,
    DescriptorSetLayout, DescriptorSetLayoutInfo, Descriptors, DeviceAddress,
    DeviceLost, DeviceProperties, DeviceTrait, MappingError,
    MemoryRequirements, OutOfMemory, PipelineLayout, PipelineLayoutInfo,
    RayTracingPipeline, RayTracingPipelineInfo, ShaderModule, ShaderModuleInfo,
    WriteDescriptorSet,
};
use parking_lot::Mutex;
use slab::Slab;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Alignment mask of every simulated allocation.
pub(crate) const ALIGN_MASK: u64 = 255;

/// First simulated device address.
const ADDRESS_BASE: u64 = 0x1_0000_0000;

#[derive(Debug)]
struct BufferEntry {
    size: u64,
    memory: Weak<Mutex<Vec<u8>>>,
}

#[derive(Debug)]
struct AccelerationStructureEntry {
    level: AccelerationStructureLevel,
    state: Weak<Mutex<AccelerationStructureState>>,
}

/// Buffer memory found by device address.
pub(crate) struct ResolvedAddress {
    pub base: u64,
    pub size: u64,
    pub memory: Arc<Mutex<Vec<u8>>>,
}

impl ResolvedAddress {
    /// Bytes available from `address` to the end of the buffer.
    pub fn available(&self, address: DeviceAddress) -> u64 {
        self.base + self.size - address.get()
    }
}

pub(crate) struct SoftDevice {
    config: SoftConfig,
    next_address: AtomicU64,
    next_pipeline_serial: AtomicU32,
    allocated: AtomicU64,
    objects: Mutex<Slab<ResourceKind>>,
    buffers: Mutex<BTreeMap<u64, BufferEntry>>,
    acceleration_structures: Mutex<HashMap<u64, AccelerationStructureEntry>>,
    pending: Mutex<Vec<Arc<AtomicBool>>>,
    events: Mutex<Vec<SoftEvent>>,
}

impl Debug for SoftDevice {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SoftDevice")
            .field("config", &self.config)
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .finish()
    }
}

impl SoftDevice {
    pub fn new(config: SoftConfig) -> Self {
        SoftDevice {
            config,
            next_address: AtomicU64::new(ADDRESS_BASE),
            next_pipeline_serial: AtomicU32::new(1),
            allocated: AtomicU64::new(0),
            // Numbers here are hints so no strong reasoning is required.
            objects: Mutex::new(Slab::with_capacity(256)),
            buffers: Mutex::new(BTreeMap::new()),
            acceleration_structures: Mutex::new(HashMap::with_capacity(64)),
            pending: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::with_capacity(1024)),
        }
    }

    pub fn config(&self) -> &SoftConfig {
        &self.config
    }

    pub fn event(&self, event: SoftEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<SoftEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<SoftEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.objects
            .lock()
            .iter()
            .filter(|(_, k)| **k == kind)
            .count()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    fn track(
        self: &Arc<Self>,
        kind: ResourceKind,
        bytes: u64,
    ) -> Result<Tracked, OutOfMemory> {
        let budget = self.config.memory_budget;
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |allocated| {
                allocated.checked_add(bytes).filter(|&total| total <= budget)
            })
            .map_err(|_| {
                tracing::error!("{:?} of {} bytes exceeds memory budget", kind, bytes);
                OutOfMemory
            })?;

        let index = self.objects.lock().insert(kind);

        Ok(Tracked {
            kind,
            bytes,
            owner: Arc::downgrade(self),
            index,
        })
    }

    pub fn untrack(&self, kind: ResourceKind, index: usize, bytes: u64) {
        let mut objects = self.objects.lock();
        debug_assert_eq!(objects.get(index), Some(&kind));
        if objects.contains(index) {
            objects.remove(index);
        }
        drop(objects);

        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn allocate_address(&self, size: u64) -> Result<DeviceAddress, OutOfMemory> {
        let span = align_up(ALIGN_MASK, size.max(1)).ok_or(OutOfMemory)?;
        let address = self.next_address.fetch_add(span, Ordering::Relaxed);

        address
            .checked_add(span)
            .and_then(|_| DeviceAddress::new(address))
            .ok_or(OutOfMemory)
    }

    pub fn forget_buffer(&self, address: DeviceAddress) {
        self.buffers.lock().remove(&address.get());
    }

    pub fn forget_acceleration_structure(&self, address: DeviceAddress) {
        self.acceleration_structures.lock().remove(&address.get());
    }

    /// Finds live buffer containing `address`.
    pub fn resolve(&self, address: DeviceAddress) -> Option<ResolvedAddress> {
        let buffers = self.buffers.lock();
        let (&base, entry) = buffers.range(..=address.get()).next_back()?;

        if address.get() - base >= entry.size {
            return None;
        }

        Some(ResolvedAddress {
            base,
            size: entry.size,
            memory: entry.memory.upgrade()?,
        })
    }

    /// Finds live acceleration structure by the reference stored in
    /// instance records.
    pub fn acceleration_structure_by_reference(
        &self,
        reference: u64,
    ) -> Option<(
        AccelerationStructureLevel,
        Arc<Mutex<AccelerationStructureState>>,
    )> {
        let structures = self.acceleration_structures.lock();
        let entry = structures.get(&reference)?;
        Some((entry.level, entry.state.upgrade()?))
    }

    /// Synthetic requirements scaled by primitive count.
    pub fn requirements(
        info: &AccelerationStructureInfo,
        ty: AccelerationStructureMemoryRequirementsType,
    ) -> MemoryRequirements {
        let primitives = info.max_primitive_count();

        let size = match ty {
            AccelerationStructureMemoryRequirementsType::Object => {
                256 + 64 * primitives
            }
            AccelerationStructureMemoryRequirementsType::BuildScratch => {
                128 + 32 * primitives
            }
            AccelerationStructureMemoryRequirementsType::UpdateScratch => {
                64 + 48 * primitives
            }
        };

        MemoryRequirements {
            size,
            align: ALIGN_MASK,
        }
    }

    /// Opaque handle of shader group `group` in pipeline with `serial`.
    pub fn group_handle(&self, serial: u32, group: u32) -> Vec<u8> {
        let mut handle = vec![0; self.config.shader_group_handle_size as usize];
        handle[..4].copy_from_slice(&serial.to_le_bytes());
        handle[4..8].copy_from_slice(&group.to_le_bytes());
        handle
    }

    pub fn mark_pending(&self, in_flight: Arc<AtomicBool>) {
        in_flight.store(true, Ordering::Release);
        self.pending.lock().push(in_flight);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn complete_pending(&self) {
        for in_flight in self.pending.lock().drain(..) {
            in_flight.store(false, Ordering::Release);
        }
        self.event(SoftEvent::WaitIdle);
    }

    fn host_access<'a>(
        &self,
        buffer: &'a Buffer,
        offset: u64,
        size: u64,
    ) -> Result<&'a SoftBuffer, MappingError> {
        let info = buffer.info();

        if !info.memory.host_visible() {
            return Err(MappingError::NonHostVisible);
        }

        if !info.contains(offset, size) {
            return Err(MappingError::OutOfBounds {
                offset,
                size,
                buffer_size: info.size,
            });
        }

        let soft = buffer.soft_ref(self);

        if self.has_pending() {
            tracing::warn!(
                "Host accesses buffer {:?} while device work is pending",
                soft.address
            );
            self.event(SoftEvent::HostAccessWhilePending {
                buffer: soft.address,
            });
        }

        Ok(soft)
    }

    fn create_buffer_with(
        self: Arc<Self>,
        info: BufferInfo,
        memory: Vec<u8>,
    ) -> Result<Buffer, OutOfMemory> {
        let tracked = self.track(ResourceKind::Buffer, info.size)?;
        let address = self.allocate_address(info.size)?;
        let memory = Arc::new(Mutex::new(memory));

        self.buffers.lock().insert(
            address.get(),
            BufferEntry {
                size: info.size,
                memory: Arc::downgrade(&memory),
            },
        );

        tracing::trace!("Buffer {:?} created at {:?}", info, address);

        Ok(Buffer::make(
            SoftBuffer {
                tracked,
                address,
                memory,
            },
            info,
        ))
    }
}

impl DeviceTrait for SoftDevice {
    fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            shader_group_handle_size: self.config.shader_group_handle_size,
            max_recursion_depth: self.config.max_recursion_depth,
        }
    }

    fn create_buffer(
        self: Arc<Self>,
        info: BufferInfo,
    ) -> Result<Buffer, OutOfMemory> {
        let size = usize::try_from(info.size).map_err(|_| OutOfMemory)?;
        self.create_buffer_with(info, vec![0; size])
    }

    fn create_buffer_static(
        self: Arc<Self>,
        info: BufferInfo,
        data: &[u8],
    ) -> Result<Buffer, OutOfMemory> {
        self.create_buffer_with(info, data.to_vec())
    }

    fn get_buffer_device_address(&self, buffer: &Buffer) -> Option<DeviceAddress> {
        Some(buffer.soft_ref(self).address)
    }

    fn write_memory(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), MappingError> {
        let soft = self.host_access(buffer, offset, data.len() as u64)?;
        let offset = offset as usize;
        soft.memory.lock()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), MappingError> {
        let soft = self.host_access(buffer, offset, data.len() as u64)?;
        let offset = offset as usize;
        data.copy_from_slice(&soft.memory.lock()[offset..offset + data.len()]);
        Ok(())
    }

    fn create_acceleration_structure(
        self: Arc<Self>,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory> {
        let tracked = self.track(ResourceKind::AccelerationStructure, 0)?;
        let address = self.allocate_address(0)?;
        let state = Arc::new(Mutex::new(AccelerationStructureState::default()));

        self.acceleration_structures.lock().insert(
            address.get(),
            AccelerationStructureEntry {
                level: info.level,
                state: Arc::downgrade(&state),
            },
        );

        tracing::trace!("{:?} acceleration structure created", info.level);

        Ok(AccelerationStructure::make(
            SoftAccelerationStructure {
                tracked,
                address,
                state,
            },
            info,
        ))
    }

    fn get_acceleration_structure_memory_requirements(
        &self,
        acceleration_structure: &AccelerationStructure,
        ty: AccelerationStructureMemoryRequirementsType,
    ) -> MemoryRequirements {
        acceleration_structure.soft_ref(self);
        Self::requirements(acceleration_structure.info(), ty)
    }

    fn bind_acceleration_structure_memory(
        &self,
        acceleration_structure: &AccelerationStructure,
        buffer: &Buffer,
        offset: u64,
    ) -> Result<(), BindMemoryError> {
        let soft = acceleration_structure.soft_ref(self);
        buffer.soft_ref(self);

        let required = Self::requirements(
            acceleration_structure.info(),
            AccelerationStructureMemoryRequirementsType::Object,
        )
        .size;
        let available = buffer.info().size.saturating_sub(offset);

        if available < required || offset & ALIGN_MASK != 0 {
            return Err(BindMemoryError::RegionTooSmall {
                required,
                available,
            });
        }

        let mut state = soft.state.lock();
        if state.memory.is_some() {
            return Err(BindMemoryError::AlreadyBound);
        }
        state.memory = Some((buffer.clone(), offset));

        Ok(())
    }

    fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> Option<DeviceAddress> {
        let soft = acceleration_structure.soft_ref(self);
        let bound = soft.state.lock().memory.is_some();
        bound.then(|| soft.address)
    }

    fn create_descriptor_set_layout(
        self: Arc<Self>,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory> {
        for (i, binding) in info.bindings.iter().enumerate() {
            assert!(
                info.bindings[..i].iter().all(|b| b.binding != binding.binding),
                "Binding {} declared twice",
                binding.binding
            );
        }

        let tracked = self.track(ResourceKind::DescriptorSetLayout, 0)?;
        Ok(DescriptorSetLayout::make(tracked, info))
    }

    fn create_descriptor_pool(
        self: Arc<Self>,
        info: DescriptorPoolInfo,
    ) -> Result<DescriptorPool, OutOfMemory> {
        let tracked = self.track(ResourceKind::DescriptorPool, 0)?;

        Ok(DescriptorPool::make(
            SoftDescriptorPool {
                tracked,
                allocated: Arc::new(AtomicU32::new(0)),
            },
            info,
        ))
    }

    fn create_descriptor_set(
        self: Arc<Self>,
        info: DescriptorSetInfo,
    ) -> Result<DescriptorSet, CreateDescriptorSetError> {
        let pool = info.pool.soft_ref(&self);
        let pool_info = info.pool.info();
        let layout = info.layout.info();

        let reserve = pool.allocated.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |allocated| {
                let sets = allocated + 1;
                let fits = sets <= pool_info.max_sets
                    && layout.bindings.iter().all(|binding| {
                        let needed: u32 = layout
                            .bindings
                            .iter()
                            .filter(|b| b.ty == binding.ty)
                            .map(|b| b.count)
                            .sum();
                        needed * sets <= pool_info.capacity(binding.ty)
                    });
                fits.then(|| sets)
            },
        );

        if reserve.is_err() {
            return Err(CreateDescriptorSetError::OutOfPoolMemory);
        }

        let tracked = match self.track(ResourceKind::DescriptorSet, 0) {
            Ok(tracked) => tracked,
            Err(err) => {
                pool.allocated.fetch_sub(1, Ordering::AcqRel);
                return Err(err.into());
            }
        };

        Ok(DescriptorSet::make(
            SoftDescriptorSet {
                tracked,
                writes: Mutex::new(BTreeMap::new()),
                pool: info.pool.clone(),
                layout: info.layout.clone(),
            },
            info,
        ))
    }

    fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet<'_>]) {
        for write in writes {
            let set = write.set.soft_ref(self);
            let mut bound = set.writes.lock();

            let descriptors: Vec<BoundDescriptor> = match write.descriptors {
                Descriptors::AccelerationStructure(structures) => structures
                    .iter()
                    .map(|s| {
                        s.soft_ref(self);
                        BoundDescriptor::AccelerationStructure(s.clone())
                    })
                    .collect(),
                _ => write
                    .descriptors
                    .buffers()
                    .unwrap_or(&[])
                    .iter()
                    .map(|(buffer, offset, size)| {
                        buffer.soft_ref(self);
                        BoundDescriptor::Buffer {
                            buffer: buffer.clone(),
                            offset: *offset,
                            size: *size,
                        }
                    })
                    .collect(),
            };

            for (element, descriptor) in (write.element..).zip(descriptors) {
                bound.insert((write.binding, element), descriptor);
            }
        }
    }

    fn create_shader_module(
        self: Arc<Self>,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError> {
        let tracked = self.track(ResourceKind::ShaderModule, 0)?;
        Ok(ShaderModule::make(tracked, info))
    }

    fn create_pipeline_layout(
        self: Arc<Self>,
        info: PipelineLayoutInfo,
    ) -> Result<PipelineLayout, OutOfMemory> {
        for set in &info.sets {
            set.soft_ref(&self);
        }

        let tracked = self.track(ResourceKind::PipelineLayout, 0)?;
        Ok(PipelineLayout::make(tracked, info))
    }

    fn create_ray_tracing_pipeline(
        self: Arc<Self>,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, CreatePipelineError> {
        info.layout.soft_ref(&self);
        for shader in &info.shaders {
            shader.module.soft_ref(&self);
        }

        let tracked = self.track(ResourceKind::RayTracingPipeline, 0)?;
        let serial = self.next_pipeline_serial.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            "Ray-tracing pipeline {} created with {} groups",
            serial,
            info.groups.len()
        );

        Ok(RayTracingPipeline::make(
            SoftRayTracingPipeline { tracked, serial },
            info.desc(),
        ))
    }

    fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, OutOfMemory> {
        let serial = pipeline.soft_ref(self).serial;

        Ok((first_group..first_group + group_count)
            .flat_map(|group| self.group_handle(serial, group))
            .collect())
    }

    fn create_compute_pipeline(
        self: Arc<Self>,
        info: ComputePipelineInfo,
    ) -> Result<ComputePipeline, CreatePipelineError> {
        info.layout.soft_ref(&self);
        info.shader.module.soft_ref(&self);

        let tracked = self.track(ResourceKind::ComputePipeline, 0)?;
        Ok(ComputePipeline::make(tracked, info.desc()))
    }

    fn wait_idle(&self) -> Result<(), DeviceLost> {
        self.complete_pending();
        Ok(())
    }
}
