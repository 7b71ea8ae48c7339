use crate::{device::SoftDevice, handle::SoftResource as _};
use lumen_gpu::{
    AccelerationStructure, AccelerationStructureInstance,
    AccelerationStructureLevel, Buffer, DescriptorSet, DeviceAddress, Extent3d,
    MemoryBarrier, PipelineStageFlags,
};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    AccelerationStructure,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    ShaderModule,
    PipelineLayout,
    RayTracingPipeline,
    ComputePipeline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindPoint {
    RayTracing,
    Compute,
}

/// Section of a shader binding table used by a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub offset: u64,
    pub size: u64,
    pub stride: u64,
}

/// Observable effect of the soft device.
#[derive(Clone, Debug, PartialEq)]
pub enum SoftEvent {
    Submit {
        commands: usize,
    },
    FillBuffer {
        buffer: DeviceAddress,
        offset: u64,
        size: u64,
        data: u32,
    },
    UpdateBuffer {
        buffer: DeviceAddress,
        offset: u64,
        size: u64,
    },
    CopyBuffer {
        src: DeviceAddress,
        dst: DeviceAddress,
        size: u64,
    },
    BuildAccelerationStructure {
        level: AccelerationStructureLevel,
        primitive_count: u32,
        update: bool,
    },
    BindPipeline {
        bind_point: BindPoint,
    },
    BindDescriptorSets {
        bind_point: BindPoint,
        first_set: u32,
        count: u32,
    },
    TraceRays {
        extent: Extent3d,
        raygen: Region,
        miss: Option<Region>,
        hit: Option<Region>,
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
    WaitIdle,

    /// Host accessed buffer memory while submitted work was pending.
    HostAccessWhilePending {
        buffer: DeviceAddress,
    },
    Release {
        kind: ResourceKind,
    },
}

/// Descriptor written into a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundDescriptor {
    Buffer {
        buffer: Buffer,
        offset: u64,
        size: u64,
    },
    AccelerationStructure(AccelerationStructure),
}

/// Read access to soft device state for tests.
#[derive(Clone)]
pub struct Inspector {
    device: Arc<SoftDevice>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Inspector").finish()
    }
}

impl Inspector {
    pub(crate) fn new(device: Arc<SoftDevice>) -> Self {
        Inspector { device }
    }

    /// All events logged so far.
    pub fn events(&self) -> Vec<SoftEvent> {
        self.device.events()
    }

    /// Drains the event log.
    pub fn take_events(&self) -> Vec<SoftEvent> {
        self.device.take_events()
    }

    /// Number of live resources of `kind`.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.device.live(kind)
    }

    /// Bytes of buffer memory currently allocated.
    pub fn allocated(&self) -> u64 {
        self.device.allocated()
    }

    pub fn address(&self, buffer: &Buffer) -> DeviceAddress {
        buffer.soft_ref(&self.device).address
    }

    /// Copy of buffer content.
    pub fn buffer_bytes(&self, buffer: &Buffer) -> Vec<u8> {
        buffer.soft_ref(&self.device).memory.lock().clone()
    }

    pub fn is_built(&self, acceleration_structure: &AccelerationStructure) -> bool {
        acceleration_structure
            .soft_ref(&self.device)
            .state
            .lock()
            .built
    }

    /// Primitive count of the last build.
    pub fn primitive_count(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> u32 {
        acceleration_structure
            .soft_ref(&self.device)
            .state
            .lock()
            .primitive_count
    }

    /// Instance records consumed by the last top level build.
    pub fn instances(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> Vec<AccelerationStructureInstance> {
        acceleration_structure
            .soft_ref(&self.device)
            .state
            .lock()
            .instances
            .clone()
    }

    /// Buffer bound as acceleration structure storage.
    pub fn backing_buffer(
        &self,
        acceleration_structure: &AccelerationStructure,
    ) -> Option<(Buffer, u64)> {
        acceleration_structure
            .soft_ref(&self.device)
            .state
            .lock()
            .memory
            .clone()
    }

    /// Descriptor written at `binding`, element 0.
    pub fn descriptor(
        &self,
        set: &DescriptorSet,
        binding: u32,
    ) -> Option<BoundDescriptor> {
        set.soft_ref(&self.device)
            .writes
            .lock()
            .get(&(binding, 0))
            .cloned()
    }

    /// Bindings with at least one written descriptor.
    pub fn written_bindings(&self, set: &DescriptorSet) -> Vec<u32> {
        let mut bindings: Vec<u32> = set
            .soft_ref(&self.device)
            .writes
            .lock()
            .keys()
            .map(|&(binding, _)| binding)
            .collect();
        bindings.dedup();
        bindings
    }
}
