use crate::{
    device::SoftDevice,
    inspect::{BoundDescriptor, ResourceKind, SoftEvent},
};
use lumen_gpu::{
    AccelerationStructure, AccelerationStructureInstance, Buffer,
    ComputePipeline, DescriptorPool, DescriptorSet, DescriptorSetLayout,
    DeviceAddress, Handle, PipelineLayout, RayTracingPipeline, ResourceTrait,
    ShaderModule, Specific,
};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::{atomic::AtomicU32, Arc, Weak},
};

pub(crate) trait SoftResource: ResourceTrait {
    type Soft: Specific<Self> + Owned;

    fn make(specific: Self::Soft, info: Self::Info) -> Self {
        Self::from_handle(Handle::new(specific, info))
    }

    fn soft_ref(&self, owner: &SoftDevice) -> &Self::Soft {
        let soft = self
            .handle()
            .specific_ref::<Self::Soft>()
            .expect("Resource created by another backend");

        assert!(soft.is_owned_by(owner), "Resource created by another device");
        soft
    }
}

pub(crate) trait Owned {
    fn tracked(&self) -> &Tracked;

    fn is_owned_by(&self, owner: &SoftDevice) -> bool {
        std::ptr::eq(self.tracked().owner.as_ptr(), owner)
    }
}

/// Registration of a live resource on its device.
/// Dropping it unregisters the resource and returns its memory to the budget.
#[derive(Debug)]
pub(crate) struct Tracked {
    pub kind: ResourceKind,
    pub bytes: u64,
    pub owner: Weak<SoftDevice>,
    pub index: usize,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(device) = self.owner.upgrade() {
            device.untrack(self.kind, self.index, self.bytes);
            device.event(SoftEvent::Release { kind: self.kind });
            tracing::trace!("{:?} released", self.kind);
        }
    }
}

impl Owned for Tracked {
    fn tracked(&self) -> &Tracked {
        self
    }
}

#[derive(Debug)]
pub(crate) struct SoftBuffer {
    pub tracked: Tracked,
    pub address: DeviceAddress,
    pub memory: Arc<Mutex<Vec<u8>>>,
}

impl Drop for SoftBuffer {
    fn drop(&mut self) {
        if let Some(device) = self.tracked.owner.upgrade() {
            device.forget_buffer(self.address);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AccelerationStructureState {
    /// Backing buffer and offset.
    pub memory: Option<(Buffer, u64)>,
    pub built: bool,
    pub primitive_count: u32,
    pub instances: Vec<AccelerationStructureInstance>,
}

#[derive(Debug)]
pub(crate) struct SoftAccelerationStructure {
    pub tracked: Tracked,
    pub address: DeviceAddress,
    pub state: Arc<Mutex<AccelerationStructureState>>,
}

impl Drop for SoftAccelerationStructure {
    fn drop(&mut self) {
        if let Some(device) = self.tracked.owner.upgrade() {
            device.forget_acceleration_structure(self.address);
        }
    }
}

#[derive(Debug)]
pub(crate) struct SoftDescriptorPool {
    pub tracked: Tracked,
    pub allocated: Arc<AtomicU32>,
}

/// Fields drop in declaration order: the set is released before the pool
/// and layout it keeps alive.
#[derive(Debug)]
pub(crate) struct SoftDescriptorSet {
    pub tracked: Tracked,
    pub writes: Mutex<BTreeMap<(u32, u32), BoundDescriptor>>,
    pub pool: DescriptorPool,
    pub layout: DescriptorSetLayout,
}

impl Drop for SoftDescriptorSet {
    fn drop(&mut self) {
        if let Some(pool) =
            self.pool.handle().specific_ref::<SoftDescriptorPool>()
        {
            pool.allocated
                .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        }
    }
}

#[derive(Debug)]
pub(crate) struct SoftRayTracingPipeline {
    pub tracked: Tracked,
    pub serial: u32,
}

macro_rules! owned {
    ($($soft:ty),* $(,)?) => {$(
        impl Owned for $soft {
            fn tracked(&self) -> &Tracked {
                &self.tracked
            }
        }
    )*};
}

owned!(
    SoftBuffer,
    SoftAccelerationStructure,
    SoftDescriptorPool,
    SoftDescriptorSet,
    SoftRayTracingPipeline,
);

macro_rules! soft_resource {
    ($($resource:ty => $soft:ty),* $(,)?) => {$(
        impl Specific<$resource> for $soft {}

        impl SoftResource for $resource {
            type Soft = $soft;
        }
    )*};
}

soft_resource!(
    Buffer => SoftBuffer,
    AccelerationStructure => SoftAccelerationStructure,
    DescriptorSetLayout => Tracked,
    DescriptorPool => SoftDescriptorPool,
    DescriptorSet => SoftDescriptorSet,
    ShaderModule => Tracked,
    PipelineLayout => Tracked,
    RayTracingPipeline => SoftRayTracingPipeline,
    ComputePipeline => Tracked,
);
