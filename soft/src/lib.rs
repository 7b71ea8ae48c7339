//! Software implementation of `lumen-gpu`.
//!
//! Memory, descriptor and acceleration structure state is simulated on the
//! host. Every recorded command is validated against that state when it is
//! submitted: builds need bound memory and enough scratch, instance records
//! must reference built bottom level structures, trace and dispatch need a
//! bound pipeline with fully written descriptor sets. Shaders are never
//! executed, their invocations are logged as [`SoftEvent`]s instead.

mod command;
mod device;
mod handle;
mod inspect;
mod queue;

#[cfg(test)]
mod tests;

pub use self::inspect::{
    BindPoint, BoundDescriptor, Inspector, Region, ResourceKind, SoftEvent,
};

use self::{device::SoftDevice, queue::SoftQueue};
use lumen_gpu::{Device, Queue, QueueCapabilityFlags, QueueId};
use std::sync::Arc;

/// Limits of the simulated device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoftConfig {
    /// Size of opaque shader group handles. At least 8.
    pub shader_group_handle_size: u32,

    /// Maximum ray recursion depth accepted by pipelines.
    pub max_recursion_depth: u32,

    /// Total bytes of buffer memory. Allocations beyond fail with
    /// `OutOfMemory`.
    pub memory_budget: u64,
}

impl Default for SoftConfig {
    fn default() -> Self {
        SoftConfig {
            shader_group_handle_size: 16,
            max_recursion_depth: 1,
            memory_budget: 1 << 30,
        }
    }
}

/// Creates device with single general queue.
pub fn create(config: SoftConfig) -> (Device, Queue, Inspector) {
    assert!(
        config.shader_group_handle_size >= 8,
        "Shader group handle must hold at least 8 bytes"
    );

    let device = Arc::new(SoftDevice::new(config));
    tracing::debug!("Soft device created with {:?}", config);

    let queue = Queue::new(
        Box::new(SoftQueue::new(device.clone())),
        QueueId {
            family: 0,
            index: 0,
        },
        QueueCapabilityFlags::TRANSFER | QueueCapabilityFlags::COMPUTE,
    );

    let inspector = Inspector::new(device.clone());

    (Device::new(device), queue, inspector)
}
