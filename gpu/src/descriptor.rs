use {
    crate::{
        accel::AccelerationStructure, buffer::Buffer, shader::ShaderStageFlags,
    },
    smallvec::SmallVec,
};

/// Descriptor types a pool usually holds without spilling to the heap.
pub const DESCRIPTOR_POOL_SMALLVEC_SIZES: usize = 4;

bitflags::bitflags! {
    /// Options for a single binding of a descriptor set layout.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct DescriptorBindingFlags: u32 {
        const UPDATE_AFTER_BIND = 0x00000001;
        const UPDATE_UNUSED_WHILE_PENDING = 0x00000002;

        /// Binding may be left unwritten when no shader accesses it.
        const PARTIALLY_BOUND = 0x00000004;
    }
}

define_handle! {
    /// Resource that describes layout for descriptor sets.
    pub struct DescriptorSetLayout(DescriptorSetLayoutInfo);
}

/// Defines layout for descriptor sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutInfo {
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutInfo {
    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// Defines layout for one binding in descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutBinding {
    /// Binding index.
    pub binding: u32,

    /// Type of descriptor in the binding.
    pub ty: DescriptorType,

    /// Number of descriptors in the binding.
    pub count: u32,

    /// Shader stages where this binding is accessible.
    pub stages: ShaderStageFlags,

    pub flags: DescriptorBindingFlags,
}

/// Types of descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    AccelerationStructure,
}

define_handle! {
    /// Pool descriptor sets are allocated from.
    pub struct DescriptorPool(DescriptorPoolInfo);
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorPoolInfo {
    pub max_sets: u32,
    pub sizes: SmallVec<[DescriptorPoolSize; DESCRIPTOR_POOL_SMALLVEC_SIZES]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorPoolSize {
    pub ty: DescriptorType,
    pub count: u32,
}

impl DescriptorPoolInfo {
    /// Pool with room for `sets` sets of the given layout.
    pub fn for_layout(layout: &DescriptorSetLayoutInfo, sets: u32) -> Self {
        let mut sizes = SmallVec::<[DescriptorPoolSize; DESCRIPTOR_POOL_SMALLVEC_SIZES]>::new();

        for binding in &layout.bindings {
            let count = binding.count * sets;
            match sizes.iter_mut().find(|s| s.ty == binding.ty) {
                Some(size) => size.count += count,
                None => sizes.push(DescriptorPoolSize {
                    ty: binding.ty,
                    count,
                }),
            }
        }

        DescriptorPoolInfo {
            max_sets: sets,
            sizes,
        }
    }

    /// Number of descriptors of type `ty` the pool holds.
    pub fn capacity(&self, ty: DescriptorType) -> u32 {
        self.sizes
            .iter()
            .filter(|s| s.ty == ty)
            .map(|s| s.count)
            .sum()
    }
}

define_handle! {
    /// Set of descriptors with specific layout.
    pub struct DescriptorSet(DescriptorSetInfo);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetInfo {
    /// Pool the set is allocated from.
    /// The set keeps its pool alive.
    pub pool: DescriptorPool,
    pub layout: DescriptorSetLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WriteDescriptorSet<'a> {
    pub set: &'a DescriptorSet,
    pub binding: u32,
    pub element: u32,
    pub descriptors: Descriptors<'a>,
}

/// Reasons a descriptor write is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidDescriptorWrite {
    #[error("Binding {binding} is not declared in the set layout")]
    MissingBinding { binding: u32 },

    #[error("Binding {binding} expects {expected:?} descriptors")]
    TypeMismatch {
        binding: u32,
        expected: DescriptorType,
    },

    #[error("Binding {binding} holds {count} descriptors, write ends at {end}")]
    TooManyDescriptors { binding: u32, count: u32, end: u64 },

    #[error("Buffer range {offset}..+{size} at binding {binding} is empty or out of bounds")]
    InvalidRange { binding: u32, offset: u64, size: u64 },
}

impl WriteDescriptorSet<'_> {
    /// Checks the write against the layout of the target set.
    pub fn validate(&self) -> Result<(), InvalidDescriptorWrite> {
        let binding = self.binding;
        let layout = self
            .set
            .info()
            .layout
            .info()
            .binding(binding)
            .ok_or(InvalidDescriptorWrite::MissingBinding { binding })?;

        if layout.ty != self.descriptors.ty() {
            return Err(InvalidDescriptorWrite::TypeMismatch {
                binding,
                expected: layout.ty,
            });
        }

        let end = u64::from(self.element) + self.descriptors.len() as u64;
        if end > u64::from(layout.count) {
            return Err(InvalidDescriptorWrite::TooManyDescriptors {
                binding,
                count: layout.count,
                end,
            });
        }

        if let Some(buffers) = self.descriptors.buffers() {
            for &(ref buffer, offset, size) in buffers {
                if size == 0 || !buffer.info().contains(offset, size) {
                    return Err(InvalidDescriptorWrite::InvalidRange {
                        binding,
                        offset,
                        size,
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Descriptors<'a> {
    UniformBuffer(&'a [(Buffer, u64, u64)]),
    StorageBuffer(&'a [(Buffer, u64, u64)]),
    UniformBufferDynamic(&'a [(Buffer, u64, u64)]),
    StorageBufferDynamic(&'a [(Buffer, u64, u64)]),
    AccelerationStructure(&'a [AccelerationStructure]),
}

impl<'a> Descriptors<'a> {
    pub fn ty(&self) -> DescriptorType {
        match self {
            Descriptors::UniformBuffer(_) => DescriptorType::UniformBuffer,
            Descriptors::StorageBuffer(_) => DescriptorType::StorageBuffer,
            Descriptors::UniformBufferDynamic(_) => {
                DescriptorType::UniformBufferDynamic
            }
            Descriptors::StorageBufferDynamic(_) => {
                DescriptorType::StorageBufferDynamic
            }
            Descriptors::AccelerationStructure(_) => {
                DescriptorType::AccelerationStructure
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Descriptors::UniformBuffer(buffers)
            | Descriptors::StorageBuffer(buffers)
            | Descriptors::UniformBufferDynamic(buffers)
            | Descriptors::StorageBufferDynamic(buffers) => buffers.len(),
            Descriptors::AccelerationStructure(structures) => structures.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffers(&self) -> Option<&'a [(Buffer, u64, u64)]> {
        match *self {
            Descriptors::UniformBuffer(buffers)
            | Descriptors::StorageBuffer(buffers)
            | Descriptors::UniformBufferDynamic(buffers)
            | Descriptors::StorageBufferDynamic(buffers) => Some(buffers),
            Descriptors::AccelerationStructure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(
        binding: u32,
        ty: DescriptorType,
        count: u32,
    ) -> DescriptorSetLayoutBinding {
        DescriptorSetLayoutBinding {
            binding,
            ty,
            count,
            stages: ShaderStageFlags::RAYGEN,
            flags: DescriptorBindingFlags::empty(),
        }
    }

    #[test]
    fn pool_sizes_merge_bindings_of_same_type() {
        let layout = DescriptorSetLayoutInfo {
            bindings: vec![
                binding(0, DescriptorType::AccelerationStructure, 1),
                binding(1, DescriptorType::UniformBuffer, 1),
                binding(2, DescriptorType::StorageBuffer, 1),
                binding(4, DescriptorType::StorageBuffer, 1),
            ],
        };

        let pool = DescriptorPoolInfo::for_layout(&layout, 2);
        assert_eq!(pool.max_sets, 2);
        assert_eq!(pool.sizes.len(), 3);
        assert!(!pool.sizes.spilled());
        assert_eq!(pool.capacity(DescriptorType::StorageBuffer), 4);
        assert_eq!(pool.capacity(DescriptorType::AccelerationStructure), 2);
        assert_eq!(pool.capacity(DescriptorType::UniformBufferDynamic), 0);
    }

    #[test]
    fn layout_lookup_by_binding_index() {
        let layout = DescriptorSetLayoutInfo {
            bindings: vec![
                binding(4, DescriptorType::StorageBuffer, 1),
                binding(0, DescriptorType::AccelerationStructure, 1),
            ],
        };
        assert_eq!(
            layout.binding(0).map(|b| b.ty),
            Some(DescriptorType::AccelerationStructure)
        );
        assert!(layout.binding(3).is_none());
    }
}
