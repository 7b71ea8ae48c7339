use crate::{align_up, memory::MemoryUsageFlags};

define_handle! {
    /// Linear region of device memory.
    pub struct Buffer(BufferInfo);
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 0x00000001;
        const TRANSFER_DST = 0x00000002;
        const UNIFORM = 0x00000010;
        const STORAGE = 0x00000020;
        const INDEX = 0x00000040;
        const VERTEX = 0x00000080;
        const RAY_TRACING = 0x00000400;
        const SHADER_DEVICE_ADDRESS = 0x00020000;
    }
}

/// Information required to create a buffer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferInfo {
    /// Alignment mask for content buffer can hold.
    pub align: u64,

    /// Size of content buffer can hold.
    pub size: u64,

    /// Usage types supported by buffer.
    pub usage: BufferUsage,

    /// Memory usage pattern.
    pub memory: MemoryUsageFlags,
}

impl BufferInfo {
    /// Checks that alignment is a valid mask, size is not zero and
    /// aligned size does not overflow.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        let is_mask = self
            .align
            .checked_add(1)
            .map_or(false, u64::is_power_of_two);

        is_mask && self.size > 0 && align_up(self.align, self.size).is_some()
    }

    /// Checks that `size` bytes at `offset` fit into the buffer.
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset.checked_add(size).map_or(false, |end| end <= self.size)
    }
}

/// Buffer region with specified stride value.
/// Used to describe shader binding table sections in `Encoder::trace_rays`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StridedBufferRegion {
    pub buffer: Buffer,
    pub offset: u64,
    pub size: u64,
    pub stride: u64,
}

/// Region copied by `Encoder::copy_buffer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(align: u64, size: u64) -> BufferInfo {
        BufferInfo {
            align,
            size,
            usage: BufferUsage::STORAGE,
            memory: MemoryUsageFlags::UPLOAD,
        }
    }

    #[test]
    fn validates_alignment_mask_and_size() {
        assert!(info(15, 64).is_valid());
        assert!(info(0, 1).is_valid());
        assert!(!info(16, 64).is_valid());
        assert!(!info(15, 0).is_valid());
        assert!(!info(255, u64::MAX).is_valid());
    }

    #[test]
    fn range_containment() {
        let info = info(15, 64);
        assert!(info.contains(0, 64));
        assert!(info.contains(60, 4));
        assert!(!info.contains(60, 8));
        assert!(!info.contains(u64::MAX, 2));
    }
}
