//! Backend-agnostic GPU capability for hardware ray tracing.
//!
//! Resources are reference-counted handles carrying the info they were
//! created with plus a backend specific payload. The last clone of a handle
//! releases the resource, so ownership follows ordinary Rust drop order.
//!
//! Commands are recorded into an [`Encoder`], written into a reusable
//! [`CommandBuffer`] and submitted to a [`Queue`].

#[macro_use]
mod macros;

mod accel;
mod buffer;
mod command;
mod descriptor;
mod device;
mod memory;
mod pipeline;
mod queue;
mod resource;
mod shader;
mod stage;

pub use self::{
    accel::*, buffer::*, command::*, descriptor::*, device::*, memory::*,
    pipeline::*, queue::*, resource::*, shader::*, stage::*,
};

use std::{error::Error, fmt::Debug, num::NonZeroU64};

/// Out of device memory error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Out of device memory")]
pub struct OutOfMemory;

/// Error that may occur when host accesses buffer memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("Buffer memory is not host visible")]
    NonHostVisible,

    #[error("Range {offset}..+{size} is out of buffer bounds ({buffer_size})")]
    OutOfBounds {
        offset: u64,
        size: u64,
        buffer_size: u64,
    },
}

/// Device address of a buffer or an opaque acceleration structure handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct DeviceAddress(pub NonZeroU64);

impl DeviceAddress {
    pub fn new(address: u64) -> Option<Self> {
        NonZeroU64::new(address).map(DeviceAddress)
    }

    pub fn offset(&self, offset: u64) -> DeviceAddress {
        DeviceAddress(
            self.0
                .checked_add(offset)
                .expect("Device address overflow"),
        )
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn into_3d(self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Formats of vertex attributes consumed by acceleration structure builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Format {
    RG32Sfloat,
    RGB32Sfloat,
    RGBA32Sfloat,
}

impl Format {
    pub fn size(&self) -> u64 {
        match self {
            Format::RG32Sfloat => 8,
            Format::RGB32Sfloat => 12,
            Format::RGBA32Sfloat => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(&self) -> u8 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Rounds `value` up to the alignment described by `align_mask`.
/// Returns `None` on overflow.
pub fn align_up(align_mask: u64, value: u64) -> Option<u64> {
    Some(value.checked_add(align_mask)? & !align_mask)
}

/// Compares two integers of possibly different types.
pub fn arith_eq<A, B>(a: A, b: B) -> bool
where
    u128: TryFrom<A> + TryFrom<B>,
{
    match (u128::try_from(a), u128::try_from(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn arith_ne<A, B>(a: A, b: B) -> bool
where
    u128: TryFrom<A> + TryFrom<B>,
{
    !arith_eq(a, b)
}

pub fn arith_le<A, B>(a: A, b: B) -> bool
where
    u128: TryFrom<A> + TryFrom<B>,
{
    match (u128::try_from(a), u128::try_from(b)) {
        (Ok(a), Ok(b)) => a <= b,
        _ => false,
    }
}

pub(crate) fn assert_object<T: Debug + Send + Sync + 'static>() {}

pub(crate) fn assert_error<T: Error + Send + Sync + 'static>() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_mask() {
        assert_eq!(align_up(255, 0), Some(0));
        assert_eq!(align_up(255, 1), Some(256));
        assert_eq!(align_up(255, 256), Some(256));
        assert_eq!(align_up(15, 17), Some(32));
        assert_eq!(align_up(255, u64::MAX), None);
    }

    #[test]
    fn arith_compares_across_types() {
        assert!(arith_eq(64u64, 64usize));
        assert!(arith_ne(64u64, 65usize));
        assert!(arith_le(3usize, 4u32));
        assert!(!arith_le(5usize, 4u32));
        assert!(!arith_eq(-1i32, u32::MAX));
    }

    #[test]
    fn device_address_offsets() {
        let address = DeviceAddress::new(0x1000).unwrap();
        assert_eq!(address.offset(0x40).get(), 0x1040);
        assert!(DeviceAddress::new(0).is_none());
    }
}
