use crate::{DeviceAddress, Format, IndexType};

define_handle! {
    /// Bottom or top level acceleration structure.
    ///
    /// Created unbound. Memory must be bound with
    /// `Device::bind_acceleration_structure_memory` before the structure
    /// gets an address or can be built.
    pub struct AccelerationStructure(AccelerationStructureInfo);
}

bitflags::bitflags! {
    /// Additional parameters of acceleration structure builds.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct AccelerationStructureFlags: u32 {
        const ALLOW_UPDATE      = 0x00000001;
        const ALLOW_COMPACTION  = 0x00000002;
        const PREFER_FAST_TRACE = 0x00000004;
        const PREFER_FAST_BUILD = 0x00000008;
        const LOW_MEMORY        = 0x00000010;
    }
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct GeometryFlags: u32 {
        const OPAQUE                            = 0x00000001;
        const NO_DUPLICATE_ANY_HIT_INVOCATION   = 0x00000002;
    }
}

bitflags::bitflags! {
    /// Flags stored in the top byte of an instance's hit group word.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct GeometryInstanceFlags: u8 {
        const TRIANGLE_CULL_DISABLE           = 0x00000001;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 0x00000002;
        const FORCE_OPAQUE                    = 0x00000004;
        const FORCE_NO_OPAQUE                 = 0x00000008;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct AccelerationStructureInfo {
    pub level: AccelerationStructureLevel,
    pub flags: AccelerationStructureFlags,
    pub geometries: Vec<AccelerationStructureGeometryInfo>,
}

impl AccelerationStructureInfo {
    /// Sum of maximum primitive counts over all geometries.
    pub fn max_primitive_count(&self) -> u64 {
        self.geometries
            .iter()
            .map(|g| u64::from(g.max_primitive_count()))
            .sum()
    }

    /// Checks that geometry kinds match the level.
    pub fn is_valid(&self) -> bool {
        match self.level {
            AccelerationStructureLevel::Bottom => self
                .geometries
                .iter()
                .all(|g| !g.is_instances()),
            AccelerationStructureLevel::Top => {
                self.geometries.len() == 1 && self.geometries[0].is_instances()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

/// Specifies the shape of geometries that will be built into an acceleration
/// structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum AccelerationStructureGeometryInfo {
    Triangles {
        max_primitive_count: u32,
        index_type: Option<IndexType>,
        max_vertex_count: u32,
        vertex_format: Format,
        allows_transforms: bool,
    },
    AABBs {
        max_primitive_count: u32,
    },
    Instances {
        max_primitive_count: u32,
    },
}

impl AccelerationStructureGeometryInfo {
    pub fn max_primitive_count(&self) -> u32 {
        match *self {
            Self::Triangles {
                max_primitive_count,
                ..
            }
            | Self::AABBs {
                max_primitive_count,
            }
            | Self::Instances {
                max_primitive_count,
            } => max_primitive_count,
        }
    }

    pub fn is_triangles(&self) -> bool {
        matches!(self, Self::Triangles { .. })
    }

    pub fn is_aabbs(&self) -> bool {
        matches!(self, Self::AABBs { .. })
    }

    pub fn is_instances(&self) -> bool {
        matches!(self, Self::Instances { .. })
    }
}

/// Kinds of memory an acceleration structure needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationStructureMemoryRequirementsType {
    /// Storage for the structure itself.
    Object,

    /// Temporary storage for a full build.
    BuildScratch,

    /// Temporary storage for an incremental update.
    UpdateScratch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,

    /// Alignment mask.
    pub align: u64,
}

#[derive(Clone, Debug)]
pub struct AccelerationStructureBuildGeometryInfo<'a> {
    /// Source structure for an update. `None` for a full build.
    pub src: Option<AccelerationStructure>,
    pub dst: AccelerationStructure,
    pub geometries: &'a [AccelerationStructureGeometry],
    pub scratch: DeviceAddress,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AccelerationStructureGeometry {
    Triangles {
        flags: GeometryFlags,
        vertex_format: Format,
        vertex_data: DeviceAddress,
        vertex_stride: u64,
        vertex_count: u32,
        first_vertex: u32,
        primitive_count: u32,
        index_data: Option<IndexData>,
        transform_data: Option<DeviceAddress>,
    },
    AABBs {
        flags: GeometryFlags,
        data: DeviceAddress,
        stride: u64,
        primitive_count: u32,
    },
    Instances {
        flags: GeometryFlags,
        data: DeviceAddress,
        primitive_count: u32,
    },
}

impl AccelerationStructureGeometry {
    pub fn primitive_count(&self) -> u32 {
        match *self {
            Self::Triangles {
                primitive_count, ..
            }
            | Self::AABBs {
                primitive_count, ..
            }
            | Self::Instances {
                primitive_count, ..
            } => primitive_count,
        }
    }

    /// Checks that this geometry can be built into space reserved by `info`.
    pub fn fits(&self, info: &AccelerationStructureGeometryInfo) -> bool {
        match (self, info) {
            (
                Self::Triangles {
                    vertex_format,
                    vertex_count,
                    primitive_count,
                    index_data,
                    ..
                },
                AccelerationStructureGeometryInfo::Triangles {
                    max_primitive_count,
                    index_type,
                    max_vertex_count,
                    vertex_format: expected_format,
                    ..
                },
            ) => {
                vertex_format == expected_format
                    && vertex_count <= max_vertex_count
                    && primitive_count <= max_primitive_count
                    && index_data.map(|i| i.index_type()) == *index_type
            }
            (
                Self::AABBs {
                    primitive_count, ..
                },
                AccelerationStructureGeometryInfo::AABBs {
                    max_primitive_count,
                },
            )
            | (
                Self::Instances {
                    primitive_count, ..
                },
                AccelerationStructureGeometryInfo::Instances {
                    max_primitive_count,
                },
            ) => primitive_count <= max_primitive_count,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexData {
    U16(DeviceAddress),
    U32(DeviceAddress),
}

impl IndexData {
    pub fn index_type(&self) -> IndexType {
        match self {
            IndexData::U16(_) => IndexType::U16,
            IndexData::U32(_) => IndexType::U32,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        match *self {
            IndexData::U16(address) | IndexData::U32(address) => address,
        }
    }
}

/// Row-major 3x4 affine transform.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct TransformMatrix {
    pub matrix: [[f32; 4]; 3],
}

unsafe impl bytemuck::Zeroable for TransformMatrix {}
unsafe impl bytemuck::Pod for TransformMatrix {}

impl TransformMatrix {
    pub fn identity() -> Self {
        TransformMatrix {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(feature = "nalgebra")]
impl From<nalgebra::Matrix4<f32>> for TransformMatrix {
    /// Takes the first three rows of the model matrix.
    fn from(m: nalgebra::Matrix4<f32>) -> Self {
        let row = |r: usize| [m[(r, 0)], m[(r, 1)], m[(r, 2)], m[(r, 3)]];

        TransformMatrix {
            matrix: [row(0), row(1), row(2)],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct AabbPositions {
    pub min_x: f32,
    pub min_y: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub max_z: f32,
}

unsafe impl bytemuck::Zeroable for AabbPositions {}
unsafe impl bytemuck::Pod for AabbPositions {}

impl AabbPositions {
    /// Axis-aligned cube `[-half, half]^3`.
    pub fn cube(half: f32) -> Self {
        AabbPositions {
            min_x: -half,
            min_y: -half,
            min_z: -half,
            max_x: half,
            max_y: half,
            max_z: half,
        }
    }
}

/// 24-bit custom index and 8-bit visibility mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct InstanceCustomIndexAndMask(pub u32);

impl InstanceCustomIndexAndMask {
    pub fn new(custom_index: u32, mask: u8) -> Self {
        assert!(custom_index < 1u32 << 24);

        InstanceCustomIndexAndMask(custom_index | ((mask as u32) << 24))
    }

    pub fn custom_index(&self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    pub fn mask(&self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl Default for InstanceCustomIndexAndMask {
    fn default() -> Self {
        InstanceCustomIndexAndMask::new(0, !0)
    }
}

/// 24-bit hit group offset and 8-bit instance flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct InstanceShaderBindingOffsetAndFlags(pub u32);

impl InstanceShaderBindingOffsetAndFlags {
    pub fn new(
        instance_shader_binding_offset: u32,
        flags: GeometryInstanceFlags,
    ) -> Self {
        assert!(instance_shader_binding_offset < 1u32 << 24);

        InstanceShaderBindingOffsetAndFlags(
            instance_shader_binding_offset | ((flags.bits() as u32) << 24),
        )
    }

    pub fn shader_binding_offset(&self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    pub fn flags(&self) -> GeometryInstanceFlags {
        GeometryInstanceFlags::from_bits_truncate((self.0 >> 24) as u8)
    }
}

impl Default for InstanceShaderBindingOffsetAndFlags {
    fn default() -> Self {
        InstanceShaderBindingOffsetAndFlags::new(
            0,
            GeometryInstanceFlags::empty(),
        )
    }
}

/// Instance record consumed by top-level builds. 64 bytes.
#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C, align(16))]
pub struct AccelerationStructureInstance {
    pub transform: TransformMatrix,
    pub custom_index_mask: InstanceCustomIndexAndMask,
    pub shader_binding_offset_flags: InstanceShaderBindingOffsetAndFlags,

    /// Address returned by `Device::get_acceleration_structure_device_address`
    /// for the referenced bottom level structure.
    pub acceleration_structure_reference: u64,
}

unsafe impl bytemuck::Zeroable for AccelerationStructureInstance {}
unsafe impl bytemuck::Pod for AccelerationStructureInstance {}

impl AccelerationStructureInstance {
    pub fn new(blas_address: DeviceAddress) -> Self {
        AccelerationStructureInstance {
            transform: Default::default(),
            custom_index_mask: Default::default(),
            shader_binding_offset_flags: Default::default(),
            acceleration_structure_reference: blas_address.get(),
        }
    }

    pub fn with_transform(mut self, transform: TransformMatrix) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_custom_index(mut self, index: u32, mask: u8) -> Self {
        self.custom_index_mask = InstanceCustomIndexAndMask::new(index, mask);
        self
    }

    pub fn with_shader_binding(
        mut self,
        offset: u32,
        flags: GeometryInstanceFlags,
    ) -> Self {
        self.shader_binding_offset_flags =
            InstanceShaderBindingOffsetAndFlags::new(offset, flags);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn instance_layout_is_packed() {
        assert_eq!(size_of::<AccelerationStructureInstance>(), 64);
        assert_eq!(align_of::<AccelerationStructureInstance>(), 16);
        assert_eq!(size_of::<AabbPositions>(), 24);
    }

    #[test]
    fn instance_words_pack_index_and_flags() {
        let address = DeviceAddress::new(0xdead_0000).unwrap();
        let instance = AccelerationStructureInstance::new(address)
            .with_custom_index(3, 0xff)
            .with_shader_binding(
                1,
                GeometryInstanceFlags::TRIANGLE_CULL_DISABLE,
            );

        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&instance));
        assert_eq!(words[12], 3 | 0xff << 24);
        assert_eq!(words[13], 1 | 0x01 << 24);
        assert_eq!(instance.acceleration_structure_reference, 0xdead_0000);
        assert_eq!(
            instance.shader_binding_offset_flags.flags(),
            GeometryInstanceFlags::TRIANGLE_CULL_DISABLE
        );
    }

    #[test]
    #[should_panic]
    fn custom_index_is_24_bit() {
        InstanceCustomIndexAndMask::new(1 << 24, 0xff);
    }

    #[test]
    fn top_level_takes_single_instance_geometry() {
        let top = AccelerationStructureInfo {
            level: AccelerationStructureLevel::Top,
            flags: AccelerationStructureFlags::empty(),
            geometries: vec![AccelerationStructureGeometryInfo::Instances {
                max_primitive_count: 4,
            }],
        };
        assert!(top.is_valid());
        assert_eq!(top.max_primitive_count(), 4);

        let bottom = AccelerationStructureInfo {
            level: AccelerationStructureLevel::Bottom,
            ..top
        };
        assert!(!bottom.is_valid());
    }
}
