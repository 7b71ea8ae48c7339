//! Acceleration structure construction.
//!
//! Every structure is sized from device reported requirements, gets its own
//! result and scratch buffers and is built by a one-shot submission that
//! completes before the constructor returns.

use {
    crate::{context::Context, error::Error, geometry::Vertex},
    eyre::Report,
    lumen_gpu::{
        AccelerationStructure, AccelerationStructureBuildGeometryInfo,
        AccelerationStructureFlags, AccelerationStructureGeometry,
        AccelerationStructureGeometryInfo, AccelerationStructureInfo,
        AccelerationStructureInstance, AccelerationStructureLevel,
        AccelerationStructureMemoryRequirementsType, AabbPositions, Buffer,
        BufferInfo, BufferUsage, DeviceAddress, Format, GeometryFlags,
        IndexData, IndexType, MemoryUsageFlags,
    },
    std::mem::size_of,
};

/// Primitives built into a bottom level structure.
#[derive(Clone, Copy, Debug)]
pub enum Primitives<'a> {
    /// Indexed triangle list of [`Vertex`] records with `u32` indices.
    Triangles {
        vertices: &'a Buffer,
        vertex_count: u32,
        indices: &'a Buffer,
        index_count: u32,
    },

    /// Procedural primitives bounded by [`AabbPositions`] records.
    Aabbs { aabbs: &'a Buffer, count: u32 },
}

impl Primitives<'_> {
    pub fn primitive_count(&self) -> u32 {
        match *self {
            Primitives::Triangles { index_count, .. } => index_count / 3,
            Primitives::Aabbs { count, .. } => count,
        }
    }

    fn geometry_info(&self) -> AccelerationStructureGeometryInfo {
        match *self {
            Primitives::Triangles { vertex_count, .. } => {
                AccelerationStructureGeometryInfo::Triangles {
                    max_primitive_count: self.primitive_count(),
                    index_type: Some(IndexType::U32),
                    max_vertex_count: vertex_count,
                    vertex_format: Format::RGB32Sfloat,
                    allows_transforms: false,
                }
            }
            Primitives::Aabbs { count, .. } => {
                AccelerationStructureGeometryInfo::AABBs {
                    max_primitive_count: count,
                }
            }
        }
    }

    fn geometry(
        &self,
        ctx: &Context,
    ) -> Result<AccelerationStructureGeometry, Error> {
        match *self {
            Primitives::Triangles {
                vertices,
                vertex_count,
                indices,
                ..
            } => Ok(AccelerationStructureGeometry::Triangles {
                flags: GeometryFlags::OPAQUE,
                vertex_format: Format::RGB32Sfloat,
                vertex_data: ctx.buffer_address(vertices, "vertex buffer")?,
                vertex_stride: size_of::<Vertex>() as u64,
                vertex_count,
                first_vertex: 0,
                primitive_count: self.primitive_count(),
                index_data: Some(IndexData::U32(
                    ctx.buffer_address(indices, "index buffer")?,
                )),
                transform_data: None,
            }),
            Primitives::Aabbs { aabbs, count } => {
                Ok(AccelerationStructureGeometry::AABBs {
                    flags: GeometryFlags::OPAQUE,
                    data: ctx.buffer_address(aabbs, "AABB buffer")?,
                    stride: size_of::<AabbPositions>() as u64,
                    primitive_count: count,
                })
            }
        }
    }
}

/// Built acceleration structure with the memory it owns.
///
/// Scratch memory is retained for the structure's lifetime.
#[derive(Debug)]
pub struct AccelerationHandle {
    structure: AccelerationStructure,
    result: Buffer,
    scratch: Buffer,
    instances: Option<Buffer>,
}

impl AccelerationHandle {
    /// Builds bottom level structure over `primitives`.
    #[tracing::instrument(skip(ctx))]
    pub fn build_bottom_level(
        ctx: &mut Context,
        primitives: Primitives<'_>,
    ) -> Result<Self, Report> {
        let (structure, result, scratch) = allocate(
            ctx,
            AccelerationStructureInfo {
                level: AccelerationStructureLevel::Bottom,
                flags: AccelerationStructureFlags::PREFER_FAST_TRACE,
                geometries: vec![primitives.geometry_info()],
            },
        )?;

        let geometries = [primitives.geometry(ctx)?];
        build(ctx, &structure, &scratch, &geometries)?;

        tracing::debug!(
            "BLAS built with {} primitives",
            primitives.primitive_count()
        );

        Ok(AccelerationHandle {
            structure,
            result,
            scratch,
            instances: None,
        })
    }

    /// Builds top level structure referencing bottom level structures
    /// through `instances`.
    ///
    /// Instance records are copied into a host visible buffer the structure
    /// keeps.
    #[tracing::instrument(skip(ctx, instances), fields(count = instances.len()))]
    pub fn build_top_level(
        ctx: &mut Context,
        instances: &[AccelerationStructureInstance],
    ) -> Result<Self, Report> {
        assert!(!instances.is_empty(), "Top level structure needs instances");
        let count = u32::try_from(instances.len())?;

        let (structure, result, scratch) = allocate(
            ctx,
            AccelerationStructureInfo {
                level: AccelerationStructureLevel::Top,
                flags: AccelerationStructureFlags::PREFER_FAST_TRACE,
                geometries: vec![AccelerationStructureGeometryInfo::Instances {
                    max_primitive_count: count,
                }],
            },
        )?;

        let instance_buffer = ctx.create_buffer(BufferInfo {
            align: 15,
            size: (size_of::<AccelerationStructureInstance>() * instances.len())
                as u64,
            usage: BufferUsage::RAY_TRACING | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory: MemoryUsageFlags::UPLOAD | MemoryUsageFlags::DEVICE_ADDRESS,
        })?;

        ctx.upload(&instance_buffer, 0, instances)?;

        let geometries = [AccelerationStructureGeometry::Instances {
            flags: GeometryFlags::OPAQUE,
            data: ctx.buffer_address(&instance_buffer, "instance buffer")?,
            primitive_count: count,
        }];
        build(ctx, &structure, &scratch, &geometries)?;

        tracing::trace!("TLAS created");

        Ok(AccelerationHandle {
            structure,
            result,
            scratch,
            instances: Some(instance_buffer),
        })
    }

    pub fn structure(&self) -> &AccelerationStructure {
        &self.structure
    }

    /// Buffer backing the structure.
    pub fn result_buffer(&self) -> &Buffer {
        &self.result
    }

    pub fn scratch_buffer(&self) -> &Buffer {
        &self.scratch
    }

    /// Instance records of a top level structure.
    pub fn instance_buffer(&self) -> Option<&Buffer> {
        self.instances.as_ref()
    }

    /// Opaque handle referenced by instance records.
    pub fn reference(&self, ctx: &Context) -> Result<DeviceAddress, Error> {
        ctx.get_acceleration_structure_device_address(&self.structure)
            .ok_or(Error::MissingAddress {
                what: "acceleration structure",
            })
    }
}

/// Creates the structure and binds it to a result buffer.
/// Scratch holds enough for a full build as well as for an update.
fn allocate(
    ctx: &Context,
    info: AccelerationStructureInfo,
) -> Result<(AccelerationStructure, Buffer, Buffer), Report> {
    let structure = ctx.create_acceleration_structure(info)?;

    let object = ctx.get_acceleration_structure_memory_requirements(
        &structure,
        AccelerationStructureMemoryRequirementsType::Object,
    );
    let build_scratch = ctx.get_acceleration_structure_memory_requirements(
        &structure,
        AccelerationStructureMemoryRequirementsType::BuildScratch,
    );
    let update_scratch = ctx.get_acceleration_structure_memory_requirements(
        &structure,
        AccelerationStructureMemoryRequirementsType::UpdateScratch,
    );

    let result = ctx.create_buffer(BufferInfo {
        align: object.align,
        size: object.size,
        usage: BufferUsage::RAY_TRACING,
        memory: MemoryUsageFlags::FAST_DEVICE_ACCESS,
    })?;

    let scratch = ctx.create_buffer(BufferInfo {
        align: build_scratch.align | update_scratch.align,
        size: build_scratch.size.max(update_scratch.size),
        usage: BufferUsage::RAY_TRACING | BufferUsage::SHADER_DEVICE_ADDRESS,
        memory: MemoryUsageFlags::FAST_DEVICE_ACCESS
            | MemoryUsageFlags::DEVICE_ADDRESS,
    })?;

    ctx.bind_acceleration_structure_memory(&structure, &result, 0)?;

    Ok((structure, result, scratch))
}

/// Records a full build and waits for its completion.
fn build(
    ctx: &mut Context,
    structure: &AccelerationStructure,
    scratch: &Buffer,
    geometries: &[AccelerationStructureGeometry],
) -> Result<(), Report> {
    let infos = [AccelerationStructureBuildGeometryInfo {
        src: None,
        dst: structure.clone(),
        geometries,
        scratch: ctx.buffer_address(scratch, "scratch buffer")?,
    }];

    let mut encoder = ctx.queue.create_encoder();
    encoder.build_acceleration_structure(&infos);
    ctx.submit_and_wait(encoder)
}
