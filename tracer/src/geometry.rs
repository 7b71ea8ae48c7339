use {
    crate::{
        accel::{AccelerationHandle, Primitives},
        context::Context,
        error::Error,
    },
    bytemuck::{Pod, Zeroable},
    eyre::Report,
    lumen_gpu::{
        AabbPositions, AccelerationStructure, Buffer, BufferInfo, BufferUsage,
        MemoryUsageFlags,
    },
    nalgebra as na,
    std::mem::{size_of, size_of_val},
};

/// Vertex of a triangle mesh as read by hit shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

unsafe impl Zeroable for Vertex {}
unsafe impl Pod for Vertex {}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Vertex {
            position,
            normal,
            uv,
        }
    }
}

/// Shader hit group an instance is resolved with.
/// Discriminant is the hit group index stored in instance records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HitGroup {
    Triangles = 0,
    Spheres = 1,
}

impl HitGroup {
    pub const ALL: [HitGroup; 2] = [HitGroup::Triangles, HitGroup::Spheres];

    pub fn index(&self) -> u32 {
        *self as u32
    }
}

/// State shared by all geometry kinds.
#[derive(Debug)]
pub struct Geometry {
    color: na::Vector3<f32>,
    model: na::Matrix4<f32>,
    normal: na::Matrix4<f32>,
    blas: AccelerationHandle,
}

impl Geometry {
    fn new(
        ctx: &mut Context,
        model: na::Matrix4<f32>,
        color: na::Vector3<f32>,
        primitives: Primitives<'_>,
    ) -> Result<Self, Report> {
        let normal = model
            .try_inverse()
            .ok_or(Error::SingularTransform)?
            .transpose();

        let blas = AccelerationHandle::build_bottom_level(ctx, primitives)?;

        Ok(Geometry {
            color,
            model,
            normal,
            blas,
        })
    }

    pub fn color(&self) -> &na::Vector3<f32> {
        &self.color
    }

    pub fn model(&self) -> &na::Matrix4<f32> {
        &self.model
    }

    /// Transpose of the inverse model matrix.
    pub fn normal_matrix(&self) -> &na::Matrix4<f32> {
        &self.normal
    }

    pub fn blas(&self) -> &AccelerationHandle {
        &self.blas
    }

    pub fn acceleration_structure(&self) -> &AccelerationStructure {
        self.blas.structure()
    }
}

fn white() -> na::Vector3<f32> {
    na::Vector3::new(1.0, 1.0, 1.0)
}

/// Indexed triangle mesh.
#[derive(Debug)]
pub struct TriangleMesh {
    geometry: Geometry,
    vertices: Buffer,
    indices: Buffer,
}

impl TriangleMesh {
    /// White mesh.
    pub fn new(
        ctx: &mut Context,
        model: na::Matrix4<f32>,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<Self, Report> {
        Self::with_color(ctx, model, vertices, indices, white())
    }

    #[tracing::instrument(skip(ctx, vertices, indices), fields(vertices = vertices.len(), indices = indices.len()))]
    pub fn with_color(
        ctx: &mut Context,
        model: na::Matrix4<f32>,
        vertices: &[Vertex],
        indices: &[u32],
        color: na::Vector3<f32>,
    ) -> Result<Self, Report> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(Error::EmptyMesh.into());
        }

        if indices.len() % 3 != 0 {
            return Err(Error::PartialTriangle {
                count: indices.len(),
            }
            .into());
        }

        if let Some(&index) =
            indices.iter().find(|&&i| i as usize >= vertices.len())
        {
            return Err(Error::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            }
            .into());
        }

        let usage = BufferUsage::STORAGE
            | BufferUsage::RAY_TRACING
            | BufferUsage::SHADER_DEVICE_ADDRESS;
        let memory = MemoryUsageFlags::UPLOAD | MemoryUsageFlags::DEVICE_ADDRESS;

        let vertex_buffer = ctx.create_buffer_static(
            BufferInfo {
                align: 15,
                size: size_of_val(vertices) as u64,
                usage: usage | BufferUsage::VERTEX,
                memory,
            },
            vertices,
        )?;

        let index_buffer = ctx.create_buffer_static(
            BufferInfo {
                align: 15,
                size: size_of_val(indices) as u64,
                usage: usage | BufferUsage::INDEX,
                memory,
            },
            indices,
        )?;

        let primitives = triangles(&vertex_buffer, &index_buffer);
        let geometry = Geometry::new(ctx, model, color, primitives)?;

        Ok(TriangleMesh {
            geometry,
            vertices: vertex_buffer,
            indices: index_buffer,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertices
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.indices
    }

    pub fn primitives(&self) -> Primitives<'_> {
        triangles(&self.vertices, &self.indices)
    }
}

/// Counts are derived from buffer sizes.
fn triangles<'a>(vertices: &'a Buffer, indices: &'a Buffer) -> Primitives<'a> {
    Primitives::Triangles {
        vertices,
        vertex_count: (vertices.info().size / size_of::<Vertex>() as u64) as u32,
        indices,
        index_count: (indices.info().size / size_of::<u32>() as u64) as u32,
    }
}

/// Unit sphere at the origin, placed and scaled by its model matrix.
///
/// Intersection is computed by the sphere hit group's intersection shader,
/// the acceleration structure only holds the bounding cube.
#[derive(Debug)]
pub struct ImplicitSphere {
    geometry: Geometry,
    aabbs: Buffer,
}

impl ImplicitSphere {
    /// White sphere.
    pub fn new(
        ctx: &mut Context,
        model: na::Matrix4<f32>,
    ) -> Result<Self, Report> {
        Self::with_color(ctx, model, white())
    }

    #[tracing::instrument(skip(ctx))]
    pub fn with_color(
        ctx: &mut Context,
        model: na::Matrix4<f32>,
        color: na::Vector3<f32>,
    ) -> Result<Self, Report> {
        let aabbs = ctx.create_buffer_static(
            BufferInfo {
                align: 7,
                size: size_of::<AabbPositions>() as u64,
                usage: BufferUsage::RAY_TRACING
                    | BufferUsage::SHADER_DEVICE_ADDRESS,
                memory: MemoryUsageFlags::UPLOAD
                    | MemoryUsageFlags::DEVICE_ADDRESS,
            },
            &[AabbPositions::cube(1.0)],
        )?;

        let geometry = Geometry::new(
            ctx,
            model,
            color,
            Primitives::Aabbs {
                aabbs: &aabbs,
                count: 1,
            },
        )?;

        Ok(ImplicitSphere { geometry, aabbs })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn aabb_buffer(&self) -> &Buffer {
        &self.aabbs
    }
}
