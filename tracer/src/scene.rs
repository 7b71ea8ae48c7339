use {
    crate::{
        accel::AccelerationHandle,
        context::Context,
        error::Error,
        geometry::{Geometry, HitGroup, ImplicitSphere, TriangleMesh},
    },
    bytemuck::{Pod, Zeroable},
    eyre::Report,
    lumen_gpu::{
        AccelerationStructure, AccelerationStructureInstance, Buffer,
        BufferInfo, BufferUsage, GeometryInstanceFlags, MemoryUsageFlags,
        TransformMatrix,
    },
    nalgebra as na,
    std::mem::size_of_val,
};

/// Members of one hit group addressable by 24-bit instance indices.
pub const MAX_GROUP_MEMBERS: usize = 1 << 24;

/// Triangle mesh record read by the triangle closest-hit shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TriangleMeshView {
    /// First three columns of the normal matrix.
    pub normal_mat: [[f32; 4]; 3],
    pub color: [f32; 4],
    pub vertex_buffer: u64,
    pub index_buffer: u64,
}

unsafe impl Zeroable for TriangleMeshView {}
unsafe impl Pod for TriangleMeshView {}

/// Sphere record read by the sphere closest-hit shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SphereView {
    pub normal_mat: [[f32; 4]; 3],
    pub color: [f32; 4],
}

unsafe impl Zeroable for SphereView {}
unsafe impl Pod for SphereView {}

fn normal_columns(normal: &na::Matrix4<f32>) -> [[f32; 4]; 3] {
    let column = |c: usize| {
        [normal[(0, c)], normal[(1, c)], normal[(2, c)], normal[(3, c)]]
    };
    [column(0), column(1), column(2)]
}

fn color(geometry: &Geometry) -> [f32; 4] {
    let c = geometry.color();
    [c.x, c.y, c.z, 1.0]
}

impl SphereView {
    pub fn new(geometry: &Geometry) -> Self {
        SphereView {
            normal_mat: normal_columns(geometry.normal_matrix()),
            color: color(geometry),
        }
    }
}

impl TriangleMeshView {
    pub fn new(ctx: &Context, mesh: &TriangleMesh) -> Result<Self, Error> {
        Ok(TriangleMeshView {
            normal_mat: normal_columns(mesh.geometry().normal_matrix()),
            color: color(mesh.geometry()),
            vertex_buffer: ctx
                .buffer_address(mesh.vertex_buffer(), "vertex buffer")?
                .get(),
            index_buffer: ctx
                .buffer_address(mesh.index_buffer(), "index buffer")?
                .get(),
        })
    }
}

/// Top level structure over all scene geometry together with per-object
/// metadata.
///
/// Instances of hit group 0 (triangle meshes) precede instances of hit group
/// 1 (spheres). Within a group instances keep input order and their instance
/// index is the position in that group's metadata buffer.
#[derive(Debug)]
pub struct Scene {
    tlas: AccelerationHandle,
    triangle_views: Option<Buffer>,
    sphere_views: Option<Buffer>,
    counts: [usize; 2],

    // Keeps referenced structures and published buffers alive.
    bottom_levels: Vec<AccelerationStructure>,
    mesh_buffers: Vec<Buffer>,
}

impl Scene {
    #[tracing::instrument(skip_all, fields(meshes = meshes.len(), spheres = spheres.len()))]
    pub fn new(
        ctx: &mut Context,
        meshes: &[&TriangleMesh],
        spheres: &[&ImplicitSphere],
    ) -> Result<Self, Report> {
        if meshes.is_empty() && spheres.is_empty() {
            return Err(Error::EmptyScene.into());
        }

        for (group, count) in [
            (HitGroup::Triangles, meshes.len()),
            (HitGroup::Spheres, spheres.len()),
        ] {
            if count > MAX_GROUP_MEMBERS {
                return Err(Error::TooManyInstances {
                    group,
                    count,
                    max: MAX_GROUP_MEMBERS,
                }
                .into());
            }
        }

        let triangle_views = meshes
            .iter()
            .map(|mesh| TriangleMeshView::new(ctx, mesh))
            .collect::<Result<Vec<_>, _>>()?;

        let sphere_views: Vec<_> = spheres
            .iter()
            .map(|sphere| SphereView::new(sphere.geometry()))
            .collect();

        let groups = [
            (
                HitGroup::Triangles,
                meshes.iter().map(|m| m.geometry()).collect::<Vec<_>>(),
            ),
            (
                HitGroup::Spheres,
                spheres.iter().map(|s| s.geometry()).collect(),
            ),
        ];

        let mut instances = Vec::with_capacity(meshes.len() + spheres.len());
        for (group, members) in &groups {
            for (index, geometry) in members.iter().enumerate() {
                instances.push(
                    AccelerationStructureInstance::new(
                        geometry.blas().reference(ctx)?,
                    )
                    .with_transform(TransformMatrix::from(*geometry.model()))
                    .with_custom_index(index as u32, 0xff)
                    .with_shader_binding(
                        group.index(),
                        GeometryInstanceFlags::TRIANGLE_CULL_DISABLE,
                    ),
                );
            }
        }

        let tlas = AccelerationHandle::build_top_level(ctx, &instances)?;

        let bottom_levels = groups
            .iter()
            .flat_map(|(_, members)| members.iter())
            .map(|geometry| geometry.acceleration_structure().clone())
            .collect();

        let mesh_buffers = meshes
            .iter()
            .flat_map(|mesh| {
                [mesh.vertex_buffer().clone(), mesh.index_buffer().clone()]
            })
            .collect();

        Ok(Scene {
            tlas,
            triangle_views: upload_views(ctx, &triangle_views)?,
            sphere_views: upload_views(ctx, &sphere_views)?,
            counts: [meshes.len(), spheres.len()],
            bottom_levels,
            mesh_buffers,
        })
    }

    pub fn tlas(&self) -> &AccelerationHandle {
        &self.tlas
    }

    /// Metadata of triangle meshes. `None` for a scene without meshes.
    pub fn triangle_views(&self) -> Option<&Buffer> {
        self.triangle_views.as_ref()
    }

    /// Metadata of spheres. `None` for a scene without spheres.
    pub fn sphere_views(&self) -> Option<&Buffer> {
        self.sphere_views.as_ref()
    }

    pub fn count(&self, group: HitGroup) -> usize {
        self.counts[group.index() as usize]
    }

    pub fn instance_count(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn bottom_levels(&self) -> &[AccelerationStructure] {
        &self.bottom_levels
    }

    pub fn mesh_buffers(&self) -> &[Buffer] {
        &self.mesh_buffers
    }
}

/// Empty arrays get no buffer.
fn upload_views<T>(ctx: &Context, views: &[T]) -> Result<Option<Buffer>, Report>
where
    T: Pod,
{
    if views.is_empty() {
        return Ok(None);
    }

    let buffer = ctx.create_buffer_static(
        BufferInfo {
            align: 15,
            size: size_of_val(views) as u64,
            usage: BufferUsage::STORAGE,
            memory: MemoryUsageFlags::UPLOAD,
        },
        views,
    )?;

    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::mem::{align_of, size_of},
    };

    #[test]
    fn view_layouts() {
        assert_eq!(size_of::<TriangleMeshView>(), 80);
        assert_eq!(align_of::<TriangleMeshView>(), 8);
        assert_eq!(size_of::<SphereView>(), 64);

        let view = TriangleMeshView {
            normal_mat: [[1.0, 2.0, 3.0, 4.0]; 3],
            color: [0.5, 0.25, 0.125, 1.0],
            vertex_buffer: 0xaaaa,
            index_buffer: 0xbbbb,
        };
        let bytes = bytemuck::bytes_of(&view);
        assert_eq!(&bytes[48..52], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[64..72], &0xaaaau64.to_le_bytes());
        assert_eq!(&bytes[72..80], &0xbbbbu64.to_le_bytes());
    }

    #[test]
    fn last_group_member_index_fits_instance_record() {
        let last = u32::try_from(MAX_GROUP_MEMBERS - 1).unwrap();
        let packed = lumen_gpu::InstanceCustomIndexAndMask::new(last, 0xff);

        assert_eq!(MAX_GROUP_MEMBERS, 1 << 24);
        assert_eq!(packed.custom_index(), last);
        assert_eq!(packed.mask(), 0xff);
    }

    #[test]
    fn normal_columns_take_leading_columns() {
        let model = na::Matrix4::new_translation(&na::Vector3::new(1.0, 2.0, 3.0))
            * na::Matrix4::new_nonuniform_scaling(&na::Vector3::new(2.0, 4.0, 0.5));
        let normal = model.try_inverse().unwrap().transpose();

        let expected = [
            [0.5, 0.0, 0.0, -0.5],
            [0.0, 0.25, 0.0, -0.5],
            [0.0, 0.0, 2.0, -6.0],
        ];

        let columns = normal_columns(&normal);
        for (column, expected) in columns.iter().zip(&expected) {
            for (a, b) in column.iter().zip(expected) {
                assert!((a - b).abs() < 1e-5, "{:?} != {:?}", column, expected);
            }
        }
    }
}
