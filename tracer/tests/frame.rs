use {
    lumen::{
        accel::AccelerationHandle,
        bindings::{
            PARAMS_BINDING, RAND_STATES_BINDING, SPHERES_BINDING, TLAS_BINDING,
            TRIANGLES_BINDING,
        },
        gpu::{
            AccelerationStructureInstance,
            AccelerationStructureMemoryRequirementsType as Requirements,
            AccessFlags, Extent3d, GeometryInstanceFlags, MemoryBarrier,
            PipelineStageFlags, SPIRV_MAGIC,
        },
        params::{seed_states, RayGenParams},
        shaders, Context, Error, HitGroup, Image, ImplicitSphere, PathTracer,
        Scene, TracerConfig, TriangleMesh, Vertex,
    },
    lumen_soft::{BindPoint, Inspector, Region, ResourceKind, SoftConfig, SoftEvent},
    nalgebra as na,
    tempfile::TempDir,
};

const WIDTH: u32 = 20;
const HEIGHT: u32 = 10;

struct Fixture {
    ctx: Context,
    inspector: Inspector,
    shader_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (device, queue, inspector) = lumen_soft::create(SoftConfig::default());

        let shader_dir = tempfile::tempdir().unwrap();
        for (name, _) in shaders::ALL.iter() {
            let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
            code.extend_from_slice(&[0; 16]);
            std::fs::write(shader_dir.path().join(name), code).unwrap();
        }

        Fixture {
            ctx: Context::new(device, queue),
            inspector,
            shader_dir,
        }
    }

    fn config(&self) -> TracerConfig {
        TracerConfig {
            shader_dir: self.shader_dir.path().to_owned(),
            ..TracerConfig::default()
        }
    }

    fn image(&self) -> Image {
        Image::new(&self.ctx, WIDTH, HEIGHT, None).unwrap()
    }

    fn quad(&mut self, model: na::Matrix4<f32>) -> TriangleMesh {
        let normal = [0.0, 0.0, 1.0];
        let vertices = [
            Vertex::new([-1.0, -1.0, 0.0], normal, [0.0, 0.0]),
            Vertex::new([1.0, -1.0, 0.0], normal, [1.0, 0.0]),
            Vertex::new([1.0, 1.0, 0.0], normal, [1.0, 1.0]),
            Vertex::new([-1.0, 1.0, 0.0], normal, [0.0, 1.0]),
        ];
        TriangleMesh::new(&mut self.ctx, model, &vertices, &[0, 1, 2, 0, 2, 3])
            .unwrap()
    }

    /// Row of `quads` unit quads along X, two triangles each.
    fn strip(&mut self, quads: u32) -> TriangleMesh {
        let normal = [0.0, 0.0, 1.0];
        let vertices: Vec<_> = (0..=quads)
            .flat_map(|x| {
                let x = x as f32;
                [
                    Vertex::new([x, 0.0, 0.0], normal, [x, 0.0]),
                    Vertex::new([x, 1.0, 0.0], normal, [x, 1.0]),
                ]
            })
            .collect();
        let indices: Vec<u32> = (0..quads)
            .flat_map(|q| {
                let i = q * 2;
                [i, i + 2, i + 3, i, i + 3, i + 1]
            })
            .collect();

        TriangleMesh::new(&mut self.ctx, translation(0.0, 0.0, -4.0), &vertices, &indices)
            .unwrap()
    }

    fn sphere(&mut self, model: na::Matrix4<f32>) -> ImplicitSphere {
        ImplicitSphere::with_color(&mut self.ctx, model, na::Vector3::new(1.0, 0.5, 0.25))
            .unwrap()
    }

    fn tracer(
        &mut self,
        image: &Image,
        meshes: &[&TriangleMesh],
        spheres: &[&ImplicitSphere],
    ) -> PathTracer {
        let config = self.config();
        PathTracer::new(&mut self.ctx, &config, image, meshes, spheres).unwrap()
    }
}

fn translation(x: f32, y: f32, z: f32) -> na::Matrix4<f32> {
    na::Matrix4::new_translation(&na::Vector3::new(x, y, z))
}

/// Result holds the object, scratch fits both a build and an update.
fn assert_sized_by_device(ctx: &Context, handle: &AccelerationHandle) {
    let required = |ty| {
        ctx.get_acceleration_structure_memory_requirements(handle.structure(), ty)
            .size
    };
    let build = required(Requirements::BuildScratch);
    let update = required(Requirements::UpdateScratch);

    assert!(update > build, "update scratch {} <= build {}", update, build);
    assert_eq!(handle.result_buffer().info().size, required(Requirements::Object));
    assert_eq!(handle.scratch_buffer().info().size, update);
}

fn domain_error(report: &eyre::Report) -> &Error {
    report
        .downcast_ref::<Error>()
        .unwrap_or_else(|| panic!("Unexpected error: {:?}", report))
}

#[test]
fn instances_are_grouped_by_hit_group() {
    let mut fx = Fixture::new();
    let sphere = fx.sphere(translation(0.0, 0.0, -3.0));
    let near = fx.quad(translation(0.0, 0.0, -2.0));
    let far = fx.quad(translation(0.0, 0.0, -5.0));

    let scene = Scene::new(&mut fx.ctx, &[&near, &far], &[&sphere]).unwrap();
    assert_eq!(scene.count(HitGroup::Triangles), 2);
    assert_eq!(scene.count(HitGroup::Spheres), 1);
    assert!(fx.inspector.is_built(scene.tlas().structure()));

    let instances = fx.inspector.instances(scene.tlas().structure());
    let expected = [
        (near.geometry(), 0, HitGroup::Triangles),
        (far.geometry(), 1, HitGroup::Triangles),
        (sphere.geometry(), 0, HitGroup::Spheres),
    ];
    assert_eq!(instances.len(), expected.len());

    for (instance, (geometry, index, group)) in instances.iter().zip(&expected) {
        assert_eq!(instance.custom_index_mask.custom_index(), *index);
        assert_eq!(instance.custom_index_mask.mask(), 0xff);
        assert_eq!(
            instance.shader_binding_offset_flags.shader_binding_offset(),
            group.index()
        );
        assert_eq!(
            instance.shader_binding_offset_flags.flags(),
            GeometryInstanceFlags::TRIANGLE_CULL_DISABLE
        );
        assert_eq!(
            instance.acceleration_structure_reference,
            geometry.blas().reference(&fx.ctx).unwrap().get()
        );
        assert_eq!(instance.transform.matrix[2][3], geometry.model()[(2, 3)]);
    }
}

#[test]
fn acceleration_memory_follows_device_requirements() {
    let mut fx = Fixture::new();
    let strip = fx.strip(5);
    let spheres: Vec<_> = (0..5)
        .map(|i| fx.sphere(translation(i as f32 * 2.0, 0.0, -6.0)))
        .collect();
    let sphere_refs: Vec<_> = spheres.iter().collect();

    assert_eq!(strip.primitives().primitive_count(), 10);
    assert!(strip.geometry().blas().instance_buffer().is_none());
    assert_eq!(
        fx.inspector
            .primitive_count(strip.geometry().acceleration_structure()),
        10
    );
    assert_sized_by_device(&fx.ctx, strip.geometry().blas());

    let scene = Scene::new(&mut fx.ctx, &[&strip], &sphere_refs).unwrap();
    assert_eq!(scene.instance_count(), 6);
    assert_eq!(scene.bottom_levels().len(), 6);
    assert_eq!(
        scene.mesh_buffers(),
        [strip.vertex_buffer().clone(), strip.index_buffer().clone()]
    );
    assert_sized_by_device(&fx.ctx, scene.tlas());

    let instances = scene.tlas().instance_buffer().unwrap();
    assert_eq!(
        instances.info().size,
        6 * std::mem::size_of::<AccelerationStructureInstance>() as u64
    );
    assert_eq!(fx.inspector.instances(scene.tlas().structure()).len(), 6);
}

#[test]
fn empty_hit_groups_are_not_bound() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));
    let sphere = fx.sphere(translation(0.0, 0.0, -3.0));

    let tracer = fx.tracer(&image, &[&mesh], &[]);
    assert!(tracer.scene().sphere_views().is_none());
    assert_eq!(
        fx.inspector.written_bindings(tracer.bindings().set()),
        [TLAS_BINDING, PARAMS_BINDING, TRIANGLES_BINDING, RAND_STATES_BINDING]
    );

    let tracer = fx.tracer(&image, &[], &[&sphere]);
    assert!(tracer.scene().triangle_views().is_none());
    assert_eq!(
        fx.inspector.written_bindings(tracer.bindings().set()),
        [TLAS_BINDING, PARAMS_BINDING, SPHERES_BINDING, RAND_STATES_BINDING]
    );
}

#[test]
fn shader_binding_table_holds_one_record_per_group() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));

    let tracer = fx.tracer(&image, &[&mesh], &[]);
    let buffer = tracer.trace_pipeline().shader_binding_table_buffer();
    assert_eq!(buffer.info().size, 5 * 16);
}

#[test]
fn frame_traces_passes_then_post_processes() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));
    let sphere = fx.sphere(translation(1.0, 0.0, -3.0));

    let mut tracer = fx.tracer(&image, &[&mesh], &[&sphere]);
    fx.inspector.take_events();

    tracer.trace(&mut fx.ctx, 3).unwrap();

    let accumulated = SoftEvent::PipelineBarrier {
        src: PipelineStageFlags::RAY_TRACING_SHADER,
        dst: PipelineStageFlags::RAY_TRACING_SHADER
            | PipelineStageFlags::COMPUTE_SHADER,
        memory: Some(MemoryBarrier::new(
            AccessFlags::SHADER_WRITE,
            AccessFlags::SHADER_READ,
        )),
    };
    let pass = SoftEvent::TraceRays {
        extent: Extent3d {
            width: WIDTH,
            height: HEIGHT,
            depth: 1,
        },
        raygen: Region {
            offset: 0,
            size: 16,
            stride: 16,
        },
        miss: Some(Region {
            offset: 16,
            size: 32,
            stride: 16,
        }),
        hit: Some(Region {
            offset: 48,
            size: 32,
            stride: 16,
        }),
    };

    let mut expected = vec![
        SoftEvent::Submit { commands: 13 },
        SoftEvent::FillBuffer {
            buffer: fx.inspector.address(image.data()),
            offset: 0,
            size: u64::from(WIDTH * HEIGHT) * 16,
            data: 0,
        },
        SoftEvent::PipelineBarrier {
            src: PipelineStageFlags::TRANSFER,
            dst: PipelineStageFlags::RAY_TRACING_SHADER,
            memory: Some(MemoryBarrier::new(
                AccessFlags::TRANSFER_WRITE,
                AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            )),
        },
        SoftEvent::BindPipeline {
            bind_point: BindPoint::RayTracing,
        },
        SoftEvent::BindDescriptorSets {
            bind_point: BindPoint::RayTracing,
            first_set: 0,
            count: 1,
        },
    ];
    for _ in 0..3 {
        expected.push(pass.clone());
        expected.push(accumulated.clone());
    }
    expected.extend([
        SoftEvent::BindPipeline {
            bind_point: BindPoint::Compute,
        },
        SoftEvent::BindDescriptorSets {
            bind_point: BindPoint::Compute,
            first_set: 0,
            count: 1,
        },
        SoftEvent::Dispatch { x: 2, y: 1, z: 1 },
        SoftEvent::WaitIdle,
    ]);

    assert_eq!(fx.inspector.take_events(), expected);
}

#[test]
fn frame_parameters_reach_uniform_buffer() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let sphere = fx.sphere(translation(0.0, 0.0, -3.0));

    let mut tracer = fx.tracer(&image, &[], &[&sphere]);
    tracer.set_camera(
        na::Vector3::new(0.0, 0.0, 4.0),
        na::Vector3::new(0.0, 0.0, -3.0),
        na::Vector3::y(),
        40.0,
    );
    tracer.trace(&mut fx.ctx, 7).unwrap();

    let bytes = fx.inspector.buffer_bytes(tracer.params_buffer());
    let params: RayGenParams = bytemuck::pod_read_unaligned(&bytes);

    assert_eq!(params.num_iter, 7);
    assert_eq!(params.origin, [0.0, 0.0, 4.0, 1.0]);
    assert_eq!(params.target.data, fx.inspector.address(image.data()).get());
    assert_eq!(params.target.width, WIDTH as i32);
    assert_eq!(params.target.height, HEIGHT as i32);

    let camera = tracer.camera();
    assert_eq!(params.ux[..3], camera.ux.as_slice()[..]);
    assert_eq!(params.uy[..3], camera.uy.as_slice()[..]);
}

#[test]
fn repeated_frames_start_from_identical_state() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));
    let config = fx.config();

    let mut tracer = fx.tracer(&image, &[&mesh], &[]);

    let snapshot = |fx: &Fixture, tracer: &PathTracer| {
        (
            fx.inspector.buffer_bytes(tracer.params_buffer()),
            fx.inspector.buffer_bytes(tracer.rand_states_buffer()),
            fx.inspector.buffer_bytes(image.data()),
        )
    };

    tracer.trace(&mut fx.ctx, 2).unwrap();
    let first = snapshot(&fx, &tracer);
    tracer.trace(&mut fx.ctx, 2).unwrap();
    let second = snapshot(&fx, &tracer);

    assert_eq!(first, second);

    let seeded = seed_states(config.seed, (WIDTH * HEIGHT) as usize);
    assert_eq!(first.1, bytemuck::cast_slice::<_, u8>(&seeded));

    assert!(!fx
        .inspector
        .events()
        .iter()
        .any(|event| matches!(event, SoftEvent::HostAccessWhilePending { .. })));
}

#[test]
fn trace_without_iterations_is_rejected() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));

    let mut tracer = fx.tracer(&image, &[&mesh], &[]);
    fx.inspector.take_events();

    assert!(tracer.trace(&mut fx.ctx, 0).is_err());
    assert!(fx.inspector.take_events().is_empty());
}

#[test]
fn cleared_image_reads_back_zeros() {
    let mut fx = Fixture::new();
    let len = (WIDTH * HEIGHT * 4) as usize;

    let image = Image::new(&fx.ctx, WIDTH, HEIGHT, Some(&vec![0.5; len])).unwrap();
    let mut texels = vec![0.0; len];
    image.to_host(&fx.ctx, &mut texels).unwrap();
    assert!(texels.iter().all(|&t| t == 0.5));

    image.clear(&mut fx.ctx).unwrap();
    image.to_host(&fx.ctx, &mut texels).unwrap();
    assert!(texels.iter().all(|&t| t == 0.0));
}

#[test]
fn image_rejects_bad_extent_and_data() {
    let fx = Fixture::new();

    let report = Image::new(&fx.ctx, 0, HEIGHT, None).unwrap_err();
    assert!(matches!(domain_error(&report), Error::EmptyImage { .. }));

    let report = Image::new(&fx.ctx, 2, 2, Some(&[0.0; 15])).unwrap_err();
    assert!(matches!(
        domain_error(&report),
        Error::ImageDataSize {
            expected: 16,
            actual: 15
        }
    ));

    let image = Image::new(&fx.ctx, 2, 2, None).unwrap();
    let report = image.to_host(&fx.ctx, &mut [0.0; 4]).unwrap_err();
    assert!(matches!(domain_error(&report), Error::ImageDataSize { .. }));
}

#[test]
fn missing_shader_is_reported() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));

    std::fs::remove_file(fx.shader_dir.path().join(shaders::FINAL)).unwrap();

    let config = fx.config();
    let report =
        PathTracer::new(&mut fx.ctx, &config, &image, &[&mesh], &[]).unwrap_err();

    match domain_error(&report) {
        Error::ShaderMissing { path, .. } => {
            assert!(path.ends_with(shaders::FINAL))
        }
        other => panic!("Unexpected error: {}", other),
    }
}

#[test]
fn empty_scene_is_rejected() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let config = fx.config();

    let report = PathTracer::new(&mut fx.ctx, &config, &image, &[], &[]).unwrap_err();
    assert!(matches!(domain_error(&report), Error::EmptyScene));
}

#[test]
fn meshes_are_validated() {
    let mut fx = Fixture::new();
    let normal = [0.0, 0.0, 1.0];
    let vertices = [
        Vertex::new([0.0, 0.0, 0.0], normal, [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], normal, [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], normal, [0.0, 1.0]),
    ];
    let identity = na::Matrix4::identity();

    let report =
        TriangleMesh::new(&mut fx.ctx, na::Matrix4::zeros(), &vertices, &[0, 1, 2])
            .unwrap_err();
    assert!(matches!(domain_error(&report), Error::SingularTransform));

    let report =
        TriangleMesh::new(&mut fx.ctx, identity, &vertices, &[0, 1]).unwrap_err();
    assert!(matches!(domain_error(&report), Error::PartialTriangle { count: 2 }));

    let report =
        TriangleMesh::new(&mut fx.ctx, identity, &vertices, &[0, 1, 3]).unwrap_err();
    assert!(matches!(
        domain_error(&report),
        Error::IndexOutOfRange { index: 3, .. }
    ));

    let report = TriangleMesh::new(&mut fx.ctx, identity, &[], &[]).unwrap_err();
    assert!(matches!(domain_error(&report), Error::EmptyMesh));
}

#[test]
fn normal_matrix_is_inverse_transpose() {
    let mut fx = Fixture::new();
    let model = translation(1.0, 2.0, -3.0)
        * na::Matrix4::new_nonuniform_scaling(&na::Vector3::new(2.0, 1.0, 0.5));

    let sphere = fx.sphere(model);
    let geometry = sphere.geometry();
    let expected = model.try_inverse().unwrap().transpose();

    assert!((geometry.normal_matrix() - expected).abs().max() < 1e-5);
    assert_eq!(geometry.color(), &na::Vector3::new(1.0, 0.5, 0.25));
    assert_eq!(fx.inspector.primitive_count(geometry.acceleration_structure()), 1);
}

#[test]
fn resources_are_released_with_their_owners() {
    let mut fx = Fixture::new();
    let image = fx.image();
    let mesh = fx.quad(translation(0.0, 0.0, -2.0));
    let sphere = fx.sphere(translation(1.0, 0.0, -3.0));

    let mut tracer = fx.tracer(&image, &[&mesh], &[&sphere]);
    tracer.trace(&mut fx.ctx, 1).unwrap();

    drop(mesh);
    drop(sphere);
    assert_eq!(fx.inspector.live(ResourceKind::AccelerationStructure), 3);

    drop(tracer);
    drop(image);
    assert_eq!(fx.inspector.live(ResourceKind::AccelerationStructure), 0);
    assert_eq!(fx.inspector.live(ResourceKind::Buffer), 0);
    assert_eq!(fx.inspector.live(ResourceKind::RayTracingPipeline), 0);
    assert_eq!(fx.inspector.allocated(), 0);
}
