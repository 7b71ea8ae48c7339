use super::*;
use lumen_gpu::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spirv() -> ShaderModuleInfo {
    let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
    code.extend_from_slice(&[0; 12]);
    ShaderModuleInfo::spirv(code)
}

fn buffer_info(size: u64, usage: BufferUsage, memory: MemoryUsageFlags) -> BufferInfo {
    BufferInfo {
        align: 255,
        size,
        usage,
        memory,
    }
}

fn device_buffer(device: &Device, size: u64, usage: BufferUsage) -> Buffer {
    device
        .create_buffer(buffer_info(
            size,
            usage | BufferUsage::SHADER_DEVICE_ADDRESS,
            MemoryUsageFlags::FAST_DEVICE_ACCESS,
        ))
        .unwrap()
}

fn upload<T: bytemuck::Pod>(device: &Device, data: &[T]) -> Buffer {
    device
        .create_buffer_static(
            buffer_info(
                std::mem::size_of_val(data) as u64,
                BufferUsage::RAY_TRACING
                    | BufferUsage::STORAGE
                    | BufferUsage::UNIFORM
                    | BufferUsage::SHADER_DEVICE_ADDRESS,
                MemoryUsageFlags::UPLOAD,
            ),
            data,
        )
        .unwrap()
}

fn submit(queue: &mut Queue, encoder: Encoder<'_>) -> Result<(), SubmitError> {
    let mut command_buffer = queue.create_command_buffer().unwrap();
    encoder.record(&mut command_buffer).unwrap();
    queue.submit(&command_buffer)?;
    queue.wait_idle().unwrap();
    Ok(())
}

/// Acceleration structure with bound memory and its scratch buffer.
struct Allocated {
    acceleration_structure: AccelerationStructure,
    scratch: Buffer,
}

fn allocate(device: &Device, info: AccelerationStructureInfo) -> Allocated {
    let acceleration_structure =
        device.create_acceleration_structure(info).unwrap();

    let object = device.get_acceleration_structure_memory_requirements(
        &acceleration_structure,
        AccelerationStructureMemoryRequirementsType::Object,
    );
    let build = device.get_acceleration_structure_memory_requirements(
        &acceleration_structure,
        AccelerationStructureMemoryRequirementsType::BuildScratch,
    );

    let memory = device_buffer(device, object.size, BufferUsage::RAY_TRACING);
    device
        .bind_acceleration_structure_memory(&acceleration_structure, &memory, 0)
        .unwrap();

    Allocated {
        acceleration_structure,
        scratch: device_buffer(device, build.size, BufferUsage::RAY_TRACING),
    }
}

fn sphere_blas(device: &Device, queue: &mut Queue) -> (AccelerationStructure, Buffer) {
    let aabbs = upload(device, &[AabbPositions::cube(1.0)]);
    let allocated = allocate(
        device,
        AccelerationStructureInfo {
            level: AccelerationStructureLevel::Bottom,
            flags: AccelerationStructureFlags::PREFER_FAST_TRACE,
            geometries: vec![AccelerationStructureGeometryInfo::AABBs {
                max_primitive_count: 1,
            }],
        },
    );

    let geometries = [AccelerationStructureGeometry::AABBs {
        flags: GeometryFlags::OPAQUE,
        data: device.get_buffer_device_address(&aabbs).unwrap(),
        stride: 24,
        primitive_count: 1,
    }];

    let infos = [AccelerationStructureBuildGeometryInfo {
        src: None,
        dst: allocated.acceleration_structure.clone(),
        geometries: &geometries,
        scratch: device.get_buffer_device_address(&allocated.scratch).unwrap(),
    }];

    let mut encoder = queue.create_encoder();
    encoder.build_acceleration_structure(&infos);
    submit(queue, encoder).unwrap();

    (allocated.acceleration_structure, aabbs)
}

fn tlas(
    device: &Device,
    queue: &mut Queue,
    instances: &[AccelerationStructureInstance],
) -> Result<AccelerationStructure, SubmitError> {
    let data = upload(device, instances);
    let count = instances.len() as u32;
    let allocated = allocate(
        device,
        AccelerationStructureInfo {
            level: AccelerationStructureLevel::Top,
            flags: AccelerationStructureFlags::PREFER_FAST_TRACE,
            geometries: vec![AccelerationStructureGeometryInfo::Instances {
                max_primitive_count: count,
            }],
        },
    );

    let geometries = [AccelerationStructureGeometry::Instances {
        flags: GeometryFlags::OPAQUE,
        data: device.get_buffer_device_address(&data).unwrap(),
        primitive_count: count,
    }];

    let infos = [AccelerationStructureBuildGeometryInfo {
        src: None,
        dst: allocated.acceleration_structure.clone(),
        geometries: &geometries,
        scratch: device.get_buffer_device_address(&allocated.scratch).unwrap(),
    }];

    let mut encoder = queue.create_encoder();
    encoder.build_acceleration_structure(&infos);
    submit(queue, encoder)?;

    Ok(allocated.acceleration_structure)
}

#[test]
fn buffers_get_distinct_aligned_addresses() {
    let (device, _queue, _inspector) = create(SoftConfig::default());

    let a = device_buffer(&device, 100, BufferUsage::STORAGE);
    let b = device_buffer(&device, 1000, BufferUsage::STORAGE);

    let a = device.get_buffer_device_address(&a).unwrap().get();
    let b = device.get_buffer_device_address(&b).unwrap().get();

    assert_ne!(a, b);
    assert_eq!(a & 255, 0);
    assert_eq!(b & 255, 0);
    assert!(b >= a + 100 || a >= b + 1000);

    let plain = device
        .create_buffer(buffer_info(
            16,
            BufferUsage::STORAGE,
            MemoryUsageFlags::FAST_DEVICE_ACCESS,
        ))
        .unwrap();
    assert_eq!(device.get_buffer_device_address(&plain), None);
}

#[test]
fn memory_budget_is_enforced() {
    let (device, _queue, inspector) = create(SoftConfig {
        memory_budget: 1024,
        ..SoftConfig::default()
    });

    let first = device_buffer(&device, 1024, BufferUsage::STORAGE);
    assert_eq!(inspector.allocated(), 1024);

    let err = device
        .create_buffer(buffer_info(
            4,
            BufferUsage::STORAGE,
            MemoryUsageFlags::FAST_DEVICE_ACCESS,
        ))
        .unwrap_err();
    assert_eq!(err, OutOfMemory);

    drop(first);
    assert_eq!(inspector.allocated(), 0);
    device_buffer(&device, 512, BufferUsage::STORAGE);
}

#[test]
fn host_memory_access() {
    let (device, _queue, _inspector) = create(SoftConfig::default());

    let buffer = upload(&device, &[0u32; 4]);
    device.write_memory(&buffer, 4, &[7u32, 9]).unwrap();

    let mut data = [0u32; 4];
    device.read_memory(&buffer, 0, &mut data).unwrap();
    assert_eq!(data, [0, 7, 9, 0]);

    assert_eq!(
        device.write_memory(&buffer, 12, &[1u32, 2]),
        Err(MappingError::OutOfBounds {
            offset: 12,
            size: 8,
            buffer_size: 16
        })
    );

    let private = device_buffer(&device, 16, BufferUsage::STORAGE);
    assert_eq!(
        device.write_memory(&private, 0, &[1u32]),
        Err(MappingError::NonHostVisible)
    );
}

#[test]
fn release_is_logged() {
    init_tracing();
    let (device, _queue, inspector) = create(SoftConfig::default());

    let buffer = device_buffer(&device, 64, BufferUsage::STORAGE);
    let clone = buffer.clone();
    assert_eq!(inspector.live(ResourceKind::Buffer), 1);

    drop(buffer);
    assert_eq!(inspector.live(ResourceKind::Buffer), 1);

    drop(clone);
    assert_eq!(inspector.live(ResourceKind::Buffer), 0);
    assert_eq!(
        inspector.take_events(),
        vec![SoftEvent::Release {
            kind: ResourceKind::Buffer
        }]
    );
}

#[test]
fn acceleration_structure_memory_binding() {
    let (device, _queue, _inspector) = create(SoftConfig::default());

    let blas = device
        .create_acceleration_structure(AccelerationStructureInfo {
            level: AccelerationStructureLevel::Bottom,
            flags: AccelerationStructureFlags::empty(),
            geometries: vec![AccelerationStructureGeometryInfo::AABBs {
                max_primitive_count: 2,
            }],
        })
        .unwrap();

    let requirements = device.get_acceleration_structure_memory_requirements(
        &blas,
        AccelerationStructureMemoryRequirementsType::Object,
    );
    assert_eq!(requirements.size, 256 + 64 * 2);
    assert_eq!(
        device
            .get_acceleration_structure_memory_requirements(
                &blas,
                AccelerationStructureMemoryRequirementsType::UpdateScratch,
            )
            .size,
        64 + 48 * 2
    );

    assert_eq!(device.get_acceleration_structure_device_address(&blas), None);

    let storage = device_buffer(&device, requirements.size, BufferUsage::STORAGE);
    assert_eq!(
        device.bind_acceleration_structure_memory(&blas, &storage, 0),
        Err(BindMemoryError::MissingUsage)
    );

    let small = device_buffer(&device, 256, BufferUsage::RAY_TRACING);
    assert_eq!(
        device.bind_acceleration_structure_memory(&blas, &small, 0),
        Err(BindMemoryError::RegionTooSmall {
            required: 384,
            available: 256
        })
    );

    let memory = device_buffer(&device, 1024, BufferUsage::RAY_TRACING);
    device
        .bind_acceleration_structure_memory(&blas, &memory, 256)
        .unwrap();
    assert!(device.get_acceleration_structure_device_address(&blas).is_some());

    assert_eq!(
        device.bind_acceleration_structure_memory(&blas, &memory, 0),
        Err(BindMemoryError::AlreadyBound)
    );
}

#[test]
fn top_level_build_records_instances() {
    init_tracing();
    let (device, mut queue, inspector) = create(SoftConfig::default());

    let (blas, _aabbs) = sphere_blas(&device, &mut queue);
    assert!(inspector.is_built(&blas));
    assert_eq!(inspector.primitive_count(&blas), 1);

    let address = device.get_acceleration_structure_device_address(&blas).unwrap();
    let instances = [
        AccelerationStructureInstance::new(address).with_custom_index(0, 0xff),
        AccelerationStructureInstance::new(address)
            .with_custom_index(1, 0xff)
            .with_shader_binding(1, GeometryInstanceFlags::TRIANGLE_CULL_DISABLE),
    ];

    let tlas = tlas(&device, &mut queue, &instances).unwrap();
    assert!(inspector.is_built(&tlas));
    assert_eq!(inspector.primitive_count(&tlas), 2);
    assert_eq!(inspector.instances(&tlas), instances);

    let builds: Vec<_> = inspector
        .events()
        .into_iter()
        .filter(|e| matches!(e, SoftEvent::BuildAccelerationStructure { .. }))
        .collect();
    assert_eq!(
        builds,
        [
            SoftEvent::BuildAccelerationStructure {
                level: AccelerationStructureLevel::Bottom,
                primitive_count: 1,
                update: false,
            },
            SoftEvent::BuildAccelerationStructure {
                level: AccelerationStructureLevel::Top,
                primitive_count: 2,
                update: false,
            },
        ]
    );
}

#[test]
fn top_level_build_rejects_unbuilt_instances() {
    let (device, mut queue, _inspector) = create(SoftConfig::default());

    let unbuilt = allocate(
        &device,
        AccelerationStructureInfo {
            level: AccelerationStructureLevel::Bottom,
            flags: AccelerationStructureFlags::empty(),
            geometries: vec![AccelerationStructureGeometryInfo::AABBs {
                max_primitive_count: 1,
            }],
        },
    );
    let address = device
        .get_acceleration_structure_device_address(&unbuilt.acceleration_structure)
        .unwrap();

    match tlas(&device, &mut queue, &[AccelerationStructureInstance::new(address)]) {
        Err(SubmitError::InvalidCommand { index, .. }) => assert_eq!(index, 0),
        other => panic!("Unexpected result {:?}", other),
    }
}

#[test]
fn build_requires_scratch() {
    let (device, mut queue, _inspector) = create(SoftConfig::default());

    let aabbs = upload(&device, &[AabbPositions::cube(1.0)]);
    let allocated = allocate(
        &device,
        AccelerationStructureInfo {
            level: AccelerationStructureLevel::Bottom,
            flags: AccelerationStructureFlags::empty(),
            geometries: vec![AccelerationStructureGeometryInfo::AABBs {
                max_primitive_count: 1,
            }],
        },
    );
    let small = device_buffer(&device, 16, BufferUsage::RAY_TRACING);

    let geometries = [AccelerationStructureGeometry::AABBs {
        flags: GeometryFlags::OPAQUE,
        data: device.get_buffer_device_address(&aabbs).unwrap(),
        stride: 24,
        primitive_count: 1,
    }];
    let infos = [AccelerationStructureBuildGeometryInfo {
        src: None,
        dst: allocated.acceleration_structure.clone(),
        geometries: &geometries,
        scratch: device.get_buffer_device_address(&small).unwrap(),
    }];

    let mut encoder = queue.create_encoder();
    encoder.build_acceleration_structure(&infos);
    assert!(matches!(
        submit(&mut queue, encoder),
        Err(SubmitError::InvalidCommand { index: 0, .. })
    ));
}

#[test]
fn descriptor_pool_is_exhausted() {
    let (device, _queue, _inspector) = create(SoftConfig::default());

    let layout = device
        .create_descriptor_set_layout(DescriptorSetLayoutInfo {
            bindings: vec![DescriptorSetLayoutBinding {
                binding: 0,
                ty: DescriptorType::UniformBuffer,
                count: 1,
                stages: ShaderStageFlags::RAYGEN,
                flags: DescriptorBindingFlags::empty(),
            }],
        })
        .unwrap();

    let pool = device
        .create_descriptor_pool(DescriptorPoolInfo::for_layout(layout.info(), 1))
        .unwrap();

    let info = DescriptorSetInfo {
        pool,
        layout,
    };

    let set = device.create_descriptor_set(info.clone()).unwrap();
    assert_eq!(
        device.create_descriptor_set(info.clone()).unwrap_err(),
        CreateDescriptorSetError::OutOfPoolMemory
    );

    drop(set);
    device.create_descriptor_set(info).unwrap();
}

#[test]
fn descriptor_set_releases_pool_and_layout_after_itself() {
    let (device, _queue, inspector) = create(SoftConfig::default());

    let layout = device
        .create_descriptor_set_layout(DescriptorSetLayoutInfo::default())
        .unwrap();
    let pool = device
        .create_descriptor_pool(DescriptorPoolInfo {
            max_sets: 1,
            sizes: Default::default(),
        })
        .unwrap();
    let set = device
        .create_descriptor_set(DescriptorSetInfo { pool, layout })
        .unwrap();

    inspector.take_events();
    drop(set);

    assert_eq!(
        inspector.take_events(),
        [
            SoftEvent::Release {
                kind: ResourceKind::DescriptorSet
            },
            SoftEvent::Release {
                kind: ResourceKind::DescriptorPool
            },
            SoftEvent::Release {
                kind: ResourceKind::DescriptorSetLayout
            },
        ]
    );
}

/// Minimal ray-tracing setup: raygen and miss groups, uniform at binding 0
/// and optional storage at binding 1.
struct Trace {
    layout: PipelineLayout,
    set: DescriptorSet,
    pipeline: RayTracingPipeline,
    sbt: ShaderBindingTable,
    uniform: Buffer,
}

fn trace_setup(device: &Device) -> Trace {
    let set_layout = device
        .create_descriptor_set_layout(DescriptorSetLayoutInfo {
            bindings: vec![
                DescriptorSetLayoutBinding {
                    binding: 0,
                    ty: DescriptorType::UniformBuffer,
                    count: 1,
                    stages: ShaderStageFlags::RAYGEN,
                    flags: DescriptorBindingFlags::empty(),
                },
                DescriptorSetLayoutBinding {
                    binding: 1,
                    ty: DescriptorType::StorageBuffer,
                    count: 1,
                    stages: ShaderStageFlags::CLOSEST_HIT,
                    flags: DescriptorBindingFlags::PARTIALLY_BOUND,
                },
            ],
        })
        .unwrap();

    let pool = device
        .create_descriptor_pool(DescriptorPoolInfo::for_layout(set_layout.info(), 1))
        .unwrap();
    let set = device
        .create_descriptor_set(DescriptorSetInfo {
            pool,
            layout: set_layout.clone(),
        })
        .unwrap();

    let layout = device
        .create_pipeline_layout(PipelineLayoutInfo {
            sets: vec![set_layout],
        })
        .unwrap();

    let module = device.create_shader_module(spirv()).unwrap();
    let pipeline = device
        .create_ray_tracing_pipeline(RayTracingPipelineInfo {
            shaders: vec![
                Shader::with_main(module.clone(), ShaderStage::Raygen),
                Shader::with_main(module, ShaderStage::Miss),
            ],
            groups: vec![
                RayTracingShaderGroupInfo::Raygen { raygen: 0 },
                RayTracingShaderGroupInfo::Miss { miss: 1 },
            ],
            max_recursion_depth: 1,
            layout: layout.clone(),
        })
        .unwrap();

    let handles = device
        .get_ray_tracing_shader_group_handles(&pipeline, 0, 2)
        .unwrap();
    assert_eq!(handles.len(), 32);

    let table = upload(device, &handles[..]);
    let region = |offset| StridedBufferRegion {
        buffer: table.clone(),
        offset,
        size: 16,
        stride: 16,
    };

    Trace {
        layout,
        set,
        pipeline,
        sbt: ShaderBindingTable {
            raygen: Some(region(0)),
            miss: Some(region(16)),
            hit: None,
            callable: None,
        },
        uniform: upload(device, &[0u32; 4]),
    }
}

fn trace(queue: &mut Queue, trace: &Trace) -> Result<(), SubmitError> {
    let sets = [trace.set.clone()];
    let mut encoder = queue.create_encoder();
    encoder.bind_ray_tracing_pipeline(&trace.pipeline);
    encoder.bind_ray_tracing_descriptor_sets(&trace.layout, 0, &sets);
    encoder.trace_rays(
        &trace.sbt,
        Extent3d {
            width: 4,
            height: 2,
            depth: 1,
        },
    );
    submit(queue, encoder)
}

#[test]
fn trace_requires_written_bindings() {
    let (device, mut queue, inspector) = create(SoftConfig::default());
    let setup = trace_setup(&device);

    match trace(&mut queue, &setup) {
        Err(SubmitError::InvalidCommand { index, reason }) => {
            assert_eq!(index, 2);
            assert!(reason.contains("Binding 0"), "{}", reason);
        }
        other => panic!("Unexpected result {:?}", other),
    }

    device
        .update_descriptor_sets(&[WriteDescriptorSet {
            set: &setup.set,
            binding: 0,
            element: 0,
            descriptors: Descriptors::UniformBuffer(&[(setup.uniform.clone(), 0, 16)]),
        }])
        .unwrap();
    assert_eq!(inspector.written_bindings(&setup.set), [0]);

    inspector.take_events();
    trace(&mut queue, &setup).unwrap();

    let traces: Vec<_> = inspector
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, SoftEvent::TraceRays { .. }))
        .collect();
    assert_eq!(
        traces,
        [SoftEvent::TraceRays {
            extent: Extent3d {
                width: 4,
                height: 2,
                depth: 1
            },
            raygen: Region {
                offset: 0,
                size: 16,
                stride: 16
            },
            miss: Some(Region {
                offset: 16,
                size: 16,
                stride: 16
            }),
            hit: None,
        }]
    );
}

#[test]
fn trace_rejects_foreign_shader_group_records() {
    let (device, mut queue, _inspector) = create(SoftConfig::default());
    let mut setup = trace_setup(&device);

    device
        .update_descriptor_sets(&[WriteDescriptorSet {
            set: &setup.set,
            binding: 0,
            element: 0,
            descriptors: Descriptors::UniformBuffer(&[(setup.uniform.clone(), 0, 16)]),
        }])
        .unwrap();

    // Raygen region pointing at the miss record.
    setup.sbt.raygen = setup.sbt.miss.clone();

    match trace(&mut queue, &setup) {
        Err(SubmitError::InvalidCommand { index, reason }) => {
            assert_eq!(index, 2);
            assert!(reason.contains("Raygen"), "{}", reason);
        }
        other => panic!("Unexpected result {:?}", other),
    }
}

#[test]
fn pipeline_rejects_deep_recursion() {
    let (device, _queue, _inspector) = create(SoftConfig::default());

    let layout = device
        .create_pipeline_layout(PipelineLayoutInfo::default())
        .unwrap();
    let module = device.create_shader_module(spirv()).unwrap();

    let err = device
        .create_ray_tracing_pipeline(RayTracingPipelineInfo {
            shaders: vec![Shader::with_main(module, ShaderStage::Raygen)],
            groups: vec![RayTracingShaderGroupInfo::Raygen { raygen: 0 }],
            max_recursion_depth: 2,
            layout,
        })
        .unwrap_err();

    assert_eq!(
        err,
        CreatePipelineError::RecursionTooDeep {
            requested: 2,
            limit: 1
        }
    );
}

#[test]
fn pipeline_does_not_retain_shader_modules() {
    let (device, _queue, inspector) = create(SoftConfig::default());

    let layout = device
        .create_pipeline_layout(PipelineLayoutInfo::default())
        .unwrap();
    let module = device.create_shader_module(spirv()).unwrap();

    let pipeline = device
        .create_compute_pipeline(ComputePipelineInfo {
            shader: Shader::with_main(module, ShaderStage::Compute),
            layout,
        })
        .unwrap();

    assert_eq!(inspector.live(ResourceKind::ShaderModule), 0);
    assert_eq!(inspector.live(ResourceKind::ComputePipeline), 1);
    assert_eq!(&*pipeline.info().entry, "main");
}

#[test]
fn transfer_commands_modify_memory() {
    let (device, mut queue, inspector) = create(SoftConfig::default());

    let a = upload(&device, &[0u32; 4]);
    let b = upload(&device, &[0u32; 4]);
    let regions = [BufferCopy {
        src_offset: 0,
        dst_offset: 8,
        size: 8,
    }];

    let mut encoder = queue.create_encoder();
    encoder.fill_buffer(&a, 0, 16, 0x0101_0101);
    encoder.update_buffer(&a, 4, &[5u32]);
    encoder.copy_buffer(&a, &b, &regions);
    submit(&mut queue, encoder).unwrap();

    let mut data = [0u32; 4];
    device.read_memory(&b, 0, &mut data).unwrap();
    assert_eq!(data, [0, 0, 0x0101_0101, 5]);
    assert_eq!(
        inspector.buffer_bytes(&a)[4..8],
        5u32.to_le_bytes()
    );
}

#[test]
fn out_of_range_fill_is_rejected() {
    let (device, mut queue, _inspector) = create(SoftConfig::default());
    let buffer = upload(&device, &[0u32; 4]);

    let mut encoder = queue.create_encoder();
    encoder.fill_buffer(&buffer, 8, 16, 0);
    assert!(matches!(
        submit(&mut queue, encoder),
        Err(SubmitError::InvalidCommand { index: 0, .. })
    ));
}

#[test]
fn host_access_while_pending_is_logged() {
    let (device, mut queue, inspector) = create(SoftConfig::default());
    let buffer = upload(&device, &[0u32; 4]);

    let mut command_buffer = queue.create_command_buffer().unwrap();
    let mut encoder = queue.create_encoder();
    encoder.fill_buffer(&buffer, 0, 16, 1);
    encoder.record(&mut command_buffer).unwrap();
    queue.submit(&command_buffer).unwrap();

    device.write_memory(&buffer, 0, &[2u32]).unwrap();
    queue.wait_idle().unwrap();
    device.write_memory(&buffer, 0, &[3u32]).unwrap();

    let address = inspector.address(&buffer);
    let pending: Vec<_> = inspector
        .events()
        .into_iter()
        .filter(|e| matches!(e, SoftEvent::HostAccessWhilePending { .. }))
        .collect();
    assert_eq!(
        pending,
        [SoftEvent::HostAccessWhilePending { buffer: address }]
    );
}

#[test]
#[should_panic]
fn resubmit_before_completion_panics() {
    let (_device, mut queue, _inspector) = create(SoftConfig::default());

    let mut command_buffer = queue.create_command_buffer().unwrap();
    queue.create_encoder().record(&mut command_buffer).unwrap();
    queue.submit(&command_buffer).unwrap();
    queue.submit(&command_buffer).unwrap();
}
