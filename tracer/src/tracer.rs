use {
    crate::{
        bindings::ResourceBindingSet,
        camera::Camera,
        config::TracerConfig,
        context::Context,
        geometry::{ImplicitSphere, TriangleMesh},
        image::Image,
        params::{seed_states, RandState, RayGenParams},
        pipeline::{workgroups, PostProcessPipeline, TracePipeline},
        scene::Scene,
    },
    eyre::Report,
    lumen_gpu::{
        AccessFlags, Buffer, BufferInfo, BufferUsage, CommandBuffer,
        MemoryBarrier, MemoryUsageFlags, PipelineStageFlags,
    },
    nalgebra as na,
    std::mem::size_of,
};

/// Drives frames over a fixed scene into a fixed target image.
///
/// Every `trace` re-records the same command buffer and blocks until the
/// device has finished the frame.
#[derive(Debug)]
pub struct PathTracer {
    command_buffer: CommandBuffer,
    post_process: PostProcessPipeline,
    trace_pipeline: TracePipeline,
    bindings: ResourceBindingSet,
    rand_states: Buffer,
    seeded: Vec<RandState>,
    params: Buffer,
    scene: Scene,
    target: Image,
    camera: Camera,
    iterations: u32,
}

impl PathTracer {
    #[tracing::instrument(skip_all)]
    pub fn new(
        ctx: &mut Context,
        config: &TracerConfig,
        target: &Image,
        meshes: &[&TriangleMesh],
        spheres: &[&ImplicitSphere],
    ) -> Result<Self, Report> {
        let scene = Scene::new(ctx, meshes, spheres)?;

        let params = ctx.create_buffer(BufferInfo {
            align: 15,
            size: size_of::<RayGenParams>() as u64,
            usage: BufferUsage::UNIFORM,
            memory: MemoryUsageFlags::UPLOAD,
        })?;

        let pixels = target.extent().area() as usize;
        let seeded = seed_states(config.seed, pixels);

        let rand_states = ctx.create_buffer_static(
            BufferInfo {
                align: 15,
                size: (size_of::<RandState>() * pixels) as u64,
                usage: BufferUsage::STORAGE,
                memory: MemoryUsageFlags::UPLOAD,
            },
            &seeded[..],
        )?;

        let bindings = ResourceBindingSet::new(ctx, &scene, &params, &rand_states)?;
        let trace_pipeline =
            TracePipeline::new(ctx, &config.shader_dir, bindings.layout())?;
        let post_process =
            PostProcessPipeline::new(ctx, &config.shader_dir, bindings.layout())?;

        let command_buffer = ctx.queue.create_command_buffer()?;

        tracing::debug!(
            "Path tracer ready for {}x{} image",
            target.width(),
            target.height()
        );

        Ok(PathTracer {
            command_buffer,
            post_process,
            trace_pipeline,
            bindings,
            rand_states,
            seeded,
            params,
            scene,
            target: target.clone(),
            camera: Camera::default_for(target.extent()),
            iterations: config.iterations,
        })
    }

    /// Places camera at `from` looking towards `at`.
    /// `vfov` is the vertical field of view in degrees.
    pub fn set_camera(
        &mut self,
        from: na::Vector3<f32>,
        at: na::Vector3<f32>,
        up: na::Vector3<f32>,
        vfov: f32,
    ) {
        self.camera = Camera::look_at(from, at, up, vfov, self.target.extent());
    }

    /// Renders one frame accumulating `iterations` trace passes, then
    /// post-processes it. Returns once the device is idle.
    #[tracing::instrument(skip(self, ctx))]
    pub fn trace(&mut self, ctx: &mut Context, iterations: u32) -> Result<(), Report> {
        eyre::ensure!(iterations > 0, "At least one trace iteration is required");

        let params = RayGenParams::new(
            &self.camera,
            self.target.view(ctx)?,
            i32::try_from(iterations)?,
        );
        ctx.upload(&self.params, 0, std::slice::from_ref(&params))?;
        ctx.upload(&self.rand_states, 0, &self.seeded[..])?;

        let extent = self.target.extent();
        let sets = std::slice::from_ref(self.bindings.set());

        let mut encoder = ctx.queue.create_encoder();
        self.target.record_clear(&mut encoder);

        encoder.memory_barrier(
            PipelineStageFlags::TRANSFER,
            PipelineStageFlags::RAY_TRACING_SHADER,
            MemoryBarrier::new(
                AccessFlags::TRANSFER_WRITE,
                AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            ),
        );

        encoder.bind_ray_tracing_pipeline(self.trace_pipeline.pipeline());
        encoder.bind_ray_tracing_descriptor_sets(
            self.trace_pipeline.layout(),
            0,
            sets,
        );

        for _ in 0..iterations {
            encoder.trace_rays(
                self.trace_pipeline.shader_binding_table(),
                extent.into_3d(),
            );

            // Next pass and post-process read what this pass accumulated.
            encoder.memory_barrier(
                PipelineStageFlags::RAY_TRACING_SHADER,
                PipelineStageFlags::RAY_TRACING_SHADER
                    | PipelineStageFlags::COMPUTE_SHADER,
                MemoryBarrier::new(AccessFlags::SHADER_WRITE, AccessFlags::SHADER_READ),
            );
        }

        let (x, y) = workgroups(extent);
        encoder.bind_compute_pipeline(self.post_process.pipeline());
        encoder.bind_compute_descriptor_sets(self.post_process.layout(), 0, sets);
        encoder.dispatch(x, y, 1);

        encoder.record(&mut self.command_buffer)?;
        ctx.queue.submit(&self.command_buffer)?;
        ctx.queue.wait_idle()?;

        tracing::debug!("Frame traced with {} iterations", iterations);
        Ok(())
    }

    /// Renders one frame with the configured iteration count.
    pub fn trace_default(&mut self, ctx: &mut Context) -> Result<(), Report> {
        self.trace(ctx, self.iterations)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn bindings(&self) -> &ResourceBindingSet {
        &self.bindings
    }

    pub fn trace_pipeline(&self) -> &TracePipeline {
        &self.trace_pipeline
    }

    pub fn post_process(&self) -> &PostProcessPipeline {
        &self.post_process
    }

    pub fn target(&self) -> &Image {
        &self.target
    }

    pub fn params_buffer(&self) -> &Buffer {
        &self.params
    }

    pub fn rand_states_buffer(&self) -> &Buffer {
        &self.rand_states
    }
}
