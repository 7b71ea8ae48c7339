//! Path tracer core.
//!
//! Builds bottom level acceleration structures for triangle meshes and
//! implicit spheres, aggregates them into one top level structure and traces
//! the scene with a ray tracing pipeline followed by a compute post-process
//! pass. Every GPU operation goes through [`lumen_gpu`], so any backend
//! implementing its traits can drive the tracer.

pub mod accel;
pub mod bindings;
pub mod camera;
pub mod config;
pub mod context;
pub mod error;
pub mod geometry;
pub mod image;
pub mod params;
pub mod pipeline;
pub mod scene;
pub mod shaders;
pub mod tracer;

pub use self::{
    camera::Camera,
    config::TracerConfig,
    context::Context,
    error::Error,
    geometry::{HitGroup, ImplicitSphere, TriangleMesh, Vertex},
    image::Image,
    scene::Scene,
    tracer::PathTracer,
};

pub use lumen_gpu as gpu;
