//! Records shared with shaders through the uniform and random state
//! bindings.

use {
    crate::camera::Camera,
    bytemuck::{Pod, Zeroable},
    nalgebra as na,
    rand::{rngs::StdRng, Rng as _, SeedableRng as _},
};

/// Target image as seen by shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageView {
    /// Device address of RGBA32F texels.
    pub data: u64,
    pub width: i32,
    pub height: i32,
}

unsafe impl Zeroable for ImageView {}
unsafe impl Pod for ImageView {}

/// Per-frame uniform parameters. std140 compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RayGenParams {
    pub origin: [f32; 4],
    pub upper_left: [f32; 4],
    pub ux: [f32; 4],
    pub uy: [f32; 4],
    pub target: ImageView,
    pub num_iter: i32,
    pub _pad: [i32; 3],
}

unsafe impl Zeroable for RayGenParams {}
unsafe impl Pod for RayGenParams {}

fn point(v: &na::Vector3<f32>) -> [f32; 4] {
    [v.x, v.y, v.z, 1.0]
}

impl RayGenParams {
    pub fn new(camera: &Camera, target: ImageView, num_iter: i32) -> Self {
        RayGenParams {
            origin: point(&camera.origin),
            upper_left: point(&camera.upper_left),
            ux: point(&camera.ux),
            uy: point(&camera.uy),
            target,
            num_iter,
            _pad: [0; 3],
        }
    }
}

/// Xorwow generator state of one pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RandState {
    pub d: u32,
    pub v: [u32; 5],
}

unsafe impl Zeroable for RandState {}
unsafe impl Pod for RandState {}

/// Deterministic states for `count` pixels.
/// The `v` words of a state are never all zero.
pub fn seed_states(seed: u64, count: usize) -> Vec<RandState> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|_| {
            let d = rng.gen();
            let mut v: [u32; 5] = rng.gen();
            while v == [0; 5] {
                v = rng.gen();
            }
            RandState { d, v }
        })
        .collect()
}
