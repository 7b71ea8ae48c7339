use {lumen_gpu::Extent2d, nalgebra as na};

/// Pinhole camera projected onto an image plane at unit focus distance.
///
/// `upper_left` is the corner of the top-left pixel, `ux` and `uy` step one
/// pixel right and one pixel down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub origin: na::Vector3<f32>,
    pub upper_left: na::Vector3<f32>,
    pub ux: na::Vector3<f32>,
    pub uy: na::Vector3<f32>,

    /// Right, up and backward axes.
    pub axes: [na::Vector3<f32>; 3],
}

impl Camera {
    /// Camera at `from` looking towards `at`.
    /// `vfov` is the vertical field of view in degrees.
    ///
    /// Undefined when `up` is parallel to the view direction.
    pub fn look_at(
        from: na::Vector3<f32>,
        at: na::Vector3<f32>,
        up: na::Vector3<f32>,
        vfov: f32,
        extent: Extent2d,
    ) -> Self {
        let focus_dist = 1.0;

        let theta = vfov.to_radians();
        let half_height = (theta * 0.5).tan() * focus_dist;
        let size_pix = half_height * 2.0 / extent.height as f32;
        let half_width = size_pix * extent.width as f32 * 0.5;

        let axis_z = (from - at).normalize();
        let axis_x = up.cross(&axis_z).normalize();
        let axis_y = axis_z.cross(&axis_x);

        let plane_center = from - axis_z * focus_dist;

        Camera {
            origin: from,
            upper_left: plane_center - axis_x * half_width + axis_y * half_height,
            ux: axis_x * size_pix,
            uy: -axis_y * size_pix,
            axes: [axis_x, axis_y, axis_z],
        }
    }

    /// Camera at the origin looking down `-Z` with 90 degrees field of view.
    pub fn default_for(extent: Extent2d) -> Self {
        Camera::look_at(
            na::Vector3::zeros(),
            na::Vector3::new(0.0, 0.0, -1.0),
            na::Vector3::y(),
            90.0,
            extent,
        )
    }
}
