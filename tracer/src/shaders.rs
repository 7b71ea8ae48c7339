use {
    crate::{context::Context, error::Error},
    eyre::{Report, WrapErr as _},
    lumen_gpu::{Shader, ShaderModuleInfo, ShaderStage},
    std::path::Path,
};

pub const RAYGEN: &str = "raygen.spv";
pub const MISS: &str = "miss.spv";
pub const MISS_SHADOW: &str = "miss_shadow.spv";
pub const CLOSEST_HIT_TRIANGLES: &str = "closesthit_triangles.spv";
pub const INTERSECTION_SPHERES: &str = "intersection_spheres.spv";
pub const CLOSEST_HIT_SPHERES: &str = "closesthit_spheres.spv";
pub const FINAL: &str = "final.spv";

/// Every binary the tracer loads, with its stage.
pub const ALL: [(&str, ShaderStage); 7] = [
    (RAYGEN, ShaderStage::Raygen),
    (MISS, ShaderStage::Miss),
    (MISS_SHADOW, ShaderStage::Miss),
    (CLOSEST_HIT_TRIANGLES, ShaderStage::ClosestHit),
    (INTERSECTION_SPHERES, ShaderStage::Intersection),
    (CLOSEST_HIT_SPHERES, ShaderStage::ClosestHit),
    (FINAL, ShaderStage::Compute),
];

/// Loads SPIR-V binary `name` from `dir` as a shader with `main` entry.
#[tracing::instrument(skip(ctx))]
pub fn load(
    ctx: &Context,
    dir: &Path,
    name: &str,
    stage: ShaderStage,
) -> Result<Shader, Report> {
    let path = dir.join(name);

    let code = std::fs::read(&path).map_err(|source| Error::ShaderMissing {
        path: path.clone(),
        source,
    })?;

    let module = ctx
        .create_shader_module(ShaderModuleInfo::spirv(code))
        .wrap_err_with(|| format!("Invalid shader '{}'", path.display()))?;

    Ok(Shader::with_main(module, stage))
}
