use {crate::geometry::HitGroup, std::path::PathBuf};

/// Inputs rejected by the tracer.
///
/// Device failures are reported by `lumen-gpu` errors wrapped into
/// `eyre::Report` alongside these.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Scene contains neither triangle meshes nor spheres")]
    EmptyScene,

    #[error("Hit group {group:?} holds {count} members, at most {max} are addressable")]
    TooManyInstances {
        group: HitGroup,
        count: usize,
        max: usize,
    },

    #[error("Model matrix is not invertible")]
    SingularTransform,

    #[error("Mesh has no vertices or no indices")]
    EmptyMesh,

    #[error("Index count {count} is not a multiple of 3")]
    PartialTriangle { count: usize },

    #[error("Index {index} refers past {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("Image extent {width}x{height} is empty")]
    EmptyImage { width: u32, height: u32 },

    #[error("Image data holds {actual} floats, {expected} expected")]
    ImageDataSize { expected: usize, actual: usize },

    #[error("Shader binary '{}' cannot be read", path.display())]
    ShaderMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Device reported no address for {what}")]
    MissingAddress { what: &'static str },
}
