use {color_eyre::Report, std::path::PathBuf};

/// Tracer settings loaded from RON.
///
/// Missing fields take their default values.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Directory holding precompiled shader binaries.
    pub shader_dir: PathBuf,

    /// Trace iterations used by `PathTracer::trace_default`.
    pub iterations: u32,

    /// Seed of per-pixel random states.
    pub seed: u64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            shader_dir: PathBuf::from("../shaders"),
            iterations: 100,
            seed: 0x5eed,
        }
    }
}

impl TracerConfig {
    /// Loads config from file named by `LUMEN_CONFIG_PATH`.
    ///
    /// Without the variable `./lumen.ron` is loaded if present,
    /// otherwise defaults are returned.
    pub fn load_default() -> Result<Self, Report> {
        let path = std::env::var("LUMEN_CONFIG_PATH").map(PathBuf::from).ok();
        Self::load_or_default(path, PathBuf::from("./lumen.ron"))
    }

    /// Explicit `path` must exist, `fallback` may be missing.
    fn load_or_default(
        path: Option<PathBuf>,
        fallback: PathBuf,
    ) -> Result<Self, Report> {
        match path {
            Some(path) => Self::load(path),
            None if fallback.exists() => Self::load(fallback),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    #[tracing::instrument]
    pub fn load(path: PathBuf) -> Result<Self, Report> {
        Ok(ron::de::from_reader(std::fs::File::open(&path)?)?)
    }
}
