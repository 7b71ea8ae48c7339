bitflags::bitflags! {
    /// Pipeline stages synchronized by barriers.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 0x00000001;
        const COMPUTE_SHADER = 0x00000800;
        const TRANSFER = 0x00001000;
        const BOTTOM_OF_PIPE = 0x00002000;
        const HOST = 0x00004000;
        const ALL_COMMANDS = 0x00010000;
        const RAY_TRACING_SHADER = 0x00200000;
        const ACCELERATION_STRUCTURE_BUILD = 0x02000000;
    }
}

bitflags::bitflags! {
    /// Memory accesses made visible by barriers.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct AccessFlags: u32 {
        const UNIFORM_READ = 0x00000008;
        const SHADER_READ = 0x00000020;
        const SHADER_WRITE = 0x00000040;
        const TRANSFER_READ = 0x00000800;
        const TRANSFER_WRITE = 0x00001000;
        const HOST_READ = 0x00002000;
        const HOST_WRITE = 0x00004000;
        const ACCELERATION_STRUCTURE_READ = 0x00200000;
        const ACCELERATION_STRUCTURE_WRITE = 0x00400000;
    }
}

/// Global memory dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryBarrier {
    pub src: AccessFlags,
    pub dst: AccessFlags,
}

impl MemoryBarrier {
    pub fn new(src: AccessFlags, dst: AccessFlags) -> Self {
        MemoryBarrier { src, dst }
    }
}
