use crate::OutOfMemory;

/// First word of every SPIR-V binary.
pub const SPIRV_MAGIC: u32 = 0x07230203;

define_handle! {
    /// Compiled shader code.
    pub struct ShaderModule(ShaderModuleInfo);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ShaderLanguage {
    SPIRV,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ShaderModuleInfo {
    pub code: Box<[u8]>,
    pub language: ShaderLanguage,
}

impl ShaderModuleInfo {
    pub fn spirv(code: impl Into<Box<[u8]>>) -> Self {
        ShaderModuleInfo {
            code: code.into(),
            language: ShaderLanguage::SPIRV,
        }
    }

    /// Checks the binary header.
    pub fn validate(&self) -> Result<(), InvalidShader> {
        match self.language {
            ShaderLanguage::SPIRV => validate_spirv(&self.code),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidShader {
    #[error("Source is empty")]
    EmptySource,

    #[error("Source size is not multiple of 4 bytes")]
    SizeIsNotMultipleOfFour,

    #[error("Wrong SPIR-V magic number. Expected 0x07230203, found {found:#x}")]
    WrongMagic { found: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum CreateShaderModuleError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("Shader source is invalid")]
    InvalidShader {
        #[from]
        source: InvalidShader,
    },
}

fn validate_spirv(code: &[u8]) -> Result<(), InvalidShader> {
    if code.is_empty() {
        return Err(InvalidShader::EmptySource);
    }

    if code.len() & 3 > 0 {
        return Err(InvalidShader::SizeIsNotMultipleOfFour);
    }

    let magic = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);

    if magic != SPIRV_MAGIC {
        return Err(InvalidShader::WrongMagic { found: magic });
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ShaderStage {
    Compute,
    Raygen,
    AnyHit,
    ClosestHit,
    Miss,
    Intersection,
}

bitflags::bitflags! {
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ShaderStageFlags: u32 {
        const COMPUTE = 0x00000020;
        const RAYGEN = 0x00000100;
        const ANY_HIT = 0x00000200;
        const CLOSEST_HIT = 0x00000400;
        const MISS = 0x00000800;
        const INTERSECTION = 0x00001000;
        const ALL_RAY_TRACING = 0x00001f00;
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Compute => Self::COMPUTE,
            ShaderStage::Raygen => Self::RAYGEN,
            ShaderStage::AnyHit => Self::ANY_HIT,
            ShaderStage::ClosestHit => Self::CLOSEST_HIT,
            ShaderStage::Miss => Self::MISS,
            ShaderStage::Intersection => Self::INTERSECTION,
        }
    }
}

/// Shader module with entry point for particular stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shader {
    pub module: ShaderModule,
    pub entry: Box<str>,
    pub stage: ShaderStage,
}

impl Shader {
    pub fn new(
        module: ShaderModule,
        entry: impl Into<Box<str>>,
        stage: ShaderStage,
    ) -> Self {
        Shader {
            module,
            entry: entry.into(),
            stage,
        }
    }

    /// Shader with "main" entry point.
    pub fn with_main(module: ShaderModule, stage: ShaderStage) -> Self {
        Shader::new(module, "main", stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_spirv_header() {
        let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
        code.extend_from_slice(&[0; 16]);
        assert_eq!(ShaderModuleInfo::spirv(code).validate(), Ok(()));

        assert_eq!(
            ShaderModuleInfo::spirv(Vec::new()).validate(),
            Err(InvalidShader::EmptySource)
        );
        assert_eq!(
            ShaderModuleInfo::spirv(vec![3, 2, 35, 7, 0]).validate(),
            Err(InvalidShader::SizeIsNotMultipleOfFour)
        );
        assert_eq!(
            ShaderModuleInfo::spirv(vec![0xde, 0xc0, 0xad, 0x0b]).validate(),
            Err(InvalidShader::WrongMagic { found: 0x0badc0de })
        );
    }

    #[test]
    fn stage_flags() {
        assert_eq!(
            ShaderStageFlags::from(ShaderStage::Intersection),
            ShaderStageFlags::INTERSECTION
        );
        assert!(ShaderStageFlags::ALL_RAY_TRACING
            .contains(ShaderStageFlags::RAYGEN | ShaderStageFlags::MISS));
        assert!(!ShaderStageFlags::ALL_RAY_TRACING
            .contains(ShaderStageFlags::COMPUTE));
    }
}
