use crate::{
    assert_error, assert_object,
    command::{CommandBuffer, Encoder},
    OutOfMemory,
};
use std::fmt::{self, Debug};

bitflags::bitflags! {
    /// Queue capability flags.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct QueueCapabilityFlags: u32 {
        const TRANSFER  = 0b001;
        const COMPUTE   = 0b010;
        const GRAPHICS  = 0b100;
    }
}

impl QueueCapabilityFlags {
    pub fn supports_compute(&self) -> bool {
        self.contains(Self::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        self.intersects(Self::TRANSFER | Self::COMPUTE | Self::GRAPHICS)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueId {
    pub family: usize,
    pub index: usize,
}

/// Device was lost. Nothing can be done with it anymore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Device lost")]
pub struct DeviceLost;

#[derive(Debug, thiserror::Error)]
pub enum CreateEncoderError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },
}

/// Errors reported when a command buffer is submitted.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{source}")]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error("{source}")]
    DeviceLost {
        #[from]
        source: DeviceLost,
    },

    /// Backend rejected recorded commands.
    #[error("Command {index} is invalid: {reason}")]
    InvalidCommand { index: usize, reason: String },
}

pub struct Queue {
    inner: Box<dyn QueueTrait>,
    id: QueueId,
    capabilities: QueueCapabilityFlags,
}

impl Debug for Queue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Queue")
                .field("inner", &self.inner)
                .field("id", &self.id)
                .field("capabilities", &self.capabilities)
                .finish()
        } else {
            Debug::fmt(&*self.inner, fmt)
        }
    }
}

impl Queue {
    pub fn new(
        inner: Box<impl QueueTrait>,
        id: QueueId,
        capabilities: QueueCapabilityFlags,
    ) -> Self {
        Queue {
            inner,
            id,
            capabilities,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn capabilities(&self) -> QueueCapabilityFlags {
        self.capabilities
    }

    /// Creates encoder to record commands for this queue.
    pub fn create_encoder<'a>(&self) -> Encoder<'a> {
        Encoder::new(self.capabilities)
    }

    /// Creates reusable command buffer.
    #[tracing::instrument]
    pub fn create_command_buffer(
        &mut self,
    ) -> Result<CommandBuffer, CreateEncoderError> {
        Ok(CommandBuffer::new(self.inner.create_command_buffer()?))
    }

    /// Schedules execution of the commands written into `buffer`.
    /// The buffer must not be rewritten until the queue is idle.
    #[tracing::instrument]
    pub fn submit(&mut self, buffer: &CommandBuffer) -> Result<(), SubmitError> {
        self.inner.submit(buffer)
    }

    /// Blocks until all submitted work is complete.
    #[tracing::instrument]
    pub fn wait_idle(&self) -> Result<(), DeviceLost> {
        self.inner.wait_idle()
    }
}

pub trait QueueTrait: Debug + Send + Sync + 'static {
    fn create_command_buffer(
        &mut self,
    ) -> Result<Box<dyn crate::command::CommandBufferTrait>, CreateEncoderError>;

    fn submit(&mut self, buffer: &CommandBuffer) -> Result<(), SubmitError>;

    fn wait_idle(&self) -> Result<(), DeviceLost>;
}

#[allow(dead_code)]
fn check() {
    assert_object::<Queue>();
    assert_error::<CreateEncoderError>();
    assert_error::<SubmitError>();
    assert_error::<DeviceLost>();
}
