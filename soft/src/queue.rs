use crate::{
    command::{Executor, SoftCommandBuffer},
    device::SoftDevice,
    inspect::SoftEvent,
};
use lumen_gpu::{
    CommandBuffer, CommandBufferTrait, CreateEncoderError, DeviceLost,
    DeviceTrait as _, QueueTrait, SubmitError,
};
use std::sync::{atomic::Ordering, Arc};

/// Queue that executes submitted commands immediately.
#[derive(Debug)]
pub(crate) struct SoftQueue {
    device: Arc<SoftDevice>,
}

impl SoftQueue {
    pub fn new(device: Arc<SoftDevice>) -> Self {
        SoftQueue { device }
    }
}

impl QueueTrait for SoftQueue {
    fn create_command_buffer(
        &mut self,
    ) -> Result<Box<dyn CommandBufferTrait>, CreateEncoderError> {
        Ok(Box::new(SoftCommandBuffer::new()))
    }

    fn submit(&mut self, buffer: &CommandBuffer) -> Result<(), SubmitError> {
        let buffer = buffer
            .downcast_ref::<SoftCommandBuffer>()
            .expect("Command buffer created by another backend");

        assert!(
            !buffer.in_flight().load(Ordering::Acquire),
            "Command buffer is submitted again before its execution completed"
        );

        let ops = buffer.ops();
        self.device.event(SoftEvent::Submit {
            commands: ops.len(),
        });

        if let Err((index, reason)) = Executor::new(&self.device).run(ops) {
            tracing::error!("Command {} rejected: {}", index, reason);
            return Err(SubmitError::InvalidCommand {
                index,
                reason: reason.to_string(),
            });
        }

        self.device.mark_pending(buffer.in_flight().clone());
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), DeviceLost> {
        self.device.wait_idle()
    }
}
