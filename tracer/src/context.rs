use {
    crate::error::Error,
    bytemuck::Pod,
    eyre::Report,
    lumen_gpu::{
        Buffer, CommandBuffer, Device, DeviceAddress, Encoder, MappingError,
        Queue,
    },
    std::ops::Deref,
};

/// Device and queue every tracer component is created with.
pub struct Context {
    pub device: Device,
    pub queue: Queue,
}

impl Context {
    pub fn new(device: Device, queue: Queue) -> Self {
        Context { device, queue }
    }

    /// Writes `encoder` into a fresh command buffer, submits it and blocks
    /// until the device is idle.
    pub fn submit_and_wait(&mut self, encoder: Encoder<'_>) -> Result<(), Report> {
        let mut command_buffer: CommandBuffer =
            self.queue.create_command_buffer()?;

        encoder.record(&mut command_buffer)?;
        self.queue.submit(&command_buffer)?;
        self.queue.wait_idle()?;
        Ok(())
    }

    /// Copies `data` into host visible `buffer` memory.
    pub fn upload<T>(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[T],
    ) -> Result<(), MappingError>
    where
        T: Pod,
    {
        self.device.write_memory(buffer, offset, data)
    }

    /// Copies host visible `buffer` memory into `data`.
    pub fn download<T>(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &mut [T],
    ) -> Result<(), MappingError>
    where
        T: Pod,
    {
        self.device.read_memory(buffer, offset, data)
    }

    pub fn buffer_address(
        &self,
        buffer: &Buffer,
        what: &'static str,
    ) -> Result<DeviceAddress, Error> {
        self.device
            .get_buffer_device_address(buffer)
            .ok_or(Error::MissingAddress { what })
    }
}

impl Deref for Context {
    type Target = Device;

    fn deref(&self) -> &Device {
        &self.device
    }
}
