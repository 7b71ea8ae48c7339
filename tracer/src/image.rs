use {
    crate::{context::Context, error::Error, params::ImageView},
    eyre::Report,
    lumen_gpu::{Buffer, BufferInfo, BufferUsage, Encoder, Extent2d, MemoryUsageFlags},
};

/// Floats per texel.
pub const CHANNELS: usize = 4;

/// RGBA32F image living in device addressable memory.
///
/// Cloning shares the underlying buffer.
#[derive(Clone, Debug)]
pub struct Image {
    data: Buffer,
    extent: Extent2d,
}

impl Image {
    /// Creates image of `width`x`height` texels, optionally initialized from
    /// `data` holding `4 * width * height` floats.
    #[tracing::instrument(skip(ctx, data))]
    pub fn new(
        ctx: &Context,
        width: u32,
        height: u32,
        data: Option<&[f32]>,
    ) -> Result<Self, Report> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height }.into());
        }

        let extent = Extent2d { width, height };
        let len = texel_floats(extent);

        if let Some(data) = data {
            if data.len() != len {
                tracing::error!("Image data does not match extent {:?}", extent);
                return Err(Error::ImageDataSize {
                    expected: len,
                    actual: data.len(),
                }
                .into());
            }
        }

        let info = BufferInfo {
            align: 15,
            size: (len * std::mem::size_of::<f32>()) as u64,
            usage: BufferUsage::STORAGE
                | BufferUsage::TRANSFER_DST
                | BufferUsage::SHADER_DEVICE_ADDRESS,
            memory: MemoryUsageFlags::UPLOAD
                | MemoryUsageFlags::DOWNLOAD
                | MemoryUsageFlags::DEVICE_ADDRESS,
        };

        let buffer = match data {
            Some(data) => ctx.create_buffer_static(info, data)?,
            None => ctx.create_buffer(info)?,
        };

        Ok(Image {
            data: buffer,
            extent,
        })
    }

    /// Zeroes every texel and waits for completion.
    pub fn clear(&self, ctx: &mut Context) -> Result<(), Report> {
        let mut encoder = ctx.queue.create_encoder();
        self.record_clear(&mut encoder);
        ctx.submit_and_wait(encoder)
    }

    /// Records zeroing of every texel into `encoder`.
    pub fn record_clear<'a>(&'a self, encoder: &mut Encoder<'a>) {
        encoder.fill_buffer(&self.data, 0, self.data.info().size, 0);
    }

    /// Copies texels into `out`, which must hold `4 * width * height` floats.
    pub fn to_host(&self, ctx: &Context, out: &mut [f32]) -> Result<(), Report> {
        let expected = texel_floats(self.extent);
        if out.len() != expected {
            return Err(Error::ImageDataSize {
                expected,
                actual: out.len(),
            }
            .into());
        }

        ctx.download(&self.data, 0, out)?;
        Ok(())
    }

    pub fn data(&self) -> &Buffer {
        &self.data
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// View handed to shaders through ray generation parameters.
    pub fn view(&self, ctx: &Context) -> Result<ImageView, Report> {
        Ok(ImageView {
            data: ctx.buffer_address(&self.data, "image")?.get(),
            width: i32::try_from(self.extent.width)?,
            height: i32::try_from(self.extent.height)?,
        })
    }
}

fn texel_floats(extent: Extent2d) -> usize {
    extent.area() as usize * CHANNELS
}
