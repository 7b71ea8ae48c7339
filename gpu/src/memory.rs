bitflags::bitflags! {
    /// Memory usage flags.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct MemoryUsageFlags: u8 {
        /// Prefer memory with faster device access.
        /// Implied when no other flag is set.
        const FAST_DEVICE_ACCESS = 0x00000001;

        /// Memory will be accessed from host.
        const HOST_ACCESS = 0x00000002;

        /// Memory is written by host and read by device.
        /// Implies `HOST_ACCESS`.
        const UPLOAD = 0x00000004;

        /// Memory is written by device and read back by host.
        /// Implies `HOST_ACCESS`.
        const DOWNLOAD = 0x00000008;

        /// Requests memory that can be addressed with `u64`.
        const DEVICE_ADDRESS = 0x00000010;
    }
}

impl MemoryUsageFlags {
    /// Returns true if host can map memory with these flags.
    pub fn host_visible(&self) -> bool {
        self.intersects(Self::HOST_ACCESS | Self::UPLOAD | Self::DOWNLOAD)
    }
}
