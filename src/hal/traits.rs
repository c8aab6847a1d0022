use std::os::fd::RawFd;

use anyhow::Result;

use super::types::{BufferSpace, DeviceCapabilities, FragmentGeometry, Mode, SampleFormat, TriggerMask};

/// Opens device handles. One backend serves every device of a registry.
pub trait AudioBackend {
    /// Backend identifier used in diagnostics (e.g. "oss", "mock")
    fn backend_id(&self) -> &str;

    /// Open the device at `path` for the directions in `mode`
    fn open(&self, path: &str, mode: Mode) -> Result<Box<dyn BackendHandle>>;
}

/// An open device handle. Dropping the handle closes the device.
///
/// The `set_*` calls return the value the driver actually accepted, which
/// may differ from the request.
pub trait BackendHandle {
    /// Descriptor to watch for readiness, if the handle has one
    fn raw_fd(&self) -> Option<RawFd>;

    /// Ask the driver for simultaneous input and output
    fn set_duplex(&mut self) -> Result<()>;

    fn capabilities(&mut self) -> Result<DeviceCapabilities>;

    fn set_trigger(&mut self, mask: TriggerMask) -> Result<()>;

    fn set_fragment(&mut self, geometry: FragmentGeometry) -> Result<()>;

    fn set_format(&mut self, format: SampleFormat) -> Result<SampleFormat>;

    fn set_channels(&mut self, channels: usize) -> Result<usize>;

    fn set_sample_rate(&mut self, rate: u32) -> Result<u32>;

    /// Fragment size in bytes as decided by the driver
    fn fragment_bytes(&mut self) -> Result<usize>;

    fn output_space(&mut self) -> Result<BufferSpace>;

    fn input_space(&mut self) -> Result<BufferSpace>;

    /// Read interleaved samples, returning the number of samples read
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;

    /// Write interleaved samples, returning the number of samples written
    fn write(&mut self, buf: &[i16]) -> Result<usize>;
}
