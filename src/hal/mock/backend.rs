use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use crate::hal::traits::{AudioBackend, BackendHandle};
use crate::hal::types::{
    BufferSpace, DeviceCapabilities, FragmentGeometry, Mode, SampleFormat, TriggerMask,
};

/// Behaviour of one simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct MockDeviceConfig {
    pub capabilities: DeviceCapabilities,
    /// Format reported back from `set_format` (`None` accepts the request)
    pub accepted_format: Option<SampleFormat>,
    /// Channel count reported back from `set_channels`
    pub accepted_channels: Option<usize>,
    /// Rate reported back from `set_sample_rate`
    pub accepted_rate: Option<u32>,
    /// Fragment size override; defaults to the requested geometry
    pub fragment_bytes: Option<usize>,
    /// Buffer depth override; defaults to the requested fragment count
    pub fragments_total: Option<usize>,
    pub fail_open: bool,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            capabilities: DeviceCapabilities::ALL,
            accepted_format: None,
            accepted_channels: None,
            accepted_rate: None,
            fragment_bytes: None,
            fragments_total: None,
            fail_open: false,
        }
    }
}

#[derive(Debug, Default)]
struct MockDevice {
    config: MockDeviceConfig,
    open_mode: Option<Mode>,
    open_count: usize,
    duplex_requested: bool,
    trigger: Option<TriggerMask>,
    geometry: Option<FragmentGeometry>,
    output_free: usize,
    written: Vec<i16>,
    write_sizes: Vec<usize>,
    input: VecDeque<i16>,
    short_write: bool,
    fail_read: bool,
    fail_write: bool,
}

impl MockDevice {
    fn fragment_bytes(&self) -> usize {
        self.config
            .fragment_bytes
            .or_else(|| self.geometry.map(|g| g.fragment_bytes()))
            .unwrap_or(1024)
    }

    fn fragments_total(&self) -> usize {
        self.config
            .fragments_total
            .or_else(|| self.geometry.map(|g| g.count as usize))
            .unwrap_or(4)
    }
}

/// In-memory backend. Clones share the same set of simulated devices, so a
/// test can hand one clone to the registry and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    devices: Rc<RefCell<HashMap<String, MockDevice>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with a single default device at `path`
    pub fn with_device(path: &str) -> Self {
        let backend = Self::new();
        backend.add_device(path, MockDeviceConfig::default());
        backend
    }

    pub fn add_device(&self, path: &str, config: MockDeviceConfig) {
        self.devices.borrow_mut().insert(
            path.to_string(),
            MockDevice {
                config,
                ..MockDevice::default()
            },
        );
    }

    fn inspect<T>(&self, path: &str, f: impl FnOnce(&mut MockDevice) -> T) -> T {
        let mut devices = self.devices.borrow_mut();
        match devices.get_mut(path) {
            Some(device) => f(device),
            None => panic!("mock device {} was never added", path),
        }
    }

    /// Set how many output fragments are free
    pub fn set_output_free(&self, path: &str, fragments: usize) {
        self.inspect(path, |d| d.output_free = fragments);
    }

    pub fn output_free(&self, path: &str) -> usize {
        self.inspect(path, |d| d.output_free)
    }

    /// Queue interleaved capture samples
    pub fn push_input(&self, path: &str, samples: &[i16]) {
        self.inspect(path, |d| d.input.extend(samples.iter().copied()));
    }

    pub fn input_len(&self, path: &str) -> usize {
        self.inspect(path, |d| d.input.len())
    }

    /// All samples written so far
    pub fn written(&self, path: &str) -> Vec<i16> {
        self.inspect(path, |d| d.written.clone())
    }

    /// Sample count of every individual write call
    pub fn write_sizes(&self, path: &str) -> Vec<usize> {
        self.inspect(path, |d| d.write_sizes.clone())
    }

    pub fn clear_written(&self, path: &str) {
        self.inspect(path, |d| {
            d.written.clear();
            d.write_sizes.clear();
        });
    }

    pub fn open_mode(&self, path: &str) -> Option<Mode> {
        self.inspect(path, |d| d.open_mode)
    }

    pub fn open_count(&self, path: &str) -> usize {
        self.inspect(path, |d| d.open_count)
    }

    pub fn trigger(&self, path: &str) -> Option<TriggerMask> {
        self.inspect(path, |d| d.trigger)
    }

    pub fn duplex_requested(&self, path: &str) -> bool {
        self.inspect(path, |d| d.duplex_requested)
    }

    pub fn fragment_geometry(&self, path: &str) -> Option<FragmentGeometry> {
        self.inspect(path, |d| d.geometry)
    }

    pub fn set_short_write(&self, path: &str, enabled: bool) {
        self.inspect(path, |d| d.short_write = enabled);
    }

    pub fn set_fail_read(&self, path: &str, enabled: bool) {
        self.inspect(path, |d| d.fail_read = enabled);
    }

    pub fn set_fail_write(&self, path: &str, enabled: bool) {
        self.inspect(path, |d| d.fail_write = enabled);
    }

    pub fn set_config(&self, path: &str, config: MockDeviceConfig) {
        self.inspect(path, |d| d.config = config);
    }
}

impl AudioBackend for MockBackend {
    fn backend_id(&self) -> &str {
        "mock"
    }

    fn open(&self, path: &str, mode: Mode) -> Result<Box<dyn BackendHandle>> {
        let mut devices = self.devices.borrow_mut();
        let device = devices
            .get_mut(path)
            .ok_or_else(|| anyhow!("No such device: {}", path))?;

        if device.config.fail_open {
            bail!("Simulated open failure on {}", path);
        }
        if mode.is_idle() {
            bail!("Cannot open {} without a direction", path);
        }
        if let Some(current) = device.open_mode {
            bail!("Device {} is busy (open for {:?})", path, current);
        }

        device.open_mode = Some(mode);
        device.open_count += 1;
        device.duplex_requested = false;
        device.trigger = None;
        device.geometry = None;

        Ok(Box::new(MockHandle {
            path: path.to_string(),
            mode,
            devices: Rc::clone(&self.devices),
        }))
    }
}

struct MockHandle {
    path: String,
    mode: Mode,
    devices: Rc<RefCell<HashMap<String, MockDevice>>>,
}

impl MockHandle {
    fn with<T>(&self, f: impl FnOnce(&mut MockDevice) -> Result<T>) -> Result<T> {
        let mut devices = self.devices.borrow_mut();
        let device = devices
            .get_mut(&self.path)
            .ok_or_else(|| anyhow!("Device {} disappeared", self.path))?;
        f(device)
    }
}

impl BackendHandle for MockHandle {
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn set_duplex(&mut self) -> Result<()> {
        self.with(|d| {
            d.duplex_requested = true;
            Ok(())
        })
    }

    fn capabilities(&mut self) -> Result<DeviceCapabilities> {
        self.with(|d| Ok(d.config.capabilities))
    }

    fn set_trigger(&mut self, mask: TriggerMask) -> Result<()> {
        self.with(|d| {
            if !d.config.capabilities.trigger {
                bail!("Trigger not supported");
            }
            d.trigger = Some(mask);
            Ok(())
        })
    }

    fn set_fragment(&mut self, geometry: FragmentGeometry) -> Result<()> {
        self.with(|d| {
            d.geometry = Some(geometry);
            Ok(())
        })
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<SampleFormat> {
        self.with(|d| Ok(d.config.accepted_format.unwrap_or(format)))
    }

    fn set_channels(&mut self, channels: usize) -> Result<usize> {
        self.with(|d| Ok(d.config.accepted_channels.unwrap_or(channels)))
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<u32> {
        self.with(|d| Ok(d.config.accepted_rate.unwrap_or(rate)))
    }

    fn fragment_bytes(&mut self) -> Result<usize> {
        self.with(|d| Ok(d.fragment_bytes()))
    }

    fn output_space(&mut self) -> Result<BufferSpace> {
        if !self.mode.writes() {
            bail!("{} is not open for writing", self.path);
        }
        self.with(|d| {
            let total = d.fragments_total();
            Ok(BufferSpace {
                fragments: d.output_free.min(total),
                fragments_total: total,
                fragment_bytes: d.fragment_bytes(),
            })
        })
    }

    fn input_space(&mut self) -> Result<BufferSpace> {
        if !self.mode.reads() {
            bail!("{} is not open for reading", self.path);
        }
        self.with(|d| {
            let total = d.fragments_total();
            let fragment_bytes = d.fragment_bytes();
            Ok(BufferSpace {
                fragments: (d.input.len() * 2 / fragment_bytes).min(total),
                fragments_total: total,
                fragment_bytes,
            })
        })
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        self.with(|d| {
            if d.fail_read {
                bail!("Simulated read failure");
            }
            let count = buf.len().min(d.input.len());
            for (dst, src) in buf.iter_mut().zip(d.input.drain(..count)) {
                *dst = src;
            }
            Ok(count)
        })
    }

    fn write(&mut self, buf: &[i16]) -> Result<usize> {
        self.with(|d| {
            if d.fail_write {
                bail!("Simulated write failure");
            }
            let count = if d.short_write { buf.len() / 2 } else { buf.len() };
            d.written.extend_from_slice(&buf[..count]);
            d.write_sizes.push(count);

            let fragment_bytes = d.fragment_bytes();
            let used = (count * 2).div_ceil(fragment_bytes);
            d.output_free = d.output_free.saturating_sub(used);
            Ok(count)
        })
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if let Some(device) = self.devices.borrow_mut().get_mut(&self.path) {
            device.open_mode = None;
        }
    }
}
