use anyhow::{Context, Result};

use super::traits::BackendHandle;
use super::types::{DeviceCapabilities, Mode, TriggerMask};

/// Explicit per-direction stream enable, used only when the device reports
/// the trigger capability and it has not been switched off in the config.
/// Without it both directions stream as soon as the device is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerControl {
    enabled: bool,
}

impl TriggerControl {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether trigger masks are issued for a device with `caps`
    pub fn is_active(&self, caps: &DeviceCapabilities) -> bool {
        self.enabled && caps.trigger
    }

    /// Stop all streaming until `arm` is called
    pub fn disarm(&self, handle: &mut dyn BackendHandle, caps: &DeviceCapabilities) -> Result<()> {
        if !self.is_active(caps) {
            return Ok(());
        }
        handle
            .set_trigger(TriggerMask::NONE)
            .context("Failed to disable streaming")
    }

    /// Enable streaming for the directions `mode` uses
    pub fn arm(&self, handle: &mut dyn BackendHandle, caps: &DeviceCapabilities, mode: Mode) -> Result<()> {
        if !self.is_active(caps) {
            return Ok(());
        }
        handle
            .set_trigger(TriggerMask::for_mode(mode))
            .with_context(|| format!("Failed to enable streaming for {:?}", mode))
    }
}

impl Default for TriggerControl {
    fn default() -> Self {
        Self::new(true)
    }
}
