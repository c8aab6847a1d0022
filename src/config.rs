use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hal::FragmentGeometry;

/// Setting this environment variable (to anything) disables trigger use
pub const NO_TRIGGER_ENV: &str = "AUDIOMUX_NOTRIGGER";

/// Largest deviation between requested and accepted sample rate
pub const RATE_TOLERANCE_HZ: u32 = 100;

/// Process-wide device parameters, applied to every device a registry opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    pub sample_rate: u32,
    pub channels: usize,
    /// Fragment size requested from the driver, as log2 of the byte count
    pub fragment_size_log2: u32,
    /// Fragments requested for the driver buffer
    pub fragment_count: u32,
    /// Fragments the scratch buffers can hold per read or write pass
    pub buffer_fragments: usize,
    /// Use explicit per-direction stream enable when the device supports it
    pub use_trigger: bool,
    /// Fragments to accumulate before streaming starts; 0 disables the latch
    pub prebuffer_fragments: usize,
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            fragment_size_log2: 10,
            fragment_count: 4,
            buffer_fragments: 4,
            use_trigger: true,
            prebuffer_fragments: 0,
        }
    }
}

impl AudioDefaults {
    /// Load defaults from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .context(format!("Failed to read audio defaults from {:?}", path))?;

        let defaults: AudioDefaults = serde_json::from_str(&json)
            .context("Failed to deserialize audio defaults")?;

        defaults.validate()?;
        Ok(defaults)
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Self {
        if std::env::var_os(NO_TRIGGER_ENV).is_some() {
            self.use_trigger = false;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            anyhow::bail!("channels must be at least 1");
        }
        if self.sample_rate == 0 {
            anyhow::bail!("sample_rate must be positive");
        }
        if !(4..=16).contains(&self.fragment_size_log2) {
            anyhow::bail!(
                "fragment_size_log2 {} out of range (4..=16)",
                self.fragment_size_log2
            );
        }
        if self.fragment_count < 2 {
            anyhow::bail!("fragment_count must be at least 2");
        }
        if self.buffer_fragments == 0 {
            anyhow::bail!("buffer_fragments must be at least 1");
        }
        Ok(())
    }

    pub fn fragment_geometry(&self) -> FragmentGeometry {
        FragmentGeometry {
            size_log2: self.fragment_size_log2,
            count: self.fragment_count,
        }
    }
}
