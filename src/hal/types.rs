use serde::{Deserialize, Serialize};

/// Open mode of a device, also used as the activity mode of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Closed / idle
    #[default]
    None,
    /// Capture only
    Read,
    /// Playback only
    Write,
    /// Capture and playback on the same handle
    Duplex,
}

impl Mode {
    pub fn reads(self) -> bool {
        matches!(self, Mode::Read | Mode::Duplex)
    }

    pub fn writes(self) -> bool {
        matches!(self, Mode::Write | Mode::Duplex)
    }

    pub fn is_idle(self) -> bool {
        self == Mode::None
    }

    /// Smallest mode covering both `self` and `other`
    pub fn union(self, other: Mode) -> Mode {
        match (self.reads() || other.reads(), self.writes() || other.writes()) {
            (true, true) => Mode::Duplex,
            (true, false) => Mode::Read,
            (false, true) => Mode::Write,
            (false, false) => Mode::None,
        }
    }
}

/// Readiness direction of a device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// Sample encodings a backend may report back after negotiation.
/// Only `S16Le` is ever requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16Le,
    S16Be,
    S32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S32Le => 4,
        }
    }
}

/// Capability bits reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Input and output may be open on the same handle
    pub full_duplex: bool,
    /// Input and output streaming can be enabled independently
    pub trigger: bool,
}

impl DeviceCapabilities {
    pub const NONE: Self = Self {
        full_duplex: false,
        trigger: false,
    };

    pub const ALL: Self = Self {
        full_duplex: true,
        trigger: true,
    };
}

/// Per-direction stream enable mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerMask {
    pub input: bool,
    pub output: bool,
}

impl TriggerMask {
    pub const NONE: Self = Self {
        input: false,
        output: false,
    };

    /// Enable exactly the directions `mode` uses
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            input: mode.reads(),
            output: mode.writes(),
        }
    }
}

/// Requested fragment layout: `count` fragments of `2^size_log2` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentGeometry {
    pub size_log2: u32,
    pub count: u32,
}

impl FragmentGeometry {
    pub fn fragment_bytes(&self) -> usize {
        1usize << self.size_log2
    }
}

/// Buffer occupancy reported for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferSpace {
    /// Fragments that can be transferred without blocking
    pub fragments: usize,
    /// Fragments in the whole device buffer
    pub fragments_total: usize,
    /// Bytes per fragment
    pub fragment_bytes: usize,
}

impl BufferSpace {
    /// Fragment size in frames of `channels` S16 samples
    pub fn fragment_frames(&self, channels: usize) -> usize {
        self.fragment_bytes / (SampleFormat::S16Le.bytes_per_sample() * channels.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_union() {
        assert_eq!(Mode::Read.union(Mode::Write), Mode::Duplex);
        assert_eq!(Mode::None.union(Mode::Write), Mode::Write);
        assert_eq!(Mode::Read.union(Mode::None), Mode::Read);
        assert_eq!(Mode::Duplex.union(Mode::Read), Mode::Duplex);
        assert_eq!(Mode::None.union(Mode::None), Mode::None);
    }

    #[test]
    fn test_trigger_mask_for_mode() {
        assert_eq!(TriggerMask::for_mode(Mode::None), TriggerMask::NONE);
        assert_eq!(
            TriggerMask::for_mode(Mode::Duplex),
            TriggerMask { input: true, output: true }
        );
        assert!(!TriggerMask::for_mode(Mode::Write).input);
    }

    #[test]
    fn test_fragment_frames() {
        let space = BufferSpace {
            fragments: 2,
            fragments_total: 4,
            fragment_bytes: 1024,
        };
        assert_eq!(space.fragment_frames(1), 512);
        assert_eq!(space.fragment_frames(2), 256);
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&Mode::Duplex).unwrap();
        let mode: Mode = serde_json::from_str(&json).unwrap();
        assert_eq!(mode, Mode::Duplex);
    }
}
