use thiserror::Error;

use crate::hal::SampleFormat;

/// Device conditions callers may want to tell apart. Returned inside
/// `anyhow::Error`; use `downcast_ref::<DeviceError>()` to match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device {0} is not open")]
    NotOpen(String),

    #[error("device {0} does not support full duplex operation")]
    DuplexUnsupported(String),

    #[error("device {device} does not support {requested:?} samples (driver chose {actual:?})")]
    FormatMismatch {
        device: String,
        requested: SampleFormat,
        actual: SampleFormat,
    },

    #[error("unable to set {device} to {requested} channels (driver suggested {actual})")]
    ChannelMismatch {
        device: String,
        requested: usize,
        actual: usize,
    },

    #[error("sample rate of {device} could not be set to {requested}Hz (closest was {actual}Hz)")]
    RateOutOfTolerance {
        device: String,
        requested: u32,
        actual: u32,
    },

    #[error("device {0} reported an unusable fragment size of {1} bytes")]
    InvalidFragmentSize(String, usize),
}
