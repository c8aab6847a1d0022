pub mod channel_mapper;
pub mod format_converter;
pub mod mock;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub mod oss;
pub mod traits;
pub mod trigger;
pub mod types;

pub use channel_mapper::ChannelMapper;
pub use traits::{AudioBackend, BackendHandle};
pub use trigger::TriggerControl;
pub use types::{
    BufferSpace, DeviceCapabilities, Direction, FragmentGeometry, Mode, SampleFormat, TriggerMask,
};
