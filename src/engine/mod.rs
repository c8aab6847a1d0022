//! Shared device engine: registry, per-device mode management and the
//! capture and playback paths.

mod device;
mod mixer;
mod reader;
mod registry;
pub mod state;

pub use device::AudioDevice;
pub use registry::DeviceRegistry;
pub use state::{resolve, ModeTransition};
