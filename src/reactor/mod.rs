//! Readiness notification seam between devices and the event loop.
//!
//! A device asks the [`Reactor`] for one [`Watch`] per direction it uses.
//! The event loop reports readiness as a [`WatchKey`], which the host hands
//! to [`crate::engine::DeviceRegistry::dispatch`]. Dropping a watch cancels
//! it synchronously.

#[cfg(unix)]
pub mod async_fd;
pub mod manual;

use std::os::fd::RawFd;

use anyhow::Result;

use crate::hal::Direction;

#[cfg(unix)]
pub use async_fd::{drive, TokioReactor};
pub use manual::ManualReactor;

/// Identifies which device and direction became ready
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub device: String,
    pub direction: Direction,
}

impl WatchKey {
    pub fn new(device: impl Into<String>, direction: Direction) -> Self {
        Self {
            device: device.into(),
            direction,
        }
    }

    pub fn input(device: impl Into<String>) -> Self {
        Self::new(device, Direction::Input)
    }

    pub fn output(device: impl Into<String>) -> Self {
        Self::new(device, Direction::Output)
    }
}

/// An active readiness subscription. Dropping it unregisters the watch.
pub trait Watch {
    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// Event loop capability consumed by devices
pub trait Reactor {
    /// Start watching `fd` (if the handle has one) for readiness in
    /// `key.direction`. New watches start enabled.
    fn add_watch(&self, fd: Option<RawFd>, key: WatchKey) -> Result<Box<dyn Watch>>;
}
