pub mod fifo;

use std::cell::RefCell;
use std::rc::Rc;

use crate::hal::Mode;

pub use fifo::FifoClient;

/// A producer and/or consumer of one channel of a shared device.
///
/// The device only ever holds weak references to clients; the application
/// owns them through a [`SharedClient`].
pub trait AudioClient {
    /// Current activity; `Mode::None` means idle
    fn mode(&self) -> Mode;

    /// Device channel this client reads from and writes to
    fn channel(&self) -> usize;

    /// The client wants its queued samples written out even if they do not
    /// fill a whole fragment
    fn flush_requested(&self) -> bool;

    /// Frames queued for playback
    fn frames_available(&self) -> usize;

    /// Move up to `out.len()` queued samples into `out`, returning the count
    fn pull_samples(&mut self, out: &mut [f32]) -> usize;

    /// Deliver captured samples, returning how many were accepted
    fn push_samples(&mut self, samples: &[f32]) -> usize;

    fn is_idle(&self) -> bool {
        self.mode().is_idle()
    }
}

pub type SharedClient = Rc<RefCell<dyn AudioClient>>;

/// Registry-assigned identity of a registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}
