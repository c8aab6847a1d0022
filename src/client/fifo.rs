use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{AudioClient, SharedClient};
use crate::hal::Mode;

/// Queue-backed client. Playback samples are queued with [`FifoClient::write`],
/// captured samples are collected and drained with [`FifoClient::take_captured`].
#[derive(Debug, Default)]
pub struct FifoClient {
    mode: Mode,
    channel: usize,
    flush: bool,
    playback: VecDeque<f32>,
    captured: Vec<f32>,
    capture_limit: Option<usize>,
}

impl FifoClient {
    pub fn new(mode: Mode, channel: usize) -> Self {
        Self {
            mode,
            channel,
            ..Self::default()
        }
    }

    /// Wrap in the shared form the registry expects
    pub fn shared(self) -> Rc<RefCell<FifoClient>> {
        Rc::new(RefCell::new(self))
    }

    /// Coerce a shared fifo client into a registrable handle
    pub fn as_shared(client: &Rc<RefCell<FifoClient>>) -> SharedClient {
        client.clone()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Limit the number of buffered capture samples; excess is refused
    pub fn set_capture_limit(&mut self, limit: Option<usize>) {
        self.capture_limit = limit;
    }

    /// Queue samples for playback. Clears a pending flush request.
    pub fn write(&mut self, samples: &[f32]) {
        self.flush = false;
        self.playback.extend(samples.iter().copied());
    }

    /// Ask for queued samples to be written out without waiting for a full
    /// fragment
    pub fn flush(&mut self) {
        self.flush = true;
    }

    pub fn queued(&self) -> usize {
        self.playback.len()
    }

    pub fn take_captured(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.captured)
    }

    pub fn captured(&self) -> &[f32] {
        &self.captured
    }
}

impl AudioClient for FifoClient {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn channel(&self) -> usize {
        self.channel
    }

    fn flush_requested(&self) -> bool {
        self.flush
    }

    fn frames_available(&self) -> usize {
        self.playback.len()
    }

    fn pull_samples(&mut self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.playback.len());
        for (dst, src) in out.iter_mut().zip(self.playback.drain(..count)) {
            *dst = src;
        }
        if self.playback.is_empty() {
            self.flush = false;
        }
        count
    }

    fn push_samples(&mut self, samples: &[f32]) -> usize {
        let room = match self.capture_limit {
            Some(limit) => limit.saturating_sub(self.captured.len()),
            None => samples.len(),
        };
        let count = samples.len().min(room);
        self.captured.extend_from_slice(&samples[..count]);
        count
    }
}
