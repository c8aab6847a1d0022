use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use super::state::{resolve, ModeTransition};
use crate::client::{AudioClient, ClientId, SharedClient};
use crate::config::{AudioDefaults, RATE_TOLERANCE_HZ};
use crate::error::DeviceError;
use crate::hal::{
    AudioBackend, BackendHandle, DeviceCapabilities, Direction, Mode, SampleFormat, TriggerControl,
};
use crate::reactor::{Reactor, Watch, WatchKey};

pub(super) struct ClientEntry {
    pub(super) id: ClientId,
    pub(super) client: Weak<RefCell<dyn AudioClient>>,
}

/// Scratch buffers of one device. Allocated on the first successful open and
/// kept until the device is destroyed.
pub(super) struct DeviceBuffers {
    /// Capacity in frames
    pub(super) frames: usize,
    /// Raw interleaved capture samples
    pub(super) raw: Vec<i16>,
    /// Normalized interleaved capture samples
    pub(super) samples: Vec<f32>,
    /// One de-interleaved capture channel
    pub(super) channel: Vec<f32>,
    /// Interleaved playback mix
    pub(super) mix: Vec<i16>,
    /// Samples pulled from one producer
    pub(super) pull: Vec<f32>,
}

impl DeviceBuffers {
    fn new(frames: usize, channels: usize) -> Self {
        Self {
            frames,
            raw: vec![0; frames * channels],
            samples: vec![0.0; frames * channels],
            channel: vec![0.0; frames],
            mix: vec![0; frames * channels],
            pull: vec![0.0; frames],
        }
    }
}

/// Everything a successful negotiation produces
struct Negotiated {
    handle: Box<dyn BackendHandle>,
    caps: DeviceCapabilities,
    read_watch: Option<Box<dyn Watch>>,
    write_watch: Option<Box<dyn Watch>>,
    fragment_frames: usize,
}

/// One physical device shared by every client registered for it
pub struct AudioDevice {
    pub(super) name: String,
    pub(super) use_count: usize,
    pub(super) mode: Mode,
    pub(super) caps: DeviceCapabilities,
    pub(super) trigger: TriggerControl,
    pub(super) defaults: AudioDefaults,
    // Watches are declared before the handle so they are dropped first
    pub(super) read_watch: Option<Box<dyn Watch>>,
    pub(super) write_watch: Option<Box<dyn Watch>>,
    pub(super) handle: Option<Box<dyn BackendHandle>>,
    pub(super) buffers: Option<DeviceBuffers>,
    pub(super) fragment_frames: usize,
    pub(super) prebuf: bool,
    pub(super) clients: Vec<ClientEntry>,
    backend: Rc<dyn AudioBackend>,
    reactor: Rc<dyn Reactor>,
}

impl AudioDevice {
    pub(super) fn new(
        name: &str,
        backend: Rc<dyn AudioBackend>,
        reactor: Rc<dyn Reactor>,
        defaults: AudioDefaults,
    ) -> Self {
        Self {
            name: name.to_string(),
            use_count: 0,
            mode: Mode::None,
            caps: DeviceCapabilities::NONE,
            trigger: TriggerControl::new(defaults.use_trigger),
            defaults,
            read_watch: None,
            write_watch: None,
            handle: None,
            buffers: None,
            fragment_frames: 0,
            prebuf: true,
            clients: Vec::new(),
            backend,
            reactor,
        }
    }

    /// Open the device once in duplex mode to learn its capabilities.
    /// Failure leaves the capabilities empty.
    pub(super) fn probe(&mut self) {
        match self.backend.open(&self.name, Mode::Duplex) {
            Ok(mut handle) => match handle.capabilities() {
                Ok(caps) => {
                    debug!("Device {} capabilities: {:?}", self.name, caps);
                    self.caps = caps;
                }
                Err(e) => warn!("Could not read capabilities of {}: {:#}", self.name, e),
            },
            Err(e) => warn!("Could not probe {}: {:#}", self.name, e),
        }
    }

    pub(super) fn attach(&mut self, id: ClientId, client: &SharedClient) {
        self.clients.push(ClientEntry {
            id,
            client: Rc::downgrade(client),
        });
        self.use_count += 1;
    }

    /// Remove a client, returning false if it was not attached
    pub(super) fn detach(&mut self, id: ClientId) -> bool {
        let Some(pos) = self.clients.iter().position(|entry| entry.id == id) else {
            return false;
        };
        self.clients.remove(pos);
        self.use_count -= 1;
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn use_count(&self) -> usize {
        self.use_count
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    pub fn is_full_duplex_capable(&self) -> bool {
        self.caps.full_duplex
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Fragment size in frames reported at the last successful open
    pub fn fragment_frames(&self) -> usize {
        self.fragment_frames
    }

    /// Frames the scratch buffers hold, 0 before the first open
    pub fn buffer_capacity_frames(&self) -> usize {
        self.buffers.as_ref().map(|b| b.frames).unwrap_or(0)
    }

    pub fn is_read_armed(&self) -> bool {
        self.read_watch.as_ref().is_some_and(|w| w.is_enabled())
    }

    pub fn is_write_armed(&self) -> bool {
        self.write_watch.as_ref().is_some_and(|w| w.is_enabled())
    }

    /// Make the device usable in `mode` in addition to what it already
    /// serves. Opening the other single direction escalates to duplex,
    /// `Mode::None` closes if no client is active.
    pub fn open(&mut self, mode: Mode) -> Result<()> {
        let target = match resolve(self.mode, mode) {
            ModeTransition::Unchanged => return Ok(()),
            ModeTransition::Close => {
                self.close();
                return Ok(());
            }
            ModeTransition::Open(target) => target,
        };

        if target == Mode::Duplex && !self.mode.is_idle() && !self.caps.full_duplex {
            error!(
                "Cannot add {:?} to {} open for {:?}: no full duplex support",
                mode, self.name, self.mode
            );
            return Err(DeviceError::DuplexUnsupported(self.name.clone()).into());
        }

        self.teardown();

        match self.negotiate(target) {
            Ok(negotiated) => {
                self.install(target, negotiated);
                Ok(())
            }
            Err(e) => {
                error!("Failed to open {} for {:?}: {:#}", self.name, target, e);
                Err(e)
            }
        }
    }

    fn negotiate(&self, mode: Mode) -> Result<Negotiated> {
        let name = &self.name;
        let mut handle = self
            .backend
            .open(name, mode)
            .with_context(|| format!("{} backend could not open {}", self.backend.backend_id(), name))?;

        if mode == Mode::Duplex {
            if let Err(e) = handle.set_duplex() {
                warn!("Duplex request on {} failed: {:#}", name, e);
            }
        }

        let caps = handle.capabilities()?;
        if mode == Mode::Duplex && !caps.full_duplex {
            return Err(DeviceError::DuplexUnsupported(name.clone()).into());
        }

        self.trigger.disarm(handle.as_mut(), &caps)?;

        handle.set_fragment(self.defaults.fragment_geometry())?;

        let format = handle.set_format(SampleFormat::S16Le)?;
        if format != SampleFormat::S16Le {
            return Err(DeviceError::FormatMismatch {
                device: name.clone(),
                requested: SampleFormat::S16Le,
                actual: format,
            }
            .into());
        }

        let channels = self.defaults.channels;
        let accepted = handle.set_channels(channels)?;
        if accepted != channels {
            return Err(DeviceError::ChannelMismatch {
                device: name.clone(),
                requested: channels,
                actual: accepted,
            }
            .into());
        }

        let rate = self.defaults.sample_rate;
        let accepted = handle.set_sample_rate(rate)?;
        if accepted.abs_diff(rate) > RATE_TOLERANCE_HZ {
            return Err(DeviceError::RateOutOfTolerance {
                device: name.clone(),
                requested: rate,
                actual: accepted,
            }
            .into());
        }

        let read_watch = if mode.reads() {
            Some(self.reactor.add_watch(handle.raw_fd(), WatchKey::input(name.as_str()))?)
        } else {
            None
        };
        let write_watch = if mode.writes() {
            let mut watch = self
                .reactor
                .add_watch(handle.raw_fd(), WatchKey::output(name.as_str()))?;
            // Armed by the first producer signalling data
            watch.set_enabled(false);
            Some(watch)
        } else {
            None
        };

        self.trigger.arm(handle.as_mut(), &caps, mode)?;

        let fragment_bytes = handle.fragment_bytes()?;
        let fragment_frames = fragment_bytes / (SampleFormat::S16Le.bytes_per_sample() * channels);
        if fragment_frames == 0 {
            return Err(DeviceError::InvalidFragmentSize(name.clone(), fragment_bytes).into());
        }

        Ok(Negotiated {
            handle,
            caps,
            read_watch,
            write_watch,
            fragment_frames,
        })
    }

    fn install(&mut self, mode: Mode, negotiated: Negotiated) {
        self.handle = Some(negotiated.handle);
        self.caps = negotiated.caps;
        self.read_watch = negotiated.read_watch;
        self.write_watch = negotiated.write_watch;
        self.fragment_frames = negotiated.fragment_frames;

        if self.buffers.is_none() {
            let frames = self.defaults.buffer_fragments * self.fragment_frames;
            debug!("Allocating {} frames of scratch buffer for {}", frames, self.name);
            self.buffers = Some(DeviceBuffers::new(frames, self.defaults.channels));
        }

        self.mode = mode;
        info!(
            "Opened {} for {:?} ({} frames per fragment)",
            self.name, mode, self.fragment_frames
        );
    }

    /// Close the device unless a client is still active. Returns whether
    /// the device is closed afterwards.
    pub fn close(&mut self) -> bool {
        let active = self
            .clients
            .iter()
            .filter_map(|entry| entry.client.upgrade().map(|c| (entry.id, c)))
            .find(|(_, client)| !client.borrow().is_idle());

        if let Some((id, _)) = active {
            debug!("Not closing {}: {} is still active", self.name, id);
            return false;
        }

        self.teardown();
        true
    }

    /// Cancel watches and release the backend handle. Buffers survive.
    fn teardown(&mut self) {
        self.write_watch = None;
        self.read_watch = None;
        if self.handle.take().is_some() {
            info!("Closed {}", self.name);
        }
        self.mode = Mode::None;
    }

    /// A producer has queued new samples
    pub fn audio_to_write_available(&mut self) {
        if let Some(watch) = self.write_watch.as_mut() {
            watch.set_enabled(true);
        }
    }

    /// Write out everything queued without waiting for the prebuffer
    pub fn flush_samples(&mut self) {
        self.prebuf = false;
        if let Some(watch) = self.write_watch.as_mut() {
            watch.set_enabled(true);
        }
    }

    /// Frames queued in the device's own output buffer
    pub fn pending_output_frames(&mut self) -> Result<usize> {
        if !self.mode.writes() {
            return Ok(0);
        }
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| DeviceError::NotOpen(self.name.clone()))?;
        let space = handle.output_space()?;
        let queued = space.fragments_total.saturating_sub(space.fragments);
        Ok(queued * space.fragment_frames(self.defaults.channels))
    }

    /// Entry point for readiness notifications. Events for a direction
    /// whose watch is gone or disabled are ignored.
    pub fn handle_ready(&mut self, direction: Direction) {
        match direction {
            Direction::Input if self.is_read_armed() => self.read_input(),
            Direction::Output if self.is_write_armed() => self.write_output(),
            _ => debug!("Ignoring stale {:?} event on {}", direction, self.name),
        }
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}
