use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use super::device::AudioDevice;
use crate::client::{ClientId, SharedClient};
use crate::config::AudioDefaults;
use crate::hal::{AudioBackend, Mode};
use crate::reactor::{Reactor, WatchKey};

/// Shared devices keyed by path, plus the device each client is bound to.
///
/// A device exists exactly as long as at least one client is registered
/// with it; the last [`DeviceRegistry::unregister`] closes and destroys it.
pub struct DeviceRegistry {
    devices: HashMap<String, AudioDevice>,
    clients: HashMap<ClientId, String>,
    next_client: u64,
    backend: Rc<dyn AudioBackend>,
    reactor: Rc<dyn Reactor>,
    defaults: AudioDefaults,
}

impl DeviceRegistry {
    pub fn new(backend: Rc<dyn AudioBackend>, reactor: Rc<dyn Reactor>, defaults: AudioDefaults) -> Self {
        Self {
            devices: HashMap::new(),
            clients: HashMap::new(),
            next_client: 0,
            backend,
            reactor,
            defaults,
        }
    }

    pub fn defaults(&self) -> &AudioDefaults {
        &self.defaults
    }

    /// Bind `client` to the device at `path`, creating and probing the
    /// device on first use. Probe failures are logged; they surface again
    /// when the device is opened.
    pub fn register(&mut self, path: &str, client: &SharedClient) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;

        let device = match self.devices.entry(path.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("Creating device {} on {} backend", path, self.backend.backend_id());
                let mut device = AudioDevice::new(
                    path,
                    Rc::clone(&self.backend),
                    Rc::clone(&self.reactor),
                    self.defaults.clone(),
                );
                device.probe();
                entry.insert(device)
            }
        };

        device.attach(id, client);
        debug!("{} registered with {} (use count {})", id, path, device.use_count());
        self.clients.insert(id, path.to_string());
        id
    }

    /// Drop the binding of `id`. The device is destroyed when its use count
    /// reaches zero.
    ///
    /// # Panics
    ///
    /// If `id` is not registered.
    pub fn unregister(&mut self, id: ClientId) {
        let Some(path) = self.clients.remove(&id) else {
            panic!("{} is not registered with any device", id);
        };
        let Some(device) = self.devices.get_mut(&path) else {
            panic!("{} is bound to unknown device {}", id, path);
        };
        assert!(device.use_count() > 0, "{} has no registered clients", path);
        assert!(device.detach(id), "{} is not attached to {}", id, path);

        debug!("{} unregistered from {} (use count {})", id, path, device.use_count());
        if device.use_count() == 0 {
            info!("Destroying device {}", path);
            self.devices.remove(&path);
        }
    }

    /// Open the client's device for `mode` (see [`AudioDevice::open`])
    pub fn open(&mut self, id: ClientId, mode: Mode) -> Result<()> {
        self.device_of(id)
            .ok_or_else(|| anyhow!("{} is not registered with any device", id))?
            .open(mode)
    }

    /// Close the client's device if no client on it is active
    pub fn close(&mut self, id: ClientId) -> bool {
        match self.device_of(id) {
            Some(device) => device.close(),
            None => {
                warn!("close: {} is not registered", id);
                false
            }
        }
    }

    pub fn audio_to_write_available(&mut self, id: ClientId) {
        match self.device_of(id) {
            Some(device) => device.audio_to_write_available(),
            None => warn!("audio_to_write_available: {} is not registered", id),
        }
    }

    pub fn flush_samples(&mut self, id: ClientId) {
        match self.device_of(id) {
            Some(device) => device.flush_samples(),
            None => warn!("flush_samples: {} is not registered", id),
        }
    }

    /// Route a readiness event to its device. Events for devices that no
    /// longer exist are dropped.
    pub fn dispatch(&mut self, key: &WatchKey) {
        match self.devices.get_mut(&key.device) {
            Some(device) => device.handle_ready(key.direction),
            None => debug!("Dropping {:?} event for vanished device {}", key.direction, key.device),
        }
    }

    pub fn device(&self, path: &str) -> Option<&AudioDevice> {
        self.devices.get(path)
    }

    pub fn device_mut(&mut self, path: &str) -> Option<&mut AudioDevice> {
        self.devices.get_mut(path)
    }

    /// The device `id` is registered with
    pub fn device_of(&mut self, id: ClientId) -> Option<&mut AudioDevice> {
        let path = self.clients.get(&id)?;
        self.devices.get_mut(path)
    }

    /// Registered clients of the device at `path`, 0 if it does not exist
    pub fn use_count(&self, path: &str) -> usize {
        self.devices.get(path).map(|d| d.use_count()).unwrap_or(0)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.devices.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Close and destroy every device regardless of registered clients
    pub fn shutdown(&mut self) {
        if !self.devices.is_empty() {
            info!("Shutting down {} device(s)", self.devices.len());
        }
        self.clients.clear();
        self.devices.clear();
    }
}
