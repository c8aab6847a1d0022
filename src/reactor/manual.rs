use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::rc::Rc;

use anyhow::Result;

use super::{Reactor, Watch, WatchKey};
use crate::engine::DeviceRegistry;

#[derive(Debug)]
struct WatchEntry {
    key: WatchKey,
    fd: Option<RawFd>,
    enabled: bool,
}

#[derive(Debug, Default)]
struct ManualState {
    next_id: u64,
    watches: BTreeMap<u64, WatchEntry>,
}

/// Reactor without an event source: readiness is simulated by the caller,
/// either by dispatching keys directly or via [`ManualReactor::dispatch_ready`],
/// which treats every enabled watch as ready. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ManualReactor {
    state: Rc<RefCell<ManualState>>,
}

impl ManualReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_count(&self) -> usize {
        self.state.borrow().watches.len()
    }

    pub fn is_watched(&self, key: &WatchKey) -> bool {
        self.state.borrow().watches.values().any(|w| &w.key == key)
    }

    /// Enable state of the watch for `key`, `None` if there is no such watch
    pub fn is_enabled(&self, key: &WatchKey) -> Option<bool> {
        self.state
            .borrow()
            .watches
            .values()
            .find(|w| &w.key == key)
            .map(|w| w.enabled)
    }

    pub fn watched_fd(&self, key: &WatchKey) -> Option<RawFd> {
        self.state
            .borrow()
            .watches
            .values()
            .find(|w| &w.key == key)
            .and_then(|w| w.fd)
    }

    /// Keys of all enabled watches, oldest first
    pub fn ready_keys(&self) -> Vec<WatchKey> {
        self.state
            .borrow()
            .watches
            .values()
            .filter(|w| w.enabled)
            .map(|w| w.key.clone())
            .collect()
    }

    /// Dispatch every currently enabled watch once. Returns the number of
    /// dispatched events.
    pub fn dispatch_ready(&self, registry: &mut DeviceRegistry) -> usize {
        let keys = self.ready_keys();
        for key in &keys {
            registry.dispatch(key);
        }
        keys.len()
    }
}

impl Reactor for ManualReactor {
    fn add_watch(&self, fd: Option<RawFd>, key: WatchKey) -> Result<Box<dyn Watch>> {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.watches.insert(
            id,
            WatchEntry {
                key,
                fd,
                enabled: true,
            },
        );

        Ok(Box::new(ManualWatch {
            id,
            state: Rc::clone(&self.state),
        }))
    }
}

struct ManualWatch {
    id: u64,
    state: Rc<RefCell<ManualState>>,
}

impl Watch for ManualWatch {
    fn set_enabled(&mut self, enabled: bool) {
        if let Some(entry) = self.state.borrow_mut().watches.get_mut(&self.id) {
            entry.enabled = enabled;
        }
    }

    fn is_enabled(&self) -> bool {
        self.state
            .borrow()
            .watches
            .get(&self.id)
            .map(|w| w.enabled)
            .unwrap_or(false)
    }
}

impl Drop for ManualWatch {
    fn drop(&mut self) {
        self.state.borrow_mut().watches.remove(&self.id);
    }
}
