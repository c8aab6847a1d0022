use std::cell::{Cell, RefCell};
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::{Reactor, Watch, WatchKey};
use crate::engine::DeviceRegistry;
use crate::hal::Direction;

struct WatchShared {
    enabled: Cell<bool>,
    wake: Notify,
}

/// Reactor backed by tokio's IO driver. Each watch runs as a local task that
/// forwards readiness as a [`WatchKey`] on the channel returned by
/// [`TokioReactor::new`].
///
/// Watches must be created from within a `tokio::task::LocalSet` on a
/// runtime with IO enabled.
pub struct TokioReactor {
    events: mpsc::UnboundedSender<WatchKey>,
}

impl TokioReactor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchKey>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl Reactor for TokioReactor {
    fn add_watch(&self, fd: Option<RawFd>, key: WatchKey) -> Result<Box<dyn Watch>> {
        let fd = fd.ok_or_else(|| anyhow!("{} has no descriptor to watch", key.device))?;
        tokio::runtime::Handle::try_current()
            .context("Audio watches need a running tokio runtime")?;

        let interest = match key.direction {
            Direction::Input => Interest::READABLE,
            Direction::Output => Interest::WRITABLE,
        };
        // Each watch registers its own duplicate of the descriptor. Input and
        // output watches on one handle then get separate epoll entries, and
        // a cancelled watch deregisters a number no later open can reuse.
        // SAFETY: the backend handle owning `fd` outlives this call.
        let watched: OwnedFd = unsafe { BorrowedFd::borrow_raw(fd) }
            .try_clone_to_owned()
            .with_context(|| format!("Failed to duplicate descriptor of {}", key.device))?;
        let async_fd = AsyncFd::with_interest(watched, interest)
            .with_context(|| format!("Failed to watch {} for {:?}", key.device, key.direction))?;

        let shared = Rc::new(WatchShared {
            enabled: Cell::new(true),
            wake: Notify::new(),
        });
        let task = tokio::task::spawn_local(watch_loop(
            async_fd,
            key,
            self.events.clone(),
            Rc::clone(&shared),
        ));

        Ok(Box::new(TokioWatch { shared, task }))
    }
}

async fn wait_ready(async_fd: &AsyncFd<OwnedFd>, direction: Direction) -> std::io::Result<()> {
    let mut guard = match direction {
        Direction::Input => async_fd.readable().await?,
        Direction::Output => async_fd.writable().await?,
    };
    guard.clear_ready();
    Ok(())
}

async fn watch_loop(
    async_fd: AsyncFd<OwnedFd>,
    key: WatchKey,
    events: mpsc::UnboundedSender<WatchKey>,
    shared: Rc<WatchShared>,
) {
    loop {
        if !shared.enabled.get() {
            shared.wake.notified().await;
        } else {
            tokio::select! {
                ready = wait_ready(&async_fd, key.direction) => {
                    if let Err(e) = ready {
                        log::error!("Readiness wait on {} failed: {}", key.device, e);
                        break;
                    }
                }
                _ = shared.wake.notified() => {}
            }
        }

        // Re-enabling reports once even without a new readiness edge; the
        // handler re-checks the device state itself.
        if shared.enabled.get() && events.send(key.clone()).is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }
}

struct TokioWatch {
    shared: Rc<WatchShared>,
    task: JoinHandle<()>,
}

impl Watch for TokioWatch {
    fn set_enabled(&mut self, enabled: bool) {
        let was_enabled = self.shared.enabled.replace(enabled);
        if enabled && !was_enabled {
            self.shared.wake.notify_one();
        }
    }

    fn is_enabled(&self) -> bool {
        self.shared.enabled.get()
    }
}

impl Drop for TokioWatch {
    fn drop(&mut self) {
        // The task only stops at its next poll; keep it from reporting
        // anything in between
        self.shared.enabled.set(false);
        self.task.abort();
    }
}

/// Feed readiness events into `registry` until the channel closes.
/// Events for watches that were disabled or dropped in the meantime are
/// ignored by the registry.
pub async fn drive(registry: Rc<RefCell<DeviceRegistry>>, mut events: mpsc::UnboundedReceiver<WatchKey>) {
    while let Some(key) = events.recv().await {
        registry.borrow_mut().dispatch(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use tokio::task::LocalSet;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_output_watch_reports_writable_socket() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sock, _peer) = UnixStream::pair().unwrap();
                sock.set_nonblocking(true).unwrap();

                let (reactor, mut events) = TokioReactor::new();
                let _watch = reactor
                    .add_watch(Some(sock.as_raw_fd()), WatchKey::output("sock"))
                    .unwrap();

                let key = timeout(Duration::from_secs(1), events.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(key, WatchKey::output("sock"));
            })
            .await;
    }

    #[tokio::test]
    async fn test_disabled_watch_is_silent_until_enabled() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sock, _peer) = UnixStream::pair().unwrap();
                sock.set_nonblocking(true).unwrap();

                let (reactor, mut events) = TokioReactor::new();
                let mut watch = reactor
                    .add_watch(Some(sock.as_raw_fd()), WatchKey::output("sock"))
                    .unwrap();
                watch.set_enabled(false);

                let quiet = timeout(Duration::from_millis(50), events.recv()).await;
                assert!(quiet.is_err());

                watch.set_enabled(true);
                let key = timeout(Duration::from_secs(1), events.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(key.direction, Direction::Output);
            })
            .await;
    }

    #[tokio::test]
    async fn test_input_and_output_watch_share_descriptor() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sock, mut peer) = UnixStream::pair().unwrap();
                sock.set_nonblocking(true).unwrap();

                let (reactor, mut events) = TokioReactor::new();
                let _input = reactor
                    .add_watch(Some(sock.as_raw_fd()), WatchKey::input("dsp"))
                    .unwrap();
                let _output = reactor
                    .add_watch(Some(sock.as_raw_fd()), WatchKey::output("dsp"))
                    .unwrap();

                peer.write_all(&[0u8; 16]).unwrap();

                let mut seen_input = false;
                let mut seen_output = false;
                while !(seen_input && seen_output) {
                    let key = timeout(Duration::from_secs(1), events.recv())
                        .await
                        .unwrap()
                        .unwrap();
                    match key.direction {
                        Direction::Input => seen_input = true,
                        Direction::Output => seen_output = true,
                    }
                }
            })
            .await;
    }

    #[tokio::test]
    async fn test_watch_after_reopen_reports_readiness() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (reactor, mut events) = TokioReactor::new();

                let (old, _old_peer) = UnixStream::pair().unwrap();
                let watch = reactor
                    .add_watch(Some(old.as_raw_fd()), WatchKey::output("old"))
                    .unwrap();
                drop(watch);
                drop(old);

                // Likely reuses the descriptor number just closed
                let (new, _new_peer) = UnixStream::pair().unwrap();
                let _watch = reactor
                    .add_watch(Some(new.as_raw_fd()), WatchKey::output("new"))
                    .unwrap();

                loop {
                    let key = timeout(Duration::from_secs(1), events.recv())
                        .await
                        .unwrap()
                        .unwrap();
                    assert_ne!(key.device, "old");
                    if key.device == "new" {
                        break;
                    }
                }
            })
            .await;
    }

    #[test]
    fn test_watch_requires_descriptor() {
        let (reactor, _events) = TokioReactor::new();
        assert!(reactor.add_watch(None, WatchKey::input("mock")).is_err());
    }
}
