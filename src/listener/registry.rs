//! Capacity-bounded table of listener slots keyed by descriptor.
//!
//! The table lock guards only lookups, inserts and removals. It is never held
//! across a thread spawn, a join or any I/O. Each slot tracks its data and
//! event listeners separately.

use super::data;
use super::event::{self, DescriptorStatus, LineStatusSource};
use super::{DataCallback, EventCallback, Lifecycle, LifecycleCell, ListenerKind, Waker};
use crate::config::{Config, ListenerConfig};
use crate::error::{Result, SerialError};
use crate::port::handle::ConfigGate;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Slot count of the process-wide registry.
pub const DEFAULT_CAPACITY: usize = 1024;

static GLOBAL: Lazy<ThreadRegistry> =
    Lazy::new(|| ThreadRegistry::with_settings(DEFAULT_CAPACITY, ListenerSettings::default()));

/// Tuning shared by all listeners of one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Upper bound on bytes handed to one data callback.
    pub read_chunk_size: usize,
    /// How often the event listener samples the modem lines.
    pub line_poll_interval: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            line_poll_interval: Duration::from_millis(50),
        }
    }
}

impl From<&ListenerConfig> for ListenerSettings {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size,
            line_poll_interval: Duration::from_millis(config.line_poll_interval_ms),
        }
    }
}

/// What a listener thread needs from its spawner.
pub(super) struct ThreadContext {
    pub(super) fd: RawFd,
    pub(super) cancel: Arc<AtomicBool>,
    pub(super) lifecycle: Arc<LifecycleCell>,
    /// Signalled exactly once: the armed waker, or the startup error.
    pub(super) ready: SyncSender<Result<Arc<Waker>>>,
}

/// A listener to start on a slot.
pub enum Listener {
    Data {
        callback: Arc<dyn DataCallback>,
        gate: Option<ConfigGate>,
    },
    Event {
        callback: Arc<dyn EventCallback>,
        source: Option<Box<dyn LineStatusSource>>,
    },
}

impl Listener {
    pub fn data(callback: impl DataCallback) -> Self {
        Self::Data {
            callback: Arc::new(callback),
            gate: None,
        }
    }

    pub fn event(callback: impl EventCallback) -> Self {
        Self::Event {
            callback: Arc::new(callback),
            source: None,
        }
    }

    /// Hold `gate` shared while draining, so a concurrent `configure` on the
    /// owning port cannot interleave with a read. Ignored for event listeners.
    pub fn with_gate(self, gate: ConfigGate) -> Self {
        match self {
            Self::Data { callback, .. } => Self::Data {
                callback,
                gate: Some(gate),
            },
            other => other,
        }
    }

    /// Sample line status from `source` instead of the slot's descriptor.
    /// Ignored for data listeners.
    pub fn with_source(self, source: impl LineStatusSource) -> Self {
        match self {
            Self::Event { callback, .. } => Self::Event {
                callback,
                source: Some(Box::new(source)),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ListenerKind {
        match self {
            Self::Data { .. } => ListenerKind::Data,
            Self::Event { .. } => ListenerKind::Event,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data { gate, .. } => f
                .debug_struct("Listener::Data")
                .field("gated", &gate.is_some())
                .finish_non_exhaustive(),
            Self::Event { source, .. } => f
                .debug_struct("Listener::Event")
                .field("custom_source", &source.is_some())
                .finish_non_exhaustive(),
        }
    }
}

struct Running {
    thread: JoinHandle<()>,
    waker: Arc<Waker>,
    cancel: Arc<AtomicBool>,
    lifecycle: Arc<LifecycleCell>,
}

enum KindState {
    Idle,
    Starting,
    Running(Running),
    Stopping,
}

/// Per-descriptor listener bookkeeping.
pub struct Slot {
    fd: RawFd,
    data: Mutex<KindState>,
    event: Mutex<KindState>,
}

/// Shared handle to a registry slot.
pub type SlotRef = Arc<Slot>;

impl Slot {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            data: Mutex::new(KindState::Idle),
            event: Mutex::new(KindState::Idle),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn state(&self, kind: ListenerKind) -> &Mutex<KindState> {
        match kind {
            ListenerKind::Data => &self.data,
            ListenerKind::Event => &self.event,
        }
    }

    /// Lifecycle of the `kind` listener, `None` if none was started.
    pub fn lifecycle(&self, kind: ListenerKind) -> Option<Lifecycle> {
        match &*self.state(kind).lock() {
            KindState::Idle => None,
            KindState::Starting => Some(Lifecycle::Starting),
            KindState::Running(running) => Some(running.lifecycle.get()),
            KindState::Stopping => Some(Lifecycle::Stopping),
        }
    }

    /// Whether a `kind` listener occupies this slot (running or not yet joined).
    pub fn is_active(&self, kind: ListenerKind) -> bool {
        !matches!(*self.state(kind).lock(), KindState::Idle)
    }

    fn is_idle(&self) -> bool {
        !self.is_active(ListenerKind::Data) && !self.is_active(ListenerKind::Event)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("fd", &self.fd)
            .field("data", &self.lifecycle(ListenerKind::Data))
            .field("event", &self.lifecycle(ListenerKind::Event))
            .finish()
    }
}

/// Move `kind` on `slot` from idle to starting. Callers hold the table lock.
fn reserve(slot: &Slot, kind: ListenerKind) -> Result<()> {
    let mut state = slot.state(kind).lock();
    if !matches!(*state, KindState::Idle) {
        return Err(SerialError::AlreadyRegistered {
            key: slot_key(slot.fd, kind),
        });
    }
    *state = KindState::Starting;
    Ok(())
}

fn slot_key(fd: RawFd, kind: ListenerKind) -> String {
    format!("{kind} listener on fd {fd}")
}

/// Bounded table of listener slots.
pub struct ThreadRegistry {
    capacity: usize,
    settings: ListenerSettings,
    slots: Mutex<HashMap<RawFd, SlotRef>>,
}

impl ThreadRegistry {
    pub fn new(capacity: usize) -> Self {
        Self::with_settings(capacity, ListenerSettings::default())
    }

    pub fn with_settings(capacity: usize, settings: ListenerSettings) -> Self {
        Self {
            capacity,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_settings(
            config.registry.capacity,
            ListenerSettings::from(&config.listener),
        )
    }

    /// The process-wide registry, with default capacity and settings.
    pub fn global() -> &'static ThreadRegistry {
        &GLOBAL
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn settings(&self) -> ListenerSettings {
        self.settings
    }

    /// Number of slots in use.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.slots.lock().contains_key(&fd)
    }

    pub fn slot(&self, fd: RawFd) -> Option<SlotRef> {
        self.slots.lock().get(&fd).cloned()
    }

    pub fn lifecycle(&self, fd: RawFd, kind: ListenerKind) -> Option<Lifecycle> {
        self.slot(fd)?.lifecycle(kind)
    }

    /// The slot for `fd`, allocating one if there is none.
    ///
    /// Idempotent: while the slot lives, every call returns the same one.
    pub fn acquire_slot(&self, fd: RawFd) -> Result<SlotRef> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&fd) {
            return Ok(Arc::clone(slot));
        }
        if slots.len() >= self.capacity {
            warn!(fd, capacity = self.capacity, "listener registry full");
            return Err(SerialError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let slot = Arc::new(Slot::new(fd));
        slots.insert(fd, Arc::clone(&slot));
        debug!(fd, used = slots.len(), "slot allocated");
        Ok(slot)
    }

    /// Give back a slot that has no listener running.
    pub fn release_slot(&self, slot: &SlotRef) {
        let mut slots = self.slots.lock();
        let current = slots
            .get(&slot.fd)
            .map_or(false, |existing| Arc::ptr_eq(existing, slot));
        if current && slot.is_idle() {
            slots.remove(&slot.fd);
            debug!(fd = slot.fd, used = slots.len(), "slot reclaimed");
        }
    }

    /// Spawn `listener` on `slot` and wait until it is armed.
    ///
    /// On success the listener is already waiting for its first event, so
    /// anything that happens after this returns will be observed.
    pub fn start_listener(&self, slot: &SlotRef, listener: Listener) -> Result<()> {
        let kind = listener.kind();
        let fd = slot.fd;
        {
            let slots = self.slots.lock();
            let current = slots
                .get(&fd)
                .map_or(false, |existing| Arc::ptr_eq(existing, slot));
            if !current {
                return Err(SerialError::NotRegistered {
                    key: format!("slot for fd {fd}"),
                });
            }
            reserve(slot, kind)?;
        }
        self.launch(slot, listener)
    }

    /// Second half of a start: the kind is already `Starting` on `slot`.
    fn launch(&self, slot: &SlotRef, listener: Listener) -> Result<()> {
        let kind = listener.kind();
        let fd = slot.fd;
        match self.spawn(fd, listener) {
            Ok(running) => {
                *slot.state(kind).lock() = KindState::Running(running);
                info!(fd, %kind, "listener started");
                Ok(())
            }
            Err(err) => {
                *slot.state(kind).lock() = KindState::Idle;
                warn!(fd, %kind, error = %err, "listener failed to start");
                Err(err)
            }
        }
    }

    fn spawn(&self, fd: RawFd, listener: Listener) -> Result<Running> {
        let kind = listener.kind();
        let cancel = Arc::new(AtomicBool::new(false));
        let lifecycle = Arc::new(LifecycleCell::new());
        let (ready, armed) = mpsc::sync_channel(1);
        let ctx = ThreadContext {
            fd,
            cancel: Arc::clone(&cancel),
            lifecycle: Arc::clone(&lifecycle),
            ready,
        };

        let settings = self.settings;
        let builder = thread::Builder::new().name(format!("serial-{kind}-{fd}"));
        let spawned = match listener {
            Listener::Data { callback, gate } => builder
                .spawn(move || data::run(ctx, callback, gate, settings.read_chunk_size)),
            Listener::Event { callback, source } => {
                let source = source.unwrap_or_else(|| Box::new(DescriptorStatus::new(fd)));
                builder.spawn(move || {
                    event::run(ctx, source, callback, settings.line_poll_interval)
                })
            }
        };
        let thread = spawned.map_err(|err| {
            error!(fd, %kind, error = %err, "spawning listener thread failed");
            SerialError::lifecycle("spawn")
        })?;

        match armed.recv() {
            Ok(Ok(waker)) => Ok(Running {
                thread,
                waker,
                cancel,
                lifecycle,
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                // The thread died before reporting either way.
                let _ = thread.join();
                Err(SerialError::lifecycle("start"))
            }
        }
    }

    /// Cancel, wake and join the `kind` listener of `slot`, then reclaim the
    /// slot if nothing else runs on it.
    pub fn stop_listener(&self, slot: &SlotRef, kind: ListenerKind) -> Result<()> {
        let fd = slot.fd;
        let running = {
            let mut state = slot.state(kind).lock();
            match std::mem::replace(&mut *state, KindState::Stopping) {
                KindState::Running(running) => running,
                KindState::Idle => {
                    *state = KindState::Idle;
                    return Err(SerialError::NotRegistered {
                        key: slot_key(fd, kind),
                    });
                }
                other => {
                    *state = other;
                    return Err(SerialError::lifecycle("stop"));
                }
            }
        };

        running.cancel.store(true, Ordering::Release);
        if let Err(err) = running.waker.wake() {
            // Without a wake the thread may never return; keep it registered.
            *slot.state(kind).lock() = KindState::Running(running);
            return Err(err);
        }
        let joined = running.thread.join();

        *slot.state(kind).lock() = KindState::Idle;
        self.release_slot(slot);

        match joined {
            Ok(()) => {
                info!(fd, %kind, "listener stopped");
                Ok(())
            }
            Err(_) => {
                error!(fd, %kind, "listener thread panicked");
                Err(SerialError::lifecycle("join"))
            }
        }
    }

    /// Acquire the slot for `fd` and start `listener` on it. A slot allocated
    /// here is given back if the start fails.
    ///
    /// The slot lookup and the reservation of the listener kind happen under
    /// one table lock, so a concurrent stop of the other kind cannot reclaim
    /// the slot in between.
    pub fn register(&self, fd: RawFd, listener: Listener) -> Result<SlotRef> {
        let kind = listener.kind();
        let slot = {
            let mut slots = self.slots.lock();
            let slot = match slots.get(&fd) {
                Some(slot) => Arc::clone(slot),
                None => {
                    if slots.len() >= self.capacity {
                        warn!(fd, capacity = self.capacity, "listener registry full");
                        return Err(SerialError::CapacityExceeded {
                            capacity: self.capacity,
                        });
                    }
                    let slot = Arc::new(Slot::new(fd));
                    slots.insert(fd, Arc::clone(&slot));
                    debug!(fd, used = slots.len(), "slot allocated");
                    slot
                }
            };
            if let Err(err) = reserve(&slot, kind) {
                drop(slots);
                self.release_slot(&slot);
                return Err(err);
            }
            slot
        };

        match self.launch(&slot, listener) {
            Ok(()) => Ok(slot),
            Err(err) => {
                self.release_slot(&slot);
                Err(err)
            }
        }
    }

    pub fn register_data_listener(&self, fd: RawFd, callback: impl DataCallback) -> Result<SlotRef> {
        self.register(fd, Listener::data(callback))
    }

    pub fn register_event_listener(
        &self,
        fd: RawFd,
        callback: impl EventCallback,
    ) -> Result<SlotRef> {
        self.register(fd, Listener::event(callback))
    }

    /// Stop the `kind` listener for `fd`.
    pub fn unregister(&self, fd: RawFd, kind: ListenerKind) -> Result<()> {
        let slot = self.slot(fd).ok_or_else(|| SerialError::NotRegistered {
            key: slot_key(fd, kind),
        })?;
        self.stop_listener(&slot, kind)
    }

    pub fn unregister_data_listener(&self, fd: RawFd) -> Result<()> {
        self.unregister(fd, ListenerKind::Data)
    }

    pub fn unregister_event_listener(&self, fd: RawFd) -> Result<()> {
        self.unregister(fd, ListenerKind::Event)
    }

    /// Stop every listener.
    pub fn shutdown(&self) {
        let slots: Vec<SlotRef> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            for kind in [ListenerKind::Data, ListenerKind::Event] {
                if slot.is_active(kind) {
                    if let Err(err) = self.stop_listener(&slot, kind) {
                        warn!(fd = slot.fd, %kind, error = %err, "stopping listener during shutdown failed");
                    }
                }
            }
        }
    }
}

impl fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("capacity", &self.capacity)
            .field("used", &self.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
