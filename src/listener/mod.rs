//! Background listeners.
//!
//! A [`ThreadRegistry`] owns at most one slot per descriptor. Each slot can
//! run one data listener and one event listener, each on its own OS thread:
//!
//! ```text
//! register ──► acquire_slot ──► start_listener ──spawn──► STARTING
//!                                     ▲                      │ arm waker, send Ok
//!                                     └──── rendezvous ◄─────┘
//!                                                          RUNNING ◄─┐
//!                                              wake + cancel │       │ spurious wake
//!                                                            ▼       │
//!                                                         STOPPING ──┘
//!                                                            │
//!                                                         STOPPED ──► joined, slot reclaimed
//! ```

mod data;
mod event;
mod registry;
mod wake;

pub use event::{DescriptorStatus, LineStatusSource};
pub use registry::{Listener, ListenerSettings, Slot, SlotRef, ThreadRegistry, DEFAULT_CAPACITY};
pub use wake::Waker;

use crate::port::settings::LineStatus;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Receives bytes drained by a data listener.
pub trait DataCallback: Send + Sync + 'static {
    fn on_data(&self, bytes: &[u8]);
}

impl<F> DataCallback for F
where
    F: Fn(&[u8]) + Send + Sync + 'static,
{
    fn on_data(&self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Receives modem line states from an event listener whenever they change.
pub trait EventCallback: Send + Sync + 'static {
    fn on_line_status(&self, status: LineStatus);
}

impl<F> EventCallback for F
where
    F: Fn(LineStatus) + Send + Sync + 'static,
{
    fn on_line_status(&self, status: LineStatus) {
        self(status)
    }
}

/// Receives device attach (`true`) and removal (`false`) from a port monitor.
pub trait PresenceCallback: Send + Sync + 'static {
    fn on_presence_changed(&self, present: bool);
}

impl<F> PresenceCallback for F
where
    F: Fn(bool) + Send + Sync + 'static,
{
    fn on_presence_changed(&self, present: bool) {
        self(present)
    }
}

/// The two listener kinds a slot can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Data,
    Event,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => f.write_str("data"),
            Self::Event => f.write_str("event"),
        }
    }
}

/// Lifecycle of one listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Lifecycle {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// A [`Lifecycle`] shared between a listener thread and its owner.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Starting as u8))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            0 => Lifecycle::Starting,
            1 => Lifecycle::Running,
            2 => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }

    pub(crate) fn set(&self, state: Lifecycle) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closures_are_callbacks() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |bytes: &[u8]| sink.lock().unwrap().extend_from_slice(bytes);
        callback.on_data(b"AB");
        callback.on_data(b"C");
        assert_eq!(*seen.lock().unwrap(), b"ABC");
    }

    #[test]
    fn test_lifecycle_cell_transitions() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.get(), Lifecycle::Starting);
        cell.set(Lifecycle::Running);
        assert_eq!(cell.get(), Lifecycle::Running);
        cell.set(Lifecycle::Stopped);
        assert_eq!(cell.get(), Lifecycle::Stopped);
        assert!(Lifecycle::Stopping < Lifecycle::Stopped);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ListenerKind::Data.to_string(), "data");
        assert_eq!(ListenerKind::Event.to_string(), "event");
    }
}
