//! Event listener: reports modem line changes.
//!
//! The modem-interrupt wait (`TIOCMIWAIT`) cannot be interrupted without a
//! signal, so every platform uses a sleep-and-poll loop whose sleep is the
//! waker, which lets cancellation end the sleep immediately.

use super::registry::ThreadContext;
use super::{EventCallback, Lifecycle, Waker};
use crate::error::Result;
use crate::platform::{native, TerminalDriver};
use crate::port::settings::LineStatus;
use std::os::fd::RawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Where an event listener samples line status from.
pub trait LineStatusSource: Send + Sync + 'static {
    fn line_status(&self) -> Result<LineStatus>;
}

/// Line status of a descriptor, read through the native driver.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorStatus {
    fd: RawFd,
}

impl DescriptorStatus {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl LineStatusSource for DescriptorStatus {
    fn line_status(&self) -> Result<LineStatus> {
        native().line_status(self.fd)
    }
}

pub(super) fn run(
    ctx: ThreadContext,
    source: Box<dyn LineStatusSource>,
    callback: Arc<dyn EventCallback>,
    interval: Duration,
) {
    let ThreadContext {
        fd,
        cancel,
        lifecycle,
        ready,
    } = ctx;

    // The first sample happens before reporting ready, so a descriptor
    // without modem lines fails the registration instead of the thread.
    let armed = Waker::new().and_then(|waker| Ok((Arc::new(waker), source.line_status()?)));
    let (waker, mut last) = match armed {
        Ok(armed) => armed,
        Err(err) => {
            lifecycle.set(Lifecycle::Stopped);
            let _ = ready.send(Err(err));
            return;
        }
    };

    lifecycle.set(Lifecycle::Running);
    if ready.send(Ok(Arc::clone(&waker))).is_err() {
        lifecycle.set(Lifecycle::Stopped);
        return;
    }
    debug!(fd, kind = "event", ?last, "listener running");

    while !cancel.load(Ordering::Acquire) {
        match waker.wait(Some(interval)) {
            Ok(true) => {
                waker.reset();
                if cancel.load(Ordering::Acquire) {
                    break;
                }
                debug!(fd, kind = "event", "spurious wake");
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(fd, kind = "event", error = %err, "waiting for wake failed");
                break;
            }
        }

        match source.line_status() {
            Ok(status) if status != last => {
                trace!(fd, ?status, "line status changed");
                callback.on_line_status(status);
                last = status;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(fd, kind = "event", error = %err, "line status read failed, listener exiting");
                break;
            }
        }
    }

    lifecycle.set(Lifecycle::Stopping);
    drop(waker);
    lifecycle.set(Lifecycle::Stopped);
    debug!(fd, kind = "event", "listener stopped");
}
