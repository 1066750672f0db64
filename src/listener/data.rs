//! Data listener: drains readable bytes into a callback.

use super::registry::ThreadContext;
use super::{DataCallback, Lifecycle, Waker};
use crate::platform::native;
use crate::port::handle::ConfigGate;
use crate::port::io::{read_once, FdIo};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const HANGUP: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

pub(super) fn run(
    ctx: ThreadContext,
    callback: Arc<dyn DataCallback>,
    gate: Option<ConfigGate>,
    chunk: usize,
) {
    let ThreadContext {
        fd,
        cancel,
        lifecycle,
        ready,
    } = ctx;

    let waker = match Waker::new() {
        Ok(waker) => Arc::new(waker),
        Err(err) => {
            lifecycle.set(Lifecycle::Stopped);
            let _ = ready.send(Err(err));
            return;
        }
    };

    // SAFETY: the owner keeps the descriptor open until this listener has
    // been stopped and joined.
    let io = FdIo::new(unsafe { BorrowedFd::borrow_raw(fd) }, native());
    let mut fds = [
        libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: waker.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    lifecycle.set(Lifecycle::Running);
    if ready.send(Ok(Arc::clone(&waker))).is_err() {
        lifecycle.set(Lifecycle::Stopped);
        return;
    }
    debug!(fd, kind = "data", "listener running");

    while !cancel.load(Ordering::Acquire) {
        fds[0].revents = 0;
        fds[1].revents = 0;
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!(fd, kind = "data", error = %err, "poll failed, listener exiting");
            break;
        }

        if fds[1].revents & libc::POLLIN != 0 {
            waker.reset();
            if cancel.load(Ordering::Acquire) {
                break;
            }
            debug!(fd, kind = "data", "spurious wake");
        }

        let revents = fds[0].revents;
        if revents & libc::POLLIN != 0 {
            // One read per readiness report: the descriptor may be blocking.
            let drained = {
                let _shared = gate.as_ref().map(|gate| gate.read());
                read_once(&io, chunk)
            };
            match drained {
                Ok(bytes) if !bytes.is_empty() => {
                    trace!(fd, len = bytes.len(), "data available");
                    callback.on_data(&bytes);
                }
                Ok(_) if revents & HANGUP != 0 => {
                    warn!(fd, kind = "data", "descriptor hung up, listener exiting");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(fd, kind = "data", error = %err, "read failed, listener exiting");
                    break;
                }
            }
        } else if revents & HANGUP != 0 {
            warn!(fd, kind = "data", revents, "descriptor hung up, listener exiting");
            break;
        }
    }

    lifecycle.set(Lifecycle::Stopping);
    drop(waker);
    lifecycle.set(Lifecycle::Stopped);
    debug!(fd, kind = "data", "listener stopped");
}
