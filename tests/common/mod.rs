//! Shared fixtures for integration tests.
//!
//! A pseudo-terminal pair stands in for a cable: the slave side is wrapped
//! in a [`SerialPort`], the master side is the far end.

#![allow(dead_code)]

use nix::pty::openpty;
use serial_core::{OpenOptions, PortConfiguration, SerialPort};
use std::fs::File;
use std::io::Read;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A port and the peer end of its line.
pub struct Loopback {
    pub port: SerialPort,
    pub peer: File,
}

pub fn loopback() -> Loopback {
    loopback_with(PortConfiguration::default())
}

pub fn loopback_with(config: PortConfiguration) -> Loopback {
    let pty = openpty(None, None).expect("openpty");
    let port = SerialPort::from_owned_fd(
        pty.slave,
        "pty",
        OpenOptions::new().exclusive(false).config(config),
    )
    .expect("initialize pty slave");
    Loopback {
        port,
        peer: File::from(pty.master),
    }
}

/// Poll `port` until `len` bytes have arrived or `timeout` passes.
pub fn read_exactly(port: &SerialPort, len: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(len);
    while received.len() < len && Instant::now() < deadline {
        let chunk = port
            .read_available(len - received.len())
            .expect("read_available");
        if chunk.is_empty() {
            thread::sleep(Duration::from_millis(2));
        }
        received.extend_from_slice(&chunk);
    }
    received
}

/// Read `len` bytes from the peer on a background thread.
pub fn drain_peer(mut peer: File, len: usize) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut received = vec![0u8; len];
        peer.read_exact(&mut received).expect("peer read");
        received
    })
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
