//! Port handle and I/O engine over a pseudo-terminal.

mod common;

use common::{drain_peer, loopback, loopback_with, payload, read_exactly};
use pretty_assertions::assert_eq;
use serial_core::{BaudRate, FlowControl, PortConfiguration, SerialError, StopBits};
use std::io::Write;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_ping_reaches_the_port() {
    let mut line = loopback_with(PortConfiguration::new(115_200u32));
    line.peer.write_all(b"PING").unwrap();

    assert_eq!(read_exactly(&line.port, 4, TIMEOUT), b"PING");
    assert!(line.port.read_available(16).unwrap().is_empty());
    line.port.close().unwrap();
}

#[test]
fn test_read_available_with_nothing_pending() {
    let line = loopback();
    assert_eq!(line.port.read_available(64).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_write_all_delivers_every_byte() {
    for len in [0usize, 1, 4096, 3 * 4096 + 17] {
        let line = loopback();
        let expected = payload(len);
        let reader = drain_peer(line.peer.try_clone().unwrap(), len);

        line.port.write_all(&expected).unwrap();

        assert_eq!(reader.join().unwrap(), expected, "length {len}");
    }
}

#[test]
fn test_output_is_not_post_processed() {
    let line = loopback();
    let reader = drain_peer(line.peer.try_clone().unwrap(), 3);
    line.port.write_all(b"a\nb").unwrap();
    assert_eq!(reader.join().unwrap(), b"a\nb");
}

#[test]
fn test_input_is_not_line_buffered() {
    let mut line = loopback();
    line.peer.write_all(b"no newline").unwrap();
    assert_eq!(read_exactly(&line.port, 10, TIMEOUT), b"no newline");
}

#[cfg(target_os = "linux")]
#[test]
fn test_configuration_reads_back() {
    let line = loopback();
    // Pseudo-terminals force 8 data bits without parity; the rest is kept.
    for config in [
        PortConfiguration::new(9600u32),
        PortConfiguration::new(115_200u32).with_flow_control(FlowControl::Hardware),
        PortConfiguration::new(250_000u32).with_stop_bits(StopBits::Two),
        PortConfiguration::new(57_600u32).with_flow_control(FlowControl::Software),
    ] {
        line.port.configure(&config).unwrap();
        assert_eq!(line.port.configuration().unwrap(), config);
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_one_and_a_half_stop_bits_read_back_as_two() {
    let line = loopback();
    line.port
        .configure(&PortConfiguration::default().with_stop_bits(StopBits::OnePointFive))
        .unwrap();
    assert_eq!(line.port.configuration().unwrap().stop_bits, StopBits::Two);
}

#[test]
fn test_raw_configuration_exposes_speed() {
    let line = loopback_with(PortConfiguration::new(38_400u32));
    let raw = line.port.raw_configuration().unwrap();
    assert_eq!(raw.baud(), Some(BaudRate::from_rate(38_400)));
    assert_eq!(raw.local_flags() & libc::ICANON, 0);
    assert_eq!(raw.local_flags() & libc::ECHO, 0);
}

#[test]
fn test_min_read_length_is_bounded() {
    let line = loopback();
    line.port.set_min_read_length(0).unwrap();
    line.port.set_min_read_length(255).unwrap();
    assert!(matches!(
        line.port.set_min_read_length(256),
        Err(SerialError::InvalidConfiguration { .. })
    ));
    assert_eq!(line.port.configuration().unwrap().min_read_length, 255);
}

#[test]
fn test_clear_buffers_discards_pending_input() {
    let mut line = loopback();
    line.peer.write_all(b"stale").unwrap();
    std::thread::sleep(Duration::from_millis(50));

    line.port.clear_buffers(true, false).unwrap();
    assert!(line.port.read_available(16).unwrap().is_empty());
}

#[test]
fn test_parity_reporting_without_parity_is_rejected() {
    let line = loopback();
    let mut config = PortConfiguration::default();
    config.report_parity_errors = true;
    assert_eq!(
        line.port.configure(&config).unwrap_err(),
        SerialError::ParityNotEnabled
    );
}
