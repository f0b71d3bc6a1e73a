//! Integration Tests for the Modbus TCP master
//!
//! These tests drive the client against an in-process mock slave listening
//! on a loopback port, so every byte goes through a real TCP socket.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use modbus_tcp_master::*;

/// What the mock slave does with one request
enum Reply {
    Respond(Vec<u8>),
    /// Framed response written as two pieces, `pause` apart
    Split { at: usize, pause: Duration, response: Vec<u8> },
    /// Bytes written as they are, without an MBAP header
    Raw(Vec<u8>),
    Silent,
    Close,
}

/// A request as seen by the slave
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    transaction_id: u16,
    unit_id: u8,
    pdu: Vec<u8>,
}

type Handler = Arc<dyn Fn(usize, &[u8]) -> Reply + Send + Sync>;

/// Mock Modbus TCP slave
///
/// The handler receives the 1-based request number and the request PDU.
struct MockSlave {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Observed>>>,
}

impl MockSlave {
    fn start<F>(handler: F) -> Self
    where
        F: Fn(usize, &[u8]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let accepted = Arc::clone(&connections);
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accepted.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                let seen = Arc::clone(&seen);
                thread::spawn(move || serve(stream, handler, seen));
            }
        });

        Self { port, connections, requests }
    }

    /// Slave that echoes every request
    fn echo() -> Self {
        Self::start(|_, pdu| Reply::Respond(pdu.to_vec()))
    }

    fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
            .with_receive_timeout_ms(200)
            .with_connect_timeout_ms(500)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<Observed> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(mut stream: TcpStream, handler: Handler, seen: Arc<Mutex<Vec<Observed>>>) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).is_err() {
            return;
        }

        let request_number = {
            let mut seen = seen.lock().unwrap();
            seen.push(Observed {
                transaction_id: u16::from_be_bytes([header[0], header[1]]),
                unit_id: header[6],
                pdu: pdu.clone(),
            });
            seen.len()
        };

        let frame = |response: &[u8]| {
            let mut frame = header[..4].to_vec();
            frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
            frame.push(header[6]);
            frame.extend_from_slice(response);
            frame
        };
        let written = match handler(request_number, &pdu) {
            Reply::Respond(response) => stream.write_all(&frame(&response)),
            Reply::Split { at, pause, response } => {
                let frame = frame(&response);
                stream.write_all(&frame[..at]).and_then(|_| {
                    thread::sleep(pause);
                    stream.write_all(&frame[at..])
                })
            }
            Reply::Raw(bytes) => stream.write_all(&bytes),
            Reply::Silent => Ok(()),
            Reply::Close => return,
        };
        if written.is_err() {
            return;
        }
    }
}

/// Poll until `condition` holds or a second has passed
fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn connected_client(slave: &MockSlave) -> ModbusTcpClient {
    let mut client = ModbusTcpClient::new();
    client.setup(slave.config()).unwrap();
    client.connect().unwrap();
    client
}

/// Write single coil against a slave echoing the request
#[test]
fn test_write_single_coil_echo() {
    let slave = MockSlave::echo();
    let mut client = connected_client(&slave);

    assert_eq!(client.write_single_coil(2700, true, 1), Ok(()));

    let requests = slave.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].pdu, vec![0x05, 0x0A, 0x8C, 0xFF, 0x00]);
    assert_eq!(requests[0].unit_id, 1);

    client.disconnect().unwrap();
}

/// Exception answers surface with the slave's exception code
#[test]
fn test_write_single_coil_exception() {
    let slave = MockSlave::start(|_, _| Reply::Respond(vec![0x85, 0x02]));
    let mut client = connected_client(&slave);

    let result = client.write_single_coil(2700, true, 1);
    assert_eq!(
        result,
        Err(RequestError::ExceptionResponse { function: 0x85, exception: Some(0x02) })
    );
    // No retry on a well-formed answer
    assert_eq!(slave.requests().len(), 1);
}

/// Coils and registers are decoded to exactly the requested length
#[test]
fn test_read_coils_and_registers() {
    let slave = MockSlave::start(|_, pdu| match pdu[0] {
        0x01 => Reply::Respond(vec![0x01, 0x01, 0b0000_0101]),
        0x03 => Reply::Respond(vec![0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0xFF, 0xFF]),
        _ => Reply::Respond(vec![pdu[0] | 0x80, 0x01]),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.read_coils(0, 3, 1).unwrap(), vec![true, false, true]);
    assert_eq!(client.read_coils(0, 1, 1).unwrap(), vec![true]);
    assert_eq!(client.read_holding_registers(100, 3, 1).unwrap(), vec![1, 2, -1]);

    let requests = slave.requests();
    assert_eq!(requests[2].pdu, vec![0x03, 0x00, 0x64, 0x00, 0x03]);
}

/// Each exchange uses the next transaction id
#[test]
fn test_transaction_ids_increment() {
    let slave = MockSlave::echo();
    let mut client = connected_client(&slave);

    for register in 0..3 {
        client.write_single_register(register, 10, 1).unwrap();
    }

    let ids: Vec<u16> = slave.requests().iter().map(|r| r.transaction_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

/// A silent slave costs exactly the configured number of exchanges
#[test]
fn test_silent_slave_exhausts_retries() {
    let slave = MockSlave::start(|_, _| Reply::Silent);
    let mut client = ModbusTcpClient::new();
    client.setup(slave.config().with_receive_timeout_ms(50)).unwrap();
    client.connect().unwrap();

    let result = client.read_holding_registers(0, 1, 1);
    assert!(matches!(result, Err(RequestError::NoResponse { .. })));

    assert!(wait_for(|| slave.requests().len() == 5));
    assert!(wait_for(|| slave.connections() == 3));

    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, 5);
    assert_eq!(stats.responses_received, 0);
    assert_eq!(stats.timeouts, 5);
    assert_eq!(stats.connects, 3);
}

/// Operations connect on demand after setup
#[test]
fn test_connect_on_demand() {
    let slave = MockSlave::echo();
    let mut client = ModbusTcpClient::new();
    client.setup(slave.config()).unwrap();
    assert_eq!(client.state(), ConnectionState::Configured);

    client.write_single_register(1, 3, 1).unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(wait_for(|| slave.connections() == 1));
}

/// A dropped connection is recovered by the reconnect tier
#[test]
fn test_reconnect_after_connection_drop() {
    let slave = MockSlave::start(|n, pdu| {
        if n == 1 {
            Reply::Close
        } else {
            Reply::Respond(pdu.to_vec())
        }
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.write_single_coil(5, false, 1), Ok(()));
    assert!(wait_for(|| slave.connections() == 2));
    assert_eq!(slave.requests().len(), 2);
    assert!(client.is_connected());
}

/// Out-of-range arguments never touch the network
#[test]
fn test_range_errors_without_io() {
    let slave = MockSlave::echo();
    let mut client = ModbusTcpClient::new();
    client.setup(slave.config()).unwrap();

    assert!(matches!(client.read_coils(-1, 1, 1), Err(RequestError::Range { .. })));
    assert!(matches!(client.read_coils(0, 2001, 1), Err(RequestError::Range { .. })));
    assert!(matches!(client.read_holding_registers(0, 0, 1), Err(RequestError::Range { .. })));
    assert!(matches!(client.write_single_coil(65535, true, 1), Err(RequestError::Range { .. })));

    thread::sleep(Duration::from_millis(20));
    assert_eq!(slave.connections(), 0);
    assert_eq!(client.get_stats(), TransportStats::default());
}

/// Lifecycle errors before and after a connection
#[test]
fn test_lifecycle_errors() {
    let mut client = ModbusTcpClient::new();
    assert_eq!(client.connect(), Err(ConnectError::NotConfigured));
    assert_eq!(client.disconnect(), Err(DisconnectError::NotConnected));
    assert!(matches!(
        client.setup(ConnectionConfig::new("127.0.0.1", 0)),
        Err(SetupError::BadAddress { .. })
    ));

    let slave = MockSlave::echo();
    let mut client = connected_client(&slave);
    assert_eq!(client.disconnect(), Ok(()));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.disconnect(), Err(DisconnectError::NotConnected));

    // Reconnect after a clean disconnect
    client.connect().unwrap();
    assert!(client.is_connected());
}

/// Connecting to a closed port fails without leaving a socket behind
#[test]
fn test_connect_refused() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut client = ModbusTcpClient::new();
    client.setup(ConnectionConfig::new("127.0.0.1", port)).unwrap();

    assert!(matches!(client.connect(), Err(ConnectError::ConnectFailed { .. })));
    assert!(!client.is_connected());

    // Operations report the failed connect as no response
    assert!(matches!(client.read_coils(0, 1, 1), Err(RequestError::NoResponse { .. })));
}

/// Toggle reads the coil and writes its inverse
#[test]
fn test_toggle_coil() {
    let slave = MockSlave::start(|_, pdu| match pdu[0] {
        0x01 => Reply::Respond(vec![0x01, 0x01, 0x01]),
        _ => Reply::Respond(pdu.to_vec()),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.toggle_coil(12, 1), Ok(false));
    let requests = slave.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].pdu, vec![0x05, 0x00, 0x0C, 0x00, 0x00]);
}

/// Configuration loaded from a YAML file drives the connection
#[test]
fn test_yaml_config_file() {
    let slave = MockSlave::echo();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modbus.yaml");
    std::fs::write(
        &path,
        format!(
            "host: 127.0.0.1\nport: {}\nrequest_retry_count: 1\nreconnect_retry_count: 0\nreceive_timeout_ms: 100\n",
            slave.port
        ),
    )
    .unwrap();

    let config = ConnectionConfig::from_file(&path).unwrap();
    assert_eq!(config.request_retry_count, 1);

    let mut client = ModbusTcpClient::new();
    client.setup(config).unwrap();
    client.write_single_register(2, 99, 1).unwrap();
    assert_eq!(slave.requests().len(), 1);
}

/// The diagnostic sink sees timestamped traces of every exchange
#[test]
fn test_diagnostic_sink() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let callback: LogCallback = Box::new(move |_, line| sink.lock().unwrap().push(line.to_string()));
    let logger = CallbackLogger::with_mode(Some(callback), LogLevel::Debug, LoggingMode::Both);

    let slave = MockSlave::echo();
    let mut client = ModbusTcpClient::with_logger(logger);
    client.setup(slave.config()).unwrap();
    client.write_single_coil(2700, true, 1).unwrap();

    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("TX ADU tid=1") && l.contains("00 01 00 00 00 06 01 05 0A 8C FF 00")));
    assert!(lines.iter().any(|l| l.contains("RX ADU tid=1")));
    assert!(lines.iter().any(|l| l.contains("[INFO]") && l.contains("connected to")));
}

/// Register read answered with the request number as the value
fn numbered_register(request_number: usize) -> Vec<u8> {
    let value = request_number as u16;
    let mut response = vec![0x03, 0x02];
    response.extend_from_slice(&value.to_be_bytes());
    response
}

/// A reply arriving just after the receive timeout is drained, not handed
/// to the next exchange
#[test]
fn test_late_reply_is_drained() {
    let slave = MockSlave::start(|n, _| match n {
        1 => Reply::Split { at: 0, pause: Duration::from_millis(300), response: numbered_register(n) },
        _ => Reply::Respond(numbered_register(n)),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![2]);
    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![3]);

    let tids: Vec<u16> = slave.requests().iter().map(|r| r.transaction_id).collect();
    assert_eq!(tids, vec![1, 2, 3]);
    let stats = client.get_stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.responses_received, 2);
}

/// A reply later than the drain window is recognized by its transaction id
/// and skipped
#[test]
fn test_reply_for_abandoned_request_is_skipped() {
    let slave = MockSlave::start(|n, _| match n {
        1 => Reply::Split { at: 0, pause: Duration::from_millis(500), response: numbered_register(n) },
        _ => Reply::Respond(numbered_register(n)),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![2]);
    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![3]);
    assert_eq!(slave.requests().len(), 3);
}

/// A header cut short by the receive timeout leaves no debris for the retry
#[test]
fn test_partial_header_then_late_frame() {
    let slave = MockSlave::start(|n, _| match n {
        1 => Reply::Split { at: 3, pause: Duration::from_millis(300), response: numbered_register(n) },
        _ => Reply::Respond(numbered_register(n)),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![2]);
    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![3]);
    assert_eq!(client.get_stats().timeouts, 1);
}

/// An oversized frame is skipped whole, so the next attempt reads a clean
/// header
#[test]
fn test_oversized_frame_is_skipped() {
    let slave = MockSlave::start(|n, _| match n {
        1 => {
            let mut bytes = vec![0x00, 0x01, 0x00, 0x00, 0x01, 0x2C, 0x01];
            bytes.extend_from_slice(&[0x03; 299]);
            Reply::Raw(bytes)
        }
        _ => Reply::Respond(numbered_register(n)),
    });
    let mut client = connected_client(&slave);

    assert_eq!(client.read_holding_registers(0, 1, 1).unwrap(), vec![2]);
    let stats = client.get_stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(slave.requests().len(), 2);
    assert_eq!(slave.connections(), 1);
}
