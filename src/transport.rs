//! # Modbus TCP Transport Layer
//!
//! This module owns the socket side of the master: configuration, the
//! connection lifecycle, the transaction id counter and the single
//! request/response round trip (`raw_request`).
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Unconfigured --setup--> Configured --connect--> Connected
//!                                                   |   ^
//!                                        disconnect |   | connect
//!                                                   v   |
//!                                               Disconnected
//! ```
//!
//! While connected the transport holds the socket plus a buffered write
//! stream and a read stream cloned from it. Teardown releases them in the
//! order write stream, read stream, socket.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use modbus_tcp_master::config::ConnectionConfig;
//! use modbus_tcp_master::transport::{ModbusTransport, TcpTransport};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::new();
//!     transport.setup(ConnectionConfig::new("127.0.0.1", 502))?;
//!     transport.connect()?;
//!
//!     // Read 10 holding registers from unit 1
//!     let response = transport.raw_request(&[0x03, 0x00, 0x00, 0x00, 0x0A], 1)?;
//!     println!("Response PDU: {:02X?}", response);
//!
//!     let stats = transport.get_stats();
//!     println!("Requests sent: {}", stats.requests_sent);
//!
//!     transport.disconnect()?;
//!     Ok(())
//! }
//! ```

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, DisconnectError, ExchangeError, SetupError};
use crate::logging::CallbackLogger;
use crate::protocol::{decode_mbap, encode_mbap, MbapHeader, UnitId, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::utils::format::bytes_to_hex;

/// Transport layer abstraction used by the retry orchestrator
///
/// Everything above this seam is generic over it, so the retry policy and
/// the operation layer run unchanged against a scripted transport in tests.
pub trait ModbusTransport: Send {
    /// Open a connection using the stored configuration
    fn connect(&mut self) -> Result<(), ConnectError>;

    /// Release the connection; handles are dropped even when this fails
    fn disconnect(&mut self) -> Result<(), DisconnectError>;

    fn is_connected(&self) -> bool;

    /// Exactly one send/receive round trip; returns the response PDU
    ///
    /// Never retries and never reconnects.
    fn raw_request(&mut self, pdu: &[u8], unit_id: UnitId) -> Result<Vec<u8>, ExchangeError>;

    /// Snapshot of the transport counters
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connects: u64,
    pub disconnects: u64,
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconfigured,
    Configured,
    Connected,
    Disconnected,
}

/// MBAP transaction id counter
///
/// Issues 1, 2, ..., 65535, then starts over at 1. Zero is never issued.
#[derive(Debug, Clone)]
pub struct TransactionIdGenerator {
    next: u16,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Return the current id and advance the counter
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = if id == u16::MAX { 1 } else { id + 1 };
        id
    }

    /// Id the next call to `next_id` will return
    pub fn peek(&self) -> u16 {
        self.next
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking Modbus TCP transport
pub struct TcpTransport {
    config: Option<ConnectionConfig>,
    address: Option<SocketAddr>,
    state: ConnectionState,
    socket: Option<TcpStream>,
    writer: Option<BufWriter<TcpStream>>,
    reader: Option<TcpStream>,
    transaction_ids: TransactionIdGenerator,
    logger: CallbackLogger,
    stats: TransportStats,
}

impl TcpTransport {
    /// Unconfigured transport with a disabled diagnostic sink
    pub fn new() -> Self {
        Self::with_logger(CallbackLogger::disabled())
    }

    pub fn with_logger(logger: CallbackLogger) -> Self {
        Self {
            config: None,
            address: None,
            state: ConnectionState::Unconfigured,
            socket: None,
            writer: None,
            reader: None,
            transaction_ids: TransactionIdGenerator::new(),
            logger,
            stats: TransportStats::default(),
        }
    }

    /// Validate and resolve the slave address
    ///
    /// The first resolved address is kept for every later connect. Calling
    /// this again replaces the configuration; an open connection keeps
    /// running until the next reconnect.
    pub fn setup(&mut self, config: ConnectionConfig) -> Result<(), SetupError> {
        let host = config.host.trim();
        if host.is_empty() || host.len() != config.host.len() || host.contains(char::is_whitespace) {
            self.logger.error(&format!("setup: bad host {:?}", config.host));
            return Err(SetupError::BadAddress {
                message: format!("invalid host {:?}", config.host),
            });
        }
        if config.port == 0 {
            self.logger.error("setup: port must be greater than 0");
            return Err(SetupError::BadAddress {
                message: "port must be greater than 0".to_string(),
            });
        }

        let address = resolve(&config.host, config.port).map_err(|message| {
            self.logger.error(&format!("setup: cannot resolve {}: {}", config.host, message));
            SetupError::NameResolutionDenied {
                host: config.host.clone(),
                message,
            }
        })?;

        self.logger.info(&format!(
            "setup: slave {}:{} resolved to {}",
            config.host, config.port, address
        ));
        debug!("Modbus slave {} resolved to {}", config.address(), address);

        self.address = Some(address);
        self.config = Some(config);
        if self.state == ConnectionState::Unconfigured {
            self.state = ConnectionState::Configured;
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// Resolved slave address, once configured
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn logger(&self) -> &CallbackLogger {
        &self.logger
    }

    /// Id the next exchange will use
    pub fn peek_transaction_id(&self) -> u16 {
        self.transaction_ids.peek()
    }

    /// Advance the transaction id counter
    pub fn next_transaction_id(&mut self) -> u16 {
        self.transaction_ids.next_id()
    }

    fn open_socket(
        &self,
        config: &ConnectionConfig,
        address: SocketAddr,
    ) -> Result<TcpStream, ConnectError> {
        let connect_failed = |e: io::Error| ConnectError::ConnectFailed {
            address: address.to_string(),
            message: e.to_string(),
        };

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(connect_failed)?;

        // Socket options are best effort
        if let Err(e) = socket.set_nodelay(config.tcp_no_delay) {
            warn!("Failed to set TCP_NODELAY: {e}");
            self.logger.warn(&format!("connect: cannot set TCP_NODELAY: {}", e));
        }
        if let Err(e) = socket.set_keepalive(config.keep_alive) {
            warn!("Failed to set keep-alive: {e}");
            self.logger.warn(&format!("connect: cannot set keep-alive: {}", e));
        }

        if let Some(timeout) = config.receive_timeout() {
            socket
                .set_read_timeout(Some(timeout))
                .map_err(|e| ConnectError::TimeoutSetupFailed {
                    timeout_ms: config.receive_timeout_ms,
                    message: e.to_string(),
                })?;
        }

        let target = SockAddr::from(address);
        match config.connect_timeout() {
            Some(timeout) => socket.connect_timeout(&target, timeout),
            None => socket.connect(&target),
        }
        .map_err(connect_failed)?;

        Ok(socket.into())
    }

    /// Discard what is left of a failed exchange on the read stream
    ///
    /// Reads until a full receive timeout passes without data, so a reply
    /// arriving just after the exchange gave up is consumed here as well.
    /// Without a receive timeout only already buffered bytes are dropped.
    fn drain_input(&mut self) {
        let bounded = self
            .config
            .as_ref()
            .and_then(ConnectionConfig::receive_timeout)
            .is_some();
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        if !bounded && reader.set_nonblocking(true).is_err() {
            return;
        }

        let mut scratch = [0u8; 256];
        let mut drained = 0usize;
        loop {
            match reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        if !bounded {
            if let Err(e) = reader.set_nonblocking(false) {
                warn!("Failed to restore blocking mode after drain: {e}");
            }
        }
        if drained > 0 {
            self.stats.bytes_received += drained as u64;
            self.logger.debug(&format!("exchange: drained {} stale bytes", drained));
            debug!("Drained {} stale bytes from input", drained);
        }
    }

    /// Read and drop the `count` bytes of a frame that will not be used
    fn discard(&mut self, count: usize) {
        let skipped = match self.reader.as_mut() {
            Some(reader) => io::copy(&mut reader.take(count as u64), &mut io::sink()),
            None => return,
        };
        match skipped {
            Ok(n) => {
                self.stats.bytes_received += n;
                if (n as usize) < count {
                    self.drain_input();
                }
            }
            Err(e) => {
                debug!("Failed to skip {} frame bytes: {}", count, e);
                self.drain_input();
            }
        }
    }

    /// Read one MBAP header; drains the input on failure
    fn read_header(&mut self) -> Result<MbapHeader, ExchangeError> {
        let mut header = [0u8; MBAP_HEADER_LEN];
        let read = match self.reader.as_mut() {
            Some(reader) => reader.read_exact(&mut header),
            None => return Err(ExchangeError::NotConnected),
        };
        if let Err(e) = read {
            self.record_read_failure(&e);
            self.logger.error(&format!("exchange: cannot read MBAP header: {}", e));
            self.drain_input();
            return Err(ExchangeError::ReadHeader {
                message: e.to_string(),
                timed_out: is_timeout(&e),
            });
        }
        Ok(decode_mbap(&header))
    }

    /// Read the `len` PDU bytes following a header; drains the input on failure
    fn read_pdu(&mut self, len: usize) -> Result<Vec<u8>, ExchangeError> {
        let mut pdu = vec![0u8; len];
        let read = match self.reader.as_mut() {
            Some(reader) => reader.read_exact(&mut pdu),
            None => return Err(ExchangeError::NotConnected),
        };
        if let Err(e) = read {
            self.record_read_failure(&e);
            self.logger.error(&format!("exchange: cannot read {} PDU bytes: {}", len, e));
            self.drain_input();
            return Err(ExchangeError::ReadPdu {
                expected: len,
                message: e.to_string(),
                timed_out: is_timeout(&e),
            });
        }
        Ok(pdu)
    }

    fn record_read_failure(&mut self, e: &io::Error) {
        self.stats.errors += 1;
        if is_timeout(e) {
            self.stats.timeouts += 1;
        }
    }

    /// Drop all handles in release order
    fn release_handles(&mut self) {
        drop(self.writer.take());
        drop(self.reader.take());
        drop(self.socket.take());
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusTransport for TcpTransport {
    fn connect(&mut self) -> Result<(), ConnectError> {
        let (config, address) = match (self.config.clone(), self.address) {
            (Some(config), Some(address)) => (config, address),
            _ => {
                self.logger.error("connect: connection parameters were not set");
                return Err(ConnectError::NotConfigured);
            }
        };
        if self.is_connected() {
            return Ok(());
        }
        // Stale handles from a half-torn connection
        self.release_handles();

        self.logger.info(&format!("connect: connecting to {}", address));
        let socket = self.open_socket(&config, address).map_err(|e| {
            self.logger.error(&format!("connect: {}", e));
            e
        })?;

        let writer = socket.try_clone().map_err(|e| {
            let err = ConnectError::WriteStreamFailed { message: e.to_string() };
            self.logger.error(&format!("connect: {}", err));
            err
        })?;
        let writer = BufWriter::new(writer);

        let reader = match socket.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                let err = ConnectError::ReadStreamFailed { message: e.to_string() };
                self.logger.error(&format!("connect: {}", err));
                drop(writer);
                drop(socket);
                return Err(err);
            }
        };

        self.socket = Some(socket);
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.state = ConnectionState::Connected;
        self.stats.connects += 1;

        self.logger.info(&format!("connect: connected to {}", address));
        info!("Connected to Modbus slave at {}", address);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DisconnectError> {
        if self.state != ConnectionState::Connected {
            self.logger.warn("disconnect: not connected");
            return Err(DisconnectError::NotConnected);
        }

        let mut first_failure: Option<DisconnectError> = None;
        let mut note = |failure: DisconnectError, logger: &CallbackLogger| {
            logger.error(&format!("disconnect: {}", failure));
            if first_failure.is_none() {
                first_failure = Some(failure);
            }
        };

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                note(DisconnectError::FlushFailed { message: e.to_string() }, &self.logger);
            }
            if let Err(e) = shutdown(writer.get_ref(), Shutdown::Write) {
                note(DisconnectError::WriteCloseFailed { message: e.to_string() }, &self.logger);
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = shutdown(&reader, Shutdown::Read) {
                note(DisconnectError::ReadCloseFailed { message: e.to_string() }, &self.logger);
            }
        }
        if let Some(socket) = self.socket.take() {
            if let Err(e) = shutdown(&socket, Shutdown::Both) {
                note(DisconnectError::SocketCloseFailed { message: e.to_string() }, &self.logger);
            }
        }

        self.state = ConnectionState::Disconnected;
        self.stats.disconnects += 1;
        self.logger.info("disconnect: connection closed");
        debug!("Disconnected from Modbus slave");

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self
                .socket
                .as_ref()
                .map(|socket| socket.peer_addr().is_ok())
                .unwrap_or(false)
    }

    fn raw_request(&mut self, pdu: &[u8], unit_id: UnitId) -> Result<Vec<u8>, ExchangeError> {
        if self.writer.is_none() || self.reader.is_none() {
            return Err(ExchangeError::NotConnected);
        }

        let transaction_id = self.transaction_ids.next_id();
        let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        adu.extend_from_slice(&encode_mbap(transaction_id, unit_id, pdu.len() as u16));
        adu.extend_from_slice(pdu);

        self.logger.log_packet("TX", transaction_id, &adu);
        debug!("[MODBUS-TCP] send unit:{} {}", unit_id, bytes_to_hex(&adu));

        let sent = match self.writer.as_mut() {
            Some(writer) => writer.write_all(&adu).and_then(|_| writer.flush()),
            None => return Err(ExchangeError::NotConnected),
        };
        if let Err(e) = sent {
            self.stats.errors += 1;
            self.logger.error(&format!("exchange: write failed: {}", e));
            return Err(ExchangeError::Write { message: e.to_string() });
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += adu.len() as u64;

        // Frames answering an earlier, abandoned request are skipped until
        // ours arrives or a read times out
        loop {
            let response_header = self.read_header()?;
            let pdu_len = match response_header.pdu_len() {
                Some(len) => len,
                None => {
                    self.stats.errors += 1;
                    self.logger.error(&format!(
                        "exchange: malformed response, declared length {}",
                        response_header.length
                    ));
                    if response_header.length > 0 {
                        self.discard(response_header.length as usize - 1);
                    }
                    return Err(ExchangeError::MalformedFrame { length: response_header.length });
                }
            };
            let response = self.read_pdu(pdu_len)?;
            self.stats.bytes_received += (MBAP_HEADER_LEN + pdu_len) as u64;

            if response_header.transaction_id != transaction_id {
                warn!(
                    "Discarding stale response tid {} (waiting for {})",
                    response_header.transaction_id, transaction_id
                );
                self.logger.warn(&format!(
                    "exchange: discarding response tid {}, request tid is {}",
                    response_header.transaction_id, transaction_id
                ));
                continue;
            }
            if response_header.protocol_id != MODBUS_PROTOCOL_ID {
                warn!("Response carries protocol id {}", response_header.protocol_id);
            }

            self.stats.responses_received += 1;
            if self.logger.should_log(crate::logging::LogLevel::Debug)
                || tracing::enabled!(tracing::Level::DEBUG)
            {
                let mut frame = response_header.encode().to_vec();
                frame.extend_from_slice(&response);
                self.logger.log_packet("RX", response_header.transaction_id, &frame);
                debug!("[MODBUS-TCP] receive unit:{} {}", response_header.unit_id, bytes_to_hex(&frame));
            }
            return Ok(response);
        }
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.state == ConnectionState::Connected {
            let _ = self.disconnect();
        }
    }
}

/// Resolve `host:port` to its first socket address
fn resolve(host: &str, port: u16) -> Result<SocketAddr, String> {
    let mut addresses = (host, port).to_socket_addrs().map_err(|e| e.to_string())?;
    addresses
        .next()
        .ok_or_else(|| "no address found".to_string())
}

/// Shut down one direction, tolerating an already disconnected peer
fn shutdown(stream: &TcpStream, how: Shutdown) -> io::Result<()> {
    match stream.shutdown(how) {
        Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
