//! Diagnostic sink
//!
//! The master reports what it does as human-readable lines handed to a
//! callback. Whether anything consumes them never changes behavior: a
//! disabled logger simply drops every line.

use std::sync::Arc;

use crate::protocol::{FunctionCode, Request, UnitId};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// How request and response traces are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Hex bytes only
    Raw,
    /// Decoded fields only
    Interpreted,
    /// Decoded fields at Info, hex bytes at Debug
    Both,
}

/// Type alias for log callback functions
///
/// The callback receives the level and the complete, timestamped line.
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that hands timestamped lines to a callback
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Logger writing every admitted line to stderr
    ///
    /// Stdout stays free for operation results.
    pub fn console(min_level: LogLevel) -> Self {
        let callback: LogCallback = Box::new(|_, line| eprintln!("{}", line));
        Self::new(Some(callback), min_level)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn set_level(&mut self, min_level: LogLevel) {
        self.min_level = min_level;
    }

    pub fn level(&self) -> LogLevel {
        self.min_level
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.should_log(level) {
            return;
        }
        if let Some(ref callback) = self.callback {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let line = format!("{} [{}] {}", timestamp, level.as_str(), message);
            callback(level, &line);
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Check if a message at the given level would reach the callback
    pub fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }

    /// Hex dump of a full ADU
    pub fn log_packet(&self, direction: &str, transaction_id: u16, adu: &[u8]) {
        if !self.should_log(LogLevel::Debug) {
            return;
        }
        let message = format!(
            "{} ADU tid={} ({} bytes): {}",
            direction,
            transaction_id,
            adu.len(),
            crate::utils::format::bytes_to_hex(adu)
        );
        self.debug(&message);
    }

    /// Trace an outgoing request
    pub fn log_request(&self, unit_id: UnitId, request: &Request) {
        let interpreted = || {
            format!(
                "Request -> unit: {}, function: {}, {}",
                unit_id,
                request.function(),
                describe_request(request)
            )
        };
        let raw = || format!("Request -> PDU: {}", hex::encode_upper(request.encode_pdu()));
        self.log_trace(interpreted, raw);
    }

    /// Trace an incoming response PDU
    pub fn log_response(&self, unit_id: UnitId, pdu: &[u8]) {
        let interpreted = || {
            format!(
                "Response <- unit: {}, {}",
                unit_id,
                interpret_response(pdu)
            )
        };
        let raw = || format!("Response <- PDU: {}", hex::encode_upper(pdu));
        self.log_trace(interpreted, raw);
    }

    fn log_trace<I, R>(&self, interpreted: I, raw: R)
    where
        I: FnOnce() -> String,
        R: FnOnce() -> String,
    {
        match self.mode {
            LoggingMode::Raw => {
                if self.should_log(LogLevel::Info) {
                    self.info(&raw());
                }
            }
            LoggingMode::Interpreted => {
                if self.should_log(LogLevel::Info) {
                    self.info(&interpreted());
                }
            }
            LoggingMode::Both => {
                if self.should_log(LogLevel::Info) {
                    self.info(&interpreted());
                }
                if self.should_log(LogLevel::Debug) {
                    self.debug(&raw());
                }
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("enabled", &self.callback.is_some())
            .field("min_level", &self.min_level)
            .field("mode", &self.mode)
            .finish()
    }
}

fn describe_request(request: &Request) -> String {
    match *request {
        Request::ReadCoils { address, quantity }
        | Request::ReadHoldingRegisters { address, quantity } => {
            format!("address: {}, quantity: {}", address, quantity)
        }
        Request::WriteSingleCoil { address, value } => {
            format!("address: {}, value: {}", address, if value { "ON" } else { "OFF" })
        }
        Request::WriteSingleRegister { address, value } => {
            format!("address: {}, value: {} (0x{:04X})", address, value, value)
        }
    }
}

fn interpret_response(pdu: &[u8]) -> String {
    let Some(&function) = pdu.first() else {
        return "empty PDU".to_string();
    };
    let data = &pdu[1..];

    match FunctionCode::from_u8(function) {
        Some(FunctionCode::ReadCoils) | Some(FunctionCode::ReadHoldingRegisters)
            if !data.is_empty() =>
        {
            format!(
                "function: 0x{:02X}, byte count: {}, data: {}",
                function,
                data[0],
                hex::encode_upper(&data[1..])
            )
        }
        Some(FunctionCode::WriteSingleCoil) | Some(FunctionCode::WriteSingleRegister)
            if data.len() >= 4 =>
        {
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = u16::from_be_bytes([data[2], data[3]]);
            format!("function: 0x{:02X}, address: {}, value: 0x{:04X}", function, address, value)
        }
        _ if function & 0x80 != 0 => match data.first() {
            Some(code) => format!("exception: function 0x{:02X}, code 0x{:02X}", function, code),
            None => format!("exception: function 0x{:02X}", function),
        },
        _ => format!("function: 0x{:02X}, data: {}", function, hex::encode_upper(data)),
    }
}
