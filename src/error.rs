//! # Modbus TCP Master Error Handling
//!
//! Every failure the master can report is a tagged enum variant, grouped by
//! the stage of the request lifecycle that produced it. There are no numeric
//! return codes to memorize: a caller matches on the variant.
//!
//! ## Error Categories
//!
//! ### Configuration (`SetupError`)
//! - **Bad Address**: host or port structurally invalid
//! - **Name Resolution Denied**: the host name could not be resolved
//!
//! ### Connection Lifecycle (`ConnectError`)
//! - **Not Configured**: `connect` called before `setup`
//! - **Timeout Setup Failed**: the socket rejected the receive timeout
//! - **Connect Failed**: the TCP handshake failed or timed out
//! - **Write/Read Stream Failed**: a byte stream could not be opened
//!
//! ### Disconnection (`DisconnectError`)
//! - **Not Connected**: nothing to tear down
//! - **Flush/Close Failures**: teardown continued, first failure reported
//!
//! ### Request Level (`RequestError`)
//! - **Range**: argument rejected before any I/O
//! - **No Response**: both retry tiers exhausted, or the response was unusable
//! - **Exception Response**: the slave answered with another function code
//!
//! ## Usage Examples
//!
//! ```rust
//! use modbus_tcp_master::{ModbusError, RequestError};
//!
//! fn report(result: Result<Vec<bool>, RequestError>) {
//!     match result {
//!         Ok(coils) => println!("Read {} coils", coils.len()),
//!         Err(RequestError::ExceptionResponse { function, exception, .. }) => {
//!             println!("Slave exception: function=0x{:02X}, code={:?}", function, exception);
//!         }
//!         Err(error) => {
//!             let error = ModbusError::from(error);
//!             if error.is_recoverable() {
//!                 println!("Retryable: {}", error);
//!             } else {
//!                 println!("Fatal: {}", error);
//!             }
//!         }
//!     }
//! }
//! ```

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type alias for operations that can fail in any category
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Failures of `setup`: the address could not be turned into a socket address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// Host is empty or malformed, or the port is zero
    #[error("Bad address: {message}")]
    BadAddress { message: String },

    /// The resolver refused or failed to resolve the host name
    #[error("Name resolution denied for {host}: {message}")]
    NameResolutionDenied { host: String, message: String },
}

/// Failures of `connect`
///
/// Every variant leaves the connection without a socket; a later `connect`
/// starts from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// `connect` was called before a successful `setup`
    #[error("Connection parameters were not set")]
    NotConfigured,

    /// The socket rejected the receive timeout
    #[error("Cannot set receive timeout of {timeout_ms}ms: {message}")]
    TimeoutSetupFailed { timeout_ms: u64, message: String },

    /// Socket creation or the TCP handshake failed
    #[error("Failed to connect to {address}: {message}")]
    ConnectFailed { address: String, message: String },

    /// The write stream could not be opened
    #[error("Cannot create write stream: {message}")]
    WriteStreamFailed { message: String },

    /// The read stream could not be opened
    #[error("Cannot create read stream: {message}")]
    ReadStreamFailed { message: String },
}

/// Failures of `disconnect`
///
/// Apart from `NotConnected`, these are reported after the teardown has
/// completed: all handles are already released and the connection is
/// `Disconnected`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectError {
    /// There is no open connection to tear down
    #[error("Not connected")]
    NotConnected,

    #[error("Cannot flush write stream: {message}")]
    FlushFailed { message: String },

    #[error("Cannot close write stream: {message}")]
    WriteCloseFailed { message: String },

    #[error("Cannot close read stream: {message}")]
    ReadCloseFailed { message: String },

    #[error("Cannot close socket: {message}")]
    SocketCloseFailed { message: String },
}

/// Failure of a single request/response round trip
///
/// Produced by the raw exchange and consumed by the retry orchestrator; it
/// never reaches the callers of the public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// No open streams to exchange on
    #[error("Exchange attempted without an open connection")]
    NotConnected,

    #[error("Failed to write request ADU: {message}")]
    Write { message: String },

    #[error("Failed to read response MBAP header: {message}")]
    ReadHeader { message: String, timed_out: bool },

    /// The response header declared a length no PDU can have
    #[error("Malformed response frame: declared length {length}")]
    MalformedFrame { length: u16 },

    #[error("Failed to read {expected} response PDU bytes: {message}")]
    ReadPdu {
        expected: usize,
        message: String,
        timed_out: bool,
    },
}

impl ExchangeError {
    /// Check if the failure was a receive timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ReadHeader { timed_out, .. } | Self::ReadPdu { timed_out, .. } => *timed_out,
            _ => false,
        }
    }
}

/// Outcome of the retry orchestrator when no attempt produced a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No response after {attempts} exchange attempt(s){}", failure_suffix(.last_failure))]
pub struct Exhausted {
    /// Number of raw exchanges actually performed
    pub attempts: u32,
    /// Description of the last underlying failure, if any
    pub last_failure: Option<String>,
}

/// Errors visible to callers of the four public operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// An argument is outside its allowed range; no I/O was attempted
    #[error("Parameter {parameter} out of range: {value} not in [{min}, {max}]")]
    Range {
        parameter: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Bad or no response from the slave
    #[error("No response: {message}")]
    NoResponse { message: String },

    /// The response function code differs from the request's
    ///
    /// `function` is the code the slave answered with; `exception` is the
    /// exception code from the second PDU byte, when the slave sent one.
    #[error("Exception response: function=0x{function:02X}, exception={}", describe_exception(.exception))]
    ExceptionResponse {
        function: u8,
        exception: Option<u8>,
    },
}

fn failure_suffix(last_failure: &Option<String>) -> String {
    match last_failure {
        Some(failure) => format!(": {}", failure),
        None => String::new(),
    }
}

fn describe_exception(code: &Option<u8>) -> String {
    match *code {
        Some(code) => match ExceptionCode::from_u8(code) {
            Some(exc) => format!("0x{:02X} ({})", code, exc.name()),
            None => format!("0x{:02X} (Unknown Exception)", code),
        },
        None => "none".to_string(),
    }
}

impl RequestError {
    /// Create a range error
    pub fn range(parameter: &'static str, value: i64, min: i64, max: i64) -> Self {
        Self::Range { parameter, value, min, max }
    }

    /// Create a no-response error
    pub fn no_response<S: Into<String>>(message: S) -> Self {
        Self::NoResponse { message: message.into() }
    }

    /// Create an exception-response error from the response PDU
    pub fn exception_response(pdu: &[u8]) -> Self {
        Self::ExceptionResponse {
            function: pdu.first().copied().unwrap_or(0),
            exception: pdu.get(1).copied(),
        }
    }
}

impl From<Exhausted> for RequestError {
    fn from(err: Exhausted) -> Self {
        Self::no_response(err.to_string())
    }
}

/// Umbrella error covering every category
///
/// Library functions return the narrow per-category enums; this type is for
/// callers that drive the whole lifecycle and want a single error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Disconnect error: {0}")]
    Disconnect(#[from] DisconnectError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ModbusError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Short name of the error category
    pub fn category(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::Connect(_) => "connection",
            Self::Disconnect(_) => "disconnection",
            Self::Request(_) => "request",
            Self::Config { .. } => "configuration",
        }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus_tcp_master::{ModbusError, RequestError};
    ///
    /// let err = ModbusError::from(RequestError::no_response("timed out"));
    /// assert!(err.is_recoverable());
    ///
    /// let err = ModbusError::from(RequestError::range("quantity", 0, 1, 2000));
    /// assert!(!err.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connect(ConnectError::NotConfigured) => false,
            Self::Connect(_) => true,
            Self::Request(RequestError::NoResponse { .. }) => true,
            Self::Request(RequestError::ExceptionResponse { exception, .. }) => {
                // Acknowledge, Busy
                matches!(exception, Some(0x05) | Some(0x06))
            }
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Disconnect(_)
                | Self::Request(RequestError::NoResponse { .. })
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Request(RequestError::ExceptionResponse { .. }))
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(format!("YAML error: {}", err))
    }
}
