//! # Modbus TCP Master
//!
//! A blocking Modbus TCP master (client) for talking to PLCs and other
//! slave devices over a single TCP session.
//!
//! ## Features
//!
//! - **MBAP framing**: transaction ids, exact-length reads, malformed frame detection
//! - **Two-tier recovery**: bounded retries on the open connection, then bounded reconnects
//! - **Typed errors**: one enum per lifecycle stage, no numeric return codes
//! - **Diagnostic sink**: timestamped lines to any callback, plus `tracing` events
//! - **Configuration**: in code or from JSON/YAML
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Operation |
//! |------|----------|-----------|
//! | 0x01 | Read Coils | `read_coils` / `read_01` |
//! | 0x03 | Read Holding Registers | `read_holding_registers` / `read_03` |
//! | 0x05 | Write Single Coil | `write_single_coil` / `write_05` |
//! | 0x06 | Write Single Register | `write_single_register` / `write_06` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_tcp_master::{CallbackLogger, ConnectionConfig, LogLevel, ModbusClient, ModbusTcpClient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = ModbusTcpClient::with_logger(CallbackLogger::console(LogLevel::Info));
//!     client.setup(ConnectionConfig::new("127.0.0.1", 502).with_receive_timeout_ms(500))?;
//!     client.connect()?;
//!
//!     let values = client.read_holding_registers(0, 10, 1)?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_single_coil(2700, true, 1)?;
//!     client.disconnect()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ModbusClient   │  validate, build PDU, decode
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Retry Machine  │  same-connection retries, then reconnects
//! └─────────────────┘
//!          │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  TcpTransport   │───►│    Protocol     │
//! │  (blocking I/O) │    │  (MBAP + PDU)   │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Error types for every stage of the request lifecycle
pub mod error;

/// MBAP header and PDU encoding/decoding
pub mod protocol;

/// Connection configuration
pub mod config;

/// Connection lifecycle and raw request/response exchange
pub mod transport;

/// Two-tier retry orchestration
pub mod retry;

/// Modbus master operations
pub mod client;

/// Validation, formatting and tracing helpers
pub mod utils;

/// Callback-based diagnostic sink
pub mod logging;

// Re-export main types for convenience
pub use client::{GenericModbusClient, ModbusClient, ModbusTcpClient};
pub use config::ConnectionConfig;
pub use error::{
    ConnectError, DisconnectError, ExchangeError, Exhausted, ModbusError, ModbusResult, RequestError,
    SetupError,
};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use protocol::{ExceptionCode, FunctionCode, MbapHeader, UnitId};
pub use retry::{RetryPhase, RetryPolicy};
pub use transport::{ConnectionState, ModbusTransport, TcpTransport, TransactionIdGenerator, TransportStats};

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
