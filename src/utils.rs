//! Utility functions and helpers for Modbus operations
//!
//! Argument validation for the operation layer, text formatting shared by
//! the diagnostic sink and the command-line front end, plus tracing setup.

use crate::error::RequestError;

/// Operation argument validation
///
/// Each check returns the wire value on success.
pub mod validation {
    use super::*;

    fn in_range(parameter: &'static str, value: i32, min: i32, max: i32) -> Result<i32, RequestError> {
        if value < min || value > max {
            return Err(RequestError::range(parameter, value as i64, min as i64, max as i64));
        }
        Ok(value)
    }

    /// Start address of a read (0-65535)
    pub fn read_address(parameter: &'static str, address: i32) -> Result<u16, RequestError> {
        in_range(parameter, address, 0, 65535).map(|v| v as u16)
    }

    /// Target of a single write (0-65534)
    pub fn write_address(parameter: &'static str, address: i32) -> Result<u16, RequestError> {
        in_range(parameter, address, 0, 65534).map(|v| v as u16)
    }

    /// Coil count of a read (1-2000)
    pub fn coil_quantity(quantity: i32) -> Result<u16, RequestError> {
        in_range("quantity", quantity, 1, crate::MAX_COILS_PER_REQUEST as i32).map(|v| v as u16)
    }

    /// Register count of a read (1-125)
    pub fn register_quantity(quantity: i32) -> Result<u16, RequestError> {
        in_range("quantity", quantity, 1, crate::MAX_REGISTERS_PER_REQUEST as i32).map(|v| v as u16)
    }

    /// Register value, signed or unsigned 16-bit
    pub fn register_value(value: i32) -> Result<u16, RequestError> {
        in_range("value", value, i16::MIN as i32, u16::MAX as i32).map(|v| v as u16)
    }
}

/// Formatting utilities
pub mod format {
    /// Space-separated upper-case hex, e.g. "01 03 0A FF"
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `coil=00012 status=true`
    pub fn coil_status(address: i32, status: bool) -> String {
        format!("coil={:05} status={}", address, status)
    }

    /// `coil=00012 newStatus=false`
    pub fn coil_new_status(address: i32, status: bool) -> String {
        format!("coil={:05} newStatus={}", address, status)
    }

    /// `register=00100 value=001234`
    pub fn register_value(address: i32, value: i32) -> String {
        format!("register={:05} value={:06}", address, value)
    }

    /// `register=00100 newValue=001234`
    pub fn register_new_value(address: i32, value: i32) -> String {
        format!("register={:05} newValue={:06}", address, value)
    }
}

/// Tracing setup helpers
pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Install a stderr `tracing` subscriber
    ///
    /// `RUST_LOG` wins over `default_filter`. Does nothing if a global
    /// subscriber is already set.
    pub fn init_tracing(default_filter: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}
