//! Connection configuration
//!
//! A `ConnectionConfig` names the slave endpoint and the tunables that bound
//! every later connect and exchange. It is built in code or loaded from a
//! JSON or YAML document; omitted tunables take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Endpoint and tunables of one master connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Slave host name or IP address
    pub host: String,
    /// TCP port (1..=65535)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Exchanges attempted on the current connection
    #[serde(default = "default_request_retry_count")]
    pub request_retry_count: u32,
    /// Reconnect-and-exchange attempts after the first tier is exhausted
    #[serde(default = "default_reconnect_retry_count")]
    pub reconnect_retry_count: u32,
    /// Receive timeout (milliseconds, 0 = block indefinitely)
    #[serde(default = "default_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Connect timeout (milliseconds, 0 = system default)
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

fn default_port() -> u16 {
    crate::DEFAULT_TCP_PORT
}

fn default_request_retry_count() -> u32 {
    3
}

fn default_reconnect_retry_count() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl ConnectionConfig {
    /// Configuration with default tunables
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            request_retry_count: default_request_retry_count(),
            reconnect_retry_count: default_reconnect_retry_count(),
            receive_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            tcp_no_delay: true,
            keep_alive: true,
        }
    }

    pub fn with_request_retries(mut self, count: u32) -> Self {
        self.request_retry_count = count;
        self
    }

    pub fn with_reconnect_retries(mut self, count: u32) -> Self {
        self.reconnect_retry_count = count;
        self
    }

    pub fn with_receive_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.receive_timeout_ms = timeout_ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = enabled;
        self
    }

    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Receive timeout, `None` when reads block indefinitely
    pub fn receive_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.receive_timeout_ms)
    }

    /// Connect timeout, `None` to use the system default
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.connect_timeout_ms)
    }

    /// `host:port` as passed to the resolver
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> ModbusResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a file, picking the format by extension
    ///
    /// `.json` files are parsed as JSON, everything else as YAML (a superset).
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.map_err(|e| ModbusError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_yaml_string(&self) -> ModbusResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}
