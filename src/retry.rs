//! Two-tier retry orchestration
//!
//! Every operation sends its PDU through [`send_with_retry`]. The first tier
//! repeats the exchange on the current connection; the second tier tears the
//! connection down, reconnects and tries once more per attempt.
//!
//! ```text
//!  Idle ──connected──▶ RetryingSameConnection{1..=request_retries}
//!                          │ all failed
//!                          ▼
//!                      Reconnecting{1..=reconnect_retries}
//!                          │ all failed            any exchange ok
//!                          ▼                              │
//!                      Exhausted                     Succeeded
//! ```
//!
//! A failed connect, either up front or during a reconnect, ends the run as
//! `Exhausted` without further attempts.

use std::fmt;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::Exhausted;
use crate::logging::CallbackLogger;
use crate::protocol::UnitId;
use crate::transport::ModbusTransport;

/// Attempt bounds of the two retry tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Exchanges on the current connection
    pub request_retries: u32,
    /// Reconnect-and-exchange attempts once the first tier is exhausted
    pub reconnect_retries: u32,
}

impl RetryPolicy {
    pub fn new(request_retries: u32, reconnect_retries: u32) -> Self {
        Self { request_retries, reconnect_retries }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.request_retry_count, config.reconnect_retry_count)
    }

    /// Upper bound on raw exchanges per request
    pub fn max_exchanges(&self) -> u32 {
        self.request_retries.saturating_add(self.reconnect_retries)
    }

    /// Phase following the connection check
    fn first_phase(&self) -> RetryPhase {
        if self.request_retries > 0 {
            RetryPhase::RetryingSameConnection { attempt: 1 }
        } else {
            self.reconnect_phase(1)
        }
    }

    fn reconnect_phase(&self, attempt: u32) -> RetryPhase {
        if attempt <= self.reconnect_retries {
            RetryPhase::Reconnecting { attempt }
        } else {
            RetryPhase::Exhausted
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 2)
    }
}

/// Phase of one orchestrated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// Not started; the connection has not been checked yet
    Idle,
    /// Exchanging on the current connection
    RetryingSameConnection { attempt: u32 },
    /// Reconnecting, then exchanging once
    Reconnecting { attempt: u32 },
    Succeeded,
    Exhausted,
}

impl Default for RetryPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPhase::Idle => write!(f, "idle"),
            RetryPhase::RetryingSameConnection { attempt } => write!(f, "request attempt {}", attempt),
            RetryPhase::Reconnecting { attempt } => write!(f, "reconnect attempt {}", attempt),
            RetryPhase::Succeeded => write!(f, "succeeded"),
            RetryPhase::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// State machine driving one request through both retry tiers
pub struct RetryMachine<'a, T: ModbusTransport + ?Sized> {
    transport: &'a mut T,
    policy: RetryPolicy,
    logger: &'a CallbackLogger,
    phase: RetryPhase,
    attempts: u32,
    last_failure: Option<String>,
    response: Option<Vec<u8>>,
}

impl<'a, T: ModbusTransport + ?Sized> RetryMachine<'a, T> {
    pub fn new(transport: &'a mut T, policy: RetryPolicy, logger: &'a CallbackLogger) -> Self {
        Self {
            transport,
            policy,
            logger,
            phase: RetryPhase::Idle,
            attempts: 0,
            last_failure: None,
            response: None,
        }
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Raw exchanges performed so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Drive the machine until it reaches a terminal phase
    pub fn run(mut self, pdu: &[u8], unit_id: UnitId) -> Result<Vec<u8>, Exhausted> {
        loop {
            match self.phase {
                RetryPhase::Succeeded => {
                    return self.response.take().ok_or_else(|| Exhausted {
                        attempts: self.attempts,
                        last_failure: self.last_failure.take(),
                    });
                }
                RetryPhase::Exhausted => {
                    self.logger.error(&format!(
                        "request: no response after {} attempt(s)",
                        self.attempts
                    ));
                    return Err(Exhausted {
                        attempts: self.attempts,
                        last_failure: self.last_failure.take(),
                    });
                }
                _ => {
                    let next = self.step(pdu, unit_id);
                    debug!("Retry phase {} -> {}", self.phase, next);
                    self.phase = next;
                }
            }
        }
    }

    /// Perform the work of the current phase and return the next one
    fn step(&mut self, pdu: &[u8], unit_id: UnitId) -> RetryPhase {
        match self.phase {
            RetryPhase::Idle => {
                if !self.transport.is_connected() && !self.connect() {
                    return RetryPhase::Exhausted;
                }
                self.policy.first_phase()
            }
            RetryPhase::RetryingSameConnection { attempt } => {
                if self.exchange(pdu, unit_id) {
                    return RetryPhase::Succeeded;
                }
                if attempt < self.policy.request_retries {
                    RetryPhase::RetryingSameConnection { attempt: attempt + 1 }
                } else {
                    self.policy.reconnect_phase(1)
                }
            }
            RetryPhase::Reconnecting { attempt } => {
                self.logger.warn(&format!("request: reconnecting (attempt {})", attempt));
                let _ = self.transport.disconnect();
                if !self.connect() {
                    return RetryPhase::Exhausted;
                }
                if self.exchange(pdu, unit_id) {
                    return RetryPhase::Succeeded;
                }
                self.policy.reconnect_phase(attempt + 1)
            }
            terminal => terminal,
        }
    }

    fn connect(&mut self) -> bool {
        match self.transport.connect() {
            Ok(()) => true,
            Err(e) => {
                self.logger.error(&format!("request: connect failed: {}", e));
                self.last_failure = Some(e.to_string());
                false
            }
        }
    }

    fn exchange(&mut self, pdu: &[u8], unit_id: UnitId) -> bool {
        self.attempts += 1;
        match self.transport.raw_request(pdu, unit_id) {
            Ok(response) => {
                self.response = Some(response);
                true
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "request: exchange attempt {} failed: {}",
                    self.attempts, e
                ));
                self.last_failure = Some(e.to_string());
                false
            }
        }
    }
}

/// Send a PDU, retrying per `policy`; returns the response PDU
pub fn send_with_retry<T: ModbusTransport + ?Sized>(
    transport: &mut T,
    policy: RetryPolicy,
    logger: &CallbackLogger,
    pdu: &[u8],
    unit_id: UnitId,
) -> Result<Vec<u8>, Exhausted> {
    RetryMachine::new(transport, policy, logger).run(pdu, unit_id)
}
