//! High-level Modbus master operations
//!
//! This module exposes the four supported requests behind the `ModbusClient`
//! trait. Each operation validates its arguments, builds the PDU, sends it
//! through the retry orchestrator and decodes the answer.
//!
//! Arguments are taken as signed integers, the way a caller enters them, so
//! out-of-range values such as `-1` are rejected with `RequestError::Range`
//! before any I/O.

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, DisconnectError, RequestError, SetupError};
use crate::logging::CallbackLogger;
use crate::protocol::{check_function, parse_coils, parse_registers, Request, UnitId};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::transport::{ConnectionState, ModbusTransport, TcpTransport, TransportStats};
use crate::utils::validation;

/// Trait defining the Modbus master operations
///
/// Operations take `&mut self`: one request is in flight at a time.
pub trait ModbusClient {
    /// Read `quantity` coils starting at `address` (function code 0x01)
    fn read_coils(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<bool>, RequestError>;

    /// Read `quantity` holding registers starting at `address` (function code 0x03)
    fn read_holding_registers(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<i16>, RequestError>;

    /// Write a single coil (function code 0x05)
    fn write_single_coil(&mut self, coil: i32, value: bool, unit_id: UnitId) -> Result<(), RequestError>;

    /// Write a single holding register (function code 0x06)
    ///
    /// `value` is a 16-bit word, given either signed (-32768..=-1) or
    /// unsigned (0..=65535).
    fn write_single_register(&mut self, register: i32, value: i32, unit_id: UnitId) -> Result<(), RequestError>;

    fn is_connected(&self) -> bool;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;

    /// Read one coil and write back its inverse; returns the new state
    fn toggle_coil(&mut self, coil: i32, unit_id: UnitId) -> Result<bool, RequestError> {
        validation::write_address("coil", coil)?;
        let current = self
            .read_coils(coil, 1, unit_id)?
            .first()
            .copied()
            .ok_or_else(|| RequestError::no_response("empty coil read"))?;
        self.write_single_coil(coil, !current, unit_id)?;
        Ok(!current)
    }

    // Function-code names
    fn read_01(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<bool>, RequestError> {
        self.read_coils(address, quantity, unit_id)
    }

    fn read_03(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<i16>, RequestError> {
        self.read_holding_registers(address, quantity, unit_id)
    }

    fn write_05(&mut self, coil: i32, value: bool, unit_id: UnitId) -> Result<(), RequestError> {
        self.write_single_coil(coil, value, unit_id)
    }

    fn write_06(&mut self, register: i32, value: i32, unit_id: UnitId) -> Result<(), RequestError> {
        self.write_single_register(register, value, unit_id)
    }
}

/// Modbus client over any transport
///
/// Holds the transport, the retry policy and the diagnostic sink. The PDU
/// logic lives here once; the transport only moves bytes.
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    policy: RetryPolicy,
    logger: CallbackLogger,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self::with_logger(transport, policy, CallbackLogger::disabled())
    }

    pub fn with_logger(transport: T, policy: RetryPolicy, logger: CallbackLogger) -> Self {
        Self { transport, policy, logger }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn logger(&self) -> &CallbackLogger {
        &self.logger
    }

    /// Send a request and return the response PDU with its function code checked
    pub fn execute_request(&mut self, request: Request, unit_id: UnitId) -> Result<Vec<u8>, RequestError> {
        self.logger.log_request(unit_id, &request);

        let pdu = send_with_retry(
            &mut self.transport,
            self.policy,
            &self.logger,
            &request.encode_pdu(),
            unit_id,
        )?;
        self.logger.log_response(unit_id, &pdu);

        if let Err(e) = check_function(request.function(), &pdu) {
            self.logger.error(&format!("{}: {}", request.function(), e));
            return Err(e);
        }
        Ok(pdu)
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    fn read_coils(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<bool>, RequestError> {
        let address = validation::read_address("address", address)?;
        let quantity = validation::coil_quantity(quantity)?;

        let pdu = self.execute_request(Request::ReadCoils { address, quantity }, unit_id)?;
        let coils = parse_coils(&pdu, quantity)?;
        self.logger.debug(&format!("read_coils: {} -> {:?}", address, coils));
        Ok(coils)
    }

    fn read_holding_registers(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<i16>, RequestError> {
        let address = validation::read_address("address", address)?;
        let quantity = validation::register_quantity(quantity)?;

        let pdu = self.execute_request(Request::ReadHoldingRegisters { address, quantity }, unit_id)?;
        let registers = parse_registers(&pdu, quantity)?;
        self.logger.debug(&format!("read_holding_registers: {} -> {:?}", address, registers));
        Ok(registers)
    }

    fn write_single_coil(&mut self, coil: i32, value: bool, unit_id: UnitId) -> Result<(), RequestError> {
        let address = validation::write_address("coil", coil)?;
        self.execute_request(Request::WriteSingleCoil { address, value }, unit_id)?;
        Ok(())
    }

    fn write_single_register(&mut self, register: i32, value: i32, unit_id: UnitId) -> Result<(), RequestError> {
        let address = validation::write_address("register", register)?;
        let value = validation::register_value(value)?;
        self.execute_request(Request::WriteSingleRegister { address, value }, unit_id)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Modbus TCP master
///
/// Owns a `TcpTransport` and drives its lifecycle: `setup` once, then
/// `connect`/`disconnect` as often as needed. Operations connect on demand.
///
/// ```rust,no_run
/// use modbus_tcp_master::{ConnectionConfig, ModbusClient, ModbusTcpClient};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = ModbusTcpClient::new();
///     client.setup(ConnectionConfig::new("192.168.1.10", 502))?;
///     client.connect()?;
///
///     let coils = client.read_coils(0, 8, 1)?;
///     client.write_single_register(100, 1234, 1)?;
///     println!("coils: {:?}", coils);
///
///     client.disconnect()?;
///     Ok(())
/// }
/// ```
pub struct ModbusTcpClient {
    inner: GenericModbusClient<TcpTransport>,
}

impl ModbusTcpClient {
    pub fn new() -> Self {
        Self::with_logger(CallbackLogger::disabled())
    }

    /// Client reporting to `logger`; the transport shares the same sink
    pub fn with_logger(logger: CallbackLogger) -> Self {
        let transport = TcpTransport::with_logger(logger.clone());
        Self {
            inner: GenericModbusClient::with_logger(transport, RetryPolicy::default(), logger),
        }
    }

    /// Validate and resolve the slave address and adopt the retry counts
    pub fn setup(&mut self, config: ConnectionConfig) -> Result<(), SetupError> {
        let policy = RetryPolicy::from_config(&config);
        self.inner.transport_mut().setup(config)?;
        self.inner.set_policy(policy);
        Ok(())
    }

    pub fn connect(&mut self) -> Result<(), ConnectError> {
        self.inner.transport_mut().connect()
    }

    pub fn disconnect(&mut self) -> Result<(), DisconnectError> {
        self.inner.transport_mut().disconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport().state()
    }

    pub fn transport(&self) -> &TcpTransport {
        self.inner.transport()
    }
}

impl Default for ModbusTcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusClient for ModbusTcpClient {
    fn read_coils(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<bool>, RequestError> {
        self.inner.read_coils(address, quantity, unit_id)
    }

    fn read_holding_registers(&mut self, address: i32, quantity: i32, unit_id: UnitId) -> Result<Vec<i16>, RequestError> {
        self.inner.read_holding_registers(address, quantity, unit_id)
    }

    fn write_single_coil(&mut self, coil: i32, value: bool, unit_id: UnitId) -> Result<(), RequestError> {
        self.inner.write_single_coil(coil, value, unit_id)
    }

    fn write_single_register(&mut self, register: i32, value: i32, unit_id: UnitId) -> Result<(), RequestError> {
        self.inner.write_single_register(register, value, unit_id)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn get_stats(&self) -> TransportStats {
        self.inner.get_stats()
    }
}
