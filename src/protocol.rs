//! Modbus TCP frame codec
//!
//! This module contains the MBAP header layout, the function and exception
//! codes, and the builders/parsers for the four supported PDU shapes. It is
//! pure: nothing here performs I/O.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::fmt;

use crate::error::RequestError;

/// Modbus unit identifier
pub type UnitId = u8;

/// Size of the MBAP header in bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Largest PDU a Modbus TCP frame can carry
pub const MAX_PDU_LEN: usize = 253;

/// Protocol identifier, always zero for Modbus
pub const MODBUS_PROTOCOL_ID: u16 = 0x0000;

/// Wire value of an ON coil
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of an OFF coil
pub const COIL_OFF: u16 = 0x0000;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
}

impl FunctionCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FunctionCode::ReadCoils),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Function code a slave answers with when it rejects the request
    pub fn exception_code(self) -> u8 {
        self.to_u8() | 0x80
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::ServerDeviceBusy),
            0x07 => Some(ExceptionCode::NegativeAcknowledge),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Short name, e.g. "Illegal Data Address"
    pub fn name(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::ServerDeviceBusy => "Server Device Busy",
            ExceptionCode::NegativeAcknowledge => "Negative Acknowledge",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed To Respond"
            }
        }
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "The function code is not implemented in the slave device",
            ExceptionCode::IllegalDataAddress => "The data address is not an allowable address for the slave",
            ExceptionCode::IllegalDataValue => "A value in the query data field is not allowable for the slave",
            ExceptionCode::ServerDeviceFailure => "An unrecoverable error occurred while the slave was performing the action",
            ExceptionCode::Acknowledge => "The slave accepted the request but needs a long time to process it",
            ExceptionCode::ServerDeviceBusy => "The slave is processing a long-duration program command",
            ExceptionCode::NegativeAcknowledge => "The slave cannot perform the program function received",
            ExceptionCode::MemoryParityError => "The slave detected a parity error in its memory",
            ExceptionCode::GatewayPathUnavailable => "The gateway could not allocate an internal communication path",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Decoded MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Number of bytes following the length field (unit id + PDU)
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    /// Header for a PDU of `pdu_len` bytes
    pub fn new(transaction_id: u16, unit_id: UnitId, pdu_len: u16) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: pdu_len.wrapping_add(1),
            unit_id,
        }
    }

    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut buf = [0u8; MBAP_HEADER_LEN];
        BigEndian::write_u16(&mut buf[0..2], self.transaction_id);
        BigEndian::write_u16(&mut buf[2..4], self.protocol_id);
        BigEndian::write_u16(&mut buf[4..6], self.length);
        buf[6] = self.unit_id;
        buf
    }

    pub fn decode(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: BigEndian::read_u16(&bytes[0..2]),
            protocol_id: BigEndian::read_u16(&bytes[2..4]),
            length: BigEndian::read_u16(&bytes[4..6]),
            unit_id: bytes[6],
        }
    }

    /// Number of PDU bytes that follow the header
    ///
    /// `None` when the declared length cannot describe a Modbus TCP PDU.
    pub fn pdu_len(&self) -> Option<usize> {
        let length = self.length as usize;
        if length < 1 || length > MAX_PDU_LEN + 1 {
            return None;
        }
        Some(length - 1)
    }
}

/// Encode an MBAP header for a PDU of `pdu_len` bytes
pub fn encode_mbap(transaction_id: u16, unit_id: UnitId, pdu_len: u16) -> [u8; MBAP_HEADER_LEN] {
    MbapHeader::new(transaction_id, unit_id, pdu_len).encode()
}

/// Decode a 7-byte MBAP header
pub fn decode_mbap(bytes: &[u8; MBAP_HEADER_LEN]) -> MbapHeader {
    MbapHeader::decode(bytes)
}

/// Request PDU for one of the supported operations
///
/// Fields are already validated wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
        }
    }

    /// Encode the request PDU (function code + payload)
    pub fn encode_pdu(&self) -> Vec<u8> {
        let (first, second) = match *self {
            Request::ReadCoils { address, quantity } => (address, quantity),
            Request::ReadHoldingRegisters { address, quantity } => (address, quantity),
            Request::WriteSingleCoil { address, value } => {
                (address, if value { COIL_ON } else { COIL_OFF })
            }
            Request::WriteSingleRegister { address, value } => (address, value),
        };

        let mut pdu = Vec::with_capacity(5);
        pdu.push(self.function().to_u8());
        // Writes into a Vec cannot fail
        let _ = pdu.write_u16::<BigEndian>(first);
        let _ = pdu.write_u16::<BigEndian>(second);
        pdu
    }
}

/// Check that the response answers `expected`
///
/// Any other function code, including the 0x80 exception form, is reported
/// as an exception response carrying the slave's exception code.
pub fn check_function(expected: FunctionCode, pdu: &[u8]) -> Result<(), RequestError> {
    match pdu.first() {
        None => Err(RequestError::no_response("empty response PDU")),
        Some(&function) if function == expected.to_u8() => Ok(()),
        Some(_) => Err(RequestError::exception_response(pdu)),
    }
}

/// Decode a read-coils response into exactly `quantity` values
pub fn parse_coils(pdu: &[u8], quantity: u16) -> Result<Vec<bool>, RequestError> {
    let needed = (quantity as usize + 7) / 8;
    let data = response_data(pdu, needed)?;
    Ok(unpack_bits(data, quantity as usize))
}

/// Decode a read-holding-registers response into exactly `quantity` values
pub fn parse_registers(pdu: &[u8], quantity: u16) -> Result<Vec<i16>, RequestError> {
    let needed = quantity as usize * 2;
    let data = response_data(pdu, needed)?;
    Ok(data.chunks_exact(2).map(BigEndian::read_i16).collect())
}

/// Data bytes of a read response, checked against the required size
fn response_data(pdu: &[u8], needed: usize) -> Result<&[u8], RequestError> {
    let byte_count = *pdu
        .get(1)
        .ok_or_else(|| RequestError::no_response("response PDU has no byte count"))?
        as usize;
    if byte_count < needed {
        return Err(RequestError::no_response(format!(
            "byte count {} too small, expected {}",
            byte_count, needed
        )));
    }
    pdu.get(2..2 + needed).ok_or_else(|| {
        RequestError::no_response(format!(
            "response data truncated: {} of {} bytes",
            pdu.len().saturating_sub(2),
            needed
        ))
    })
}

/// Unpack LSB-first coil bytes into `count` booleans
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_conversion() {
        assert_eq!(FunctionCode::from_u8(0x01), Some(FunctionCode::ReadCoils));
        assert_eq!(FunctionCode::from_u8(0x06), Some(FunctionCode::WriteSingleRegister));
        assert_eq!(FunctionCode::from_u8(0x02), None);
        assert_eq!(FunctionCode::WriteSingleCoil.exception_code(), 0x85);
        assert_eq!(FunctionCode::ReadCoils.to_string(), "Read Coils (0x01)");
    }

    #[test]
    fn test_mbap_layout() {
        let header = encode_mbap(0x1234, 0x11, 5);
        assert_eq!(header, [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11]);

        let decoded = decode_mbap(&header);
        assert_eq!(decoded.transaction_id, 0x1234);
        assert_eq!(decoded.protocol_id, 0);
        assert_eq!(decoded.length, 6);
        assert_eq!(decoded.unit_id, 0x11);
        assert_eq!(decoded.pdu_len(), Some(5));
    }

    #[test]
    fn test_mbap_declared_length_bounds() {
        let mut header = decode_mbap(&[0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(header.pdu_len(), None);

        header.length = 1;
        assert_eq!(header.pdu_len(), Some(0));

        header.length = 254;
        assert_eq!(header.pdu_len(), Some(253));

        header.length = 255;
        assert_eq!(header.pdu_len(), None);
    }

    #[test]
    fn test_request_pdus() {
        let pdu = Request::ReadCoils { address: 0x0013, quantity: 0x0013 }.encode_pdu();
        assert_eq!(pdu, vec![0x01, 0x00, 0x13, 0x00, 0x13]);

        let pdu = Request::ReadHoldingRegisters { address: 0x006B, quantity: 3 }.encode_pdu();
        assert_eq!(pdu, vec![0x03, 0x00, 0x6B, 0x00, 0x03]);

        let pdu = Request::WriteSingleCoil { address: 2700, value: true }.encode_pdu();
        assert_eq!(pdu, vec![0x05, 0x0A, 0x8C, 0xFF, 0x00]);

        let pdu = Request::WriteSingleCoil { address: 2700, value: false }.encode_pdu();
        assert_eq!(pdu, vec![0x05, 0x0A, 0x8C, 0x00, 0x00]);

        let pdu = Request::WriteSingleRegister { address: 1, value: 0x0003 }.encode_pdu();
        assert_eq!(pdu, vec![0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_check_function() {
        assert!(check_function(FunctionCode::WriteSingleCoil, &[0x05, 0x0A, 0x8C, 0xFF, 0x00]).is_ok());

        let err = check_function(FunctionCode::WriteSingleCoil, &[0x85, 0x02]).unwrap_err();
        assert_eq!(
            err,
            RequestError::ExceptionResponse { function: 0x85, exception: Some(0x02) }
        );

        // A different function code is rejected as well
        let err = check_function(FunctionCode::ReadCoils, &[0x03, 0x02, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, RequestError::ExceptionResponse { function: 0x03, .. }));

        let err = check_function(FunctionCode::ReadCoils, &[]).unwrap_err();
        assert!(matches!(err, RequestError::NoResponse { .. }));
    }

    #[test]
    fn test_parse_coils() {
        assert_eq!(parse_coils(&[0x01, 0x01, 0b0000_0101], 3).unwrap(), vec![true, false, true]);
        assert_eq!(parse_coils(&[0x01, 0x01, 0b0000_0101], 1).unwrap(), vec![true]);

        // 10 coils span two bytes
        let coils = parse_coils(&[0x01, 0x02, 0xCD, 0x01], 10).unwrap();
        assert_eq!(
            coils,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[test]
    fn test_parse_coils_short_payload() {
        let err = parse_coils(&[0x01, 0x01, 0xFF], 9).unwrap_err();
        assert!(matches!(err, RequestError::NoResponse { .. }));

        let err = parse_coils(&[0x01, 0x02, 0xFF], 9).unwrap_err();
        assert!(matches!(err, RequestError::NoResponse { .. }));

        let err = parse_coils(&[0x01], 1).unwrap_err();
        assert!(matches!(err, RequestError::NoResponse { .. }));
    }

    #[test]
    fn test_parse_registers() {
        let regs = parse_registers(&[0x03, 0x04, 0x00, 0x01, 0x00, 0x02], 2).unwrap();
        assert_eq!(regs, vec![1, 2]);

        // Registers are signed
        let regs = parse_registers(&[0x03, 0x02, 0xFF, 0xFE], 1).unwrap();
        assert_eq!(regs, vec![-2]);

        let err = parse_registers(&[0x03, 0x04, 0x00, 0x01], 2).unwrap_err();
        assert!(matches!(err, RequestError::NoResponse { .. }));
    }

    #[test]
    fn test_bit_unpacking_across_bytes() {
        let bits = unpack_bits(&[0b0000_1101, 0b0000_0001], 9);
        assert_eq!(bits, vec![true, false, true, true, false, false, false, false, true]);
        assert_eq!(unpack_bits(&[0xFF], 16).len(), 8);
    }

    #[test]
    fn test_exception_code_names() {
        assert_eq!(ExceptionCode::from_u8(0x02).map(|e| e.name()), Some("Illegal Data Address"));
        assert_eq!(ExceptionCode::from_u8(0x09), None);
        assert!(ExceptionCode::ServerDeviceBusy.to_string().contains("0x06"));
    }
}
