/// Modbus protocol definitions and data structures
///
/// Function codes, exception codes and the message descriptors exchanged
/// between the engine, the frame codec and the drivers. A [`ModbusRequest`]
/// holds the request fields in decoded form; its `data` carries the raw
/// payload values exactly as they travel on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};
use crate::{
    BROADCAST_ADDRESS, MAX_COILS_PER_REQUEST, MAX_REGISTERS_PER_REQUEST, MAX_SLAVE_ID,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus station address (1-247, 0 for broadcast)
pub type SlaveId = u8;

/// Coil ON as transmitted by write single coil
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF as transmitted by write single coil
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the echoed function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Every function code the engine knows how to frame
    pub const ALL: [ModbusFunction; 8] = [
        ModbusFunction::ReadCoils,
        ModbusFunction::ReadDiscreteInputs,
        ModbusFunction::ReadHoldingRegisters,
        ModbusFunction::ReadInputRegisters,
        ModbusFunction::WriteSingleCoil,
        ModbusFunction::WriteSingleRegister,
        ModbusFunction::WriteMultipleCoils,
        ModbusFunction::WriteMultipleRegisters,
    ];

    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// Functions operating on single bits rather than registers
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::WriteSingleCoil
                | ModbusFunction::WriteMultipleCoils
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Exception a slave answers with when servicing a request failed
    pub fn from_error(error: &ModbusError) -> Self {
        match error {
            ModbusError::InvalidFunction { .. } => ModbusException::IllegalFunction,
            ModbusError::InvalidAddress { .. } => ModbusException::IllegalDataAddress,
            ModbusError::InvalidData { .. } | ModbusError::Frame { .. } => {
                ModbusException::IllegalDataValue
            }
            ModbusError::Exception { code, .. } => {
                Self::from_u8(*code).unwrap_or(ModbusException::ServerDeviceFailure)
            }
            _ => ModbusException::ServerDeviceFailure,
        }
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the server",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the server",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for server",
            ModbusException::ServerDeviceFailure => "An unrecoverable error occurred while the server was attempting to perform the requested action",
            ModbusException::Acknowledge => "The server has accepted the request and is processing it, but a long duration of time will be required to do so",
            ModbusException::ServerDeviceBusy => "The server is engaged in processing a long-duration program command",
            ModbusException::MemoryParityError => "The server attempted to read record file, but detected a parity error in the memory",
            ModbusException::GatewayPathUnavailable => "Gateway was unable to allocate an internal communication path",
            ModbusException::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Modbus request structure
///
/// `data` layout by function:
/// - reads: empty
/// - write single coil / register: the 16-bit value, big-endian
/// - write multiple coils: packed bits, LSB first
/// - write multiple registers: register values, big-endian
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a new read request
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Write single coil (0x05)
    pub fn write_single_coil(slave_id: SlaveId, address: ModbusAddress, value: bool) -> Self {
        let raw = if value { COIL_ON } else { COIL_OFF };
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            quantity: 1,
            data: raw.to_be_bytes().to_vec(),
        }
    }

    /// Write single register (0x06)
    pub fn write_single_register(slave_id: SlaveId, address: ModbusAddress, value: u16) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleRegister,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        }
    }

    /// Write multiple coils (0x0F)
    pub fn write_multiple_coils(slave_id: SlaveId, address: ModbusAddress, values: &[bool]) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleCoils,
            address,
            quantity: values.len() as u16,
            data: data_utils::pack_bits(values),
        }
    }

    /// Write multiple registers (0x10)
    pub fn write_multiple_registers(slave_id: SlaveId, address: ModbusAddress, values: &[u16]) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleRegisters,
            address,
            quantity: values.len() as u16,
            data: data_utils::registers_to_bytes(values),
        }
    }

    /// Addressed to every station on the bus
    pub fn is_broadcast(&self) -> bool {
        self.slave_id == BROADCAST_ADDRESS
    }

    /// The 16-bit value of a single write
    pub fn single_value(&self) -> ModbusResult<u16> {
        match self.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ModbusError::invalid_data(format!(
                "Single write carries {} data bytes, expected 2",
                self.data.len()
            ))),
        }
    }

    /// Values to write, widened to u16 (coils become 0 or 1)
    pub fn write_values(&self) -> ModbusResult<Vec<u16>> {
        match self.function {
            ModbusFunction::WriteSingleCoil => match self.single_value()? {
                COIL_ON => Ok(vec![1]),
                COIL_OFF => Ok(vec![0]),
                other => Err(ModbusError::invalid_data(format!(
                    "Invalid coil value: 0x{:04X}",
                    other
                ))),
            },
            ModbusFunction::WriteSingleRegister => Ok(vec![self.single_value()?]),
            ModbusFunction::WriteMultipleCoils => Ok(data_utils::unpack_bits(
                &self.data,
                self.quantity as usize,
            )
            .into_iter()
            .map(u16::from)
            .collect()),
            ModbusFunction::WriteMultipleRegisters => data_utils::bytes_to_registers(&self.data),
            _ => Err(ModbusError::invalid_data(format!(
                "{} carries no write values",
                self.function
            ))),
        }
    }

    /// Validate the request before it is sent
    ///
    /// Station address plus everything [`validate_payload`](Self::validate_payload)
    /// checks. Broadcast is only valid for write functions.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::invalid_data(format!(
                "Invalid slave ID: {}",
                self.slave_id
            )));
        }
        if self.is_broadcast() && self.function.is_read_function() {
            return Err(ModbusError::invalid_data(format!(
                "{} cannot be broadcast",
                self.function
            )));
        }
        self.validate_payload()
    }

    /// Quantity limits, payload length implied by the quantity, coil value
    pub fn validate_payload(&self) -> ModbusResult<()> {
        let max_quantity = match self.function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => MAX_COILS_PER_REQUEST,
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                MAX_REGISTERS_PER_REQUEST
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            ModbusFunction::WriteMultipleCoils => MAX_WRITE_COILS,
            ModbusFunction::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        };
        if self.quantity == 0 || self.quantity > max_quantity {
            return Err(ModbusError::invalid_data(format!(
                "Quantity {} out of range 1..={} for {}",
                self.quantity, max_quantity, self.function
            )));
        }

        let expected_len = match self.function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 2,
            ModbusFunction::WriteMultipleCoils => (self.quantity as usize + 7) / 8,
            ModbusFunction::WriteMultipleRegisters => self.quantity as usize * 2,
            _ => 0,
        };
        if self.data.len() != expected_len {
            return Err(ModbusError::invalid_data(format!(
                "{} with quantity {} needs {} data bytes, got {}",
                self.function,
                self.quantity,
                expected_len,
                self.data.len()
            )));
        }

        if self.function == ModbusFunction::WriteSingleCoil {
            self.write_values()?;
        }

        Ok(())
    }
}

/// Modbus response structure
///
/// `data` is the PDU payload after the function code: byte count and values
/// for reads, the echoed address/value or address/quantity for writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception: Option<ModbusException>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
        }
    }

    /// Create an exception response
    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, exception: ModbusException) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception: Some(exception),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Get exception error if present
    pub fn get_exception(&self) -> Option<ModbusError> {
        self.exception
            .map(|exc| ModbusError::exception(self.function.to_u8(), exc.to_u8()))
    }

    fn read_payload(&self) -> ModbusResult<&[u8]> {
        if let Some(err) = self.get_exception() {
            return Err(err);
        }

        let (&byte_count, values) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))?;
        let byte_count = byte_count as usize;
        if values.len() < byte_count {
            return Err(ModbusError::frame("Incomplete response data"));
        }
        Ok(&values[..byte_count])
    }

    /// Parse response data as registers (u16 values)
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        let payload = self.read_payload()?;
        if payload.len() % 2 != 0 {
            return Err(ModbusError::frame("Invalid register data length"));
        }
        data_utils::bytes_to_registers(payload)
    }

    /// Parse response data as bits (bool values)
    ///
    /// Every bit of every byte is returned; callers truncate to the requested
    /// quantity.
    pub fn parse_bits(&self) -> ModbusResult<Vec<bool>> {
        let payload = self.read_payload()?;
        Ok(data_utils::unpack_bits(payload, payload.len() * 8))
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data("Byte array length must be even"));
        }

        Ok(bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Pack boolean values into bytes
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map_or(false, |byte| byte & (1 << (i % 8)) != 0)
            })
            .collect()
    }

    /// Convert u32 to two u16 registers (big-endian)
    pub fn u32_to_registers(value: u32) -> [u16; 2] {
        [(value >> 16) as u16, value as u16]
    }

    /// Convert two u16 registers to u32 (big-endian)
    pub fn registers_to_u32(registers: &[u16]) -> ModbusResult<u32> {
        if registers.len() < 2 {
            return Err(ModbusError::invalid_data("Need at least 2 registers for u32"));
        }
        Ok(((registers[0] as u32) << 16) | (registers[1] as u32))
    }

    /// Convert f32 to two u16 registers (IEEE 754, big-endian)
    pub fn f32_to_registers(value: f32) -> [u16; 2] {
        u32_to_registers(value.to_bits())
    }

    /// Convert two u16 registers to f32 (IEEE 754, big-endian)
    pub fn registers_to_f32(registers: &[u16]) -> ModbusResult<f32> {
        let u32_value = registers_to_u32(registers)?;
        Ok(f32::from_bits(u32_value))
    }
}
