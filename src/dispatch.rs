/// Function dispatch table
///
/// Which function codes an engine accepts, how long each payload is on the
/// wire, and how a slave turns a decoded request into a reply by calling the
/// application store.

use log::debug;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{data_utils, ModbusFunction, ModbusRequest, ModbusResponse};
use crate::register_bank::{DataKind, DataStore};

/// Frame direction, as request and response payloads differ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Length rule for the payload between function code and CRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Always exactly this many bytes
    Fixed(usize),
    /// A byte count at `count_offset` followed by that many bytes
    ByteCounted { count_offset: usize },
}

impl PayloadShape {
    /// Total payload length implied by the bytes seen so far
    ///
    /// `None` while a byte-counted payload has not yet delivered its count.
    pub fn payload_len(&self, payload: &[u8]) -> Option<usize> {
        match *self {
            PayloadShape::Fixed(len) => Some(len),
            PayloadShape::ByteCounted { count_offset } => payload
                .get(count_offset)
                .map(|&count| count_offset + 1 + count as usize),
        }
    }
}

/// Payload shape of `function` in the given direction
pub fn payload_shape(function: ModbusFunction, direction: Direction) -> PayloadShape {
    match (direction, function.is_read_function()) {
        // address + quantity
        (Direction::Request, true) => PayloadShape::Fixed(4),
        (Direction::Request, false) => match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                PayloadShape::Fixed(4)
            }
            _ => PayloadShape::ByteCounted { count_offset: 4 },
        },
        (Direction::Response, true) => PayloadShape::ByteCounted { count_offset: 0 },
        // echo of address + value or address + quantity
        (Direction::Response, false) => PayloadShape::Fixed(4),
    }
}

/// Payload of an exception response: the exception code alone
pub const EXCEPTION_PAYLOAD: PayloadShape = PayloadShape::Fixed(1);

/// Set of function codes an engine accepts
///
/// Immutable once the engine is built. A code outside the table is answered
/// with an illegal function exception by a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionTable {
    supported: [bool; 0x80],
}

impl FunctionTable {
    /// All eight standard functions
    pub fn standard() -> Self {
        Self::with_functions(&ModbusFunction::ALL)
    }

    /// Only the listed functions
    pub fn with_functions(functions: &[ModbusFunction]) -> Self {
        let mut supported = [false; 0x80];
        for function in functions {
            supported[function.to_u8() as usize] = true;
        }
        Self { supported }
    }

    /// Read-only slave: the four read functions
    pub fn read_only() -> Self {
        Self::with_functions(&[
            ModbusFunction::ReadCoils,
            ModbusFunction::ReadDiscreteInputs,
            ModbusFunction::ReadHoldingRegisters,
            ModbusFunction::ReadInputRegisters,
        ])
    }

    pub fn is_supported(&self, code: u8) -> bool {
        self.supported
            .get(code as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Resolve a raw code against the table
    pub fn lookup(&self, code: u8) -> ModbusResult<ModbusFunction> {
        if !self.is_supported(code) {
            return Err(ModbusError::invalid_function(code));
        }
        ModbusFunction::from_u8(code)
    }

    /// Supported functions in code order
    pub fn functions(&self) -> Vec<ModbusFunction> {
        ModbusFunction::ALL
            .iter()
            .copied()
            .filter(|f| self.is_supported(f.to_u8()))
            .collect()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Service a decoded request against the store and build the reply
///
/// Errors come back unchanged from the store or from payload validation; the
/// engine maps them onto exception responses.
pub fn execute(request: &ModbusRequest, store: &dyn DataStore) -> ModbusResult<ModbusResponse> {
    let function = request.function;
    let kind = DataKind::for_function(function);
    debug!(
        "Dispatching {} slave:{} address:{} quantity:{}",
        function, request.slave_id, request.address, request.quantity
    );

    let data = if function.is_read_function() {
        let values = store.read_values(kind, request.address, request.quantity)?;
        if values.len() != request.quantity as usize {
            return Err(ModbusError::internal(format!(
                "Store returned {} {} for a read of {}",
                values.len(),
                kind,
                request.quantity
            )));
        }

        let payload = if kind.is_bit() {
            let bits: Vec<bool> = values.iter().map(|&v| v != 0).collect();
            data_utils::pack_bits(&bits)
        } else {
            data_utils::registers_to_bytes(&values)
        };

        let mut data = Vec::with_capacity(1 + payload.len());
        data.push(payload.len() as u8);
        data.extend_from_slice(&payload);
        data
    } else {
        let values = request.write_values()?;
        store.write_values(kind, request.address, &values)?;

        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&request.address.to_be_bytes());
        match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                data.extend_from_slice(&request.data)
            }
            _ => data.extend_from_slice(&request.quantity.to_be_bytes()),
        }
        data
    };

    Ok(ModbusResponse::new_success(request.slave_id, function, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_bank::ModbusRegisterBank;

    #[test]
    fn test_function_table() {
        let table = FunctionTable::standard();
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            assert!(table.is_supported(code), "code {:#04X}", code);
        }
        assert!(!table.is_supported(0x07));
        assert!(!table.is_supported(0x83));
        assert!(!table.is_supported(0xFF));
        assert_eq!(table.lookup(0x2B), Err(ModbusError::invalid_function(0x2B)));

        let read_only = FunctionTable::read_only();
        assert!(read_only.is_supported(0x03));
        assert!(!read_only.is_supported(0x06));
        assert_eq!(read_only.functions().len(), 4);
    }

    #[test]
    fn test_payload_shapes() {
        let read = payload_shape(ModbusFunction::ReadHoldingRegisters, Direction::Request);
        assert_eq!(read.payload_len(&[]), Some(4));

        let write = payload_shape(ModbusFunction::WriteMultipleRegisters, Direction::Request);
        assert_eq!(write.payload_len(&[0, 1, 0, 2]), None);
        assert_eq!(write.payload_len(&[0, 1, 0, 2, 4]), Some(9));

        let reply = payload_shape(ModbusFunction::ReadCoils, Direction::Response);
        assert_eq!(reply.payload_len(&[2]), Some(3));

        let echo = payload_shape(ModbusFunction::WriteMultipleCoils, Direction::Response);
        assert_eq!(echo, PayloadShape::Fixed(4));
    }

    #[test]
    fn test_execute_reads() {
        let bank = ModbusRegisterBank::new();
        bank.write_10(0, &[10, 11]).unwrap();
        bank.write_0f(0, &[true, false, true, true, false, false, true, true, true, false])
            .unwrap();

        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
        let response = execute(&request, &bank).unwrap();
        assert_eq!(response.data, vec![4, 0x00, 0x0A, 0x00, 0x0B]);

        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 10);
        let response = execute(&request, &bank).unwrap();
        assert_eq!(response.data, vec![2, 0xCD, 0x01]);
    }

    #[test]
    fn test_execute_writes() {
        let bank = ModbusRegisterBank::new();

        let request = ModbusRequest::write_single_register(1, 1, 42);
        let response = execute(&request, &bank).unwrap();
        assert_eq!(response.data, vec![0x00, 0x01, 0x00, 0x2A]);
        assert_eq!(bank.read_03(1, 1).unwrap(), vec![42]);

        let request = ModbusRequest::write_multiple_coils(1, 4, &[true, true]);
        let response = execute(&request, &bank).unwrap();
        assert_eq!(response.data, vec![0x00, 0x04, 0x00, 0x02]);
        assert_eq!(bank.read_01(4, 2).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_execute_store_errors() {
        let bank = ModbusRegisterBank::with_size(10);
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadInputRegisters, 8, 4);
        assert_eq!(
            execute(&request, &bank),
            Err(ModbusError::invalid_address(8, 4))
        );
    }
}
