/// RTU frame codec
///
/// ```text
/// [address:1][function:1][payload:N][crc_lo:1][crc_hi:1]
/// ```
///
/// 16-bit payload fields are big-endian, the CRC is little-endian. Requests
/// are encoded by masters and decoded by slaves; responses the other way
/// round. Every decoder verifies the CRC before looking at anything else.

use byteorder::{BigEndian, ByteOrder};

use crate::crc;
use crate::dispatch::{payload_shape, Direction, EXCEPTION_PAYLOAD};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{
    ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, EXCEPTION_FLAG,
};

/// Address, function code and CRC: the smallest structurally complete frame
pub const FRAME_OVERHEAD: usize = 2 + crc::CRC_LEN;

/// Header fields and payload of a CRC-checked frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    pub address: u8,
    pub function_code: u8,
    pub payload: &'a [u8],
}

impl RawFrame<'_> {
    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }
}

/// Check length and CRC, then split a frame into its fields
pub fn check_frame(frame: &[u8]) -> ModbusResult<RawFrame<'_>> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(ModbusError::frame(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    crc::verify(frame)?;

    Ok(RawFrame {
        address: frame[0],
        function_code: frame[1],
        payload: &frame[2..frame.len() - crc::CRC_LEN],
    })
}

fn finish(mut frame: Vec<u8>) -> Vec<u8> {
    crc::append(&mut frame);
    frame
}

/// Encode a request frame (master side)
pub fn encode_request(request: &ModbusRequest) -> ModbusResult<Vec<u8>> {
    request.validate()?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + 5 + request.data.len());
    frame.push(request.slave_id);
    frame.push(request.function.to_u8());
    frame.extend_from_slice(&request.address.to_be_bytes());

    match request.function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            frame.extend_from_slice(&request.quantity.to_be_bytes());
        }
        ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
            frame.extend_from_slice(&request.data);
        }
        ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
            frame.extend_from_slice(&request.quantity.to_be_bytes());
            frame.push(request.data.len() as u8);
            frame.extend_from_slice(&request.data);
        }
    }

    Ok(finish(frame))
}

/// Decode a request frame (slave side)
///
/// Errors: `BadCrc`, `InvalidFunction` for unknown codes, `Frame` when the
/// payload length does not match the function, `InvalidData` for quantity,
/// byte count or coil value violations.
pub fn decode_request(frame: &[u8]) -> ModbusResult<ModbusRequest> {
    let raw = check_frame(frame)?;
    let function = ModbusFunction::from_u8(raw.function_code)?;
    let payload = raw.payload;

    let expected = payload_shape(function, Direction::Request).payload_len(payload);
    if expected != Some(payload.len()) {
        return Err(ModbusError::frame(format!(
            "{} request payload is {} bytes",
            function,
            payload.len()
        )));
    }

    let address = BigEndian::read_u16(&payload[0..2]);
    let (quantity, data) = match function {
        ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
            (1, payload[2..4].to_vec())
        }
        ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
            (BigEndian::read_u16(&payload[2..4]), payload[5..].to_vec())
        }
        _ => (BigEndian::read_u16(&payload[2..4]), Vec::new()),
    };

    let request = ModbusRequest {
        slave_id: raw.address,
        function,
        address,
        quantity,
        data,
    };
    request.validate_payload()?;
    Ok(request)
}

/// Encode a response frame (slave side)
pub fn encode_response(response: &ModbusResponse) -> Vec<u8> {
    if let Some(exception) = response.exception {
        return encode_exception(response.slave_id, response.function.to_u8(), exception);
    }

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + response.data.len());
    frame.push(response.slave_id);
    frame.push(response.function.to_u8());
    frame.extend_from_slice(&response.data);
    finish(frame)
}

/// Encode an exception frame for a raw function code
///
/// Takes the code as received so unsupported functions can be answered too.
pub fn encode_exception(slave_id: SlaveId, function_code: u8, exception: ModbusException) -> Vec<u8> {
    finish(vec![
        slave_id,
        function_code | EXCEPTION_FLAG,
        exception.to_u8(),
    ])
}

/// Decode the response to `request` (master side)
///
/// An exception frame is returned as `ModbusError::Exception`. The response
/// must echo the station and function of the request, and its byte count or
/// echo fields must agree with what was asked.
pub fn decode_response(frame: &[u8], request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
    let raw = check_frame(frame)?;

    if raw.address != request.slave_id {
        return Err(ModbusError::frame(format!(
            "Response slave ID mismatch: expected {}, got {}",
            request.slave_id, raw.address
        )));
    }

    let expected_code = request.function.to_u8();
    if raw.is_exception() {
        let function_code = raw.function_code & !EXCEPTION_FLAG;
        if function_code != expected_code {
            return Err(ModbusError::frame(format!(
                "Exception for function 0x{:02X}, expected 0x{:02X}",
                function_code, expected_code
            )));
        }
        if EXCEPTION_PAYLOAD.payload_len(raw.payload) != Some(raw.payload.len()) {
            return Err(ModbusError::frame("Invalid exception response"));
        }
        return Err(ModbusError::exception(function_code, raw.payload[0]));
    }

    if raw.function_code != expected_code {
        return Err(ModbusError::frame(format!(
            "Response function mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected_code, raw.function_code
        )));
    }

    let function = request.function;
    let payload = raw.payload;
    let expected = payload_shape(function, Direction::Response).payload_len(payload);
    if expected != Some(payload.len()) {
        return Err(ModbusError::frame(format!(
            "{} response payload is {} bytes",
            function,
            payload.len()
        )));
    }

    if function.is_read_function() {
        let quantity = request.quantity as usize;
        let byte_count = if function.is_bit_function() {
            (quantity + 7) / 8
        } else {
            quantity * 2
        };
        if payload[0] as usize != byte_count {
            return Err(ModbusError::frame(format!(
                "Byte count {} does not match {} requested items",
                payload[0], quantity
            )));
        }
    } else {
        let echo_address = BigEndian::read_u16(&payload[0..2]);
        let echo_value = &payload[2..4];
        let expected_value = match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                request.data.clone()
            }
            _ => request.quantity.to_be_bytes().to_vec(),
        };
        if echo_address != request.address || echo_value != expected_value.as_slice() {
            return Err(ModbusError::frame(format!(
                "{} echo does not match the request",
                function
            )));
        }
    }

    Ok(ModbusResponse::new_success(raw.address, function, payload.to_vec()))
}
