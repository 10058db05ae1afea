/// Modbus CRC-16 checksum
///
/// Reflected polynomial 0xA001, initial value 0xFFFF. The checksum is
/// transmitted low byte first, directly after the last payload byte.

use ::crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Number of checksum bytes trailing every RTU frame
pub const CRC_LEN: usize = 2;

/// Compute the Modbus CRC over `data`
pub fn compute(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC of `frame` to it, low byte first
pub fn append(frame: &mut Vec<u8>) {
    let crc = compute(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Checksum carried in the last two bytes of `frame`
pub fn received(frame: &[u8]) -> Option<u16> {
    if frame.len() < CRC_LEN {
        return None;
    }
    let tail = frame.len() - CRC_LEN;
    Some(u16::from_le_bytes([frame[tail], frame[tail + 1]]))
}

/// Recompute the CRC over everything but the trailing checksum and compare
pub fn verify(frame: &[u8]) -> ModbusResult<()> {
    let actual = received(frame)
        .ok_or_else(|| ModbusError::frame(format!("{} bytes cannot carry a CRC", frame.len())))?;
    let expected = compute(&frame[..frame.len() - CRC_LEN]);

    if expected != actual {
        return Err(ModbusError::bad_crc(expected, actual));
    }
    Ok(())
}
