/// Slave-side data storage
///
/// The engine reaches application data only through the [`DataStore`] trait,
/// so any device database can answer requests. [`ModbusRegisterBank`] is the
/// bundled thread-safe implementation holding coils, discrete inputs, holding
/// registers and input registers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// The four Modbus data tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl DataKind {
    /// Table a function code operates on
    pub fn for_function(function: ModbusFunction) -> Self {
        match function {
            ModbusFunction::ReadCoils
            | ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteMultipleCoils => DataKind::Coils,
            ModbusFunction::ReadDiscreteInputs => DataKind::DiscreteInputs,
            ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleRegisters => DataKind::HoldingRegisters,
            ModbusFunction::ReadInputRegisters => DataKind::InputRegisters,
        }
    }

    /// Single-bit tables; values are 0 or 1
    pub fn is_bit(self) -> bool {
        matches!(self, DataKind::Coils | DataKind::DiscreteInputs)
    }

    /// Tables the bus may write
    pub fn is_writable(self) -> bool {
        matches!(self, DataKind::Coils | DataKind::HoldingRegisters)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Coils => "coils",
            DataKind::DiscreteInputs => "discrete inputs",
            DataKind::HoldingRegisters => "holding registers",
            DataKind::InputRegisters => "input registers",
        };
        f.write_str(name)
    }
}

/// Application store a slave engine reads from and writes to
///
/// Bit tables exchange values as 0/1 in `u16`. Returning
/// `ModbusError::InvalidAddress` makes the slave answer with exception 0x02;
/// `InvalidData` yields 0x03 and anything else 0x04.
pub trait DataStore: Send + Sync {
    fn read_values(&self, kind: DataKind, address: u16, count: u16) -> ModbusResult<Vec<u16>>;

    fn write_values(&self, kind: DataKind, address: u16, values: &[u16]) -> ModbusResult<()>;
}

/// Modbus register bank for storing coils, discrete inputs, holding registers, and input registers
///
/// Thread-safe through `Arc<RwLock<_>>`; clones share the same tables. Unset
/// addresses read as zero. With a size limit, any access reaching past it is
/// rejected as an invalid address.
#[derive(Debug, Clone)]
pub struct ModbusRegisterBank {
    /// Coils (read/write) - 1 bit each
    coils: Arc<RwLock<HashMap<u16, bool>>>,
    /// Discrete inputs (read-only) - 1 bit each
    discrete_inputs: Arc<RwLock<HashMap<u16, bool>>>,
    /// Holding registers (read/write) - 16 bits each
    holding_registers: Arc<RwLock<HashMap<u16, u16>>>,
    /// Input registers (read-only) - 16 bits each
    input_registers: Arc<RwLock<HashMap<u16, u16>>>,
    /// Number of addresses per table, unbounded when `None`
    size: Option<u32>,
}

fn lock_error(table: &str) -> ModbusError {
    ModbusError::internal(format!("Failed to lock {}", table))
}

impl ModbusRegisterBank {
    /// Create a new register bank covering the full 16-bit address space
    pub fn new() -> Self {
        Self {
            coils: Arc::new(RwLock::new(HashMap::new())),
            discrete_inputs: Arc::new(RwLock::new(HashMap::new())),
            holding_registers: Arc::new(RwLock::new(HashMap::new())),
            input_registers: Arc::new(RwLock::new(HashMap::new())),
            size: None,
        }
    }

    /// Create a bank whose tables hold addresses `0..size`
    pub fn with_size(size: u16) -> Self {
        Self {
            size: Some(size as u32),
            ..Self::new()
        }
    }

    fn check_range(&self, address: u16, count: u16) -> ModbusResult<()> {
        let end = address as u32 + count as u32;
        let limit = self.size.unwrap_or(u16::MAX as u32 + 1);
        if count == 0 || end > limit {
            return Err(ModbusError::invalid_address(address, count));
        }
        Ok(())
    }

    /// Length of a write as a quantity; longer slices cannot fit the address space
    fn write_quantity(len: usize) -> ModbusResult<u16> {
        u16::try_from(len).map_err(|_| {
            ModbusError::invalid_data(format!("Write of {} values exceeds the address space", len))
        })
    }

    fn read_bits(
        &self,
        table: &RwLock<HashMap<u16, bool>>,
        name: &str,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.check_range(address, quantity)?;
        let bits = table.read().map_err(|_| lock_error(name))?;
        Ok((0..quantity)
            .map(|i| bits.get(&(address + i)).copied().unwrap_or(false))
            .collect())
    }

    fn read_words(
        &self,
        table: &RwLock<HashMap<u16, u16>>,
        name: &str,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.check_range(address, quantity)?;
        let words = table.read().map_err(|_| lock_error(name))?;
        Ok((0..quantity)
            .map(|i| words.get(&(address + i)).copied().unwrap_or(0))
            .collect())
    }

    fn write_bits(
        &self,
        table: &RwLock<HashMap<u16, bool>>,
        name: &str,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        let count = Self::write_quantity(values.len())?;
        self.check_range(address, count)?;
        let mut bits = table.write().map_err(|_| lock_error(name))?;
        for (i, &value) in values.iter().enumerate() {
            bits.insert(address + i as u16, value);
        }
        Ok(())
    }

    fn write_words(
        &self,
        table: &RwLock<HashMap<u16, u16>>,
        name: &str,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        let count = Self::write_quantity(values.len())?;
        self.check_range(address, count)?;
        let mut words = table.write().map_err(|_| lock_error(name))?;
        for (i, &value) in values.iter().enumerate() {
            words.insert(address + i as u16, value);
        }
        Ok(())
    }

    /// Read coils (function code 0x01)
    pub fn read_01(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(&self.coils, "coils", address, quantity)
    }

    /// Read discrete inputs (function code 0x02)
    pub fn read_02(&self, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(&self.discrete_inputs, "discrete inputs", address, quantity)
    }

    /// Read holding registers (function code 0x03)
    pub fn read_03(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(&self.holding_registers, "holding registers", address, quantity)
    }

    /// Read input registers (function code 0x04)
    pub fn read_04(&self, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(&self.input_registers, "input registers", address, quantity)
    }

    /// Write single coil (function code 0x05)
    pub fn write_05(&self, address: u16, value: bool) -> ModbusResult<()> {
        self.write_0f(address, &[value])
    }

    /// Write single register (function code 0x06)
    pub fn write_06(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_10(address, &[value])
    }

    /// Write multiple coils (function code 0x0F)
    pub fn write_0f(&self, address: u16, values: &[bool]) -> ModbusResult<()> {
        self.write_bits(&self.coils, "coils", address, values)
    }

    /// Write multiple registers (function code 0x10)
    pub fn write_10(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write_words(&self.holding_registers, "holding registers", address, values)
    }

    /// Set input register value (for simulation/testing)
    pub fn set_input_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.write_words(&self.input_registers, "input registers", address, &[value])
    }

    /// Set discrete input value (for simulation/testing)
    pub fn set_discrete_input(&self, address: u16, value: bool) -> ModbusResult<()> {
        self.write_bits(&self.discrete_inputs, "discrete inputs", address, &[value])
    }

    /// Get register bank statistics
    pub fn get_stats(&self) -> ModbusResult<RegisterBankStats> {
        Ok(RegisterBankStats {
            coils_count: self.coils.read().map_err(|_| lock_error("coils"))?.len(),
            discrete_inputs_count: self
                .discrete_inputs
                .read()
                .map_err(|_| lock_error("discrete inputs"))?
                .len(),
            holding_registers_count: self
                .holding_registers
                .read()
                .map_err(|_| lock_error("holding registers"))?
                .len(),
            input_registers_count: self
                .input_registers
                .read()
                .map_err(|_| lock_error("input registers"))?
                .len(),
        })
    }
}

impl Default for ModbusRegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for ModbusRegisterBank {
    fn read_values(&self, kind: DataKind, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        match kind {
            DataKind::Coils => Ok(self.read_01(address, count)?.into_iter().map(u16::from).collect()),
            DataKind::DiscreteInputs => {
                Ok(self.read_02(address, count)?.into_iter().map(u16::from).collect())
            }
            DataKind::HoldingRegisters => self.read_03(address, count),
            DataKind::InputRegisters => self.read_04(address, count),
        }
    }

    fn write_values(&self, kind: DataKind, address: u16, values: &[u16]) -> ModbusResult<()> {
        match kind {
            DataKind::Coils => {
                let bits: Vec<bool> = values.iter().map(|&v| v != 0).collect();
                self.write_0f(address, &bits)
            }
            DataKind::HoldingRegisters => self.write_10(address, values),
            DataKind::DiscreteInputs | DataKind::InputRegisters => Err(ModbusError::invalid_data(
                format!("{} are read-only", kind),
            )),
        }
    }
}

/// Register bank statistics
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterBankStats {
    pub coils_count: usize,
    pub discrete_inputs_count: usize,
    pub holding_registers_count: usize,
    pub input_registers_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coil_operations() {
        let bank = ModbusRegisterBank::new();

        bank.write_05(10, true).unwrap();
        assert_eq!(bank.read_01(10, 1).unwrap(), vec![true]);

        bank.write_0f(20, &[true, false, true]).unwrap();
        assert_eq!(bank.read_01(20, 3).unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_register_operations() {
        let bank = ModbusRegisterBank::new();

        bank.write_06(5, 42).unwrap();
        assert_eq!(bank.read_03(5, 1).unwrap(), vec![42]);

        bank.write_10(100, &[100, 200, 300]).unwrap();
        assert_eq!(bank.read_03(100, 3).unwrap(), vec![100, 200, 300]);
        assert_eq!(bank.read_03(103, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_data_store_interface() {
        let bank = ModbusRegisterBank::new();
        bank.set_discrete_input(1, true).unwrap();
        bank.set_input_register(0, 0x1234).unwrap();

        assert_eq!(
            bank.read_values(DataKind::DiscreteInputs, 0, 2).unwrap(),
            vec![0, 1]
        );
        assert_eq!(
            bank.read_values(DataKind::InputRegisters, 0, 1).unwrap(),
            vec![0x1234]
        );

        bank.write_values(DataKind::Coils, 0, &[1, 0, 1]).unwrap();
        assert_eq!(bank.read_01(0, 3).unwrap(), vec![true, false, true]);

        assert!(bank.write_values(DataKind::InputRegisters, 0, &[1]).is_err());
    }

    #[test]
    fn test_bounded_bank() {
        let bank = ModbusRegisterBank::with_size(100);
        assert!(bank.read_03(90, 10).is_ok());
        assert_eq!(
            bank.read_03(95, 10),
            Err(ModbusError::invalid_address(95, 10))
        );
        assert!(bank.write_06(100, 1).is_err());

        // The full address space never wraps around
        let unbounded = ModbusRegisterBank::new();
        assert!(unbounded.read_03(0xFFFF, 1).is_ok());
        assert!(unbounded.read_03(0xFFFF, 2).is_err());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let bank = ModbusRegisterBank::new();
        assert!(matches!(
            bank.write_10(1, &vec![0u16; 65537]),
            Err(ModbusError::InvalidData { .. })
        ));
        assert!(matches!(
            bank.write_0f(0, &vec![true; 70000]),
            Err(ModbusError::InvalidData { .. })
        ));
        assert_eq!(bank.get_stats().unwrap().holding_registers_count, 0);

        // A write ending exactly at the top of the address space still fits
        assert!(bank.write_10(1, &vec![7u16; 65535]).is_ok());
        assert_eq!(bank.read_03(0xFFFF, 1).unwrap(), vec![7]);
        assert!(bank.write_10(2, &vec![7u16; 65535]).is_err());
    }

    #[test]
    fn test_stats_and_shared_clones() {
        let bank = ModbusRegisterBank::new();
        let shared = bank.clone();
        shared.write_10(0, &[1, 2]).unwrap();
        shared.write_05(0, true).unwrap();

        let stats = bank.get_stats().unwrap();
        assert_eq!(stats.holding_registers_count, 2);
        assert_eq!(stats.coils_count, 1);
        assert_eq!(stats.input_registers_count, 0);
    }
}
