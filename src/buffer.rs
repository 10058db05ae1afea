/// Fixed-capacity receive arena
///
/// Bytes arriving from the serial link are appended behind a write cursor into
/// storage allocated once at engine construction. Nothing is reallocated on
/// the per-byte path; a frame that would exceed the capacity is an overflow.

use crate::error::{ModbusError, ModbusResult};

#[derive(Debug)]
pub struct FrameBuffer {
    storage: Box<[u8]>,
    cursor: usize,
}

impl FrameBuffer {
    /// Allocate an arena holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// Append `bytes` behind the cursor
    ///
    /// On overflow the arena is left untouched and the error reports how many
    /// bytes the frame would have needed.
    pub fn push(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        let end = self.cursor + bytes.len();
        if end > self.storage.len() {
            return Err(ModbusError::buffer_overflow(end, self.storage.len()));
        }
        self.storage[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }

    /// The accumulated frame
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.cursor]
    }

    /// Rewind the cursor
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes that can still be accepted
    pub fn remaining(&self) -> usize {
        self.storage.len() - self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_clear() {
        let mut buffer = FrameBuffer::new(8);
        buffer.push(&[0x01, 0x03]).unwrap();
        buffer.push(&[0x00, 0x00]).unwrap();
        assert_eq!(buffer.as_slice(), &[0x01, 0x03, 0x00, 0x00]);
        assert_eq!(buffer.remaining(), 4);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut buffer = FrameBuffer::new(4);
        buffer.push(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_overflow_leaves_contents() {
        let mut buffer = FrameBuffer::new(4);
        buffer.push(&[1, 2, 3]).unwrap();

        let err = buffer.push(&[4, 5]).unwrap_err();
        assert_eq!(err, ModbusError::buffer_overflow(5, 4));
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
    }
}
