//! Byte buffer with an explicit not-yet-written sentinel.
//!
//! Reassembly targets (survey columns, burst sample streams, GPS regions)
//! are filled out of order from frame payloads. Positions never written must
//! stay distinguishable from written zeros, so every slot is an
//! `Option<u8>` rather than a zero-initialized byte.

use thiserror::Error;

/// Write error: a payload would run past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("write of {len} bytes at offset {start} exceeds buffer capacity {capacity}")]
pub struct WriteOutOfBounds {
    pub start: usize,
    pub len: usize,
    pub capacity: usize,
}

/// Fixed-capacity byte buffer where unwritten slots are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseBytes {
    slots: Vec<Option<u8>>,
}

impl SparseBytes {
    /// Create an all-unwritten buffer of the given length.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// Create a fully-written buffer from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            slots: bytes.iter().map(|&b| Some(b)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write `bytes` starting at `start`, overwriting previous contents.
    pub fn write_at(&mut self, start: usize, bytes: &[u8]) -> Result<(), WriteOutOfBounds> {
        let end = start.checked_add(bytes.len()).unwrap_or(usize::MAX);
        if end > self.slots.len() {
            return Err(WriteOutOfBounds {
                start,
                len: bytes.len(),
                capacity: self.slots.len(),
            });
        }
        for (slot, &b) in self.slots[start..end].iter_mut().zip(bytes) {
            *slot = Some(b);
        }
        Ok(())
    }

    /// The byte at `index`, or `None` if out of range or never written.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.slots.get(index).copied().flatten()
    }

    /// Number of slots never written.
    pub fn missing(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// True when every slot has been written.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    /// The buffer contents, if complete.
    pub fn filled(&self) -> Option<Vec<u8>> {
        self.slots.iter().copied().collect()
    }

    /// A contiguous run of `len` written bytes starting at `offset`.
    pub fn read_exact(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.slots.len() {
            return None;
        }
        self.slots[offset..end].iter().copied().collect()
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.get(offset)
    }

    pub fn read_u16_le(&self, offset: usize) -> Option<u16> {
        let b = self.read_exact(offset, 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&self, offset: usize) -> Option<u32> {
        let b = self.read_exact(offset, 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32_le(&self, offset: usize) -> Option<f32> {
        let b = self.read_exact(offset, 4)?;
        Some(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f64_le(&self, offset: usize) -> Option<f64> {
        let b = self.read_exact(offset, 8)?;
        Some(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Start offsets of every fully-written occurrence of `seq`.
    pub fn find_sequence(&self, seq: &[u8]) -> Vec<usize> {
        if seq.is_empty() || seq.len() > self.slots.len() {
            return vec![];
        }
        self.slots
            .windows(seq.len())
            .enumerate()
            .filter(|(_, w)| w.iter().zip(seq).all(|(s, &b)| *s == Some(b)))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_missing() {
        let buf = SparseBytes::new(8);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.missing(), 8);
        assert!(!buf.is_complete());
        assert!(buf.filled().is_none());
    }

    #[test]
    fn test_write_and_complete() {
        let mut buf = SparseBytes::new(4);
        buf.write_at(0, &[1, 2]).unwrap();
        assert_eq!(buf.missing(), 2);
        buf.write_at(2, &[3, 4]).unwrap();
        assert!(buf.is_complete());
        assert_eq!(buf.filled().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_is_not_missing() {
        let mut buf = SparseBytes::new(2);
        buf.write_at(0, &[0]).unwrap();
        assert_eq!(buf.get(0), Some(0));
        assert_eq!(buf.get(1), None);
    }

    #[test]
    fn test_write_out_of_bounds() {
        let mut buf = SparseBytes::new(4);
        let err = buf.write_at(3, &[1, 2]).unwrap_err();
        assert_eq!(err.start, 3);
        assert_eq!(err.capacity, 4);
    }

    #[test]
    fn test_read_exact_requires_all_written() {
        let mut buf = SparseBytes::new(4);
        buf.write_at(0, &[1, 2, 3]).unwrap();
        assert_eq!(buf.read_exact(0, 3).unwrap(), vec![1, 2, 3]);
        assert!(buf.read_exact(1, 3).is_none()); // slot 3 unwritten
        assert!(buf.read_exact(2, 5).is_none()); // past the end
    }

    #[test]
    fn test_little_endian_readers() {
        let buf = SparseBytes::from_bytes(&[0x78, 0x56, 0x34, 0x12, 0, 0, 0xF0, 0x3F]);
        assert_eq!(buf.read_u16_le(0), Some(0x5678));
        assert_eq!(buf.read_u32_le(0), Some(0x1234_5678));
        assert_eq!(buf.read_f64_le(0), Some(f64::from_le_bytes([
            0x78, 0x56, 0x34, 0x12, 0, 0, 0xF0, 0x3F
        ])));
    }

    #[test]
    fn test_find_sequence() {
        let mut buf = SparseBytes::new(10);
        buf.write_at(2, &[0xAA, 0x44, 0x12]).unwrap();
        buf.write_at(6, &[0xAA, 0x44, 0x12]).unwrap();
        assert_eq!(buf.find_sequence(&[0xAA, 0x44, 0x12]), vec![2, 6]);
    }

    #[test]
    fn test_find_sequence_skips_holes() {
        let mut buf = SparseBytes::new(6);
        buf.write_at(0, &[0xAA]).unwrap();
        buf.write_at(2, &[0x12]).unwrap(); // 0x44 at offset 1 never written
        assert!(buf.find_sequence(&[0xAA, 0x44, 0x12]).is_empty());
    }
}
