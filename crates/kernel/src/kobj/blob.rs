// Blob: a plain reference-counted byte buffer

use crate::error::{Result, Verr};
use spin::Mutex;

/// Reference-counted byte buffer object.
pub struct Blob {
    data: Mutex<alloc::vec::Vec<u8>>,
}

impl Blob {
    /// Create a zeroed blob of `size` bytes.
    pub fn create(size: usize) -> Result<Blob> {
        Ok(Blob {
            data: Mutex::new(alloc::vec![0u8; size]),
        })
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut data = self.data.lock();
        let end = offset.checked_add(buf.len()).ok_or(Verr::InvalidArg)?;
        if end > data.len() {
            return Err(Verr::InvalidArg);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let b = Blob::create(8).unwrap();
        assert_eq!(b.write_at(2, &[1, 2, 3]).unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(b.read_at(0, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..5], &[0, 0, 1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_write_rejected() {
        let b = Blob::create(4).unwrap();
        assert_eq!(b.write_at(3, &[1, 2]), Err(Verr::InvalidArg));
    }
}
