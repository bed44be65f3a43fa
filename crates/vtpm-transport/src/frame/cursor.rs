// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

/// Sequential little-endian writer over a byte buffer
///
/// Every write is bounds checked against the remaining capacity and fails
/// with [`Error::Overrun`] instead of writing a partial value.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a mut [u8],
    /// Byte offset of the next write.
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor positioned at the start of `buf`.
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Total capacity of the underlying buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Error::Overrun {
                requested: len,
                remaining,
            });
        }

        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..self.pos])
    }

    /// Appends `bytes` verbatim.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Appends a byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Appends a little-endian `u16`.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a little-endian `u32`.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Overwrites an already written little-endian `u32` at `offset`.
    ///
    /// Only bytes below [`position`](Self::position) may be patched.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let bytes = value.to_le_bytes();
        let end = offset.checked_add(bytes.len()).ok_or(Error::InvalidArgument)?;

        if end > self.pos {
            return Err(Error::Overrun {
                requested: bytes.len(),
                remaining: self.pos.saturating_sub(offset),
            });
        }

        self.buf[offset..end].copy_from_slice(&bytes);
        Ok(())
    }
}

/// Sequential little-endian reader over a byte buffer
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes and returns the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(Error::Overrun {
                requested: len,
                remaining,
            });
        }

        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Consumes the next `N` bytes into an array.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    /// Consumes a byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    /// Consumes a little-endian `u16`.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Consumes a little-endian `u32`.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }
}
