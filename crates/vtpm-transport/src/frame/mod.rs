// SPDX-License-Identifier: Apache-2.0

//! Two-level frame format
//!
//! Every frame starts with the service envelope shared by all TDVMCALL services,
//! followed by the vTPM message envelope and the opaque message itself.
//! The envelopes are serialized field by field through a [`Cursor`] and
//! deserialized through a [`Reader`], so no in-memory layout is ever assumed.

mod command;
mod cursor;
mod response;

pub use command::*;
pub use cursor::*;
pub use response::*;

use crate::error::{Error, ProtocolError, Result};

/// The vTPM service identifier in wire order
pub const VTPM_SERVICE_GUID: [u8; 16] = [
    0x93, 0x07, 0x59, 0x64, 0x52, 0x78, 0x52, 0x4e, 0xbe, 0x45, 0xcd, 0xbb, 0x11, 0x6f, 0x20, 0xf3,
];

/// Version of the message envelope
pub const MESSAGE_VERSION: u8 = 0;

/// Combined size of the service and the message envelope
pub const HEADER_LEN: usize = ServiceCommandHeader::SIZE + MessageCommandHeader::SIZE;

/// Status reported by either layer on success
pub const STATUS_SUCCESS: u8 = 0;

/// vTPM message operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
#[non_exhaustive]
pub enum Operation {
    /// Deliver a message from the guest to the vTPM
    Send = 1,
    /// Retrieve a pending message from the vTPM
    Receive = 2,
}

impl TryFrom<u8> for Operation {
    type Error = ProtocolError;

    #[inline]
    fn try_from(value: u8) -> core::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Send),
            2 => Ok(Self::Receive),
            code => Err(ProtocolError::UnknownOperation(code)),
        }
    }
}

/// A fixed-size envelope with an explicit wire encoding
pub trait Header: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Appends the encoded envelope to `cursor`.
    fn encode(&self, cursor: &mut Cursor<'_>) -> Result<()>;

    /// Consumes an encoded envelope from `reader`.
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;
}

/// Service envelope of a command frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ServiceCommandHeader {
    /// Service identifier
    pub guid: [u8; 16],
    /// Bytes in the frame including this header
    pub length: u32,
    reserved: u32,
}

impl ServiceCommandHeader {
    /// Offset of the `length` field within the frame
    pub const LENGTH_OFFSET: usize = 16;

    /// A vTPM service envelope announcing `length` bytes
    #[inline]
    pub const fn new(length: u32) -> Self {
        Self {
            guid: VTPM_SERVICE_GUID,
            length,
            reserved: 0,
        }
    }
}

impl Header for ServiceCommandHeader {
    const SIZE: usize = 24;

    fn encode(&self, cursor: &mut Cursor<'_>) -> Result<()> {
        cursor.write_bytes(&self.guid)?;
        cursor.write_u32(self.length)?;
        cursor.write_u32(self.reserved)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            guid: reader.read_array()?,
            length: reader.read_u32()?,
            reserved: reader.read_u32()?,
        })
    }
}

/// Service envelope of a response frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ServiceResponseHeader {
    /// Service identifier
    pub guid: [u8; 16],
    /// Buffer capacity on entry, bytes written by the host on return
    pub length: u32,
    /// Service status, `0` if valid
    pub status: u32,
}

impl ServiceResponseHeader {
    /// Offset of the `length` field within the frame
    pub const LENGTH_OFFSET: usize = 16;

    /// A vTPM service envelope with `length` and `status`
    #[inline]
    pub const fn new(length: u32, status: u32) -> Self {
        Self {
            guid: VTPM_SERVICE_GUID,
            length,
            status,
        }
    }
}

impl Header for ServiceResponseHeader {
    const SIZE: usize = 24;

    fn encode(&self, cursor: &mut Cursor<'_>) -> Result<()> {
        cursor.write_bytes(&self.guid)?;
        cursor.write_u32(self.length)?;
        cursor.write_u32(self.status)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            guid: reader.read_array()?,
            length: reader.read_u32()?,
            status: reader.read_u32()?,
        })
    }
}

/// Message envelope of a command frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MessageCommandHeader {
    /// Message version
    pub version: u8,
    /// Operation code
    pub command: u8,
    reserved: u16,
}

impl MessageCommandHeader {
    /// A current-version envelope for `operation`
    #[inline]
    pub const fn new(operation: Operation) -> Self {
        Self {
            version: MESSAGE_VERSION,
            command: operation as u8,
            reserved: 0,
        }
    }
}

impl Header for MessageCommandHeader {
    const SIZE: usize = 4;

    fn encode(&self, cursor: &mut Cursor<'_>) -> Result<()> {
        cursor.write_u8(self.version)?;
        cursor.write_u8(self.command)?;
        cursor.write_u16(self.reserved)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: reader.read_u8()?,
            command: reader.read_u8()?,
            reserved: reader.read_u16()?,
        })
    }
}

/// Message envelope of a response frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MessageResponseHeader {
    /// Message version
    pub version: u8,
    /// Operation code
    pub command: u8,
    /// Message status, `0` if valid
    pub status: u8,
    reserved: u8,
}

impl MessageResponseHeader {
    /// A current-version envelope for `operation` with `status`
    #[inline]
    pub const fn new(operation: Operation, status: u8) -> Self {
        Self {
            version: MESSAGE_VERSION,
            command: operation as u8,
            status,
            reserved: 0,
        }
    }
}

impl Header for MessageResponseHeader {
    const SIZE: usize = 4;

    fn encode(&self, cursor: &mut Cursor<'_>) -> Result<()> {
        cursor.write_u8(self.version)?;
        cursor.write_u8(self.command)?;
        cursor.write_u8(self.status)?;
        cursor.write_u8(self.reserved)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: reader.read_u8()?,
            command: reader.read_u8()?,
            status: reader.read_u8()?,
            reserved: reader.read_u8()?,
        })
    }
}

/// Converts a frame length to the 32-bit length field
#[inline]
pub(crate) fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::InvalidArgument)
}
