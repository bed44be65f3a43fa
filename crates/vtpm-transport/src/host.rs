// SPDX-License-Identifier: Apache-2.0

//! Host-side handling of vTPM frames
//!
//! The functions in this module implement the far side of the protocol: they
//! decode what the guest placed in its command buffer and fill the response
//! buffer the guest pre-formatted. They are used by VMM-side service
//! implementations and by test doubles.

use crate::error::{Error, ProtocolError, Result};
use crate::frame::{
    length_field, Cursor, Header, MessageCommandHeader, MessageResponseHeader, Operation, Reader,
    ServiceCommandHeader, ServiceResponseHeader, HEADER_LEN, MESSAGE_VERSION, VTPM_SERVICE_GUID,
};

/// A decoded command frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command<'a> {
    /// Requested operation
    pub operation: Operation,
    /// Message carried by the frame, empty for [`Operation::Receive`]
    pub payload: &'a [u8],
}

/// Decodes and validates a command frame.
///
/// The frame must carry the vTPM service identifier, a length within
/// `[HEADER_LEN, frame.len()]`, the current message version and a known operation.
pub fn parse_command(frame: &[u8]) -> Result<Command<'_>> {
    let mut reader = Reader::new(frame);

    let service = ServiceCommandHeader::decode(&mut reader)?;
    if service.guid != VTPM_SERVICE_GUID {
        return Err(ProtocolError::ServiceMismatch.into());
    }

    let length = service.length as usize;
    if length < HEADER_LEN {
        return Err(ProtocolError::LengthTooShort(service.length).into());
    }
    if length > frame.len() {
        return Err(ProtocolError::LengthExceedsBuffer {
            length: service.length,
            capacity: frame.len(),
        }
        .into());
    }

    let message = MessageCommandHeader::decode(&mut reader)?;
    if message.version != MESSAGE_VERSION {
        return Err(ProtocolError::VersionMismatch(message.version).into());
    }

    let operation = Operation::try_from(message.command)?;
    let payload = reader.read_bytes(length - HEADER_LEN)?;

    Ok(Command { operation, payload })
}

/// The number of bytes the guest allows to be written into `frame`
///
/// This is the length of the response skeleton, capped to the frame size.
pub fn advertised_capacity(frame: &[u8]) -> Result<usize> {
    let service = ServiceResponseHeader::decode(&mut Reader::new(frame))?;
    if service.guid != VTPM_SERVICE_GUID {
        return Err(ProtocolError::ServiceMismatch.into());
    }

    Ok(frame.len().min(service.length as usize))
}

/// Answers a command by filling the response skeleton in `frame`.
///
/// The frame is only written if the headers and `payload` fit into the
/// advertised capacity, otherwise it is left untouched and
/// [`Error::Overrun`] is returned. Returns the number of bytes written, which
/// is also stored in the service length.
pub fn write_response(
    frame: &mut [u8],
    operation: Operation,
    service_status: u32,
    message_status: u8,
    payload: &[u8],
) -> Result<usize> {
    let capacity = advertised_capacity(frame)?;

    let room = capacity.saturating_sub(HEADER_LEN);
    if capacity < HEADER_LEN || payload.len() > room {
        return Err(Error::Overrun {
            requested: HEADER_LEN.saturating_add(payload.len()),
            remaining: capacity,
        });
    }

    let mut cursor = Cursor::new(&mut frame[..capacity]);
    ServiceResponseHeader::new(0, service_status).encode(&mut cursor)?;
    MessageResponseHeader::new(operation, message_status).encode(&mut cursor)?;
    cursor.write_bytes(payload)?;

    let len = cursor.position();
    cursor.patch_u32(ServiceResponseHeader::LENGTH_OFFSET, length_field(len)?)?;

    Ok(len)
}
