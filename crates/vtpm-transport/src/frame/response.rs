// SPDX-License-Identifier: Apache-2.0

use super::{
    Header, MessageResponseHeader, Operation, Reader, ServiceResponseHeader, HEADER_LEN,
    MESSAGE_VERSION, VTPM_SERVICE_GUID,
};
use crate::error::{ProtocolError, Result};

use log::error;

/// Validates a response frame for `operation` and returns its message.
///
/// The layers are checked strictly from the outside in: service identifier,
/// service status, service length, then the message envelope and its status.
/// The message length is only derived once every check passed, and always
/// lies within `buf`.
pub fn parse_response(buf: &[u8], operation: Operation) -> Result<&[u8]> {
    let mut reader = Reader::new(buf);

    let service = ServiceResponseHeader::decode(&mut reader)?;

    if service.guid != VTPM_SERVICE_GUID {
        error!("response for unexpected service {:02x?}", service.guid);
        return Err(ProtocolError::ServiceMismatch.into());
    }

    if service.status != 0 {
        error!("service status {:#x}", service.status);
        return Err(ProtocolError::ServiceStatus(service.status).into());
    }

    let length = service.length as usize;

    if length < HEADER_LEN {
        error!("response length {} shorter than headers", length);
        return Err(ProtocolError::LengthTooShort(service.length).into());
    }

    if length > buf.len() {
        error!(
            "response length {} exceeds buffer of {} bytes",
            length,
            buf.len()
        );
        return Err(ProtocolError::LengthExceedsBuffer {
            length: service.length,
            capacity: buf.len(),
        }
        .into());
    }

    let message = MessageResponseHeader::decode(&mut reader)?;

    if message.version != MESSAGE_VERSION {
        error!("message version {}", message.version);
        return Err(ProtocolError::VersionMismatch(message.version).into());
    }

    if message.command != operation as u8 {
        error!("response to command {}", message.command);
        return Err(ProtocolError::OperationMismatch {
            expected: operation as u8,
            found: message.command,
        }
        .into());
    }

    if message.status != 0 {
        error!("message status {:#x}", message.status);
        return Err(ProtocolError::MessageStatus(message.status).into());
    }

    reader.read_bytes(length - HEADER_LEN)
}
