// SPDX-License-Identifier: Apache-2.0

use super::{
    length_field, Cursor, Header, MessageCommandHeader, MessageResponseHeader, Operation,
    ServiceCommandHeader, ServiceResponseHeader,
};
use crate::error::Result;

/// Writes a command frame for `operation` carrying `payload` into `buf`.
///
/// The service envelope is written with a zero length first and patched with
/// the number of bytes actually written once the payload is in place.
/// Returns the frame length.
pub fn build_command(buf: &mut [u8], operation: Operation, payload: &[u8]) -> Result<usize> {
    let mut cursor = Cursor::new(buf);

    ServiceCommandHeader::new(0).encode(&mut cursor)?;
    MessageCommandHeader::new(operation).encode(&mut cursor)?;
    cursor.write_bytes(payload)?;

    let len = cursor.position();
    cursor.patch_u32(ServiceCommandHeader::LENGTH_OFFSET, length_field(len)?)?;

    Ok(len)
}

/// Pre-fills `buf` with the response envelopes for `operation`.
///
/// The service length is set to the full capacity of `buf`, which tells the
/// host how many bytes it may write back.
pub fn prepare_response_skeleton(buf: &mut [u8], operation: Operation) -> Result<()> {
    let capacity = length_field(buf.len())?;
    let mut cursor = Cursor::new(buf);

    ServiceResponseHeader::new(capacity, 0).encode(&mut cursor)?;
    MessageResponseHeader::new(operation, 0).encode(&mut cursor)
}
