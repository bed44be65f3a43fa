// SPDX-License-Identifier: Apache-2.0

//! Errors returned by the transport

use core::fmt;

/// Result type returned by functionality exposed by this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Error returned by the transport
///
/// Every error is terminal for the call that produced it. Nothing is retried internally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A null buffer, a zero page count or an address the platform cannot express
    InvalidArgument,
    /// The page allocator could not satisfy the request
    OutOfMemory,
    /// The platform refused to change the shared attribute of a buffer
    PlatformRejection(u64),
    /// The platform reported a shared-page mask of zero
    SharedMaskUnavailable,
    /// The hypercall itself failed
    TransportFailure {
        /// The raw return code of the call
        code: u64,
        /// The raw return value of the call
        value: u64,
    },
    /// The response frame is malformed or reports a failure
    ProtocolViolation(ProtocolError),
    /// The received message does not fit into the destination
    BufferTooSmall {
        /// Length of the received message in bytes
        required: usize,
    },
    /// A frame did not fit into its buffer
    Overrun {
        /// Bytes that were about to be read or written
        requested: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },
}

/// Failure found while validating a response frame
///
/// The service layer and the message layer report their status independently,
/// so a rejection by either one stays distinguishable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The frame does not carry the vTPM service identifier
    ServiceMismatch,
    /// The outer service layer reported a nonzero status
    ServiceStatus(u32),
    /// The outer length does not even cover both envelopes
    LengthTooShort(u32),
    /// The outer length claims more bytes than the buffer holds
    LengthExceedsBuffer {
        /// The reported outer length
        length: u32,
        /// The capacity of the buffer
        capacity: usize,
    },
    /// The message envelope carries an unsupported version
    VersionMismatch(u8),
    /// The command code is not a known operation
    UnknownOperation(u8),
    /// The response answers a different operation than requested
    OperationMismatch {
        /// The requested operation code
        expected: u8,
        /// The operation code found in the response
        found: u8,
    },
    /// The inner message layer reported a nonzero status
    MessageStatus(u8),
}

impl From<ProtocolError> for Error {
    #[inline]
    fn from(value: ProtocolError) -> Self {
        Self::ProtocolViolation(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::PlatformRejection(code) => {
                write!(f, "platform rejected shared attribute change: {code:#x}")
            }
            Self::SharedMaskUnavailable => write!(f, "shared page mask unavailable"),
            Self::TransportFailure { code, value } => {
                write!(f, "hypercall failed: code {code:#x}, value {value:#x}")
            }
            Self::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            Self::BufferTooSmall { required } => {
                write!(f, "buffer too small: {required} bytes required")
            }
            Self::Overrun {
                requested,
                remaining,
            } => write!(
                f,
                "buffer overrun: {requested} bytes requested, {remaining} bytes remaining"
            ),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceMismatch => write!(f, "unexpected service identifier"),
            Self::ServiceStatus(status) => write!(f, "service status {status:#x}"),
            Self::LengthTooShort(length) => write!(f, "length {length} shorter than headers"),
            Self::LengthExceedsBuffer { length, capacity } => {
                write!(f, "length {length} exceeds buffer of {capacity} bytes")
            }
            Self::VersionMismatch(version) => write!(f, "unsupported message version {version}"),
            Self::UnknownOperation(code) => write!(f, "unknown operation {code}"),
            Self::OperationMismatch { expected, found } => {
                write!(f, "expected operation {expected}, found {found}")
            }
            Self::MessageStatus(status) => write!(f, "message status {status:#x}"),
        }
    }
}
