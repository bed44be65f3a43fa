// SPDX-License-Identifier: Apache-2.0

//! Guest-side transport for vTPM messages over the TDVMCALL service interface
//!
//! `vtpm-transport` carries opaque security-protocol messages (for example SPDM-wrapped TPM
//! command and response blocks) from a confidential-computing guest to a vTPM service running
//! outside of the guest's trust boundary. Every message crosses the boundary in exactly one
//! synchronous [`Hypercall`](platform::Hypercall) that references two pages of memory the guest
//! has explicitly shared with the host.
//!
//! # Mechanism of action
//!
//! Each [`Transport::write`] or [`Transport::read`] runs through the same steps:
//!
//! 1. acquire a command and a response [`SharedBuffer`](shared::SharedBuffer)
//! 2. build the command frame and pre-fill the response skeleton
//! 3. issue the call with both buffer addresses tagged with the shared-page mask
//! 4. validate the response frame, outer layer first
//! 5. copy the payload out (read only) and release both buffers
//!
//! The buffers are released on every exit path. Nothing persists between two calls.
//!
//! # Frame format
//!
//! All fields are little-endian and byte-packed.
//!
//! A command frame consists of:
//!
//! * `guid`: `[u8; 16]` - the vTPM service identifier
//! * `length`: `u32` - the number of bytes in the frame, including this header
//! * `reserved`: `u32`
//! * `version`: `u8` - the message version, currently `0`
//! * `command`: `u8` - `1` to send a message, `2` to receive one
//! * `reserved`: `u16`
//! * `data`: `...` - the message to send (send only)
//!
//! A response frame consists of:
//!
//! * `guid`: `[u8; 16]` - the vTPM service identifier
//! * `length`: `u32` - on entry the buffer capacity, on return the number of bytes written
//! * `status`: `u32` - the service status, `0` on success
//! * `version`: `u8`
//! * `command`: `u8` - echo of the requested command
//! * `status`: `u8` - the message status, `0` on success
//! * `reserved`: `u8`
//! * `data`: `...` - the received message (receive only)

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod debug;
pub mod error;
pub mod frame;
pub mod host;
pub mod hypercall;
pub mod platform;
pub mod shared;
#[cfg(all(target_arch = "x86_64", feature = "tdx"))]
pub mod tdx;
pub mod transport;

#[cfg(test)]
mod mock;

pub use config::TransportConfig;
pub use error::{Error, ProtocolError, Result};
pub use frame::Operation;
pub use platform::{Hypercall, SharedMemory};
pub use transport::Transport;

use primordial::Page;

/// Size of a guest page in bytes
pub const PAGE_SIZE: usize = Page::SIZE;

/// Timeout for a single call in milliseconds, as used by the reference firmware
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Combined size of the outer and the inner envelope in bytes
pub const HEADER_LEN: usize = frame::HEADER_LEN;

/// Maximum message length a single call can carry with buffers of `pages` pages
#[inline]
pub const fn max_payload(pages: usize) -> usize {
    pages.saturating_mul(PAGE_SIZE).saturating_sub(HEADER_LEN)
}
