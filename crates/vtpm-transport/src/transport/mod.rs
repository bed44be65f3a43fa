// SPDX-License-Identifier: Apache-2.0

//! Write and read entry points


use crate::config::TransportConfig;
use crate::debug::dump_hex;
use crate::error::{Error, Result};
use crate::frame::{build_command, parse_response, prepare_response_skeleton, Operation, HEADER_LEN};
use crate::hypercall;
use crate::platform::{Hypercall, SharedMemory};
use crate::shared::SharedBuffer;

use log::{debug, error};

/// Carries vTPM messages across the trust boundary
///
/// Every [`write`](Self::write) and [`read`](Self::read) is one self-contained
/// call: two shared buffers are acquired, exchanged with the host and
/// released again before returning, whatever the outcome. A `Transport` holds
/// no state between calls besides its configuration, and it does no locking.
/// Callers on multiple execution contexts must serialize access themselves.
#[derive(Debug)]
pub struct Transport<M, H> {
    memory: M,
    hypercall: H,
    config: TransportConfig,
}

impl<M: SharedMemory, H: Hypercall> Transport<M, H> {
    /// Creates a new transport
    ///
    /// Fails with [`Error::InvalidArgument`] if `config` does not describe a
    /// usable buffer size.
    pub fn new(memory: M, hypercall: H, config: TransportConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            memory,
            hypercall,
            config,
        })
    }

    /// The configuration in use
    #[inline]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Largest message a single call can carry
    #[inline]
    pub fn max_payload(&self) -> usize {
        crate::max_payload(self.config.pages)
    }

    /// Delivers `payload` to the vTPM.
    ///
    /// Succeeds once the host acknowledged the message on both layers.
    /// A payload longer than [`max_payload`](Self::max_payload) fails with
    /// [`Error::Overrun`] before the host is called.
    pub fn write(&self, payload: &[u8], timeout_ms: u64) -> Result<()> {
        debug!("vTPM send: {} bytes", payload.len());
        self.call(Operation::Send, payload, timeout_ms, |_| Ok(()))
    }

    /// Retrieves the pending vTPM message into `dest`.
    ///
    /// Returns the length of the message, which is copied to the start of `dest`.
    /// If the message does not fit, nothing is copied and
    /// [`Error::BufferTooSmall`] reports the length needed to retry.
    pub fn read(&self, dest: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let received = self.call(Operation::Receive, &[], timeout_ms, |message| {
            if message.len() > dest.len() {
                error!(
                    "vTPM message of {} bytes exceeds destination of {} bytes",
                    message.len(),
                    dest.len()
                );
                return Err(Error::BufferTooSmall {
                    required: message.len(),
                });
            }

            dest[..message.len()].copy_from_slice(message);
            Ok(message.len())
        })?;

        debug!("vTPM receive: {} bytes", received);
        Ok(received)
    }

    /// Runs one complete call for `operation` and hands the received message to `accept`.
    fn call<T>(
        &self,
        operation: Operation,
        payload: &[u8],
        timeout_ms: u64,
        accept: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let mut command = SharedBuffer::acquire(&self.memory, self.config.pages)?;
        let mut response = SharedBuffer::acquire(&self.memory, self.config.pages)?;

        let outcome = self
            .exchange(operation, payload, timeout_ms, &mut command, &mut response)
            .and_then(accept);

        let command = command.release();
        let response = response.release();

        match outcome {
            // release failures were logged, the first error is reported
            Err(e) => Err(e),
            Ok(value) => {
                command?;
                response?;
                Ok(value)
            }
        }
    }

    fn exchange<'r>(
        &self,
        operation: Operation,
        payload: &[u8],
        timeout_ms: u64,
        command: &mut SharedBuffer<'_, M>,
        response: &'r mut SharedBuffer<'_, M>,
    ) -> Result<&'r [u8]> {
        let len = build_command(command.as_mut_slice(), operation, payload)?;
        prepare_response_skeleton(response.as_mut_slice(), operation)?;

        dump_hex("vTPM command", &command.as_slice()[..len]);

        // SAFETY: both buffers are shared, owned by this call and not touched until it returns
        unsafe {
            hypercall::invoke(
                &self.hypercall,
                command.physical_address(),
                response.physical_address(),
                self.config.notify_vector,
                timeout_ms,
            )?;
        }

        let frame = response.as_slice();
        let message = parse_response(frame, operation);

        let shown = message.map_or(HEADER_LEN, |message| HEADER_LEN + message.len());
        dump_hex("vTPM response", &frame[..shown]);

        message
    }
}
