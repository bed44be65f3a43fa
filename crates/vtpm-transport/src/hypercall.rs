// SPDX-License-Identifier: Apache-2.0

//! The service call across the trust boundary

use crate::error::{Error, Result};
use crate::platform::Hypercall;

use core::sync::atomic::{compiler_fence, Ordering};

use log::{debug, error};
use x86_64::PhysAddr;

/// Tags `address` with the shared-page `mask`.
#[inline]
fn tag(address: u64, mask: u64) -> Result<PhysAddr> {
    PhysAddr::try_new(address | mask).map_err(|_| {
        error!("address {:#x} not expressible with mask {:#x}", address, mask);
        Error::InvalidArgument
    })
}

/// Issues one service call with the command and response buffers at the
/// guest physical addresses `command` and `response`.
///
/// The shared-page mask is queried before the call. A mask of zero fails with
/// [`Error::SharedMaskUnavailable`] and the call is never issued. Any nonzero
/// return code or return value fails the whole call, the raw values are passed
/// on in [`Error::TransportFailure`] without further interpretation.
///
/// # Safety
/// `command` and `response` must be the addresses of shared buffers owned by
/// the caller, which are not accessed by the guest until this function returns.
pub unsafe fn invoke<H: Hypercall + ?Sized>(
    hypercall: &H,
    command: u64,
    response: u64,
    notify_vector: u64,
    timeout_ms: u64,
) -> Result<()> {
    let mask = hypercall.shared_page_mask();
    if mask == 0 {
        error!("shared page mask unavailable");
        return Err(Error::SharedMaskUnavailable);
    }

    let command = tag(command, mask)?;
    let response = tag(response, mask)?;

    debug!(
        "service call: command {:#x}, response {:#x}, timeout {} ms",
        command.as_u64(),
        response.as_u64(),
        timeout_ms
    );

    // prevent earlier writes from being moved beyond this point
    compiler_fence(Ordering::Release);

    let (code, value) = hypercall.service(command, response, notify_vector, timeout_ms);

    // prevent later reads from being moved before this point
    compiler_fence(Ordering::Acquire);

    if code != 0 || value != 0 {
        error!("service call failed: code {:#x}, value {:#x}", code, value);
        return Err(Error::TransportFailure { code, value });
    }

    Ok(())
}
