// SPDX-License-Identifier: Apache-2.0

//! Intel TDX guest support
//!
//! The service call is `TDG.VP.VMCALL<Service>`, issued with the `tdcall`
//! instruction. The shared bit is the topmost bit of the guest physical
//! address width reported by `TDG.VP.INFO`.

use crate::platform::Hypercall;

use core::arch::asm;

use x86_64::PhysAddr;

/// `TDG.VP.VMCALL` leaf
const TDG_VP_VMCALL: u64 = 0;

/// `TDG.VP.INFO` leaf
const TDG_VP_INFO: u64 = 1;

/// `TDG.VP.VMCALL` sub-function for service requests
const TDVMCALL_SERVICE: u64 = 0x10005;

/// Registers passed through to the VMM: R10 to R15
const TDVMCALL_EXPOSED_REGS: u64 = 0xfc00;

/// The `tdcall` instruction
macro_rules! tdcall {
    ($($operands:tt)*) => {
        asm!(".byte 0x66, 0x0f, 0x01, 0xcc", $($operands)*)
    };
}

/// The shared-page mask for a guest physical address width of `gpaw` bits
///
/// Returns `0` for a width the TDX module never reports.
#[inline]
pub const fn shared_mask_from_gpaw(gpaw: u64) -> u64 {
    match gpaw {
        48 | 52 => 1 << (gpaw - 1),
        _ => 0,
    }
}

/// [`Hypercall`] implementation for a TDX guest
#[derive(Copy, Clone, Debug, Default)]
pub struct Tdx;

impl Tdx {
    /// The guest physical address width, `None` if the TDX module refused the request
    pub fn gpaw(&self) -> Option<u64> {
        let status: u64;
        let rcx: u64;

        // SAFETY: `TDG.VP.INFO` only reads guest state and writes the output registers
        unsafe {
            tdcall!(
                inout("rax") TDG_VP_INFO => status,
                out("rcx") rcx,
                out("rdx") _,
                out("r8") _,
                out("r9") _,
                out("r10") _,
                out("r11") _,
                options(nostack)
            );
        }

        (status == 0).then_some(rcx & 0x3f)
    }
}

impl Hypercall for Tdx {
    fn shared_page_mask(&self) -> u64 {
        self.gpaw().map_or(0, shared_mask_from_gpaw)
    }

    unsafe fn service(
        &self,
        command: PhysAddr,
        response: PhysAddr,
        notify_vector: u64,
        timeout_ms: u64,
    ) -> (u64, u64) {
        let status: u64;
        let code: u64;
        let value: u64;

        tdcall!(
            inout("rax") TDG_VP_VMCALL => status,
            inout("rcx") TDVMCALL_EXPOSED_REGS => _,
            inout("r10") 0u64 => code,
            inout("r11") TDVMCALL_SERVICE => value,
            inout("r12") command.as_u64() => _,
            inout("r13") response.as_u64() => _,
            inout("r14") notify_vector => _,
            inout("r15") timeout_ms => _,
            options(nostack)
        );

        if status != 0 {
            return (status, 0);
        }

        (code, value)
    }
}
