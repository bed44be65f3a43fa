// SPDX-License-Identifier: Apache-2.0

//! Platform-specific functionality.
//!
//! The transport does not allocate memory, touch page tables or execute
//! privileged instructions itself. The embedding firmware provides these
//! through [`SharedMemory`] and [`Hypercall`].

use core::ptr::NonNull;

use x86_64::PhysAddr;

/// Page allocation and the host-shared page attribute.
///
/// # Safety
///
/// Implementors must guarantee that a region returned by
/// [`allocate_pages`](SharedMemory::allocate_pages):
/// * is aligned to [`PAGE_SIZE`](crate::PAGE_SIZE) and spans `pages * PAGE_SIZE` bytes
/// * is readable and writable and not borrowed by anything else
/// * stays valid until it is passed to [`free_pages`](SharedMemory::free_pages)
pub unsafe trait SharedMemory {
    /// Allocates `pages` contiguous pages, `None` if out of memory.
    fn allocate_pages(&self, pages: usize) -> Option<NonNull<u8>>;

    /// Returns `pages` pages at `base` to the allocator.
    ///
    /// # Safety
    /// `base` and `pages` must describe exactly one live allocation, which is private.
    unsafe fn free_pages(&self, base: NonNull<u8>, pages: usize);

    /// Makes `pages` pages at `base` accessible to the host.
    ///
    /// Returns the raw platform status on failure.
    ///
    /// # Safety
    /// The region must be owned by the caller. Its contents are undefined afterwards.
    unsafe fn set_shared(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64>;

    /// Revokes host access to `pages` pages at `base`.
    ///
    /// Returns the raw platform status on failure.
    ///
    /// # Safety
    /// The region must be owned by the caller and not be in use by the host.
    unsafe fn set_private(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64>;

    /// Guest physical address of `base`
    ///
    /// Defaults to an identity mapping.
    #[inline]
    fn physical_address(&self, base: NonNull<u8>) -> u64 {
        base.as_ptr() as u64
    }
}

/// The synchronous cross-boundary service call.
pub trait Hypercall {
    /// The address bit marking a guest physical address as shared, `0` if unknown.
    fn shared_page_mask(&self) -> u64;

    /// Issues one service call and blocks until the host answered or `timeout_ms` elapsed.
    ///
    /// `command` and `response` are tagged with the shared-page mask.
    /// Returns the raw `(return code, return value)` pair.
    ///
    /// # Safety
    /// Both addresses must refer to shared buffers owned by the caller for
    /// the whole duration of the call. The host may write anywhere into the
    /// response buffer.
    unsafe fn service(
        &self,
        command: PhysAddr,
        response: PhysAddr,
        notify_vector: u64,
        timeout_ms: u64,
    ) -> (u64, u64);
}

// SAFETY: forwards to `T`, which upholds the contract.
unsafe impl<T: SharedMemory + ?Sized> SharedMemory for &T {
    #[inline]
    fn allocate_pages(&self, pages: usize) -> Option<NonNull<u8>> {
        (**self).allocate_pages(pages)
    }

    #[inline]
    unsafe fn free_pages(&self, base: NonNull<u8>, pages: usize) {
        (**self).free_pages(base, pages)
    }

    #[inline]
    unsafe fn set_shared(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64> {
        (**self).set_shared(base, pages)
    }

    #[inline]
    unsafe fn set_private(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64> {
        (**self).set_private(base, pages)
    }

    #[inline]
    fn physical_address(&self, base: NonNull<u8>) -> u64 {
        (**self).physical_address(base)
    }
}

impl<T: Hypercall + ?Sized> Hypercall for &T {
    #[inline]
    fn shared_page_mask(&self) -> u64 {
        (**self).shared_page_mask()
    }

    #[inline]
    unsafe fn service(
        &self,
        command: PhysAddr,
        response: PhysAddr,
        notify_vector: u64,
        timeout_ms: u64,
    ) -> (u64, u64) {
        (**self).service(command, response, notify_vector, timeout_ms)
    }
}
