// SPDX-License-Identifier: Apache-2.0

//! Buffers shared with the host for the duration of one call

use crate::error::{Error, Result};
use crate::platform::SharedMemory;
use crate::PAGE_SIZE;

use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use core::slice;

use log::{debug, error};

/// A page-aligned buffer the host can access
///
/// The pages are marked shared on [`acquire`](Self::acquire) and reverted to
/// private before they go back to the allocator, either by an explicit
/// [`release`](Self::release) or when the buffer is dropped.
pub struct SharedBuffer<'m, M: SharedMemory + ?Sized> {
    memory: &'m M,
    base: NonNull<u8>,
    pages: usize,
}

impl<M: SharedMemory + ?Sized> core::fmt::Debug for SharedBuffer<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("base", &self.base)
            .field("pages", &self.pages)
            .finish()
    }
}

impl<'m, M: SharedMemory + ?Sized> SharedBuffer<'m, M> {
    /// Allocates `pages` pages and shares them with the host.
    ///
    /// If the pages cannot be shared they are freed again,
    /// a partially shared buffer is never returned.
    pub fn acquire(memory: &'m M, pages: usize) -> Result<Self> {
        let len = pages.checked_mul(PAGE_SIZE).ok_or(Error::InvalidArgument)?;

        if pages == 0 {
            return Err(Error::InvalidArgument);
        }

        let base = memory.allocate_pages(pages).ok_or_else(|| {
            error!("failed to allocate {} pages", pages);
            Error::OutOfMemory
        })?;

        // SAFETY: the pages were just allocated and are owned by us
        if let Err(code) = unsafe { memory.set_shared(base, pages) } {
            error!("failed to share {:p}: {:#x}", base, code);
            // SAFETY: the pages are still private and nothing else refers to them
            unsafe { memory.free_pages(base, pages) };
            return Err(Error::PlatformRejection(code));
        }

        // SAFETY: the allocation spans `len` bytes, see `SharedMemory`
        unsafe { base.as_ptr().write_bytes(0, len) };

        debug!("shared {} pages at {:p}", pages, base);

        Ok(Self {
            memory,
            base,
            pages,
        })
    }

    /// Reverts the pages to private and frees them.
    ///
    /// If the pages cannot be made private they stay allocated,
    /// because the host may still access them.
    pub fn release(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never used again
        unsafe { release_raw(this.memory, this.base.as_ptr(), this.pages) }
    }

    /// Number of pages
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    /// Always `false`, a buffer spans at least one page
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Guest physical address of the first byte
    #[inline]
    pub fn physical_address(&self) -> u64 {
        self.memory.physical_address(self.base)
    }

    /// The buffer contents
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation spans `len` bytes and is exclusively owned by `self`
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len()) }
    }

    /// The mutable buffer contents
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the allocation spans `len` bytes and is exclusively owned by `self`
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len()) }
    }
}

impl<M: SharedMemory + ?Sized> Drop for SharedBuffer<'_, M> {
    fn drop(&mut self) {
        // SAFETY: `self` is never used again
        if let Err(e) = unsafe { release_raw(self.memory, self.base.as_ptr(), self.pages) } {
            error!("failed to release shared buffer: {}", e);
        }
    }
}

/// Reverts `pages` pages at `base` to private and frees them.
///
/// Fails with [`Error::InvalidArgument`] for a null `base` or zero `pages`.
/// The pages are freed only if they could be made private, otherwise the
/// platform status is returned and the pages remain allocated.
///
/// # Safety
/// `base` and `pages` must describe a live shared allocation of `memory`,
/// which is not used afterwards.
pub unsafe fn release_raw<M: SharedMemory + ?Sized>(
    memory: &M,
    base: *mut u8,
    pages: usize,
) -> Result<()> {
    let base = NonNull::new(base).ok_or(Error::InvalidArgument)?;

    if pages == 0 {
        return Err(Error::InvalidArgument);
    }

    if let Err(code) = memory.set_private(base, pages) {
        error!("failed to unshare {:p}: {:#x}, leaking {} pages", base, code, pages);
        return Err(Error::PlatformRejection(code));
    }

    memory.free_pages(base, pages);
    debug!("released {} pages at {:p}", pages, base);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;

    #[test]
    fn acquire_release() {
        let host = MockHost::new();

        let buffer = SharedBuffer::acquire(&host, 2).unwrap();
        assert_eq!(buffer.len(), 2 * PAGE_SIZE);
        assert_eq!(buffer.physical_address() % PAGE_SIZE as u64, 0);
        assert!(buffer.as_slice().iter().all(|b| *b == 0));
        assert_eq!(host.live_allocations(), 1);
        assert_eq!(host.shared_pages(), 2);

        buffer.release().unwrap();
        assert_eq!(host.live_allocations(), 0);
        assert_eq!(host.shared_pages(), 0);
    }

    #[test]
    fn drop_releases() {
        let host = MockHost::new();

        {
            let mut buffer = SharedBuffer::acquire(&host, 1).unwrap();
            buffer.as_mut_slice()[0] = 0xaa;
            assert_eq!(host.shared_pages(), 1);
        }

        assert_eq!(host.live_allocations(), 0);
        assert_eq!(host.shared_pages(), 0);
    }

    #[test]
    fn zero_pages() {
        let host = MockHost::new();
        assert_eq!(
            SharedBuffer::acquire(&host, 0).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(host.allocations_made(), 0);
    }

    #[test]
    fn out_of_memory() {
        let host = MockHost::new();
        host.fail_allocation_after(0);
        assert_eq!(
            SharedBuffer::acquire(&host, 1).unwrap_err(),
            Error::OutOfMemory
        );
    }

    #[test]
    fn share_rejected_frees_pages() {
        let host = MockHost::new();
        host.reject_share(0xc000_0001);

        assert_eq!(
            SharedBuffer::acquire(&host, 1).unwrap_err(),
            Error::PlatformRejection(0xc000_0001)
        );
        assert_eq!(host.allocations_made(), 1);
        assert_eq!(host.live_allocations(), 0);
        assert_eq!(host.shared_pages(), 0);
    }

    #[test]
    fn unshare_rejected_keeps_pages() {
        let host = MockHost::new();
        let buffer = SharedBuffer::acquire(&host, 1).unwrap();

        host.reject_unshare(7);
        assert_eq!(buffer.release(), Err(Error::PlatformRejection(7)));
        assert_eq!(host.live_allocations(), 1);
        assert_eq!(host.shared_pages(), 1);
    }

    #[test]
    fn release_raw_arguments() {
        let host = MockHost::new();

        assert_eq!(
            unsafe { release_raw(&host, core::ptr::null_mut(), 1) },
            Err(Error::InvalidArgument)
        );

        let buffer = ManuallyDrop::new(SharedBuffer::acquire(&host, 1).unwrap());
        let base = buffer.base.as_ptr();
        assert_eq!(
            unsafe { release_raw(&host, base, 0) },
            Err(Error::InvalidArgument)
        );
        assert_eq!(host.live_allocations(), 1);

        assert_eq!(unsafe { release_raw(&host, base, 1) }, Ok(()));
        assert_eq!(host.live_allocations(), 0);
    }
}
