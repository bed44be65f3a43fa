// SPDX-License-Identifier: Apache-2.0

//! Transport configuration

use crate::error::{Error, Result};
use crate::PAGE_SIZE;

use const_default::ConstDefault;

/// Configuration of a [`Transport`](crate::Transport)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Number of pages backing each of the command and the response buffer
    pub pages: usize,
    /// Interrupt vector the host may use to signal completion, `0` for none
    pub notify_vector: u64,
}

impl ConstDefault for TransportConfig {
    const DEFAULT: Self = Self {
        pages: 1,
        notify_vector: 0,
    };
}

impl Default for TransportConfig {
    fn default() -> Self {
        <Self as ConstDefault>::DEFAULT
    }
}

impl TransportConfig {
    /// Use buffers of `pages` pages
    #[inline]
    pub const fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    /// Ask the host to signal completion on `vector`
    #[inline]
    pub const fn with_notify_vector(mut self, vector: u64) -> Self {
        self.notify_vector = vector;
        self
    }

    /// Size of each buffer in bytes
    #[inline]
    pub const fn buffer_size(&self) -> usize {
        self.pages.saturating_mul(PAGE_SIZE)
    }

    /// Checks that the buffers can be allocated and described by the 32-bit length field
    pub fn validate(&self) -> Result<()> {
        let size = self
            .pages
            .checked_mul(PAGE_SIZE)
            .ok_or(Error::InvalidArgument)?;

        if self.pages == 0 || u32::try_from(size).is_err() {
            return Err(Error::InvalidArgument);
        }

        Ok(())
    }
}
