// SPDX-License-Identifier: Apache-2.0

//! Debug functions

use core::fmt;

use log::{log_enabled, trace, Level};

/// Bytes per dumped row
const ROW_LEN: usize = 32;

/// One row of a hex dump, with a separator after the first 16 bytes
struct HexRow<'a>(&'a [u8]);

impl fmt::Display for HexRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            write!(f, "{byte:02x} ")?;
            if i == 15 {
                write!(f, "|")?;
            }
        }
        Ok(())
    }
}

/// Dumps `data` to the trace log, 32 bytes per row.
///
/// Does nothing unless trace logging is enabled.
pub fn dump_hex(label: &str, data: &[u8]) {
    if !log_enabled!(Level::Trace) {
        return;
    }

    trace!("{} ({} bytes):", label, data.len());
    for (row, chunk) in data.chunks(ROW_LEN).enumerate() {
        trace!("{:04x}: {}", row * ROW_LEN, HexRow(chunk));
    }
}
