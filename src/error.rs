// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Errors surfaced by lifecycle, completeness and texture operations.
//!
//! Completeness failures are not errors; they are [`crate::framebuffer::FrameBufferStatus`]
//! values.  Transfer rejection and submission failure have their own types in
//! [`crate::transfer`].

use crate::pixel_formats::PixelFormat;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Device memory for a surface or texture could not be allocated.
    #[error("out of device memory allocating {what}")]
    OutOfMemory { what: &'static str },
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A level was used before the API layer specified its contents.
    #[error("face {face} level {level} has not been specified")]
    LevelNotSpecified { face: u32, level: u32 },
    /// A region does not fit its level, or the source bytes do not cover it.
    #[error("region does not fit face {face} level {level}")]
    InvalidRegion { face: u32, level: u32 },
    /// The pixel codec cannot convert between the two formats.
    #[error("no conversion from {from:?} to {to:?}")]
    UnsupportedConversion { from: PixelFormat, to: PixelFormat },
    /// The hardware did not release a resource within the wait budget.
    #[error("hardware still busy with the resource")]
    HardwareBusy,
    /// An internal invariant did not hold.  Debug builds assert before this is returned.
    #[error("internal inconsistency: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Maps a transport allocation failure to [`Error::OutOfMemory`], keeping other failures as is.
    pub(crate) fn from_allocation(error: TransportError, what: &'static str) -> Error {
        match error {
            TransportError::OutOfMemory { .. } => Error::OutOfMemory { what },
            other => Error::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_failures_become_out_of_memory() {
        assert_eq!(
            Error::from_allocation(TransportError::OutOfMemory { bytes: 16 }, "render surface"),
            Error::OutOfMemory { what: "render surface" }
        );
        assert_eq!(
            Error::from_allocation(TransportError::DeviceLost, "render surface"),
            Error::Transport(TransportError::DeviceLost)
        );
    }
}
