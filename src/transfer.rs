// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Moving pixels into textures.

Every transfer has two paths.  The hardware transfer engine (HWTQ) is fast and asynchronous but
only handles a restricted set of shapes, formats and layouts; the software path in [`fallback`]
handles everything.  Each hardware operation is split in two:

* a *prepare* step ([`prepare_upload`], [`prepare_normal_blit`]) checks the engine's
  restrictions and either builds a [`TransferDescriptor`] or returns a [`RejectReason`].
  Preparation does not touch the texture or surface; a rejected transfer was never tried.
* a *submit* step ([`upload`], [`blit`]) queues the descriptor.  A [`TransferError`] means the
  transfer was tried and must be redone in software.

[`upload_texture`] strings the two together with the software path as an ordinary fallback.
*/

pub mod blit;
pub mod descriptor;
pub mod fallback;
pub mod upload;

pub use blit::{BlitRequest, blit, prepare_normal_blit};
pub use descriptor::{TransferDescriptor, TransferMemory, TransferSurface};
pub use fallback::{CodecRequest, PixelCodec, RowCopyCodec, software_upload};
pub use upload::{UploadPath, UploadRequest, prepare_upload, upload, upload_texture};

use crate::context::Context;
use crate::layout::rules::FootprintViolation;
use crate::pixel_formats::PixelFormat;
use crate::sync::{AccessKind, SyncWaitPolicy, poll_until_complete};
use crate::transport::TransportError;

/// Levels narrower or shorter than this trip a transfer engine erratum.
pub const MIN_TRANSFER_DIMENSION: u32 = 4;

/// Largest source row pitch, in bytes, the engine can walk.
pub const MAX_SOURCE_STRIDE: u32 = 1 << 16;

/// Why a transfer cannot run on the hardware engine.  The caller should use software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RejectReason {
    #[error("hardware transfers are disabled")]
    HwtqDisabled,
    #[error("zero-sized level or region")]
    ZeroSize,
    #[error("level is below the engine's minimum dimension")]
    BelowTileGranularity,
    #[error("compressed formats are not supported")]
    CompressedFormat,
    #[error("multi-chunk formats are not supported")]
    MultiChunkFormat,
    #[error("source rows are not a shape the engine copies")]
    UnrecognizedRowLayout,
    #[error("no hardware conversion from {from:?} to {to:?}")]
    UnsupportedConversion { from: PixelFormat, to: PixelFormat },
    #[error("footprint rejected by the destination layout: {0:?}")]
    Footprint(FootprintViolation),
    #[error("footprint rejected by the source layout: {0:?}")]
    SourceFootprint(FootprintViolation),
    #[error("region lies outside the image")]
    OutOfBounds,
    #[error("destination has no device memory yet")]
    NoDeviceMemory,
    #[error("source and destination regions differ in size")]
    ExtentMismatch,
    #[error("source bytes do not cover the region")]
    SourceTooSmall,
}

/// A hardware transfer was tried and failed.  The caller should redo it in software.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The submission failed and the memory involved is idle.
    #[error("transfer submission failed: {0}")]
    Submission(#[from] TransportError),
    /// The submission failed and earlier hardware work on the memory had not finished within the
    /// wait budget.  The software path must wait before writing.
    #[error("transfer submission failed ({0}) and the hardware is still busy")]
    StillBusy(TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Upload,
    Blit,
}

/// Polls the sync objects the descriptor's policy names.  Returns whether they all went idle.
fn wait_per_policy(ctx: &Context, descriptor: &TransferDescriptor<'_>) -> bool {
    let budget = ctx.config().sync_wait_budget;
    let transport = ctx.transport();
    match descriptor.wait {
        SyncWaitPolicy::None => true,
        SyncWaitPolicy::Destination => poll_until_complete(transport, &descriptor.dst_sync, budget),
        SyncWaitPolicy::SourceAndDestination => {
            let dst_idle = poll_until_complete(transport, &descriptor.dst_sync, budget);
            let src_idle = descriptor
                .src_sync
                .as_ref()
                .is_none_or(|src| poll_until_complete(transport, src, budget));
            dst_idle && src_idle
        }
    }
}

/**
Queues `descriptor` on the engine.

Sync modifiers are reserved before submission so the hardware sees the work as pending.  On
failure they are rolled back and the sync objects named by the descriptor's wait policy are
polled, so the caller can hand the transfer to software without racing earlier hardware work.
Never retries.
*/
fn submit(ctx: &Context, descriptor: &TransferDescriptor<'_>, kind: TransferKind) -> Result<(), TransferError> {
    let transport = ctx.transport();
    let mut dst_modifier = transport.create_sync_modifier(&descriptor.dst_sync, AccessKind::Write)?;
    let mut src_modifier = match &descriptor.src_sync {
        Some(src) => Some(transport.create_sync_modifier(src, AccessKind::Read)?),
        None => None,
    };
    let stats = ctx.share_group().stats();
    match transport.submit_transfer(descriptor) {
        Ok(()) => {
            dst_modifier.commit();
            transport.destroy_sync_modifier(dst_modifier);
            if let Some(mut modifier) = src_modifier.take() {
                modifier.commit();
                transport.destroy_sync_modifier(modifier);
            }
            match kind {
                TransferKind::Upload => stats.hardware_upload(),
                TransferKind::Blit => stats.hardware_blit(),
            }
            logwise::trace_sync!(
                "{kind} of {width}x{height} submitted",
                kind = logwise::privacy::LogIt(&kind),
                width = descriptor.dst_rect.width,
                height = descriptor.dst_rect.height
            );
            Ok(())
        }
        Err(e) => {
            transport.destroy_sync_modifier(dst_modifier);
            if let Some(modifier) = src_modifier.take() {
                transport.destroy_sync_modifier(modifier);
            }
            stats.submission_failure();
            logwise::warn_sync!(
                "{kind} submission failed: {error}",
                kind = logwise::privacy::LogIt(&kind),
                error = logwise::privacy::LogIt(&e)
            );
            if wait_per_policy(ctx, descriptor) {
                Err(TransferError::Submission(e))
            } else {
                Err(TransferError::StillBusy(e))
            }
        }
    }
}

/// Counts and logs a rejection.
fn reject(ctx: &Context, reason: RejectReason) -> RejectReason {
    ctx.share_group().stats().rejected();
    logwise::trace_sync!(
        "hardware transfer rejected: {reason}",
        reason = logwise::privacy::LogIt(&reason)
    );
    reason
}
