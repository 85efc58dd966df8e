// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Sync objects: producer/consumer counters tracking hardware access to a resource.
//!
//! Every texture and render surface owns one [`SyncObject`].  Submitting hardware work that
//! touches the resource bumps a *pending* counter; the transport bumps the matching *complete*
//! counter once the hardware is done.  The resource is idle when every pending count has been
//! matched.
//!
//! Nothing here blocks.  Waiting is done by polling [`Transport::query_transfer_complete`]
//! against a deadline ([`poll_until_complete`]), so abandoning a wait is just not polling again.
//!
//! [`Transport::query_transfer_complete`]: crate::transport::Transport::query_transfer_complete

use crate::sys::time::{Duration, Instant};
use crate::transport::Transport;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Kind of hardware access a counter pair tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

/// Result of a completion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Complete,
    Pending,
}

/// Which sync objects a transfer must observe before the CPU touches its memory again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncWaitPolicy {
    /// Fire and forget.
    None,
    Destination,
    SourceAndDestination,
}

#[derive(Default)]
pub struct SyncObject {
    write_ops_pending: AtomicU32,
    write_ops_complete: AtomicU32,
    read_ops_pending: AtomicU32,
    read_ops_complete: AtomicU32,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncCounters {
    pub write_ops_pending: u32,
    pub write_ops_complete: u32,
    pub read_ops_pending: u32,
    pub read_ops_complete: u32,
}

impl SyncObject {
    pub fn new() -> Arc<Self> {
        Arc::new(SyncObject::default())
    }

    fn counters(&self, access: AccessKind) -> (&AtomicU32, &AtomicU32) {
        match access {
            AccessKind::Read => (&self.read_ops_pending, &self.read_ops_complete),
            AccessKind::Write => (&self.write_ops_pending, &self.write_ops_complete),
        }
    }

    /// Records that hardware work of kind `access` has been queued.
    pub fn begin(&self, access: AccessKind) {
        self.counters(access).0.fetch_add(1, Ordering::AcqRel);
    }

    /// Records that one queued operation of kind `access` finished.  Called by transports.
    pub fn retire(&self, access: AccessKind) {
        let (pending, complete) = self.counters(access);
        let retired = complete.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            retired <= pending.load(Ordering::Acquire),
            "retired more {access:?} operations than were queued"
        );
    }

    /// Withdraws an operation that was queued but never reached the hardware.
    pub(crate) fn rollback(&self, access: AccessKind) {
        let (pending, _) = self.counters(access);
        let previous = pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "rolled back a {access:?} operation that was never queued");
    }

    pub fn is_complete(&self, access: AccessKind) -> bool {
        let (pending, complete) = self.counters(access);
        complete.load(Ordering::Acquire) >= pending.load(Ordering::Acquire)
    }

    /// Whether every queued read and write has finished.
    pub fn is_idle(&self) -> bool {
        self.is_complete(AccessKind::Write) && self.is_complete(AccessKind::Read)
    }

    pub fn snapshot(&self) -> SyncCounters {
        SyncCounters {
            write_ops_pending: self.write_ops_pending.load(Ordering::Acquire),
            write_ops_complete: self.write_ops_complete.load(Ordering::Acquire),
            read_ops_pending: self.read_ops_pending.load(Ordering::Acquire),
            read_ops_complete: self.read_ops_complete.load(Ordering::Acquire),
        }
    }
}

impl Debug for SyncObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncObject")
            .field("counters", &self.snapshot())
            .finish()
    }
}

/**
A reservation of one pending operation on a sync object.

Created before a transfer is submitted so the hardware sees the operation as queued.  If the
submission goes through the modifier is [committed](SyncModifier::commit) and the pending count
stays advanced until the transport retires it; a modifier released without commit rolls the
count back, leaving the sync object exactly as it was.
*/
#[derive(Debug)]
#[must_use = "a sync modifier must be committed or released"]
pub struct SyncModifier {
    sync: Arc<SyncObject>,
    access: AccessKind,
    committed: bool,
}

impl SyncModifier {
    pub fn reserve(sync: &Arc<SyncObject>, access: AccessKind) -> Self {
        sync.begin(access);
        SyncModifier {
            sync: sync.clone(),
            access,
            committed: false,
        }
    }

    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn access(&self) -> AccessKind {
        self.access
    }

    pub fn sync(&self) -> &Arc<SyncObject> {
        &self.sync
    }

    /// Ends the reservation, rolling the counter back unless it was committed.
    pub fn release(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.committed {
            self.sync.rollback(self.access);
            //never roll back twice
            self.committed = true;
        }
    }
}

impl Drop for SyncModifier {
    fn drop(&mut self) {
        self.finish();
    }
}

/**
Polls `sync` through the transport until it is idle or `budget` has elapsed.

Returns whether the sync object was idle when polling stopped.  This is the only wait in the
crate; it spins rather than parking because the hardware signals completion by counter, not by
any OS primitive.
*/
pub fn poll_until_complete(transport: &dyn Transport, sync: &SyncObject, budget: Duration) -> bool {
    if transport.query_transfer_complete(sync, false) == SyncStatus::Complete {
        return true;
    }
    let _interval = logwise::perfwarn_begin!("poll_until_complete");
    let deadline = Instant::now() + budget;
    loop {
        if transport.query_transfer_complete(sync, true) == SyncStatus::Complete {
            return true;
        }
        if Instant::now() >= deadline {
            logwise::warn_sync!(
                "sync object still busy after wait budget: {counters}",
                counters = logwise::privacy::LogIt(&sync.snapshot())
            );
            return false;
        }
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_idle() {
        let sync = SyncObject::new();
        assert!(sync.is_idle());
        sync.begin(AccessKind::Write);
        assert!(!sync.is_idle());
        assert!(sync.is_complete(AccessKind::Read));
        sync.retire(AccessKind::Write);
        assert!(sync.is_idle());
    }

    #[test]
    fn uncommitted_modifier_rolls_back() {
        let sync = SyncObject::new();
        let before = sync.snapshot();
        let modifier = SyncModifier::reserve(&sync, AccessKind::Write);
        assert_eq!(sync.snapshot().write_ops_pending, 1);
        modifier.release();
        assert_eq!(sync.snapshot(), before);
    }

    #[test]
    fn committed_modifier_keeps_counter_advanced() {
        let sync = SyncObject::new();
        let mut modifier = SyncModifier::reserve(&sync, AccessKind::Read);
        modifier.commit();
        drop(modifier);
        assert_eq!(sync.snapshot().read_ops_pending, 1);
        assert!(!sync.is_idle());
    }
}
