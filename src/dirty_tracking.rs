// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Dirty flags shared between a producer and late-bound observers.

The completeness engine marks a framebuffer's drawable parameters dirty whenever it resolves
them; the rendering-parameter cache holds a [`DirtyReceiver`] and re-reads the parameters the
next time it sees the flag set.

This differs from a channel as each resource can freely flip its own flag between clean and
dirty, and a receiver can be created at any time after the sender.
*/

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
struct SharedDirty {
    dirty: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct DirtySender {
    shared: Arc<SharedDirty>,
}

impl DirtySender {
    pub fn new(dirty: bool) -> Self {
        DirtySender {
            shared: Arc::new(SharedDirty {
                dirty: AtomicBool::new(dirty),
            }),
        }
    }

    pub fn mark_dirty(&self, dirty: bool) {
        self.shared.dirty.store(dirty, Ordering::Release);
    }

    pub fn receiver(&self) -> DirtyReceiver {
        DirtyReceiver::new(self)
    }
}

#[derive(Debug)]
pub struct DirtyReceiver {
    shared: Arc<SharedDirty>,
}

impl DirtyReceiver {
    pub fn new(sender: &DirtySender) -> DirtyReceiver {
        DirtyReceiver {
            shared: sender.shared.clone(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    /// Returns whether the flag was set, clearing it.
    pub fn take_dirty(&self) -> bool {
        self.shared.dirty.swap(false, Ordering::AcqRel)
    }
}

impl PartialEq for DirtyReceiver {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
impl Eq for DirtyReceiver {}

impl Hash for DirtyReceiver {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.shared).hash(state);
    }
}
