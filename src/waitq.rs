// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sudog (suspended-operation descriptor) and the per-channel FIFO wait
// queue. A sudog lives on the stack of the blocking call and is linked
// into a channel-owned queue for the duration of one park; the channel
// lock guards every field except the shared select claim word.

use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use crate::sched::{self, Routine};

/// One parked send or receive.
///
/// `elem` is the caller's element buffer: the source for a rendezvous
/// send, the destination for a rendezvous receive, and null for a
/// buffered waiter (which returns to the ring itself after waking).
///
/// `select_done` is null for single-channel operations. For a select,
/// every case's sudog shares one claim word; a waker that dequeues such
/// a sudog must win the 0→1 CAS or treat the sudog as absent.
///
/// `release_time` carries block-profiling state: -1 means "profile me",
/// 0 means "do not profile", >0 is the recorded wake instant.
pub(crate) struct Sudog {
    pub g: Arc<Routine>,
    pub elem: *mut u8,
    pub select_done: *const AtomicU32,
    pub release_time: AtomicI64,
    link: *mut Sudog,
}

impl Sudog {
    pub fn new(g: Arc<Routine>, elem: *mut u8) -> Self {
        Self {
            g,
            elem,
            select_done: ptr::null(),
            release_time: AtomicI64::new(0),
            link: ptr::null_mut(),
        }
    }

    /// Stamp the wake instant if this sudog is being profiled (or was
    /// already stamped once and is waking again after a re-park).
    ///
    /// Safety: `sg` points to a live sudog; the caller either holds the
    /// owning channel's lock or has just dequeued `sg` from its queue.
    pub unsafe fn mark_release(sg: *mut Sudog) {
        if (*sg).release_time.load(Ordering::Relaxed) != 0 {
            (*sg).release_time.store(sched::cputicks(), Ordering::Relaxed);
        }
    }

    /// Record a block-profile event if a waker stamped this sudog.
    pub fn block_event(&self, t0: i64) {
        let rt = self.release_time.load(Ordering::Relaxed);
        if rt > 0 {
            sched::blockevent(rt - t0);
        }
    }
}

/// FIFO queue of sudogs, one per channel per direction.
///
/// Invariants: `first` is null iff the queue is empty; each sudog
/// appears in at most one queue; links are only touched under the
/// owning channel's lock.
pub(crate) struct WaitQ {
    first: *mut Sudog,
    last: *mut Sudog,
}

impl WaitQ {
    pub const fn new() -> Self {
        Self {
            first: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    /// Append at the tail. O(1).
    ///
    /// Safety: caller holds the channel lock; `sg` is live, unlinked,
    /// and stays live until dequeued or removed.
    pub unsafe fn enqueue(&mut self, sg: *mut Sudog) {
        (*sg).link = ptr::null_mut();
        if self.first.is_null() {
            self.first = sg;
            self.last = sg;
            return;
        }
        (*self.last).link = sg;
        self.last = sg;
    }

    /// Pop the oldest still-unclaimed waiter, or null.
    ///
    /// A sudog that belongs to a select carries a shared claim word; if
    /// a sibling case already won it, the sudog is discarded and the
    /// scan continues. O(k) in the number of already-claimed entries.
    ///
    /// Safety: caller holds the channel lock.
    pub unsafe fn dequeue(&mut self) -> *mut Sudog {
        loop {
            let sg = self.first;
            if sg.is_null() {
                return ptr::null_mut();
            }
            self.first = (*sg).link;
            if self.first.is_null() {
                self.last = ptr::null_mut();
            }
            (*sg).link = ptr::null_mut();

            let done = (*sg).select_done;
            if !done.is_null() {
                // claim the right to signal this select
                if (*done).load(Ordering::Acquire) != 0
                    || (*done)
                        .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    continue;
                }
            }
            return sg;
        }
    }

    /// Unlink the sudog owned by `g`, if present. O(n); used only by
    /// select's cleanup pass for cases that did not win.
    ///
    /// Safety: caller holds the channel lock.
    pub unsafe fn remove_routine(&mut self, g: &Routine) {
        let target = g as *const Routine;
        let mut prev: *mut Sudog = ptr::null_mut();
        let mut cur = self.first;
        while !cur.is_null() {
            if Arc::as_ptr(&(*cur).g) == target {
                if prev.is_null() {
                    self.first = (*cur).link;
                } else {
                    (*prev).link = (*cur).link;
                }
                if self.last == cur {
                    self.last = prev;
                }
                (*cur).link = ptr::null_mut();
                return;
            }
            prev = cur;
            cur = (*cur).link;
        }
    }
}

// Safety: queue contents are only touched under the owning channel's
// lock; the raw links carry no thread affinity.
unsafe impl Send for WaitQ {}
