// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-channel lock. A raw spin lock with explicit lock()/unlock() and no
// RAII guard: select's park commit callback must release locks acquired
// by an earlier phase of the algorithm, and the release order (reverse
// lock order) does not nest like scopes do.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::Backoff;

/// A raw spin lock protecting one channel's mutable state.
///
/// Hold times are short (a ring-slot copy plus queue pointer updates),
/// so spinning with [`Backoff`] is preferred over an OS mutex; `snooze`
/// escalates from pause hints to `yield_now` once the spin budget is
/// spent.
pub struct ChanLock {
    lc: AtomicU32,
}

impl ChanLock {
    pub const fn new() -> Self {
        Self {
            lc: AtomicU32::new(0),
        }
    }

    /// Acquire the lock, spinning with escalating backoff.
    pub fn lock(&self) {
        let backoff = Backoff::new();
        while self.lc.swap(1, Ordering::Acquire) != 0 {
            backoff.snooze();
        }
    }

    /// Release the lock. The caller must currently hold it; this is not
    /// checked.
    pub fn unlock(&self) {
        self.lc.store(0, Ordering::Release);
    }
}

impl Default for ChanLock {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: the lock word is the only state and is accessed atomically.
unsafe impl Send for ChanLock {}
unsafe impl Sync for ChanLock {}
