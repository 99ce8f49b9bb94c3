// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Scheduler contract consumed by the channel core: current-routine
// lookup, park with a commit callback, ready, the per-routine wake
// token, and the runtime utilities (fastrand, cputicks, safepoint
// yield, block profiling).
//
// Routines are OS threads. Every thread that touches a channel is
// lazily registered on first use; parking is token-based over
// `std::thread::park`, so a wakeup that lands between the commit
// callback and the OS-level park is never lost.

use std::cell::Cell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::Instant;

/// One routine: an OS thread registered with the channel runtime.
///
/// The `wake_param` word is the wake token: a waker that hands off data
/// stores the winning sudog's address in it before calling [`ready`];
/// a close stores 0. The parker reads it after waking to tell the two
/// apart.
pub struct Routine {
    thread: Thread,
    permit: AtomicBool,
    wake_param: AtomicUsize,
}

impl Routine {
    pub(crate) fn set_wake_param(&self, param: usize) {
        self.wake_param.store(param, Ordering::Relaxed);
    }

    pub(crate) fn wake_param(&self) -> usize {
        self.wake_param.load(Ordering::Relaxed)
    }
}

thread_local! {
    static CURRENT: Arc<Routine> = Arc::new(Routine {
        thread: thread::current(),
        permit: AtomicBool::new(false),
        wake_param: AtomicUsize::new(0),
    });

    static RNG: Cell<u64> = Cell::new(rng_seed());
}

/// The routine bound to the calling thread, registering it on first use.
pub fn current() -> Arc<Routine> {
    CURRENT.with(Arc::clone)
}

/// Suspend the current routine.
///
/// `commit` runs after the caller has published its waiter and before
/// the routine becomes observably parked; channel code uses it to
/// release the channel lock(s). A [`ready`] that arrives at any point
/// after `commit` starts is honored: the parker loops on its permit, so
/// neither an early wakeup nor a spurious OS unpark is lost.
pub fn park(commit: impl FnOnce(), reason: &str) {
    let g = current();
    log::trace!("park: {reason}");
    commit();
    while !g.permit.swap(false, Ordering::Acquire) {
        thread::park();
    }
}

/// Suspend the current routine with no way to wake it.
pub fn park_forever(reason: &str) -> ! {
    log::trace!("park forever: {reason}");
    loop {
        thread::park();
    }
}

/// Mark a parked routine runnable.
///
/// The permit is granted before the unpark so the release store on the
/// permit publishes the waker's earlier writes (wake token, element
/// bytes) to the parker.
pub fn ready(g: &Routine) {
    g.permit.store(true, Ordering::Release);
    g.thread.unpark();
}

// ---------------------------------------------------------------------------
// Safepoint yield
// ---------------------------------------------------------------------------

static GC_WAITING: AtomicBool = AtomicBool::new(false);

/// Request (or withdraw) a safepoint. While set, channel operations
/// yield the CPU on entry before touching any channel state.
pub fn set_gc_waiting(on: bool) {
    GC_WAITING.store(on, Ordering::Relaxed);
}

pub(crate) fn gc_yield() {
    if GC_WAITING.load(Ordering::Relaxed) {
        thread::yield_now();
    }
}

// ---------------------------------------------------------------------------
// Runtime utilities
// ---------------------------------------------------------------------------

fn rng_seed() -> u64 {
    let mut h = RandomState::new().build_hasher();
    thread::current().id().hash(&mut h);
    h.finish() | 1
}

/// Cheap per-routine xorshift PRNG; drives select's poll-order shuffle.
pub fn fastrand() -> u32 {
    RNG.with(|rng| {
        let mut x = rng.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        rng.set(x);
        (x >> 32) as u32
    })
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the runtime first asked for the time.
pub fn cputicks() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as i64
}

// ---------------------------------------------------------------------------
// Block profiling
// ---------------------------------------------------------------------------

static BLOCK_PROFILE_RATE: AtomicI64 = AtomicI64::new(0);
static BLOCK_COUNT: AtomicU64 = AtomicU64::new(0);
static BLOCK_TOTAL_NS: AtomicU64 = AtomicU64::new(0);

/// Enable block profiling: parks lasting at least `ns` nanoseconds are
/// recorded. 0 disables profiling (the default).
pub fn set_block_profile_rate(ns: i64) {
    BLOCK_PROFILE_RATE.store(ns, Ordering::Relaxed);
}

pub(crate) fn block_profile_rate() -> i64 {
    BLOCK_PROFILE_RATE.load(Ordering::Relaxed)
}

pub(crate) fn blockevent(ns: i64) {
    let rate = block_profile_rate();
    if rate <= 0 || ns < rate {
        return;
    }
    BLOCK_COUNT.fetch_add(1, Ordering::Relaxed);
    BLOCK_TOTAL_NS.fetch_add(ns as u64, Ordering::Relaxed);
}

/// Aggregate block-profile counters: (event count, total blocked ns).
pub fn block_events() -> (u64, u64) {
    (
        BLOCK_COUNT.load(Ordering::Relaxed),
        BLOCK_TOTAL_NS.load(Ordering::Relaxed),
    )
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

/// Internal invariant violation. The runtime state is corrupt (a
/// scheduler or memory bug); unwinding past a held channel lock would
/// only spread the damage, so abort.
pub(crate) fn throw(msg: &str) -> ! {
    log::error!("fatal: {msg}");
    eprintln!("fatal error: {msg}");
    std::process::abort();
}
