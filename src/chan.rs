// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The channel entity and single-channel operations: a circular ring
// buffer, one FIFO wait queue per direction, a spin lock, and the
// closed flag. Blocking operations park the calling routine through
// the scheduler shim; wakers hand data (or the closed verdict) to the
// parked peer through its sudog and wake token.

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::sched;
use crate::spin_lock::ChanLock;
use crate::waitq::{Sudog, WaitQ};

/// Elements larger than this are rejected at construction.
const MAX_ELEM_SIZE: usize = 1 << 16;

/// Ceiling for the ring allocation.
const MAX_ALLOC: usize = isize::MAX as usize;

// ---------------------------------------------------------------------------
// Element metadata
// ---------------------------------------------------------------------------

/// Runtime description of a channel's element type.
///
/// `size` may be zero: zero-size elements still synchronize (ring
/// counters advance, routines rendezvous) while every slot copy
/// degenerates to a no-op. `drop_fn` destroys one element in place and
/// is used only when a channel is dropped with elements still buffered.
#[derive(Clone, Copy)]
pub struct ElemType {
    pub size: usize,
    pub align: usize,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

impl ElemType {
    pub const fn of<T>() -> Self {
        Self {
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            drop_fn: if mem::needs_drop::<T>() {
                Some(drop_erased::<T>)
            } else {
                None
            },
        }
    }
}

unsafe fn drop_erased<T>(p: *mut u8) {
    ptr::drop_in_place(p.cast::<T>());
}

/// Copy one element; a null endpoint or zero size means "no data
/// motion" (pure synchronization).
pub(crate) unsafe fn copy_elem(dst: *mut u8, src: *const u8, size: usize) {
    if size != 0 && !dst.is_null() && !src.is_null() {
        ptr::copy_nonoverlapping(src, dst, size);
    }
}

pub(crate) unsafe fn zero_elem(dst: *mut u8, size: usize) {
    if size != 0 && !dst.is_null() {
        ptr::write_bytes(dst, 0, size);
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Mutable channel state, guarded by the channel lock.
pub(crate) struct ChanState {
    pub qcount: usize,
    pub closed: bool,
    sendx: usize,
    recvx: usize,
    pub recvq: WaitQ,
    pub sendq: WaitQ,
}

/// An untyped channel: the runtime core behind `Chan<T>`.
///
/// Invariants while the lock is held: `qcount <= dataqsiz`; at most one
/// of `recvq`/`sendq` is non-empty (except mid-close, which drains
/// both); a rendezvous channel keeps `qcount == dataqsiz == 0`.
pub struct RawChan {
    pub(crate) lock: ChanLock,
    st: UnsafeCell<ChanState>,
    pub(crate) dataqsiz: usize,
    pub(crate) elem: ElemType,
    buf: *mut u8,
}

// Safety: all mutable state is behind the lock; the ring is only
// touched by the lock holder or by a waker that just dequeued the
// owning sudog.
unsafe impl Send for RawChan {}
unsafe impl Sync for RawChan {}

impl RawChan {
    /// Create a channel for elements described by `elem` with `cap`
    /// buffer slots (0 = rendezvous channel).
    ///
    /// Panics with `makechan: invalid channel element type` when the
    /// element is too large and `makechan: size out of range` when the
    /// capacity is negative or the ring would overflow the address
    /// space.
    pub fn new(elem: ElemType, cap: i64) -> RawChan {
        if elem.size >= MAX_ELEM_SIZE {
            panic!("makechan: invalid channel element type");
        }
        if cap < 0
            || (elem.size > 0
                && cap as u128 > ((MAX_ALLOC - mem::size_of::<RawChan>()) / elem.size) as u128)
        {
            panic!("makechan: size out of range");
        }

        let dataqsiz = cap as usize;
        let bytes = dataqsiz * elem.size;
        let buf = if bytes == 0 {
            ptr::null_mut()
        } else {
            let layout = match Layout::from_size_align(bytes, elem.align.max(1)) {
                Ok(l) => l,
                Err(_) => sched::throw("makechan: bad element layout"),
            };
            let p = unsafe { alloc::alloc_zeroed(layout) };
            if p.is_null() {
                alloc::handle_alloc_error(layout);
            }
            p
        };

        log::trace!("makechan: elemsize={} dataqsiz={dataqsiz}", elem.size);

        RawChan {
            lock: ChanLock::new(),
            st: UnsafeCell::new(ChanState {
                qcount: 0,
                closed: false,
                sendx: 0,
                recvx: 0,
                recvq: WaitQ::new(),
                sendq: WaitQ::new(),
            }),
            dataqsiz,
            elem,
            buf,
        }
    }

    /// Safety: caller holds `self.lock`.
    pub(crate) unsafe fn state(&self) -> &mut ChanState {
        &mut *self.st.get()
    }

    unsafe fn slot(&self, i: usize) -> *mut u8 {
        self.buf.add(i * self.elem.size)
    }

    /// Deposit `ep` into the ring at `sendx`.
    ///
    /// Safety: caller holds the lock and has checked `qcount < dataqsiz`.
    pub(crate) unsafe fn buf_send(&self, st: &mut ChanState, ep: *const u8) {
        copy_elem(self.slot(st.sendx), ep, self.elem.size);
        st.sendx += 1;
        if st.sendx == self.dataqsiz {
            st.sendx = 0;
        }
        st.qcount += 1;
    }

    /// Copy the slot at `recvx` out to `ep` (null = discard) and zero
    /// the slot — the ring must not keep dead element bytes around.
    ///
    /// Safety: caller holds the lock and has checked `qcount > 0`.
    pub(crate) unsafe fn buf_recv(&self, st: &mut ChanState, ep: *mut u8) {
        copy_elem(ep, self.slot(st.recvx), self.elem.size);
        zero_elem(self.slot(st.recvx), self.elem.size);
        st.recvx += 1;
        if st.recvx == self.dataqsiz {
            st.recvx = 0;
        }
        st.qcount -= 1;
    }

    unsafe fn send(&self, ep: *const u8, block: bool) -> bool {
        let g = sched::current();
        let mut t0 = 0i64;
        let mut my = Sudog::new(Arc::clone(&g), ep as *mut u8);
        if sched::block_profile_rate() > 0 {
            t0 = sched::cputicks();
            my.release_time.store(-1, Ordering::Relaxed);
        }

        self.lock.lock();
        if self.state().closed {
            self.lock.unlock();
            panic!("send on closed channel");
        }

        if self.dataqsiz == 0 {
            // rendezvous: pair with a waiting receiver, or park
            // carrying the payload pointer
            let sg = self.state().recvq.dequeue();
            if !sg.is_null() {
                self.lock.unlock();
                copy_elem((*sg).elem, ep, self.elem.size);
                let peer = Arc::clone(&(*sg).g);
                peer.set_wake_param(sg as usize);
                Sudog::mark_release(sg);
                sched::ready(&peer);
                return true;
            }
            if !block {
                self.lock.unlock();
                return false;
            }

            g.set_wake_param(0);
            self.state().sendq.enqueue(&mut my);
            sched::park(|| self.lock.unlock(), "chan send");

            if g.wake_param() == 0 {
                // no token: the wake came from close
                self.lock.lock();
                if !self.state().closed {
                    sched::throw("chansend: spurious wakeup");
                }
                self.lock.unlock();
                panic!("send on closed channel");
            }
            my.block_event(t0);
            return true;
        }

        // buffered: deposit into the ring, re-parking while full. A
        // racing closer or peer may change state between park and run,
        // so every wake restarts the scan.
        loop {
            let st = self.state();
            if st.closed {
                self.lock.unlock();
                panic!("send on closed channel");
            }
            if st.qcount < self.dataqsiz {
                self.buf_send(st, ep);
                let sg = st.recvq.dequeue();
                if !sg.is_null() {
                    let peer = Arc::clone(&(*sg).g);
                    self.lock.unlock();
                    Sudog::mark_release(sg);
                    sched::ready(&peer);
                } else {
                    self.lock.unlock();
                }
                my.block_event(t0);
                return true;
            }
            if !block {
                self.lock.unlock();
                return false;
            }
            my.elem = ptr::null_mut();
            st.sendq.enqueue(&mut my);
            sched::park(|| self.lock.unlock(), "chan send");
            self.lock.lock();
        }
    }

    unsafe fn recv(&self, ep: *mut u8, block: bool) -> (bool, bool) {
        let g = sched::current();
        let mut t0 = 0i64;
        let mut my = Sudog::new(Arc::clone(&g), ep);
        if sched::block_profile_rate() > 0 {
            t0 = sched::cputicks();
            my.release_time.store(-1, Ordering::Relaxed);
        }

        self.lock.lock();

        if self.dataqsiz > 0 {
            loop {
                let st = self.state();
                if st.qcount == 0 {
                    if st.closed {
                        return self.recv_closed(ep);
                    }
                    if !block {
                        self.lock.unlock();
                        return (false, false);
                    }
                    my.elem = ptr::null_mut();
                    st.recvq.enqueue(&mut my);
                    sched::park(|| self.lock.unlock(), "chan receive");
                    self.lock.lock();
                    continue;
                }
                self.buf_recv(st, ep);
                let sg = st.sendq.dequeue();
                if !sg.is_null() {
                    let peer = Arc::clone(&(*sg).g);
                    self.lock.unlock();
                    Sudog::mark_release(sg);
                    sched::ready(&peer);
                } else {
                    self.lock.unlock();
                }
                my.block_event(t0);
                return (true, true);
            }
        }

        // rendezvous
        if self.state().closed {
            return self.recv_closed(ep);
        }
        let sg = self.state().sendq.dequeue();
        if !sg.is_null() {
            // the sender owns the data motion on a rendezvous; here the
            // sender is already parked, so copy on its behalf
            self.lock.unlock();
            copy_elem(ep, (*sg).elem, self.elem.size);
            let peer = Arc::clone(&(*sg).g);
            peer.set_wake_param(sg as usize);
            Sudog::mark_release(sg);
            sched::ready(&peer);
            return (true, true);
        }
        if !block {
            self.lock.unlock();
            return (false, false);
        }

        g.set_wake_param(0);
        self.state().recvq.enqueue(&mut my);
        sched::park(|| self.lock.unlock(), "chan receive");

        if g.wake_param() == 0 {
            self.lock.lock();
            if !self.state().closed {
                sched::throw("chanrecv: spurious wakeup");
            }
            let r = self.recv_closed(ep);
            my.block_event(t0);
            return r;
        }
        my.block_event(t0);
        (true, true)
    }

    /// Closed-and-empty receive: zero the destination and report
    /// `received = false`. Caller holds the lock; this releases it.
    unsafe fn recv_closed(&self, ep: *mut u8) -> (bool, bool) {
        zero_elem(ep, self.elem.size);
        self.lock.unlock();
        (true, false)
    }

    fn close(&self) {
        self.lock.lock();
        unsafe {
            let st = self.state();
            if st.closed {
                self.lock.unlock();
                panic!("close of closed channel");
            }
            st.closed = true;
            log::trace!("closechan: dataqsiz={} qcount={}", self.dataqsiz, st.qcount);

            // Release all receivers, then all senders: pending
            // receivers observe closed-and-empty cleanly while senders
            // still queue; each sender panics on resumption.
            loop {
                let sg = st.recvq.dequeue();
                if sg.is_null() {
                    break;
                }
                let peer = Arc::clone(&(*sg).g);
                peer.set_wake_param(0);
                Sudog::mark_release(sg);
                sched::ready(&peer);
            }
            loop {
                let sg = st.sendq.dequeue();
                if sg.is_null() {
                    break;
                }
                let peer = Arc::clone(&(*sg).g);
                peer.set_wake_param(0);
                Sudog::mark_release(sg);
                sched::ready(&peer);
            }
        }
        self.lock.unlock();
    }
}

impl Drop for RawChan {
    fn drop(&mut self) {
        let st = self.st.get_mut();
        if let Some(drop_fn) = self.elem.drop_fn {
            let mut i = st.recvx;
            for _ in 0..st.qcount {
                unsafe { drop_fn(self.slot(i)) };
                i += 1;
                if i == self.dataqsiz {
                    i = 0;
                }
            }
        }
        if !self.buf.is_null() {
            let bytes = self.dataqsiz * self.elem.size;
            if let Ok(layout) = Layout::from_size_align(bytes, self.elem.align.max(1)) {
                unsafe { alloc::dealloc(self.buf, layout) };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points (nil-channel semantics live here)
// ---------------------------------------------------------------------------

/// Send `elem_size` bytes from `ep` into the channel.
///
/// Blocking form parks until delivered; non-blocking returns `false`
/// when the send cannot complete immediately. A nil channel blocks
/// forever (or fails immediately when non-blocking). Panics with
/// `send on closed channel` on a closed channel.
///
/// # Safety
///
/// `ep` must point to `elem_size` readable bytes (ignored when the
/// element size is 0). The bytes are moved into the channel: the caller
/// must not reuse or drop the source element after a `true` return.
pub unsafe fn chan_send(c: Option<&RawChan>, ep: *const u8, block: bool) -> bool {
    sched::gc_yield();
    let c = match c {
        Some(c) => c,
        None => {
            if !block {
                return false;
            }
            sched::park_forever("chan send (nil chan)");
        }
    };
    c.send(ep, block)
}

/// Receive one element into `ep` (null = discard the bytes).
///
/// Returns `(selected, received)`: `selected` is false only for a
/// non-blocking attempt that would have blocked; `received` is false
/// when the channel is closed and drained, in which case `ep` is
/// zero-filled.
///
/// # Safety
///
/// `ep`, when non-null, must point to `elem_size` writable bytes.
pub unsafe fn chan_recv(c: Option<&RawChan>, ep: *mut u8, block: bool) -> (bool, bool) {
    sched::gc_yield();
    let c = match c {
        Some(c) => c,
        None => {
            if !block {
                return (false, false);
            }
            sched::park_forever("chan receive (nil chan)");
        }
    };
    c.recv(ep, block)
}

/// Close the channel, waking every parked sender and receiver.
///
/// Panics with `close of nil channel` / `close of closed channel`.
pub fn chan_close(c: Option<&RawChan>) {
    let c = match c {
        Some(c) => c,
        None => panic!("close of nil channel"),
    };
    sched::gc_yield();
    c.close();
}

/// Number of elements currently buffered (0 for a nil channel).
pub fn chan_len(c: Option<&RawChan>) -> usize {
    match c {
        Some(c) => {
            c.lock.lock();
            let n = unsafe { c.state().qcount };
            c.lock.unlock();
            n
        }
        None => 0,
    }
}

/// Buffer capacity (0 for a nil or rendezvous channel).
pub fn chan_cap(c: Option<&RawChan>) -> usize {
    match c {
        Some(c) => c.dataqsiz,
        None => 0,
    }
}
