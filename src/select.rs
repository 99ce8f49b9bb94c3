// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-way select: atomically pick one of N pending channel operations
// (plus an optional default) and perform it. Three passes under all
// case channels' locks: an opportunistic scan in shuffled poll order, a
// commit that enqueues one sudog per case and parks, and a cleanup that
// unlinks the cases that did not win. The locks are taken in ascending
// address order so overlapping selects cannot deadlock each other.

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::chan::{copy_elem, zero_elem, RawChan};
use crate::sched;
use crate::waitq::Sudog;

enum Scase {
    Recv {
        chan: Arc<RawChan>,
        elem: *mut u8,
        received: *mut bool,
        index: usize,
    },
    Send {
        chan: Arc<RawChan>,
        elem: *const u8,
        index: usize,
    },
    Default {
        index: usize,
    },
}

impl Scase {
    fn chan(&self) -> Option<&Arc<RawChan>> {
        match self {
            Scase::Recv { chan, .. } | Scase::Send { chan, .. } => Some(chan),
            Scase::Default { .. } => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            Scase::Recv { index, .. } | Scase::Send { index, .. } | Scase::Default { index } => {
                *index
            }
        }
    }

    fn elem_ptr(&self) -> *mut u8 {
        match self {
            Scase::Recv { elem, .. } => *elem,
            Scase::Send { elem, .. } => *elem as *mut u8,
            Scase::Default { .. } => ptr::null_mut(),
        }
    }
}

/// What pass 1 found ready.
enum Ready {
    AsyncRecv,
    AsyncSend,
    SyncRecv(*mut Sudog),
    SyncSend(*mut Sudog),
    RecvClosed,
    SendClosed,
}

/// A select under construction, then executed by [`Select::go`].
///
/// Cases with a nil channel are inert: they are not even registered, so
/// they never compete. A select whose every case is inert (or that has
/// no cases) parks forever.
pub struct Select {
    tcase: usize,
    cases: Vec<Scase>,
}

impl Select {
    /// Start a select with room for `size` cases.
    pub fn new(size: usize) -> Select {
        Select {
            tcase: size,
            cases: Vec::with_capacity(size),
        }
    }

    /// Add a send case. A nil channel is ignored.
    ///
    /// # Safety
    ///
    /// `elem` must point to one element's bytes and stay valid until
    /// [`Select::go`] returns; on a win the bytes are moved into the
    /// channel.
    pub unsafe fn send(&mut self, c: Option<&Arc<RawChan>>, elem: *const u8, index: usize) {
        let Some(c) = c else { return };
        if self.cases.len() >= self.tcase {
            sched::throw("selectsend: too many cases");
        }
        self.cases.push(Scase::Send {
            chan: Arc::clone(c),
            elem,
            index,
        });
    }

    /// Add a receive case. A nil channel is ignored; `elem` and
    /// `received` may be null.
    ///
    /// # Safety
    ///
    /// Non-null `elem`/`received` must stay valid (and writable) until
    /// [`Select::go`] returns.
    pub unsafe fn recv(
        &mut self,
        c: Option<&Arc<RawChan>>,
        elem: *mut u8,
        received: *mut bool,
        index: usize,
    ) {
        let Some(c) = c else { return };
        if self.cases.len() >= self.tcase {
            sched::throw("selectrecv: too many cases");
        }
        self.cases.push(Scase::Recv {
            chan: Arc::clone(c),
            elem,
            received,
            index,
        });
    }

    /// Add the default case (at most one is meaningful).
    pub fn default_case(&mut self, index: usize) {
        if self.cases.len() >= self.tcase {
            sched::throw("selectdefault: too many cases");
        }
        self.cases.push(Scase::Default { index });
    }

    /// Run the select to completion and return the winning case's
    /// user-supplied index. Never returns if nothing can ever fire.
    pub fn go(self) -> usize {
        unsafe { self.go_impl() }
    }

    unsafe fn go_impl(self) -> usize {
        sched::gc_yield();
        let g = sched::current();
        let n = self.cases.len();
        if n == 0 {
            sched::park_forever("select (no cases)");
        }

        log::trace!("select: ncase={n}");

        let profile = sched::block_profile_rate() > 0;
        let t0 = if profile { sched::cputicks() } else { 0 };

        // Shuffled poll order: every simultaneously-ready case is
        // chosen with equal probability.
        let mut pollorder: Vec<usize> = (0..n).collect();
        for i in 1..n {
            let j = sched::fastrand() as usize % (i + 1);
            pollorder.swap(i, j);
        }

        // Lock order: case channels sorted by address, so any two
        // selects acquire overlapping lock sets in the same order.
        let mut lockorder: Vec<*const RawChan> = self
            .cases
            .iter()
            .filter_map(|cas| cas.chan().map(Arc::as_ptr))
            .collect();
        heapsort_addrs(&mut lockorder);

        // One sudog per case, all sharing one claim word so exactly one
        // waker can win this select.
        let done = AtomicU32::new(0);
        let mut sudogs: Vec<Sudog> = self
            .cases
            .iter()
            .map(|cas| {
                let sg = Sudog::new(Arc::clone(&g), cas.elem_ptr());
                if profile {
                    sg.release_time.store(-1, Ordering::Relaxed);
                }
                sg
            })
            .collect();

        sellock(&lockorder);

        loop {
            // pass 1: look for something already waiting, in poll order
            let mut dfl: Option<usize> = None;
            let mut fired: Option<(usize, Ready)> = None;
            'poll: for &o in &pollorder {
                match &self.cases[o] {
                    Scase::Recv { chan: c, .. } => {
                        let st = c.state();
                        if c.dataqsiz > 0 {
                            if st.qcount > 0 {
                                fired = Some((o, Ready::AsyncRecv));
                                break 'poll;
                            }
                        } else {
                            let sg = st.sendq.dequeue();
                            if !sg.is_null() {
                                fired = Some((o, Ready::SyncRecv(sg)));
                                break 'poll;
                            }
                        }
                        if st.closed {
                            fired = Some((o, Ready::RecvClosed));
                            break 'poll;
                        }
                    }
                    Scase::Send { chan: c, .. } => {
                        let st = c.state();
                        if st.closed {
                            fired = Some((o, Ready::SendClosed));
                            break 'poll;
                        }
                        if c.dataqsiz > 0 {
                            if st.qcount < c.dataqsiz {
                                fired = Some((o, Ready::AsyncSend));
                                break 'poll;
                            }
                        } else {
                            let sg = st.recvq.dequeue();
                            if !sg.is_null() {
                                fired = Some((o, Ready::SyncSend(sg)));
                                break 'poll;
                            }
                        }
                    }
                    Scase::Default { .. } => dfl = Some(o),
                }
            }

            if let Some((o, ready)) = fired {
                return self.complete(o, ready, &lockorder, &sudogs, t0);
            }
            if let Some(o) = dfl {
                selunlock(&lockorder);
                return self.cases[o].index();
            }

            // pass 2: commit. Enqueue on every case's channel, then
            // park; the commit callback releases the locks in reverse
            // order only after the routine is fully committed to sleep.
            log::trace!("select: no case ready, committing {n} cases to park");
            done.store(0, Ordering::Relaxed);
            for &o in &pollorder {
                let sg: *mut Sudog = &mut sudogs[o];
                (*sg).select_done = &done;
                match &self.cases[o] {
                    Scase::Recv { chan, .. } => chan.state().recvq.enqueue(sg),
                    Scase::Send { chan, .. } => chan.state().sendq.enqueue(sg),
                    Scase::Default { .. } => {}
                }
            }

            g.set_wake_param(0);
            sched::park(|| selunlock(&lockorder), "select");

            sellock(&lockorder);
            let winner = g.wake_param() as *mut Sudog;

            // pass 3: unlink the losers; they must not pile up on quiet
            // channels.
            let mut won: Option<usize> = None;
            for i in 0..n {
                let sgp: *mut Sudog = &mut sudogs[i];
                if sgp == winner {
                    won = Some(i);
                    continue;
                }
                match &self.cases[i] {
                    Scase::Recv { chan, .. } => chan.state().recvq.remove_routine(&g),
                    Scase::Send { chan, .. } => chan.state().sendq.remove_routine(&g),
                    Scase::Default { .. } => {}
                }
            }

            if winner.is_null() {
                // close-wake: rescan with the locks held; the closed
                // case will fire through pass 1 this time
                continue;
            }

            let Some(w) = won else {
                sched::throw("selectgo: unknown wakeup sudog");
            };

            // A park wake with a token is always a rendezvous: buffered
            // readiness wakes without one and retries above.
            match &self.cases[w] {
                Scase::Recv {
                    chan,
                    received,
                    index,
                    ..
                } => {
                    if chan.dataqsiz > 0 {
                        sched::throw("selectgo: shouldn't happen");
                    }
                    if !received.is_null() {
                        **received = true;
                    }
                    selunlock(&lockorder);
                    sudogs[w].block_event(t0);
                    return *index;
                }
                Scase::Send { chan, index, .. } => {
                    if chan.dataqsiz > 0 {
                        sched::throw("selectgo: shouldn't happen");
                    }
                    selunlock(&lockorder);
                    sudogs[w].block_event(t0);
                    return *index;
                }
                Scase::Default { .. } => sched::throw("selectgo: default case woke"),
            }
        }
    }

    /// Finish a case that pass 1 found ready. All locks are held on
    /// entry and released here.
    unsafe fn complete(
        &self,
        o: usize,
        ready: Ready,
        lockorder: &[*const RawChan],
        sudogs: &[Sudog],
        t0: i64,
    ) -> usize {
        match (&self.cases[o], ready) {
            (
                Scase::Recv {
                    chan: c,
                    elem,
                    received,
                    index,
                },
                Ready::AsyncRecv,
            ) => {
                let st = c.state();
                if !received.is_null() {
                    **received = true;
                }
                c.buf_recv(st, *elem);
                let sg = st.sendq.dequeue();
                if !sg.is_null() {
                    let peer = Arc::clone(&(*sg).g);
                    selunlock(lockorder);
                    Sudog::mark_release(sg);
                    sched::ready(&peer);
                } else {
                    selunlock(lockorder);
                }
                sudogs[o].block_event(t0);
                *index
            }
            (
                Scase::Send {
                    chan: c,
                    elem,
                    index,
                },
                Ready::AsyncSend,
            ) => {
                let st = c.state();
                c.buf_send(st, *elem);
                let sg = st.recvq.dequeue();
                if !sg.is_null() {
                    let peer = Arc::clone(&(*sg).g);
                    selunlock(lockorder);
                    Sudog::mark_release(sg);
                    sched::ready(&peer);
                } else {
                    selunlock(lockorder);
                }
                sudogs[o].block_event(t0);
                *index
            }
            (
                Scase::Recv {
                    chan: c,
                    elem,
                    received,
                    index,
                },
                Ready::SyncRecv(sg),
            ) => {
                // the sender is parked and its sudog claimed: finish
                // its handoff for it
                selunlock(lockorder);
                if !received.is_null() {
                    **received = true;
                }
                copy_elem(*elem, (*sg).elem, c.elem.size);
                let peer = Arc::clone(&(*sg).g);
                peer.set_wake_param(sg as usize);
                Sudog::mark_release(sg);
                sched::ready(&peer);
                sudogs[o].block_event(t0);
                *index
            }
            (
                Scase::Send {
                    chan: c,
                    elem,
                    index,
                },
                Ready::SyncSend(sg),
            ) => {
                selunlock(lockorder);
                copy_elem((*sg).elem, *elem, c.elem.size);
                let peer = Arc::clone(&(*sg).g);
                peer.set_wake_param(sg as usize);
                Sudog::mark_release(sg);
                sched::ready(&peer);
                sudogs[o].block_event(t0);
                *index
            }
            (
                Scase::Recv {
                    chan: c,
                    elem,
                    received,
                    index,
                },
                Ready::RecvClosed,
            ) => {
                selunlock(lockorder);
                if !received.is_null() {
                    **received = false;
                }
                zero_elem(*elem, c.elem.size);
                sudogs[o].block_event(t0);
                *index
            }
            (Scase::Send { .. }, Ready::SendClosed) => {
                selunlock(lockorder);
                panic!("send on closed channel");
            }
            _ => sched::throw("selectgo: case/readiness mismatch"),
        }
    }
}

/// Acquire every distinct channel lock in ascending address order.
unsafe fn sellock(lockorder: &[*const RawChan]) {
    let mut prev: *const RawChan = ptr::null();
    for &c in lockorder {
        if c != prev {
            (*c).lock.lock();
            prev = c;
        }
    }
}

/// Release in reverse lock order, skipping duplicates. When this runs
/// as the park commit callback, nothing belonging to the select may be
/// touched after the last unlock: a waker may complete the handoff the
/// moment the final lock drops.
unsafe fn selunlock(lockorder: &[*const RawChan]) {
    for i in (0..lockorder.len()).rev() {
        let c = lockorder[i];
        if i > 0 && lockorder[i - 1] == c {
            continue; // unlocked on the next iteration
        }
        (*c).lock.unlock();
    }
}

/// In-place heapsort by address. Explicit sift loops keep the stack
/// bounded; the caller may be running on a small stack.
fn heapsort_addrs(v: &mut [*const RawChan]) {
    let n = v.len();
    for i in 0..n {
        let c = v[i];
        let mut j = i;
        while j > 0 {
            let k = (j - 1) / 2;
            if v[k] < c {
                v[j] = v[k];
                j = k;
            } else {
                break;
            }
        }
        v[j] = c;
    }
    for i in (1..n).rev() {
        let c = v[i];
        v[i] = v[0];
        let mut j = 0;
        loop {
            let mut k = j * 2 + 1;
            if k >= i {
                break;
            }
            if k + 1 < i && v[k] < v[k + 1] {
                k += 1;
            }
            if c < v[k] {
                v[j] = v[k];
                j = k;
            } else {
                break;
            }
        }
        v[j] = c;
    }
}

// ---------------------------------------------------------------------------
// Dynamic select + block
// ---------------------------------------------------------------------------

/// Case direction for [`rselect`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SelectDir {
    Send = 1,
    Recv = 2,
    Default = 3,
}

/// One case for [`rselect`].
pub struct RuntimeSelect {
    pub dir: SelectDir,
    pub ch: Option<Arc<RawChan>>,
    pub val: *mut u8,
}

/// Dynamic select over a slice of cases. Returns the chosen case index
/// and, for a receive, whether a value was received. Nil-channel
/// send/recv cases never compete.
///
/// # Safety
///
/// Every non-null `val` must be valid for its direction's data motion
/// until the call returns.
pub unsafe fn rselect(cases: &[RuntimeSelect]) -> (usize, bool) {
    let mut recv_ok = false;
    let mut sel = Select::new(cases.len());
    for (i, rc) in cases.iter().enumerate() {
        match rc.dir {
            SelectDir::Default => sel.default_case(i),
            SelectDir::Send => sel.send(rc.ch.as_ref(), rc.val, i),
            SelectDir::Recv => sel.recv(rc.ch.as_ref(), rc.val, &mut recv_ok, i),
        }
    }
    let chosen = sel.go();
    (chosen, recv_ok)
}

/// Park the calling routine permanently (a select with no cases).
pub fn block_forever() -> ! {
    sched::park_forever("select (no cases)");
}
