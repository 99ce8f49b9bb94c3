// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed wrapper around RawChan. Ownership of elements moves through the
// untyped core as raw bytes; this layer keeps the moves sound (no
// double drops, no reads of zero-filled closed-channel bytes).

use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::sync::Arc;

use crate::chan::{chan_cap, chan_close, chan_len, chan_recv, chan_send, ElemType, RawChan};

/// Result of a non-blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<T> {
    /// A value was ready.
    Value(T),
    /// Nothing ready right now; the channel is still open.
    Empty,
    /// The channel is closed and drained.
    Closed,
}

/// A typed channel handle. Clones share the same underlying channel.
///
/// [`Chan::nil`] is the nil channel: sends and receives on it block
/// forever, close panics, len/cap are 0, and a select case over it
/// never competes — the standard way to disable a case.
pub struct Chan<T> {
    raw: Option<Arc<RawChan>>,
    _marker: PhantomData<T>,
}

impl<T> Chan<T> {
    /// Create a channel with `cap` buffered slots (0 = rendezvous).
    ///
    /// Panics like channel construction does: a negative or
    /// address-space-overflowing capacity is `makechan: size out of
    /// range`.
    pub fn new(cap: i64) -> Self {
        Self {
            raw: Some(Arc::new(RawChan::new(ElemType::of::<T>(), cap))),
            _marker: PhantomData,
        }
    }

    /// The nil channel.
    pub fn nil() -> Self {
        Self {
            raw: None,
            _marker: PhantomData,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.raw.is_none()
    }

    /// The underlying untyped channel, for select case registration.
    pub fn as_raw(&self) -> Option<&Arc<RawChan>> {
        self.raw.as_ref()
    }

    fn raw_ref(&self) -> Option<&RawChan> {
        self.raw.as_deref()
    }

    /// Blocking send. Panics with `send on closed channel` if the
    /// channel is closed; blocks forever on a nil channel.
    ///
    /// The value is forgotten only after the core reports delivery, so
    /// a panicking send unwinds through an ordinary droppable binding
    /// and the payload's destructor still runs.
    pub fn send(&self, value: T) {
        unsafe {
            chan_send(self.raw_ref(), (&value as *const T).cast(), true);
        }
        // a blocking send either returned true or panicked above; the
        // bytes now live in the channel
        mem::forget(value);
    }

    /// Non-blocking send; gives the value back when it would have had
    /// to block. Panics if the channel is closed.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        let sent = unsafe { chan_send(self.raw_ref(), (&value as *const T).cast(), false) };
        if sent {
            mem::forget(value);
            Ok(())
        } else {
            Err(value)
        }
    }

    /// Blocking receive. `None` means the channel is closed and
    /// drained; blocks forever on a nil channel.
    pub fn recv(&self) -> Option<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        let (_, received) = unsafe { chan_recv(self.raw_ref(), slot.as_mut_ptr().cast(), true) };
        if received {
            Some(unsafe { slot.assume_init() })
        } else {
            None
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> TryRecv<T> {
        let mut slot = MaybeUninit::<T>::uninit();
        let (selected, received) =
            unsafe { chan_recv(self.raw_ref(), slot.as_mut_ptr().cast(), false) };
        match (selected, received) {
            (true, true) => TryRecv::Value(unsafe { slot.assume_init() }),
            (true, false) => TryRecv::Closed,
            (false, _) => TryRecv::Empty,
        }
    }

    /// Close the channel. Panics with `close of nil channel` /
    /// `close of closed channel`.
    pub fn close(&self) {
        chan_close(self.raw_ref());
    }

    /// Elements currently buffered.
    pub fn len(&self) -> usize {
        chan_len(self.raw_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity (0 for rendezvous and nil channels).
    pub fn cap(&self) -> usize {
        chan_cap(self.raw_ref())
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}
