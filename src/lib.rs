// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rendezvous and buffered channels between routines (OS threads
// registered with the scheduler shim), plus a multi-way select that
// atomically picks one of many pending channel operations. Send on a
// closed channel panics; receive on a closed channel yields the zero
// element and `received = false`.

pub mod sched;

mod spin_lock;

mod waitq;

mod chan;
pub use chan::{chan_cap, chan_close, chan_len, chan_recv, chan_send, ElemType, RawChan};

mod select;
pub use select::{block_forever, rselect, RuntimeSelect, Select, SelectDir};

mod typed;
pub use typed::{Chan, TryRecv};
