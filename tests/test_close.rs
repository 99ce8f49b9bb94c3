// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Close semantics: the one-shot transition, queue draining, the
// closed-receive contract, and the close/send panic set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libchan::{Chan, TryRecv};

#[test]
fn recv_after_close_yields_closed_forever() {
    let c = Chan::<i32>::new(0);
    c.close();
    assert_eq!(c.recv(), None);
    assert_eq!(c.recv(), None);
    assert_eq!(c.try_recv(), TryRecv::Closed);
}

// A receiver parked on an empty channel is released by close and
// observes closed-and-empty.
#[test]
fn close_wakes_blocked_receiver() {
    let c = Chan::<i32>::new(0);
    let rx = c.clone();
    let receiver = thread::spawn(move || rx.recv());

    thread::sleep(Duration::from_millis(100));
    c.close();
    assert_eq!(receiver.join().unwrap(), None);
}

// A sender parked on a full channel is released by close and panics.
#[test]
fn close_wakes_blocked_sender_into_panic() {
    let c = Chan::<i32>::new(1);
    c.send(1);

    let tx = c.clone();
    let sender = thread::spawn(move || tx.send(2));
    thread::sleep(Duration::from_millis(100));
    c.close();

    let err = sender.join().expect_err("sender must panic");
    let msg = err
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("");
    assert_eq!(msg, "send on closed channel");
}

// Values buffered before close are still delivered, in order; only
// then does the channel report closed.
#[test]
fn buffered_values_survive_close() {
    let c = Chan::<i32>::new(3);
    c.send(1);
    c.send(2);
    c.close();

    assert_eq!(c.recv(), Some(1));
    assert_eq!(c.recv(), Some(2));
    assert_eq!(c.recv(), None);
    assert_eq!(c.len(), 0);
    assert_eq!(c.cap(), 3);
}

#[test]
#[should_panic(expected = "send on closed channel")]
fn send_on_closed_panics() {
    let c = Chan::<i32>::new(1);
    c.close();
    c.send(3);
}

#[test]
#[should_panic(expected = "send on closed channel")]
fn try_send_on_closed_panics() {
    let c = Chan::<i32>::new(1);
    c.close();
    let _ = c.try_send(3);
}

#[test]
#[should_panic(expected = "close of closed channel")]
fn close_of_closed_panics() {
    let c = Chan::<i32>::new(0);
    c.close();
    c.close();
}

#[test]
#[should_panic(expected = "close of nil channel")]
fn close_of_nil_panics() {
    Chan::<i32>::nil().close();
}

#[derive(Clone)]
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// A send that panics on a closed channel never copied the value into
// the channel; the payload's destructor must still run during unwind.
#[test]
fn panicking_send_still_drops_the_value() {
    let drops = Arc::new(AtomicUsize::new(0));
    let c = Chan::<DropCounter>::new(1);
    c.close();

    let payload = DropCounter(Arc::clone(&drops));
    let result = catch_unwind(AssertUnwindSafe(|| c.send(payload)));
    assert!(result.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    let payload = DropCounter(Arc::clone(&drops));
    let result = catch_unwind(AssertUnwindSafe(|| c.try_send(payload)));
    assert!(result.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

// Close releases every parked receiver, not just the head of the
// queue.
#[test]
fn close_drains_all_parked_receivers() {
    let c = Chan::<u64>::new(0);
    let mut receivers = Vec::new();
    for _ in 0..4 {
        let rx = c.clone();
        receivers.push(thread::spawn(move || rx.recv()));
    }
    thread::sleep(Duration::from_millis(150));
    c.close();
    for r in receivers {
        assert_eq!(r.join().unwrap(), None);
    }
}
