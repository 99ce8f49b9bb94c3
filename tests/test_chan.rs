// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-channel behavior: construction, rendezvous handoff, buffered
// ordering, capacity blocking, FIFO wakeup order, zero-size elements,
// and the non-blocking forms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libchan::{Chan, TryRecv};

#[test]
fn len_and_cap() {
    let c = Chan::<i32>::new(3);
    assert_eq!(c.cap(), 3);
    assert_eq!(c.len(), 0);
    c.try_send(1).unwrap();
    c.try_send(2).unwrap();
    assert_eq!(c.len(), 2);

    let r = Chan::<i32>::new(0);
    assert_eq!(r.cap(), 0);
    assert_eq!(r.len(), 0);
}

#[test]
fn nil_channel_len_cap_and_nonblocking_ops() {
    let c = Chan::<i32>::nil();
    assert!(c.is_nil());
    assert_eq!(c.len(), 0);
    assert_eq!(c.cap(), 0);
    assert_eq!(c.try_send(5), Err(5));
    assert_eq!(c.try_recv(), TryRecv::Empty);
}

#[test]
#[should_panic(expected = "makechan: size out of range")]
fn negative_capacity_panics() {
    let _ = Chan::<i32>::new(-1);
}

#[test]
#[should_panic(expected = "makechan: size out of range")]
fn overflowing_capacity_panics() {
    let _ = Chan::<u64>::new(i64::MAX / 2);
}

#[test]
#[should_panic(expected = "makechan: invalid channel element type")]
fn oversized_element_panics() {
    let _ = Chan::<[u8; 1 << 16]>::new(1);
}

// An unbuffered channel hands the value directly from sender to
// receiver; afterwards nothing is buffered.
#[test]
fn unbuffered_handoff() {
    let c = Chan::<i32>::new(0);
    let tx = c.clone();
    let sender = thread::spawn(move || tx.send(42));

    assert_eq!(c.recv(), Some(42));
    sender.join().unwrap();
    assert_eq!(c.len(), 0);
}

#[test]
fn buffered_ordering() {
    let c = Chan::<i32>::new(3);
    c.send(1);
    c.send(2);
    c.send(3);
    assert_eq!(c.len(), 3);

    let rx = c.clone();
    let receiver = thread::spawn(move || {
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
        assert_eq!(rx.recv(), Some(3));
    });
    receiver.join().unwrap();
    assert_eq!(c.len(), 0);
}

// With capacity k, at most k sends complete without a matching recv.
#[test]
fn buffered_blocks_at_capacity() {
    let c = Chan::<u8>::new(2);
    c.try_send(10).unwrap();
    c.try_send(11).unwrap();
    assert_eq!(c.try_send(12), Err(12));

    assert_eq!(c.recv(), Some(10));
    c.try_send(12).unwrap();
    assert_eq!(c.recv(), Some(11));
    assert_eq!(c.recv(), Some(12));
}

#[test]
fn rendezvous_nonblocking_needs_a_peer() {
    let c = Chan::<i32>::new(0);
    assert_eq!(c.try_send(1), Err(1));
    assert_eq!(c.try_recv(), TryRecv::Empty);

    let rx = c.clone();
    let receiver = thread::spawn(move || rx.recv());
    thread::sleep(Duration::from_millis(100));
    // the receiver is parked now: a non-blocking send pairs with it
    c.try_send(77).unwrap();
    assert_eq!(receiver.join().unwrap(), Some(77));
}

// Two senders parked in order S1-then-S2 are served in that order.
#[test]
fn parked_senders_wake_fifo() {
    let c = Chan::<i32>::new(0);

    let tx1 = c.clone();
    let s1 = thread::spawn(move || tx1.send(1));
    thread::sleep(Duration::from_millis(100));

    let tx2 = c.clone();
    let s2 = thread::spawn(move || tx2.send(2));
    thread::sleep(Duration::from_millis(100));

    assert_eq!(c.recv(), Some(1));
    assert_eq!(c.recv(), Some(2));
    s1.join().unwrap();
    s2.join().unwrap();
}

#[test]
fn blocked_sender_resumes_when_space_frees() {
    let c = Chan::<i32>::new(1);
    c.send(1);

    let tx = c.clone();
    let sender = thread::spawn(move || tx.send(2));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(c.len(), 1); // the second send is parked

    assert_eq!(c.recv(), Some(1));
    sender.join().unwrap();
    assert_eq!(c.recv(), Some(2));
}

// Zero-size elements still synchronize: counters advance and a
// rendezvous pairs two routines, with no buffer traffic at all.
#[test]
fn zero_size_elements_synchronize() {
    let c = Chan::<()>::new(2);
    c.send(());
    c.send(());
    assert_eq!(c.len(), 2);
    assert_eq!(c.try_send(()), Err(()));
    assert_eq!(c.recv(), Some(()));
    assert_eq!(c.recv(), Some(()));
    assert_eq!(c.len(), 0);

    let r = Chan::<()>::new(0);
    let tx = r.clone();
    let sender = thread::spawn(move || tx.send(()));
    assert_eq!(r.recv(), Some(()));
    sender.join().unwrap();
}

// Received bytes equal sent bytes for a payload with interior
// structure, across the thread boundary.
#[test]
fn payload_integrity() {
    #[derive(Clone, PartialEq, Debug)]
    struct Payload {
        tag: u8,
        seq: u64,
        body: [u8; 13],
    }

    let want = Payload {
        tag: 0xA5,
        seq: 0xDEAD_BEEF_0042,
        body: [7; 13],
    };
    let c = Chan::<Payload>::new(0);
    let tx = c.clone();
    let w = want.clone();
    let sender = thread::spawn(move || tx.send(w));
    assert_eq!(c.recv(), Some(want));
    sender.join().unwrap();
}

#[test]
fn heap_values_move_through_intact() {
    let c = Chan::<String>::new(2);
    c.send(String::from("hello"));
    c.send(String::from("world"));
    assert_eq!(c.recv().as_deref(), Some("hello"));
    assert_eq!(c.recv().as_deref(), Some("world"));
}

#[derive(Clone)]
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// Dropping a channel with elements still buffered must destroy them.
#[test]
fn undrained_buffer_drops_elements() {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let c = Chan::<DropCounter>::new(4);
        c.send(DropCounter(Arc::clone(&drops)));
        c.send(DropCounter(Arc::clone(&drops)));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn received_elements_drop_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let c = Chan::<DropCounter>::new(2);
        c.send(DropCounter(Arc::clone(&drops)));
        let v = c.recv().unwrap();
        drop(v);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn safepoint_yield_is_transparent() {
    libchan::sched::set_gc_waiting(true);
    let c = Chan::<i32>::new(1);
    c.send(5);
    assert_eq!(c.recv(), Some(5));
    libchan::sched::set_gc_waiting(false);
}

#[test]
fn block_profile_records_parked_send() {
    libchan::sched::set_block_profile_rate(1);
    let (before, _) = libchan::sched::block_events();

    let c = Chan::<i32>::new(0);
    let tx = c.clone();
    let sender = thread::spawn(move || tx.send(7));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(c.recv(), Some(7));
    sender.join().unwrap();

    let (after, total_ns) = libchan::sched::block_events();
    libchan::sched::set_block_profile_rate(0);
    assert!(after > before, "parked send did not record a block event");
    assert!(total_ns > 0);
}
