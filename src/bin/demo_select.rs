// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fan-in demo: N workers each produce on their own rendezvous channel;
// the main routine selects across all of them until every channel is
// closed.
//
// Usage:
//   demo_select [workers] [messages_per_worker]

use std::thread;

use libchan::{Chan, Select};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let workers: usize = args.get(1).map_or(3, |s| s.parse().expect("workers"));
    let per_worker: u64 = args.get(2).map_or(5, |s| s.parse().expect("messages"));

    let chans: Vec<Chan<u64>> = (0..workers).map(|_| Chan::new(0)).collect();

    let mut handles = Vec::new();
    for (w, ch) in chans.iter().enumerate() {
        let tx = ch.clone();
        handles.push(thread::spawn(move || {
            for i in 0..per_worker {
                tx.send(w as u64 * 1000 + i);
            }
            tx.close();
        }));
    }

    let mut open = vec![true; workers];
    let mut received = 0u64;
    while open.iter().any(|&o| o) {
        let mut vals = vec![0u64; workers];
        let mut oks = vec![false; workers];

        let mut sel = Select::new(workers);
        for (i, ch) in chans.iter().enumerate() {
            if open[i] {
                unsafe {
                    sel.recv(
                        ch.as_raw(),
                        (&mut vals[i] as *mut u64).cast(),
                        &mut oks[i],
                        i,
                    );
                }
            }
        }
        let idx = sel.go();
        if oks[idx] {
            received += 1;
            println!("worker {idx} -> {}", vals[idx]);
        } else {
            println!("worker {idx} done");
            open[idx] = false;
        }
    }

    for h in handles {
        h.join().unwrap();
    }
    println!("received {received} messages from {workers} workers");
}
