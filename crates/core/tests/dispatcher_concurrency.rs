//! Multi-threaded scenarios for the request dispatcher.
//!
//! These tests drive the dispatcher the way a gateway session does:
//! - foreground threads allocate, register and block on their own ids
//! - one background thread plays the gateway, delivering rows and completions
//!   in an arbitrary interleaving

use ibkr_bridge_core::{Dispatcher, GatewayEvent, RequestId, WaitOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// =============================================================================
// Helper Functions
// =============================================================================

/// Deterministic shuffle so failures are reproducible.
fn scramble<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let j = (seed >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}

fn rows_for(req_id: RequestId) -> Vec<String> {
    (0..3).map(|n| format!("{req_id}-row-{n}")).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_concurrent_ids_are_pairwise_distinct() {
    let dispatcher = Arc::new(Dispatcher::<()>::default());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let ids: Vec<RequestId> = (0..250).map(|_| dispatcher.next_id().unwrap()).collect();
                assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
                ids
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(all.insert(id));
        }
    }
    assert_eq!(all.len(), 16 * 250);
}

#[test]
fn test_each_waiter_sees_only_its_own_results() {
    const WAITERS: usize = 24;

    let dispatcher = Arc::new(Dispatcher::<String>::default());
    let (id_tx, id_rx) = mpsc::channel();
    let registered = Arc::new(Barrier::new(WAITERS + 1));

    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let id_tx = id_tx.clone();
            let registered = Arc::clone(&registered);
            thread::spawn(move || {
                let req_id = dispatcher.next_id().unwrap();
                dispatcher.register(req_id);
                id_tx.send(req_id).unwrap();
                registered.wait();
                let outcome = dispatcher.collect(req_id, Duration::from_secs(10));
                (req_id, outcome)
            })
        })
        .collect();
    drop(id_tx);

    let gateway = {
        let dispatcher = Arc::clone(&dispatcher);
        let registered = Arc::clone(&registered);
        thread::spawn(move || {
            let ids: Vec<RequestId> = id_rx.iter().take(WAITERS).collect();
            registered.wait();

            // Interleave ids arbitrarily; each id's rows still go out in order.
            let mut slots: Vec<RequestId> = ids
                .iter()
                .flat_map(|&req_id| std::iter::repeat(req_id).take(3))
                .collect();
            scramble(&mut slots, 0x5eed);

            let mut next_row: HashMap<RequestId, usize> = HashMap::new();
            let ordered: Vec<GatewayEvent<String>> = slots
                .into_iter()
                .map(|req_id| {
                    let n = next_row.entry(req_id).or_insert(0);
                    let value = rows_for(req_id)[*n].clone();
                    *n += 1;
                    GatewayEvent::Row { req_id, value }
                })
                .collect();

            let mut ends: Vec<RequestId> = ids.clone();
            scramble(&mut ends, 0xfeed);
            for event in ordered {
                dispatcher.ingest(event);
            }
            for req_id in ends {
                dispatcher.ingest(GatewayEvent::End { req_id });
            }
        })
    };

    gateway.join().unwrap();
    for waiter in waiters {
        let (req_id, outcome) = waiter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Delivered(rows_for(req_id)));
    }
    assert_eq!(dispatcher.pending_count(), 0);
}

#[test]
fn test_interleaved_completion_wakes_only_finished_requests() {
    let dispatcher = Arc::new(Dispatcher::<u32>::default());
    let fast = dispatcher.next_id().unwrap();
    let slow = dispatcher.next_id().unwrap();
    dispatcher.register(fast);
    dispatcher.register(slow);

    let slow_waiter = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.wait(slow, Duration::from_millis(300)))
    };

    dispatcher.push_result(fast, 1);
    dispatcher.signal_complete(fast);
    assert_eq!(
        dispatcher.wait(fast, Duration::from_secs(1)),
        WaitOutcome::Delivered(vec![1])
    );

    assert_eq!(slow_waiter.join().unwrap(), WaitOutcome::TimedOut(vec![]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_waiters_with_background_gateway() {
    let dispatcher = Arc::new(Dispatcher::<u64>::default());
    let ids: Vec<RequestId> = (0..32).map(|_| dispatcher.next_id().unwrap()).collect();
    for &id in &ids {
        dispatcher.register(id);
    }

    let tasks: Vec<_> = ids
        .iter()
        .map(|&id| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                (id, dispatcher.collect_async(id, Duration::from_secs(10)).await)
            })
        })
        .collect();

    let gateway = {
        let dispatcher = Arc::clone(&dispatcher);
        let mut order = ids.clone();
        scramble(&mut order, 42);
        thread::spawn(move || {
            for id in order {
                dispatcher.push_result(id, id.get() as u64 * 10);
                dispatcher.signal_complete(id);
            }
        })
    };

    for task in tasks {
        let (id, outcome) = task.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Delivered(vec![id.get() as u64 * 10]));
    }
    gateway.join().unwrap();
}
