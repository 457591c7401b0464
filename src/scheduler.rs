//! Bounded-concurrency job runner
//!
//! Spawns a fixed pool of workers that pull items off a shared FIFO queue
//! until it drains. A panic in one item's future is caught and surfaced to
//! the caller's handler, so one bad job never takes down its siblings.

use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Run `run_one` over every item with at most `limit` in flight. Items start
/// in queue order; completion order is whatever the work dictates. When
/// `cancel` fires, workers stop dequeuing but in-flight items run to
/// completion. Returns once every started worker has exited.
pub async fn drain<T, F, Fut>(items: Vec<T>, limit: usize, cancel: CancellationToken, run_one: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if items.is_empty() {
        return;
    }
    let workers = limit.max(1).min(items.len());
    let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<T>>()));
    let run_one = Arc::new(run_one);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let run_one = Arc::clone(&run_one);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let item = match pop_front(&queue) {
                    Some(item) => item,
                    None => break,
                };
                // Lock is released before this await; a panicking item only
                // ends its own future.
                let _ = AssertUnwindSafe(run_one(item)).catch_unwind().await;
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

fn pop_front<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap().pop_front()
}
