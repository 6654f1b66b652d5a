#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quay_core::{OperationQueue, QueueStats};
use tokio::time::Instant;

/// Poll the queue's stats (in 1ms steps of the paused clock) until `pred` holds.
pub async fn wait_for_stats(queue: &OperationQueue, pred: impl Fn(&QueueStats) -> bool) {
    for _ in 0..60_000 {
        if pred(&queue.stats()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never held, last stats: {:?}", queue.stats());
}

/// Invocation counter shared with an `invoke` closure.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ordered log of labelled events with the (paused) time they happened.
#[derive(Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<(String, Instant)>>>);

impl Timeline {
    pub fn record(&self, label: impl Into<String>) {
        self.0.lock().unwrap().push((label.into(), Instant::now()));
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.0.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

/// An `invoke` closure that always fails with a transient error.
pub fn always_failing(
    counter: Counter,
) -> impl FnMut() -> std::future::Ready<Result<(), String>> + Send + 'static {
    move || {
        counter.bump();
        std::future::ready(Err("503 service unavailable".to_string()))
    }
}
