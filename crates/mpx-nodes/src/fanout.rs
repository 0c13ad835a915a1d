//! Bounded, order-preserving parallel execution
//!
//! Items are handed to a fixed set of scoped worker threads through a
//! channel of indices. Each result is written into the slot of its index, so
//! the output order matches the input order whatever order items finish in.
//! The first failing item aborts the batch.

use mpx_client::CancelToken;
use mpx_core::{MpxError, Result};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives `(done, total)` after every completed item
pub trait ProgressSink: Send + Sync {
    fn update(&self, done: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn update(&self, done: usize, total: usize) {
        self(done, total)
    }
}

/// Reports progress as `info` events
#[derive(Debug, Clone, Default)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressSink for LogProgress {
    fn update(&self, done: usize, total: usize) {
        tracing::info!(label = %self.label, done, total, "progress");
    }
}

/// What an item's operation knows about its place in the batch
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub index: usize,
    pub total: usize,
    /// Tripped when another item fails or the caller cancels
    pub cancel: CancelToken,
}

/// Run `op` over `items` on at most `workers` threads.
pub fn run_parallel<I, T, F>(
    items: &[I],
    workers: usize,
    progress: &dyn ProgressSink,
    op: F,
) -> Result<Vec<T>>
where
    I: Sync,
    T: Send,
    F: Fn(&I, &ItemContext) -> Result<T> + Sync,
{
    run_parallel_under(&CancelToken::new(), items, workers, progress, op)
}

/// Like [`run_parallel`], aborting as well when `parent` is cancelled
pub fn run_parallel_under<I, T, F>(
    parent: &CancelToken,
    items: &[I],
    workers: usize,
    progress: &dyn ProgressSink,
    op: F,
) -> Result<Vec<T>>
where
    I: Sync,
    T: Send,
    F: Fn(&I, &ItemContext) -> Result<T> + Sync,
{
    if workers == 0 {
        return Err(MpxError::validation("worker count must be at least 1"));
    }
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let batch = parent.child();
    let done = AtomicUsize::new(0);
    let slots: Vec<Mutex<Option<T>>> = (0..total).map(|_| Mutex::new(None)).collect();
    let first_error: Mutex<Option<MpxError>> = Mutex::new(None);

    let (sender, receiver) = crossbeam::channel::bounded(total);
    for index in 0..total {
        sender
            .send(index)
            .map_err(|e| MpxError::WorkerError(format!("failed to queue item: {}", e)))?;
    }
    drop(sender);

    let n_workers = workers.min(total);
    tracing::debug!(total, workers = n_workers, "fan-out started");

    let scoped = crossbeam::thread::scope(|scope| {
        for _ in 0..n_workers {
            let receiver = receiver.clone();
            let (batch, done, slots, first_error, op) =
                (&batch, &done, &slots, &first_error, &op);

            scope.spawn(move |_| {
                while let Ok(index) = receiver.recv() {
                    if batch.is_cancelled() {
                        break;
                    }
                    let ctx = ItemContext {
                        index,
                        total,
                        cancel: batch.clone(),
                    };

                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(&items[index], &ctx)))
                        .unwrap_or_else(|payload| {
                            Err(MpxError::WorkerError(format!(
                                "item {} panicked: {}",
                                index,
                                panic_message(payload.as_ref())
                            )))
                        });

                    match outcome {
                        Ok(value) => {
                            *slots[index].lock() = Some(value);
                            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                            progress.update(n, total);
                        }
                        Err(e) => {
                            tracing::warn!(index, error = %e, "item failed, aborting batch");
                            first_error.lock().get_or_insert(e);
                            batch.cancel();
                            break;
                        }
                    }
                }
            });
        }
    });

    if let Err(payload) = scoped {
        return Err(MpxError::WorkerError(format!(
            "worker thread panicked: {}",
            panic_message(payload.as_ref())
        )));
    }

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }
    if parent.is_cancelled() {
        return Err(MpxError::Cancelled);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.into_inner()
                .ok_or_else(|| MpxError::WorkerError(format!("item {} produced no result", index)))
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet(_: usize, _: usize) {}

    #[test]
    fn test_empty_input() {
        let items: Vec<u32> = Vec::new();
        let out = run_parallel(&items, 4, &quiet, |x, _| Ok(*x)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = run_parallel(&[1], 0, &quiet, |x: &i32, _| Ok(*x)).unwrap_err();
        assert!(matches!(err, MpxError::ValidationError(_)));
    }

    #[test]
    fn test_sequential_with_one_worker() {
        let seen = Mutex::new(Vec::new());
        let out = run_parallel(&["a", "b", "c"], 1, &quiet, |s, ctx| {
            seen.lock().push(ctx.index);
            Ok(s.to_uppercase())
        })
        .unwrap();
        assert_eq!(out, vec!["A", "B", "C"]);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panic_becomes_worker_error() {
        let err = run_parallel(&[1, 2], 2, &quiet, |x: &i32, _| {
            if *x == 2 {
                panic!("bad item");
            }
            Ok(*x)
        })
        .unwrap_err();
        match err {
            MpxError::WorkerError(msg) => assert!(msg.contains("bad item")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parent_cancel_stops_batch() {
        let parent = CancelToken::new();
        parent.cancel();
        let err = run_parallel_under(&parent, &[1, 2, 3], 2, &quiet, |x: &i32, _| Ok(*x))
            .unwrap_err();
        assert!(matches!(err, MpxError::Cancelled));
    }

    #[test]
    fn test_failure_trips_item_token() {
        let observed = AtomicUsize::new(0);
        let err = run_parallel(&[0u32, 1], 2, &quiet, |x, ctx| {
            if *x == 0 {
                return Err(MpxError::Transport("down".into()));
            }
            // waits for the sibling failure to trip the shared token
            ctx.cancel.sleep(Duration::from_secs(10))?;
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(*x)
        })
        .unwrap_err();
        assert!(matches!(err, MpxError::Transport(_)));
        assert_eq!(observed.load(Ordering::SeqCst), 0);
    }
}
