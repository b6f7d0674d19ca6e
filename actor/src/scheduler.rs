// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler
//!
//! The scheduler owns the run queue: cells with pending work wait there in FIFO order. A
//! dispatcher task pops them and runs each turn as its own task on the tokio worker pool, so
//! different actors run in parallel and a handler awaiting another actor only suspends its own
//! turn.
//!
//! Each cell carries an [`ExecutionToken`]. A cell enters the run queue only on the
//! idle -> scheduled transition of its token, and the token is released only after the turn
//! is over, so a cell is never run by two workers at the same time.
//!
//! A turn processes at most `batch_size` user messages. A cell that still has work afterwards
//! goes back to the tail of the run queue, which keeps busy actors from starving the others.
//!

use futures::future::BoxFuture;
use tokio::{select, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Right to run a cell. Held by at most one turn at a time.
#[derive(Debug, Default)]
pub(crate) struct ExecutionToken(AtomicBool);

impl ExecutionToken {
    /// Idle -> scheduled. Only the winner may enqueue the cell.
    pub(crate) fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    /// The cell gave the worker back; it may still have work.
    Yield,
    /// The cell is gone. Its token is never released again.
    Terminated,
}

/// Something the scheduler can run: an actor cell, seen without its actor type.
pub(crate) trait Runnable: Send + Sync + 'static {
    fn token(&self) -> &ExecutionToken;

    /// True if a turn would find something to do.
    fn has_work(&self) -> bool;

    /// Runs one turn of at most `batch` user messages.
    fn run_turn(self: Arc<Self>, batch: usize) -> BoxFuture<'static, Turn>;
}

/// Handle on the run queue.
#[derive(Clone)]
pub(crate) struct Scheduler {
    queue: mpsc::UnboundedSender<Arc<dyn Runnable>>,
    batch_size: usize,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Scheduler {
    /// Creates the run queue and spawns the dispatcher.
    pub(crate) fn start(batch_size: usize) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            queue,
            batch_size: batch_size.max(1),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        };
        let dispatcher = scheduler.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(receiver).await;
        });
        scheduler
    }

    async fn dispatch(
        self,
        mut receiver: mpsc::UnboundedReceiver<Arc<dyn Runnable>>,
    ) {
        debug!("Scheduler started.");
        loop {
            select! {
                _ = self.token.cancelled() => break,
                next = receiver.recv() => {
                    let Some(runnable) = next else {
                        break;
                    };
                    let scheduler = self.clone();
                    self.tracker.spawn(async move {
                        scheduler.turn(runnable).await;
                    });
                }
            }
        }
        debug!("Scheduler stopped.");
    }

    async fn turn(&self, runnable: Arc<dyn Runnable>) {
        match runnable.clone().run_turn(self.batch_size).await {
            Turn::Terminated => {}
            Turn::Yield => {
                if runnable.has_work() {
                    // The token travels with the cell to its next turn.
                    self.push(runnable);
                } else {
                    runnable.token().release();
                    // Work may have arrived between the check and the release.
                    if runnable.has_work() {
                        self.schedule(runnable);
                    }
                }
            }
        }
    }

    /// Puts the cell on the run queue unless it is already scheduled or running.
    pub(crate) fn schedule(&self, runnable: Arc<dyn Runnable>) {
        if runnable.token().try_acquire() {
            self.push(runnable);
        }
    }

    fn push(&self, runnable: Arc<dyn Runnable>) {
        if self.queue.send(runnable).is_err() {
            debug!("Scheduler is stopped, turn dropped.");
        }
    }

    /// Stops dispatching and waits for the turns in flight.
    pub(crate) async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingRunnable {
        token: ExecutionToken,
        work: AtomicUsize,
        running: AtomicBool,
        overlaps: AtomicUsize,
        turns: AtomicUsize,
    }

    impl Runnable for CountingRunnable {
        fn token(&self) -> &ExecutionToken {
            &self.token
        }

        fn has_work(&self) -> bool {
            self.work.load(Ordering::SeqCst) > 0
        }

        fn run_turn(self: Arc<Self>, batch: usize) -> BoxFuture<'static, Turn> {
            async move {
                if self.running.swap(true, Ordering::SeqCst) {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                self.turns.fetch_add(1, Ordering::SeqCst);
                for _ in 0..batch {
                    tokio::task::yield_now().await;
                    let taken = self.work.fetch_update(
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                        |work| work.checked_sub(1),
                    );
                    if taken.is_err() {
                        break;
                    }
                }
                self.running.store(false, Ordering::SeqCst);
                Turn::Yield
            }
            .boxed()
        }
    }

    #[test]
    fn test_execution_token() {
        let token = ExecutionToken::default();
        assert!(token.try_acquire());
        assert!(!token.try_acquire());
        assert!(token.is_held());
        token.release();
        assert!(token.try_acquire());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cell_never_runs_twice() {
        let scheduler = Scheduler::start(4);
        let runnable = Arc::new(CountingRunnable::default());

        let mut producers = Vec::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            let runnable = runnable.clone();
            producers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    runnable.work.fetch_add(1, Ordering::SeqCst);
                    scheduler.schedule(runnable.clone());
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while runnable.has_work() || runnable.token.is_held() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(runnable.overlaps.load(Ordering::SeqCst), 0);
        // 400 units of work in batches of at most 4.
        assert!(runnable.turns.load(Ordering::SeqCst) >= 100);
        scheduler.shutdown().await;
    }
}
