use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Two-phase unit of background work: a dispatcher that finds work and
/// pushes it onto a bounded channel, and an executor that drains it.
#[async_trait]
pub trait TaskPipeline: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn dispatch(&self, tx: &mpsc::Sender<Self::Item>) -> Result<DispatchOutcome>;

    async fn execute(&self, rx: &mut mpsc::Receiver<Self::Item>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Work was pushed; the executor should run.
    Dispatched,
    /// Nothing to do; the runner closes until the next tick.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    ReadyToDispatch,
    ReadyToExecute,
    Closed,
}

/// Alternates dispatcher and executor over a bounded channel until the
/// dispatcher runs dry, either phase fails, or the runner is cancelled.
/// A closed runner is discarded; the owning worker starts a fresh one on
/// its next tick.
pub struct TaskRunner<P: TaskPipeline> {
    pipeline: Arc<P>,
    capacity: usize,
}

impl<P: TaskPipeline> TaskRunner<P> {
    pub fn new(capacity: usize, pipeline: Arc<P>) -> Self {
        Self { pipeline, capacity }
    }

    pub async fn run(&self, cancel: &CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<P::Item>(self.capacity);
        let mut state = RunnerState::ReadyToDispatch;

        loop {
            match state {
                RunnerState::ReadyToDispatch => {
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => return,
                        outcome = self.pipeline.dispatch(&tx) => outcome,
                    };
                    state = match outcome {
                        Ok(DispatchOutcome::Dispatched) => RunnerState::ReadyToExecute,
                        Ok(DispatchOutcome::Idle) => RunnerState::Closed,
                        Err(e) => {
                            warn!("dispatcher failed: {e}");
                            RunnerState::Closed
                        }
                    };
                }
                RunnerState::ReadyToExecute => {
                    // Execution is not interrupted mid-flight; cancellation
                    // takes effect at the next dispatch boundary.
                    state = match self.pipeline.execute(&mut rx).await {
                        Ok(()) => RunnerState::ReadyToDispatch,
                        Err(e) => {
                            warn!("executor failed: {e}");
                            RunnerState::Closed
                        }
                    };
                }
                RunnerState::Closed => return,
            }
        }
    }
}

/// Pairs a periodic ticker with a pipeline; each tick runs a fresh
/// runner to completion.
pub struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<P: TaskPipeline>(
        name: &str,
        interval: Duration,
        capacity: usize,
        pipeline: Arc<P>,
        cancel: CancellationToken,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let worker_name = name.to_string();

        let handle = tokio::spawn(async move {
            // First tick after one full period, matching ticker semantics.
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let runner = TaskRunner::new(capacity, pipeline);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("worker {worker_name} tick");
                        runner.run(&cancel).await;
                    }
                }
            }
            flag.store(false, Ordering::Release);
            debug!("worker {worker_name} stopped");
        });

        Self {
            name: name.to_string(),
            running,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait for the worker task to exit. Cancellation is signalled through
    /// the token handed to `spawn`.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("worker {} task failed: {e:?}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Dispatches `rounds` batches of one item, then reports idle.
    struct CountingPipeline {
        rounds: AtomicUsize,
        executed: AtomicUsize,
    }

    #[async_trait]
    impl TaskPipeline for CountingPipeline {
        type Item = usize;

        async fn dispatch(&self, tx: &mpsc::Sender<usize>) -> Result<DispatchOutcome> {
            let left = self.rounds.load(Ordering::Acquire);
            if left == 0 {
                return Ok(DispatchOutcome::Idle);
            }
            self.rounds.store(left - 1, Ordering::Release);
            tx.send(left)
                .await
                .map_err(|e| crate::error::StreamError::Task(e.to_string()))?;
            Ok(DispatchOutcome::Dispatched)
        }

        async fn execute(&self, rx: &mut mpsc::Receiver<usize>) -> Result<()> {
            while rx.try_recv().is_ok() {
                self.executed.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }

    struct FailingPipeline {
        dispatched: AtomicUsize,
    }

    #[async_trait]
    impl TaskPipeline for FailingPipeline {
        type Item = ();

        async fn dispatch(&self, tx: &mpsc::Sender<()>) -> Result<DispatchOutcome> {
            self.dispatched.fetch_add(1, Ordering::AcqRel);
            tx.send(())
                .await
                .map_err(|e| crate::error::StreamError::Task(e.to_string()))?;
            Ok(DispatchOutcome::Dispatched)
        }

        async fn execute(&self, _rx: &mut mpsc::Receiver<()>) -> Result<()> {
            Err(crate::error::StreamError::Task("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_runner_drains_until_idle() {
        let pipeline = Arc::new(CountingPipeline {
            rounds: AtomicUsize::new(3),
            executed: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(4, Arc::clone(&pipeline));
        runner.run(&CancellationToken::new()).await;

        assert_eq!(pipeline.executed.load(Ordering::Acquire), 3);
        assert_eq!(pipeline.rounds.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_runner_closes_on_executor_error() {
        let pipeline = Arc::new(FailingPipeline {
            dispatched: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(1, Arc::clone(&pipeline));
        runner.run(&CancellationToken::new()).await;

        // One dispatch, one failing execute, then closed. No retry loop.
        assert_eq!(pipeline.dispatched.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_runner_respects_cancellation() {
        struct BlockedPipeline;

        #[async_trait]
        impl TaskPipeline for BlockedPipeline {
            type Item = ();

            async fn dispatch(&self, _tx: &mpsc::Sender<()>) -> Result<DispatchOutcome> {
                // Never completes; cancellation must win the select.
                std::future::pending::<()>().await;
                unreachable!()
            }

            async fn execute(&self, _rx: &mut mpsc::Receiver<()>) -> Result<()> {
                Ok(())
            }
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = TaskRunner::new(1, Arc::new(BlockedPipeline));
        // Completes immediately instead of hanging on the dispatcher.
        runner.run(&cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_ticks_and_stops() {
        let pipeline = Arc::new(CountingPipeline {
            rounds: AtomicUsize::new(2),
            executed: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let worker = Worker::spawn(
            "counting",
            Duration::from_millis(50),
            4,
            Arc::clone(&pipeline),
            cancel.clone(),
        );
        assert!(worker.is_running());

        // No tick fires before the first full period.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pipeline.executed.load(Ordering::Acquire), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pipeline.executed.load(Ordering::Acquire), 2);

        cancel.cancel();
        worker.join().await;
    }

    /// Per-tick drain: items queued between ticks come out on the next one.
    struct QueuePipeline {
        queue: Mutex<Vec<&'static str>>,
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl TaskPipeline for QueuePipeline {
        type Item = &'static str;

        async fn dispatch(&self, tx: &mpsc::Sender<&'static str>) -> Result<DispatchOutcome> {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                return Ok(DispatchOutcome::Idle);
            }
            for item in queue.drain(..) {
                let _ = tx.try_send(item);
            }
            Ok(DispatchOutcome::Dispatched)
        }

        async fn execute(&self, rx: &mut mpsc::Receiver<&'static str>) -> Result<()> {
            while let Ok(item) = rx.try_recv() {
                self.seen.lock().unwrap().push(item);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_picks_up_late_work() {
        let pipeline = Arc::new(QueuePipeline {
            queue: Mutex::new(vec![]),
            seen: Mutex::new(vec![]),
        });
        let cancel = CancellationToken::new();
        let worker = Worker::spawn(
            "queue",
            Duration::from_millis(30),
            8,
            Arc::clone(&pipeline),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(pipeline.seen.lock().unwrap().is_empty());

        pipeline.queue.lock().unwrap().push("late");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(*pipeline.seen.lock().unwrap(), vec!["late"]);

        cancel.cancel();
        worker.join().await;
    }
}
