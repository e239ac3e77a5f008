use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker task failed: {0}")]
    WorkerFailed(#[from] JoinError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub processed: usize,
    pub halted: bool,
}

/// Fixed set of workers fed through a bounded queue.
///
/// A handler returning `ControlFlow::Break` raises the halt flag: workers
/// finish what they hold, stop pulling, and `run` returns once all of them
/// have exited.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<T, F, Fut>(&self, items: Vec<T>, handler: F) -> Result<PoolReport, PoolError>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>(self.concurrency);
        let rx = Arc::new(Mutex::new(rx));
        let halt = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let mut tasks = JoinSet::new();
        let producer_halt = halt.clone();
        tasks.spawn(async move {
            for item in items {
                if producer_halt.load(Ordering::SeqCst) {
                    break;
                }
                // Fails only once every worker has exited.
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        for _ in 0..self.concurrency {
            let rx = rx.clone();
            let halt = halt.clone();
            let processed = processed.clone();
            let handler = handler.clone();
            tasks.spawn(async move {
                loop {
                    if halt.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = rx.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };
                    processed.fetch_add(1, Ordering::SeqCst);
                    if handler(item).await.is_break() {
                        halt.store(true, Ordering::SeqCst);
                    }
                }
            });
        }
        drop(rx);

        // Dropping the set would abort workers still holding an item.
        let mut first_failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                first_failure.get_or_insert(err);
            }
        }
        if let Some(err) = first_failure {
            return Err(err.into());
        }

        Ok(PoolReport {
            processed: processed.load(Ordering::SeqCst),
            halted: halt.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn processes_every_item() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = WorkerPool::new(3)
            .run((0..25).collect(), move |item: u32| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(item);
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report, PoolReport { processed: 25, halted: false });
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn never_exceeds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max) = (in_flight.clone(), peak.clone());
        WorkerPool::new(2)
            .run((0..12).collect(), move |_: u32| {
                let (current, max) = (current.clone(), max.clone());
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn break_halts_remaining_work() {
        let report = WorkerPool::new(2)
            .run((0..200).collect(), |item: u32| async move {
                if item == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await
            .unwrap();

        assert!(report.halted);
        assert!(report.processed < 200);
    }

    #[tokio::test]
    async fn empty_input_finishes_immediately() {
        let report = WorkerPool::new(0)
            .run(Vec::<u32>::new(), |_| async { ControlFlow::Continue(()) })
            .await
            .unwrap();
        assert_eq!(report, PoolReport::default());
    }

    #[tokio::test]
    async fn panicking_worker_is_reported() {
        let result = WorkerPool::new(1)
            .run(vec![1u32], |item: u32| async move {
                if item == 1 {
                    panic!("worker blew up");
                }
                ControlFlow::Continue(())
            })
            .await;
        assert!(matches!(result, Err(PoolError::WorkerFailed(_))));
    }

    #[tokio::test]
    async fn panic_waits_for_workers_holding_items() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let result = WorkerPool::new(2)
            .run(vec![0u32, 1], move |item: u32| {
                let flag = flag.clone();
                async move {
                    if item == 0 {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        panic!("worker blew up");
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    flag.store(true, Ordering::SeqCst);
                    ControlFlow::Continue(())
                }
            })
            .await;

        assert!(matches!(result, Err(PoolError::WorkerFailed(_))));
        assert!(finished.load(Ordering::SeqCst));
    }
}
