//! Generic bounded worker pool.
//!
//! Both pipelines run on the same pool type: the archiver feeds it
//! `FileEntry` values, the extractor feeds it archive entry references. Tasks
//! flow through a bounded crossbeam channel; `enqueue` exerts back-pressure
//! when the channel is full. The first executor error cancels the shared
//! token and becomes the pool's terminal result; remaining workers finish
//! their current task and exit at the next task boundary.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::ArchiverError;

const MIN_CONCURRENCY: usize = 1;

type Executor<T> = Arc<dyn Fn(T) -> Result<(), ArchiverError> + Send + Sync>;

pub struct WorkerPool<T: Send + 'static> {
    executor: Executor<T>,
    concurrency: usize,
    capacity: usize,
    tasks: Mutex<Option<Sender<T>>>,
    workers: Mutex<Vec<JoinHandle<Result<(), ArchiverError>>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool that runs `executor` on `concurrency` workers, fed by a
    /// channel holding at most `capacity` queued tasks. Errors if
    /// `concurrency` is less than one.
    pub fn new<F>(concurrency: usize, capacity: usize, executor: F) -> Result<Self, ArchiverError>
    where
        F: Fn(T) -> Result<(), ArchiverError> + Send + Sync + 'static,
    {
        if concurrency < MIN_CONCURRENCY {
            return Err(ArchiverError::Config(
                "number of workers must be greater than 0".into(),
            ));
        }

        Ok(WorkerPool {
            executor: Arc::new(executor),
            concurrency,
            capacity,
            tasks: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the workers against a fresh task channel. A pool that has been
    /// closed may be started again.
    pub fn start(&self, token: &CancelToken) {
        let (sender, receiver) = bounded(self.capacity);
        *self.tasks.lock().unwrap() = Some(sender);

        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.concurrency {
            let receiver = receiver.clone();
            let executor = self.executor.clone();
            let token = token.clone();
            workers.push(thread::spawn(move || listen(receiver, executor, token)));
        }
    }

    /// Hands a task to the pool, blocking while the channel is full.
    ///
    /// # Panics
    ///
    /// Panics if the pool has not been started. Calling `enqueue` after
    /// `close` is a programmer error.
    pub fn enqueue(&self, task: T) {
        let sender = self
            .tasks
            .lock()
            .unwrap()
            .clone()
            .expect("enqueue on a worker pool that is not started");

        // A send only fails once every worker has exited, which means the
        // pipeline is already canceled; the task is dropped.
        let _ = sender.send(task);
    }

    /// Number of tasks queued but not yet taken by a worker.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .as_ref()
            .map(|sender| sender.len())
            .unwrap_or(0)
    }

    /// Closes the task channel, waits for every worker to drain and exit, and
    /// returns the first executor error. Executor errors take precedence over
    /// cancellation results. Closing an already-closed pool is a no-op; use
    /// `start` to reuse the pool instead.
    pub fn close(&self) -> Result<(), ArchiverError> {
        self.tasks.lock().unwrap().take();

        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let mut first_err: Option<ArchiverError> = None;
        let mut canceled = false;
        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(ArchiverError::Canceled)) => canceled = true,
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(ArchiverError::Other("worker thread panicked".into()));
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None if canceled => Err(ArchiverError::Canceled),
            None => Ok(()),
        }
    }
}

/// Collapses stage results into the first real error, preferring executor
/// failures over cancellation fallout so callers see the cause rather than a
/// secondary `Canceled`.
pub(crate) fn first_error<const N: usize>(
    results: [Result<(), ArchiverError>; N],
) -> Result<(), ArchiverError> {
    let mut canceled = false;
    let mut first: Option<ArchiverError> = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(ArchiverError::Canceled) => canceled = true,
            Err(err) => {
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
    }
    match first {
        Some(err) => Err(err),
        None if canceled => Err(ArchiverError::Canceled),
        None => Ok(()),
    }
}

fn listen<T>(
    receiver: Receiver<T>,
    executor: Executor<T>,
    token: CancelToken,
) -> Result<(), ArchiverError> {
    for task in receiver.iter() {
        if let Err(err) = executor(task) {
            token.cancel_with(&err);
            return Err(err);
        }
        if token.is_canceled() {
            return Err(ArchiverError::Canceled);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn rejects_zero_workers() {
        let result = WorkerPool::<usize>::new(0, 1, |_| Ok(()));

        assert!(matches!(result, Err(ArchiverError::Config(_))));
    }

    #[test]
    fn queued_tasks_count_as_pending() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let pool = WorkerPool::new(1, 2, move |_: usize| {
            gate_rx.recv().ok();
            Ok(())
        })
        .unwrap();
        pool.start(&CancelToken::new());

        // The worker blocks on the first task; the second waits in the queue.
        pool.enqueue(1);
        pool.enqueue(2);
        while pool.pending() > 1 {
            thread::yield_now();
        }
        assert_eq!(pool.pending(), 1);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        pool.close().unwrap();
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn workers_process_tasks_to_completion() {
        let processed = Arc::new(AtomicUsize::new(0));
        let seen = processed.clone();
        let pool = WorkerPool::new(2, 1, move |n: usize| {
            seen.fetch_add(n, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        pool.start(&CancelToken::new());

        for _ in 0..8 {
            pool.enqueue(1);
        }
        pool.close().unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn can_be_closed_and_restarted() {
        let processed = Arc::new(AtomicUsize::new(0));
        let seen = processed.clone();
        let pool = WorkerPool::new(1, 1, move |_: usize| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        pool.start(&CancelToken::new());
        pool.enqueue(1);
        pool.close().unwrap();

        pool.start(&CancelToken::new());
        pool.enqueue(2);
        pool.close().unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_executor_error_stops_the_pool() {
        let token = CancelToken::new();
        let pool = WorkerPool::new(2, 1, |n: usize| {
            if n == 1 {
                return Err(ArchiverError::Format("task is corrupt".into()));
            }
            Ok(())
        })
        .unwrap();
        pool.start(&token);

        pool.enqueue(0);
        pool.enqueue(0);
        pool.enqueue(1);

        let err = pool.close().unwrap_err();
        assert!(matches!(err, ArchiverError::Format(_)));
        assert!(token.is_canceled());
    }

    #[test]
    fn external_cancellation_surfaces_as_canceled() {
        let token = CancelToken::new();
        let pool = WorkerPool::new(1, 1, |_: usize| Ok(())).unwrap();
        pool.start(&token);

        pool.enqueue(1);
        token.cancel();
        // Give the worker a task boundary to observe the token.
        pool.enqueue(2);

        assert!(matches!(pool.close(), Err(ArchiverError::Canceled)));
    }
}
