//! Background worker threads
//!
//! Runs blocking jobs off the affinity thread. Jobs complete their slot from
//! the worker, so worker-affine continuations run there too.

use crate::error::{BridgeError, BridgeResult};
use crate::scheduler::invoke_guarded;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

/// A unit of background work
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Fixed set of worker threads fed by one channel
pub(crate) struct BackgroundPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl BackgroundPool {
    /// Start `size` workers
    pub(crate) fn start(size: usize) -> BridgeResult<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("tickbridge-bg-{}", id))
                .spawn(move || Self::run_loop(rx))
                .map_err(|e| BridgeError::WorkerSpawn(e.to_string()))?;
            workers.push(handle);
        }

        tracing::debug!(workers = size, "background pool started");
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        })
    }

    fn run_loop(rx: Receiver<Job>) {
        // Exits once every sender is gone
        while let Ok(job) = rx.recv() {
            invoke_guarded("background job", job);
        }
    }

    /// Queue a job
    pub(crate) fn submit(&self, job: Job) -> BridgeResult<()> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(BridgeError::ShutDown);
        };
        tx.send(job).map_err(|_| BridgeError::ShutDown)
    }

    /// Whether jobs are still accepted
    pub(crate) fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Stop accepting jobs and join the workers after they finish queued work
    ///
    /// A worker calling this (from a job or continuation) is not joined.
    pub(crate) fn shutdown(&self) {
        drop(self.tx.lock().take());

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("background worker panicked");
            }
        }
        tracing::debug!("background pool stopped");
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        // Workers exit on their own once the channel closes
        drop(self.tx.lock().take());
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("size", &self.size)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_on_named_workers() {
        let pool = BackgroundPool::start(2).unwrap();
        let (tx, rx) = channel::unbounded();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send(name).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..4 {
            let name = rx.recv().unwrap().unwrap();
            assert!(name.starts_with("tickbridge-bg-"));
        }
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let pool = BackgroundPool::start(1).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = count.clone();
            pool.submit(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(!pool.is_running());
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(BridgeError::ShutDown)
        ));
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let pool = BackgroundPool::start(1).unwrap();
        let (tx, rx) = channel::unbounded();
        pool.submit(Box::new(|| panic!("job failure"))).unwrap();
        pool.submit(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv().unwrap();
        pool.shutdown();
    }
}
