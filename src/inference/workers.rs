//! Lightweight worker pool for CPU bound feature extraction and fitting.
//!
//! Jobs run on dedicated OS threads so async callers never block their runtime;
//! each submission returns a handle the caller awaits for the result.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::common::error::{MlaasError, MlaasResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Pool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// Pending result of a submitted job.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Suspend until the job finishes. Dropping the handle instead abandons the
    /// result; the job itself still runs to completion.
    pub async fn wait(self) -> MlaasResult<T> {
        self.rx.await.map_err(|_| MlaasError::WorkerUnavailable)
    }
}

impl Pool {
    pub fn new(size: usize) -> MlaasResult<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let shared_rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let rx = Arc::clone(&shared_rx);
            let handle = thread::Builder::new()
                .name(format!("mlaas-worker-{i}"))
                .spawn(move || loop {
                    let job = match rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => break,
                    };

                    match job {
                        Ok(job) => {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(worker = i, "job panicked");
                            }
                        }
                        Err(_) => break,
                    }
                })
                .map_err(|e| MlaasError::io("spawning worker thread", e))?;
            workers.push(handle);
        }

        debug!(workers = workers.len(), "worker pool started");
        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F, T>(&self, job: F) -> MlaasResult<JobHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // the receiver may be gone if the caller stopped waiting
            let _ = result_tx.send(job());
        });
        self.tx
            .as_ref()
            .ok_or(MlaasError::WorkerUnavailable)?
            .send(job)
            .map_err(|_| MlaasError::WorkerUnavailable)?;
        Ok(JobHandle { rx })
    }
}

impl Pool {
    /// Close the queue and block until every queued job has run.
    pub fn join(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Pool {
    /// Close the queue; queued jobs still drain. Outside an async runtime the
    /// workers are joined. Inside one they are detached, since joining would
    /// stall a runtime thread behind long fits.
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            drop(self.tx.take());
            if !self.workers.is_empty() {
                debug!(workers = self.workers.len(), "worker pool detached");
            }
            self.workers.clear();
        } else {
            self.close_and_join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn jobs_deliver_results() {
        let pool = Pool::new(2).unwrap();
        let a = pool.submit(|| 2 + 2).unwrap();
        let b = pool.submit(|| "done").unwrap();
        assert_eq!(a.wait().await.unwrap(), 4);
        assert_eq!(b.wait().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn panicking_job_reports_unavailable_and_pool_survives() {
        let pool = Pool::new(1).unwrap();
        let bad = pool.submit(|| -> u8 { panic!("boom") }).unwrap();
        assert!(matches!(bad.wait().await, Err(MlaasError::WorkerUnavailable)));
        assert_eq!(pool.submit(|| 7).unwrap().wait().await.unwrap(), 7);
    }

    #[test]
    fn drop_drains_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = Pool::new(2).unwrap();
            for _ in 0..16 {
                let counter = Arc::clone(&counter);
                let _ = pool.submit(move || counter.fetch_add(1, Ordering::SeqCst));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn drop_inside_runtime_does_not_wait_for_running_jobs() {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let pool = Pool::new(1).unwrap();
        let job = pool
            .submit(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                "finished"
            })
            .unwrap();
        started_rx.await.unwrap();

        // the job is still blocked, so a joining drop would hang here
        drop(pool);
        release_tx.send(()).unwrap();
        assert_eq!(job.wait().await.unwrap(), "finished");
    }

    #[tokio::test]
    async fn join_runs_queued_jobs_first() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(2).unwrap();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let _ = pool.submit(move || counter.fetch_add(1, Ordering::SeqCst));
        }
        tokio::task::spawn_blocking(move || pool.join()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
