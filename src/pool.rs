//! Bounded, fail-fast worker pool (§4.6, §5).
//!
//! Grounded on the `ParallelHandler` thread pool used elsewhere in the pack
//! (`proxmox-proxmox-backup/src/tools/parallel_handler.rs`): a fixed number
//! of OS threads pull boxed closures off a `crossbeam_channel`, and a single
//! `Mutex<Option<String>>` records the first failure. This module adapts
//! that pattern to the exact contract §4.6 asks for: `try_submit` returns
//! an explicit [`Submission`] the caller's loop must act on, and `wait`
//! returns the first error, if any.
//!
//! The channel's bounded capacity *is* the semaphore of size N (§5):
//! submitting blocks until a worker frees a slot by finishing its current
//! job. A shared "stopped" flag is checked immediately before every send so
//! that, once any task has failed, further submissions are rejected instead
//! of being queued — in-flight jobs still run to completion (no
//! preemption), matching the cooperative-cancellation rule in §5.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Sender};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Debug, PartialEq, Eq)]
pub enum Submission {
    /// The job was accepted; keep submitting.
    Continue,
    /// A previous task has already failed; the caller must stop submitting
    /// and call [`WorkerPool::wait`].
    Stop,
}

struct Shared {
    failed: Mutex<Option<String>>,
    calls_count: AtomicUsize,
}

impl Shared {
    fn record_failure(&self, message: String) {
        let mut guard = self.failed.lock().unwrap();
        if guard.is_none() {
            *guard = Some(message);
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.lock().unwrap().is_some()
    }
}

pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawns `capacity` worker threads, each pulling jobs off a channel of
    /// the same capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "worker pool capacity must be positive");

        let (job_tx, job_rx) = bounded::<Job>(capacity);
        let shared = Arc::new(Shared {
            failed: Mutex::new(None),
            calls_count: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let job_rx = job_rx.clone();
            let shared = Arc::clone(&shared);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("coldvault-worker-{}", i))
                    .spawn(move || {
                        while let Ok(job) = job_rx.recv() {
                            let result = job();
                            shared.calls_count.fetch_add(1, Ordering::SeqCst);
                            if let Err(err) = result {
                                shared.record_failure(err.to_string());
                            }
                        }
                    })
                    .expect("spawn worker thread"),
            );
        }

        WorkerPool {
            job_tx: Some(job_tx),
            handles,
            shared,
        }
    }

    /// Submits `job`, blocking until a worker slot is free. Returns
    /// [`Submission::Stop`] without enqueueing `job` if a prior task has
    /// already failed; the caller must break its submission loop in that
    /// case. `job` itself is dropped when `Stop` is returned before send.
    pub fn try_submit<F>(&self, job: F) -> Submission
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if self.shared.is_failed() {
            return Submission::Stop;
        }

        let tx = self.job_tx.as_ref().expect("pool not yet closed");
        if tx.send(Box::new(job)).is_err() {
            // Channel disconnected (all workers gone) — treat like failure.
            return Submission::Stop;
        }

        if self.shared.is_failed() {
            Submission::Stop
        } else {
            Submission::Continue
        }
    }

    /// Blocks until all submitted jobs complete, then returns the first
    /// error encountered, if any.
    pub fn wait(mut self) -> Result<()> {
        // Dropping the sender lets worker threads drain the channel and exit.
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                self.shared.record_failure("worker thread panicked".to_string());
            }
        }

        match self.shared.failed.lock().unwrap().take() {
            Some(message) => bail!("{}", message),
            None => Ok(()),
        }
    }

    /// Number of jobs that actually ran (for progress reporting, §4.6).
    pub fn calls_count(&self) -> usize {
        self.shared.calls_count.load(Ordering::SeqCst)
    }
}
