//! Engine-owned background workers.
//!
//! Jobs arrive on a channel; each worker also wakes on a periodic tick so
//! that work which failed (or was skipped) is retried without a new
//! trigger. Dropping the shutdown sender stops every worker.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Write queued immutable memtables to level-0 (or deeper) tables.
    Flush,
    /// Run the next picked compaction.
    Compaction,
}

/// Executes background work. Implemented by the engine.
pub trait JobRunner: Send + Sync + 'static {
    fn run_job(&self, job: Job) -> Result<()>;

    /// Periodic wake-up: re-check whether anything needs doing.
    fn tick(&self) -> Result<()>;
}

/// Sending half of the job queue. Holding it does not keep workers alive.
#[derive(Clone)]
pub struct JobQueue {
    tx: Sender<Job>,
}

impl JobQueue {
    /// Returns false once the scheduler is gone.
    pub fn schedule(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }
}

pub struct Scheduler {
    queue: JobQueue,
    shutdown: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    rx: Receiver<Job>,
}

impl Scheduler {
    /// Creates the queue. Workers start with `start`, once the runner exists.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            queue: JobQueue { tx },
            shutdown: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            rx,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn start(&self, runner: Arc<dyn JobRunner>, threads: usize, tick: Duration) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let mut workers = self.workers.lock();
        for id in 0..threads {
            let runner = Arc::clone(&runner);
            let jobs = self.rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("lsmkv-bg-{id}"))
                .spawn(move || worker_loop(runner, jobs, shutdown, tick))?;
            workers.push(handle);
        }
        *self.shutdown.lock() = Some(shutdown_tx);
        Ok(())
    }

    /// Stops the workers after their current job and waits for them.
    pub fn shutdown(&self) {
        self.shutdown.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("background worker panicked");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(runner: Arc<dyn JobRunner>, jobs: Receiver<Job>, shutdown: Receiver<()>, tick: Duration) {
    let ticker = crossbeam_channel::tick(tick);
    loop {
        crossbeam_channel::select! {
            recv(shutdown) -> _ => {
                debug!("background worker stopped");
                return;
            }
            recv(jobs) -> msg => match msg {
                Ok(job) => {
                    if let Err(e) = runner.run_job(job) {
                        error!(?job, error = %e, "background job failed; will retry");
                    }
                }
                Err(_) => return,
            },
            recv(ticker) -> _ => {
                if let Err(e) = runner.tick() {
                    error!(error = %e, "background tick failed");
                }
            }
        }
    }
}
