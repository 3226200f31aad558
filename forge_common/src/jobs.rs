//! Bounded worker pool with a shared fault state.
//!
//! The build driver is single-producer; compilers submit jobs for
//! parallelizable phases. Any job error poisons the whole build: the first
//! raised error wins and every long operation polls [`FaultState::check`]
//! between steps.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Coarse job classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    Io,
    Cpu,
}

/// Shared fault slot. The first error raised anywhere is the build's error.
#[derive(Default)]
pub struct FaultState {
    slot: Mutex<Option<Arc<Error>>>,
}

impl FaultState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self) -> Result<()> {
        match &*self.slot.lock() {
            Some(err) => Err(Error::Faulted(Arc::clone(err))),
            None => Ok(()),
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn raise(&self, err: Error) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(Arc::new(err));
        } else {
            tracing::debug!("suppressing secondary fault: {}", err);
        }
    }
}

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct QueueShared {
    jobs: SegQueue<Job>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    fault: FaultState,
    wake: Mutex<()>,
    wake_cond: Condvar,
    idle_cond: Condvar,
}

/// The work submission primitive.
pub struct JobQueue {
    shared: Arc<QueueShared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    pub fn new(num_workers: usize) -> Self {
        let shared = Arc::new(QueueShared {
            jobs: SegQueue::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            fault: FaultState::new(),
            wake: Mutex::new(()),
            wake_cond: Condvar::new(),
            idle_cond: Condvar::new(),
        });

        let workers = (0..num_workers.max(1))
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("forge-worker-{index}"))
                    .spawn(move || worker_main(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    pub fn fault(&self) -> &FaultState {
        &self.shared.fault
    }

    pub fn check_fault(&self) -> Result<()> {
        self.shared.fault.check()
    }

    pub fn spawn<F>(&self, kind: JobKind, job: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        tracing::trace!(?kind, "job submitted");

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.jobs.push(Box::new(job));

        let _guard = self.shared.wake.lock();
        self.shared.wake_cond.notify_one();
    }

    /// Blocks until every submitted job has finished, then reports the
    /// first fault, if any.
    pub fn wait_idle(&self) -> Result<()> {
        let mut guard = self.shared.wake.lock();
        while self.shared.pending.load(Ordering::SeqCst) != 0 {
            self.shared.idle_cond.wait(&mut guard);
        }
        drop(guard);

        self.shared.fault.check()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _guard = self.shared.wake.lock();
            self.shared.wake_cond.notify_all();
        }

        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}

fn worker_main(shared: &QueueShared) {
    loop {
        if let Some(job) = shared.jobs.pop() {
            if let Err(err) = job() {
                shared.fault.raise(err);
            }

            if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                let _guard = shared.wake.lock();
                shared.idle_cond.notify_all();
            }

            continue;
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let mut guard = shared.wake.lock();
        if shared.jobs.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
            shared.wake_cond.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{Error, FaultState, JobKind, JobQueue};

    #[test]
    fn runs_all_jobs() {
        let queue = JobQueue::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            queue.spawn(JobKind::Cpu, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.wait_idle().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn first_fault_wins() {
        let fault = FaultState::new();
        fault.raise(Error::Decompression);
        fault.raise(Error::OutOfMemory);

        let err = fault.check().unwrap_err();
        assert!(matches!(&err, Error::Faulted(inner) if matches!(**inner, Error::Decompression)));
    }

    #[test]
    fn job_error_faults_queue() {
        let queue = JobQueue::new(2);

        queue.spawn(JobKind::Io, || Err(Error::EndOfStream));
        assert!(queue.wait_idle().is_err());
        assert!(queue.check_fault().is_err());
    }
}
