//! Fixed pool of compilation threads fed through a channel.

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use crate::error::DispatchError;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("remotejit-compile-worker-{index}"))
                .spawn(move || worker_loop(&receiver, index))
                .with_context(|| format!("failed to spawn compile worker {index}"))?;
            workers.push(handle);
        }

        info!(threads, "started compile workers");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` for the next free worker
    pub fn execute<F>(&self, job: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(DispatchError::ShuttingDown)?;
        sender
            .send(Box::new(job))
            .map_err(|_| DispatchError::ShuttingDown)
    }

    /// Queue `job` and get a receiver for its result
    pub fn submit<T, F>(&self, job: F) -> Result<Receiver<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.execute(move || {
            // The caller may have stopped listening.
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    /// Stop accepting jobs, let the queued ones finish and join every worker
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                debug!(worker = ?name, "compile worker panicked");
            }
        }
        info!("compile workers stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Receiver<Job>, index: usize) {
    debug!(index, "compile worker ready");
    for job in receiver.iter() {
        job();
    }
    debug!(index, "compile worker exiting");
}
