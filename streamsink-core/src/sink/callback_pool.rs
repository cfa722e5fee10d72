// sink/callback_pool.rs
// Fixed-size worker pool running write-completion callbacks

use std::thread;

use crossbeam::channel::{self, Sender};
use tracing::{debug, warn};

use crate::error::{Result, SinkError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded set of worker threads sharing one job queue
///
/// Dropping the pool closes the queue, lets workers drain what was already
/// submitted, and joins them.
pub struct CallbackPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl CallbackPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(SinkError::Configuration(
                "callback pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-callback-{}", name, index))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })?;
            workers.push(handle);
        }
        debug!(pool = name, threads, "callback pool started");

        Ok(CallbackPool {
            sender: Some(sender),
            workers,
        })
    }

    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SinkError::invalid_state("callback pool is shut down"))?;
        sender
            .send(Box::new(job))
            .map_err(|_| SinkError::invalid_state("callback pool workers are gone"))
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs and wait for the queued ones to finish
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("callback worker panicked");
            }
        }
    }
}

impl Drop for CallbackPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
