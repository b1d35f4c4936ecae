// Fixed-size pool of worker threads fed through a bounded queue. A panicking
// task is caught on its worker and reported by the next `wait`.

use crate::error::{RasterError, Result};
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

// Outstanding task count plus the condition variable `wait` sleeps on
struct Completion {
    pending: CachePadded<AtomicUsize>,
    lock: Mutex<()>,
    done: Condvar,
    first_panic: Mutex<Option<String>>,
}

impl Completion {
    fn new() -> Self {
        Self {
            pending: CachePadded::new(AtomicUsize::new(0)),
            lock: Mutex::new(()),
            done: Condvar::new(),
            first_panic: Mutex::new(None),
        }
    }

    fn register(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Take the lock so a waiter cannot miss the wakeup between its check and its sleep
            let _guard = self.lock.lock();
            self.done.notify_all();
        }
    }

    fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload);
        log::warn!("tile task panicked: {}", message);
        let mut first = self.first_panic.lock();
        if first.is_none() {
            *first = Some(message);
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    completion: Arc<Completion>,
    worker_count: usize,
}

impl WorkerPool {
    // Logical core count, or 1 if it cannot be determined
    pub fn default_worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Starts `workers` threads with a queue of twice as many slots.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_queue_capacity(workers, workers.saturating_mul(2))
    }

    pub fn with_queue_capacity(workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 || capacity == 0 {
            return Err(RasterError::InvalidWorkerCount);
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Task>(capacity);
        let completion = Arc::new(Completion::new());

        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(workers),
            completion,
            worker_count: workers,
        };

        for index in 0..workers {
            let receiver = receiver.clone();
            let completion = pool.completion.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tile-worker-{}", index))
                .spawn(move || worker_loop(receiver, completion));
            match handle {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Dropping the pool stops the threads already started
                    return Err(RasterError::SpawnFailed(e.to_string()));
                }
            }
        }

        log::debug!(
            "worker pool started: {} workers, queue capacity {}",
            workers,
            capacity
        );
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    // Tasks submitted but not yet finished
    pub fn pending(&self) -> usize {
        self.completion.pending.load(Ordering::Acquire)
    }

    /// Queues a task, blocking while the queue is full.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return Err(RasterError::PoolClosed);
        };
        self.completion.register();
        if sender.send(Box::new(task)).is_err() {
            self.completion.finish();
            return Err(RasterError::PoolClosed);
        }
        Ok(())
    }

    /// Blocks until every task submitted so far has finished. Must not be
    /// called from inside a task.
    pub fn wait(&self) -> Result<()> {
        {
            let mut guard = self.completion.lock.lock();
            while self.completion.pending.load(Ordering::Acquire) != 0 {
                self.completion.done.wait(&mut guard);
            }
        }
        match self.completion.first_panic.lock().take() {
            Some(message) => Err(RasterError::TaskPanicked(message)),
            None => Ok(()),
        }
    }

    /// Stops accepting tasks, lets the workers drain the queue and joins them.
    pub fn close(&mut self) {
        let Some(sender) = self.sender.take() else {
            log::warn!("worker pool closed twice");
            return;
        };
        drop(sender);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("worker thread exited with a panic");
            }
        }
        log::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.close();
        }
    }
}

fn worker_loop(receiver: Receiver<Task>, completion: Arc<Completion>) {
    // Ends once the sender is dropped and the queue is empty
    for task in receiver.iter() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            completion.record_panic(payload);
        }
        completion.finish();
    }
}
