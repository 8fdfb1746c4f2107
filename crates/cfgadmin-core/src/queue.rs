//! Single-worker FIFO queues
//!
//! Each [`WorkQueue`] is served by one dedicated thread, so its tasks run
//! one at a time in submission order. Producers only send on a channel and
//! never wait for a task to run.
//!
//! A bounded queue blocks producers while it is full, except the worker
//! itself: a task that schedules onto its own full queue gets `false`
//! instead of waiting on itself.

use crate::error::AdminError;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

enum Envelope<T> {
    Run(T),
    Barrier(Sender<()>),
    Stop,
}

/// Ordered queue with a single worker thread
pub struct WorkQueue<T: Send + 'static> {
    name: String,
    sender: Sender<Envelope<T>>,
    receiver: Mutex<Option<Receiver<Envelope<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
    /// Orders sends against the `Stop` sent by `terminate`
    gate: RwLock<()>,
}

impl<T: Send + 'static> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("pending", &self.sender.len())
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Create a queue; `capacity` bounds it, `None` leaves it unbounded
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        let (sender, receiver) = match capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        Self {
            name: name.into(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            accepting: AtomicBool::new(true),
            gate: RwLock::new(()),
        }
    }

    /// Queue name, also used as the worker thread name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the worker thread. Calling it again is a no-op.
    ///
    /// # Errors
    /// [`AdminError::Worker`] if the thread cannot be spawned.
    pub fn start<F>(&self, mut handler: F) -> Result<(), AdminError>
    where
        F: FnMut(T) + Send + 'static,
    {
        let Some(receiver) = self.receiver.lock().take() else {
            return Ok(());
        };
        let name = self.name.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                tracing::debug!(queue = %name, "worker started");
                for envelope in receiver.iter() {
                    match envelope {
                        Envelope::Run(task) => {
                            if catch_unwind(AssertUnwindSafe(|| handler(task))).is_err() {
                                tracing::error!(queue = %name, "task panicked; continuing with next task");
                            }
                        }
                        Envelope::Barrier(ack) => {
                            let _ = ack.send(());
                        }
                        Envelope::Stop => break,
                    }
                }
                tracing::debug!(queue = %name, "worker stopped");
            })
            .map_err(|e| AdminError::Worker(format!("{}: {e}", self.name)))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Enqueue a task.
    ///
    /// Returns `false` once the queue is terminated, or when the worker
    /// schedules onto its own full queue. A `true` result means the task
    /// runs before the worker stops.
    pub fn schedule(&self, task: T) -> bool {
        let _gate = self.gate.read_recursive();
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!(queue = %self.name, "queue terminated; task dropped");
            return false;
        }
        if !self.is_worker_thread() {
            return self.sender.send(Envelope::Run(task)).is_ok();
        }
        match self.sender.try_send(Envelope::Run(task)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::error!(queue = %self.name, "queue full while scheduling from its own worker; task dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Check if the queue still accepts tasks
    #[inline]
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Block until every task enqueued before this call has run.
    ///
    /// Returns immediately when called from the worker itself or when the
    /// worker is not running.
    pub fn flush(&self) {
        if self.is_worker_thread() || self.worker.lock().is_none() {
            return;
        }
        let (ack, done) = channel::bounded(1);
        if self.sender.send(Envelope::Barrier(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Stop accepting tasks, let the worker drain what is already queued,
    /// then join it
    pub fn terminate(&self) {
        {
            let _gate = self.gate.write();
            if !self.accepting.swap(false, Ordering::AcqRel) {
                return;
            }
        }
        let _ = self.sender.send(Envelope::Stop);
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!(queue = %self.name, "worker thread panicked");
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runs_tasks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new("test-order", None);
        let sink = Arc::clone(&seen);
        queue.start(move |n: u32| sink.lock().push(n)).unwrap();

        for n in 0..100 {
            assert!(queue.schedule(n));
        }
        queue.flush();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
        queue.terminate();
    }

    #[test]
    fn terminate_drains_then_rejects() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new("test-drain", Some(4));
        let sink = Arc::clone(&seen);
        queue
            .start(move |n: u32| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                sink.lock().push(n);
            })
            .unwrap();

        for n in 0..3 {
            queue.schedule(n);
        }
        queue.terminate();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(!queue.schedule(3));
        assert!(!queue.is_accepting());
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new("test-panic", None);
        let sink = Arc::clone(&seen);
        queue
            .start(move |n: u32| {
                assert!(n != 1, "task one fails");
                sink.lock().push(n);
            })
            .unwrap();

        for n in 0..3 {
            queue.schedule(n);
        }
        queue.flush();
        assert_eq!(*seen.lock(), vec![0, 2]);
        queue.terminate();
    }

    #[test]
    fn worker_does_not_block_on_its_own_full_queue() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let refused = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(WorkQueue::new("test-reentrant", Some(1)));
        let weak = Arc::downgrade(&queue);
        let sink = Arc::clone(&seen);
        let flag = Arc::clone(&refused);
        queue
            .start(move |n: u32| {
                if n == 0 {
                    if let Some(queue) = weak.upgrade() {
                        for follow_up in 1..=3 {
                            if !queue.schedule(follow_up) {
                                flag.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                }
                sink.lock().push(n);
            })
            .unwrap();

        assert!(queue.schedule(0));
        queue.flush();
        assert!(refused.load(Ordering::SeqCst));
        assert_eq!(seen.lock()[0], 0);
        queue.terminate();
    }

    #[test]
    fn accepted_tasks_run_despite_concurrent_terminate() {
        let ran = Arc::new(Mutex::new(0usize));
        let queue = Arc::new(WorkQueue::new("test-race", None));
        let counter = Arc::clone(&ran);
        queue.start(move |_: u32| *counter.lock() += 1).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || (0..200).filter(|n| queue.schedule(*n)).count())
            })
            .collect();
        std::thread::sleep(std::time::Duration::from_millis(1));
        queue.terminate();
        let accepted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();

        assert_eq!(*ran.lock(), accepted);
    }

    #[test]
    fn flush_without_worker_returns() {
        let queue: WorkQueue<u32> = WorkQueue::new("idle", None);
        queue.flush();
    }
}
