//! Dedicated helper thread for callbacks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::CodecError;

type Task = Box<dyn FnOnce() + Send + 'static>;

const QUIT_POLL: Duration = Duration::from_millis(20);

/// Posts work to a [`HandlerThread`].
#[derive(Clone)]
pub struct Handler {
    sender: Sender<Task>,
    quitting: Arc<AtomicBool>,
}

impl Handler {
    /// Queue `task` to run on the handler thread.
    ///
    /// Returns `false` if the thread is shutting down and the task was
    /// discarded.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.quitting.load(Ordering::Acquire) {
            return false;
        }
        self.sender.send(Box::new(task)).is_ok()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("pending", &self.sender.len())
            .finish_non_exhaustive()
    }
}

/// A named thread that runs posted tasks in order.
///
/// Dropping the handle quits the thread after pending tasks have run.
pub struct HandlerThread {
    name: String,
    sender: Sender<Task>,
    quitting: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HandlerThread {
    /// Start a handler thread.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InitializationFailed` if the OS thread cannot be
    /// spawned.
    pub fn spawn(name: &str) -> Result<Self, CodecError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let quitting = Arc::new(AtomicBool::new(false));
        let flag = quitting.clone();

        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_loop(&receiver, &flag))
            .map_err(|e| CodecError::InitializationFailed(format!("{name}: {e}")))?;

        log::debug!("handler thread {name} started");
        Ok(Self {
            name: name.to_owned(),
            sender,
            quitting,
            thread: Some(thread),
        })
    }

    /// Handle for posting tasks.
    #[must_use]
    pub fn handler(&self) -> Handler {
        Handler {
            sender: self.sender.clone(),
            quitting: self.quitting.clone(),
        }
    }

    /// Run the tasks already posted, then stop and join the thread.
    pub fn quit_safely(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.quitting.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("handler thread {} panicked", self.name);
            } else {
                log::debug!("handler thread {} stopped", self.name);
            }
        }
    }
}

fn run_loop(receiver: &Receiver<Task>, quitting: &AtomicBool) {
    loop {
        match receiver.recv_timeout(QUIT_POLL) {
            Ok(task) => task(),
            Err(RecvTimeoutError::Timeout) => {
                if quitting.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
    while let Ok(task) = receiver.try_recv() {
        task();
    }
}

impl Drop for HandlerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for HandlerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerThread")
            .field("name", &self.name)
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasks_run_in_order_before_quit() {
        let thread = HandlerThread::spawn("test-handler").unwrap();
        let handler = thread.handler();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            assert!(handler.post(move || seen.lock().push(i)));
        }
        thread.quit_safely();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(!handler.post(|| {}));
    }

    #[test]
    fn tasks_run_off_the_calling_thread() {
        let thread = HandlerThread::spawn("frame-handler").unwrap();
        let caller = std::thread::current().id();
        let ran_elsewhere = Arc::new(AtomicUsize::new(0));
        let flag = ran_elsewhere.clone();

        thread.handler().post(move || {
            if std::thread::current().id() != caller {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(thread);

        assert_eq!(ran_elsewhere.load(Ordering::SeqCst), 1);
    }
}
