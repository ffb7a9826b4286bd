//! Posting work onto the overlay's owning thread.
//!
//! Interception callbacks and producers fire on arbitrary host threads, but the
//! overlay may only be mutated from the thread that owns it. Every mutation is
//! therefore posted through a [`Dispatcher`]. Hosts with their own UI executor
//! implement the trait; [`OverlayThread`] is a dedicated thread fed by a channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    /// Queues `task` on the owning thread. Never blocks.
    /// Returns false if the owning thread is gone and the task was dropped.
    fn post(&self, task: Task) -> bool;

    /// True when called from the owning thread.
    fn is_owning_thread(&self) -> bool;
}

enum Message {
    Run(Task),
    Flush(Sender<()>),
    Shutdown,
}

/// A named thread that runs posted tasks in order.
pub struct OverlayThread {
    tx: Sender<Message>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OverlayThread {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(rx))?;
        Ok(Self {
            tx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Waits until every task posted before this call has run.
    ///
    /// Returns false on timeout or if the thread is gone. Called from the
    /// overlay thread itself it returns immediately.
    pub fn flush(&self) -> bool {
        if self.is_owning_thread() {
            return true;
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(Message::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(FLUSH_TIMEOUT).is_ok()
    }
}

impl Dispatcher for OverlayThread {
    fn post(&self, task: Task) -> bool {
        if self.tx.send(Message::Run(task)).is_err() {
            tracing::debug!("Overlay thread gone; dropping task");
            return false;
        }
        true
    }

    fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for OverlayThread {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        // Joining from the overlay thread would deadlock; it exits on its own.
        if self.is_owning_thread() {
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_loop(rx: Receiver<Message>) {
    for message in rx {
        match message {
            Message::Run(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::warn!("Overlay task panicked; continuing");
                }
            }
            Message::Flush(ack) => {
                let _ = ack.send(());
            }
            Message::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_tasks_run_in_order_on_owning_thread() {
        let overlay = OverlayThread::spawn("overlay-test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            overlay.post(Box::new(move || {
                seen.lock().unwrap().push((i, thread::current().id()));
            }));
        }
        assert!(overlay.flush());

        let seen = seen.lock().unwrap();
        let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id == overlay.thread_id()));
    }

    #[test]
    fn test_panicking_task_does_not_kill_thread() {
        let overlay = OverlayThread::spawn("overlay-test").unwrap();
        overlay.post(Box::new(|| panic!("boom")));

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        overlay.post(Box::new(move || *flag.lock().unwrap() = true));
        assert!(overlay.flush());
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_not_owning_thread_from_caller() {
        let overlay = OverlayThread::spawn("overlay-test").unwrap();
        assert!(!overlay.is_owning_thread());
    }
}
