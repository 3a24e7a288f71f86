//! One dedicated thread per side channel, fed over an mpsc queue.
//!
//! Jobs run one at a time in send order, so a slow call can delay the next
//! one but never be overtaken by it. Senders never wait for the handler.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Sender},
        Mutex, PoisonError,
    },
    thread,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

pub struct SerialWorker<T> {
    name: String,
    tx: Option<Mutex<Sender<T>>>,
}

impl<T: Send + 'static> SerialWorker<T> {
    /// Starts the worker thread. If the thread cannot be spawned the worker
    /// drops every job with a warning.
    pub fn spawn<F>(name: &str, mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>();
        let thread_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    // A panicking handler costs one job, not the queue.
                    if panic::catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                        log_error!("{thread_name} handler panicked; continuing");
                    }
                }
            });

        let tx = match spawned {
            Ok(_) => Some(Mutex::new(tx)),
            Err(err) => {
                log_error!("Failed to spawn {name} thread: {err}");
                None
            }
        };

        Self {
            name: name.to_string(),
            tx,
        }
    }

    /// Queues `job`. Returns false when the worker is gone.
    pub fn send(&self, job: T) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            log_warn!("{} worker unavailable; dropping job", self.name);
            return false;
        };
        let sent = tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(job)
            .is_ok();
        if !sent {
            log_warn!("{} worker stopped; dropping job", self.name);
        }
        sent
    }
}
