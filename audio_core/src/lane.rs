//! Serial execution lane.
//!
//! A single dedicated worker thread owns the state `S` and runs queued tasks
//! against it one at a time, in submission order. Any thread may submit.
//! Because the state never leaves the worker, it needs no lock.
//!
//! A panicking task is caught and logged; the worker keeps draining the queue.
//! After [`SerialLane::close`] no new task is accepted; tasks already queued
//! still run, then the state is dropped on the worker thread.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use crate::error::MirrorError;

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

pub struct SerialLane<S> {
    tx: Mutex<Option<Sender<Task<S>>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> SerialLane<S> {
    /// Start the worker. `after_each` runs on the worker after every task.
    pub fn spawn<F>(name: &str, state: S, mut after_each: F) -> Result<Self, MirrorError>
    where
        F: FnMut(&S) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Task<S>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = state;
                for task in rx {
                    if panic::catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
                        log::error!("Mirror task panicked; continuing with the next task");
                    }
                    after_each(&state);
                }
                log::debug!("Mirror lane drained, shutting down worker");
            })
            .map_err(|source| MirrorError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(handle)),
        })
    }

    /// Queue a task. Fails only once the lane is closed.
    pub fn submit<F>(&self, f: F) -> Result<(), MirrorError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(MirrorError::LaneClosed)?;
        tx.send(Box::new(f)).map_err(|_| MirrorError::LaneClosed)
    }

    /// Queue a task and wait for its result.
    ///
    /// Must not be called from a task running on this lane.
    pub fn call_sync<R, F>(&self, f: F) -> Result<R, MirrorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.submit(move |state| {
            let _ = reply_tx.send(f(state));
        })?;
        // a panicking task drops the sender without replying
        reply_rx.recv().map_err(|_| MirrorError::LaneClosed)
    }

    /// Stop accepting tasks, let the queue drain and join the worker. Idempotent.
    pub fn close(&self) {
        drop(self.tx.lock().take());
        self.join_worker();
    }

    /// Like [`close`](Self::close), but queue `last` first under the same lock,
    /// so no concurrently submitted task can run after it. `last` is skipped
    /// if the lane is already closed.
    pub fn close_with<F>(&self, last: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Box::new(last));
        }
        self.join_worker();
    }

    fn join_worker(&self) {
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Mirror lane worker terminated abnormally");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl<S> Drop for SerialLane<S> {
    fn drop(&mut self) {
        drop(self.tx.get_mut().take());
        if let Some(handle) = self.join.get_mut().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
