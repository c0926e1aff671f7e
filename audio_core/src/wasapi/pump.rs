//! Per-handle worker threads.
//!
//! Each capture and render handle owns one thread that enters COM, opens its
//! endpoint and keeps every COM object local. The owner talks to it through a
//! command channel; dropping the channel ends the thread.

use anyhow::{Context, Result, anyhow};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::com::ComApartment;

/// How often a running pump services its endpoint.
pub(super) const POLL_INTERVAL: Duration = Duration::from_millis(3);

pub(super) struct PumpThread<C> {
    commands: Option<Sender<C>>,
    join: Option<JoinHandle<()>>,
}

impl<C: Send + 'static> PumpThread<C> {
    /// Spawn the thread, run `init` on it and wait for the outcome.
    ///
    /// `init` returns a value handed back to the caller and the thread-local
    /// state passed on to `run`. Nothing in `S` ever leaves the thread.
    pub(super) fn spawn<T, S, I, R>(name: &str, init: I, run: R) -> Result<(Self, T)>
    where
        T: Send + 'static,
        I: FnOnce() -> Result<(T, S)> + Send + 'static,
        R: FnOnce(S, Receiver<C>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<C>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<T>>(1);

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _apartment = match ComApartment::enter() {
                    Ok(a) => a,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                match init() {
                    Ok((value, state)) => {
                        if ready_tx.send(Ok(value)).is_ok() {
                            run(state, rx);
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .with_context(|| format!("failed to spawn {} thread", name))?;

        let mut pump = Self {
            commands: Some(tx),
            join: Some(join),
        };
        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((pump, value)),
            Ok(Err(e)) => {
                pump.shutdown();
                Err(e)
            }
            Err(_) => {
                pump.shutdown();
                Err(anyhow!("{} thread exited during initialization", name))
            }
        }
    }

    /// Send a command; false once the thread is gone.
    pub(super) fn send(&self, command: C) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok())
    }

    /// Close the command channel and join. Idempotent.
    pub(super) fn shutdown(&mut self) {
        drop(self.commands.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Audio pump thread panicked");
            }
        }
    }
}

impl<C> Drop for PumpThread<C> {
    fn drop(&mut self) {
        drop(self.commands.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Ask the pump to do something and wait for its answer.
pub(super) fn request<C: Send + 'static>(
    pump: &PumpThread<C>,
    make: impl FnOnce(mpsc::SyncSender<Result<()>>) -> C,
) -> Result<()> {
    let (reply_tx, reply_rx) = mpsc::sync_channel(1);
    if !pump.send(make(reply_tx)) {
        return Err(anyhow!("audio pump is not running"));
    }
    reply_rx
        .recv()
        .map_err(|_| anyhow!("audio pump exited before replying"))?
}
