//! Fixed-cadence periodic execution on a dedicated thread.
//!
//! Each task runs on its own named thread: tick, then wait for the next
//! deadline on a stop channel. Ticks never overlap and are never interrupted;
//! a stop request only prevents the next one. A panicking tick is logged and
//! the loop carries on with the next deadline.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> String;

    fn run_tick(&mut self);
}

pub struct PeriodicHandle {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prevents the next tick without waiting for the current one.
    pub fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Requests a stop and waits up to `timeout` for the in-flight tick to
    /// finish. Returns false when the thread was still busy at the deadline;
    /// it is then detached and exits after its current tick.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.request_stop();
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        tracing::warn!(task = %self.name, "Periodic task thread panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    task = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Periodic task did not stop in time"
                );
                false
            }
        }
    }
}

pub fn spawn_periodic<T: PeriodicTask>(mut task: T, interval: Duration) -> io::Result<PeriodicHandle> {
    let name = task.name();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let thread_name = name.clone();
    let thread = thread::Builder::new()
        .name(format!("taskwatch-{}", name))
        .spawn(move || {
            tracing::info!(task = %thread_name, interval_ms = interval.as_millis() as u64, "Periodic task started");
            let mut deadline = Instant::now();
            loop {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run_tick())) {
                    tracing::error!(
                        task = %thread_name,
                        panic = %panic_message(payload.as_ref()),
                        "Periodic task tick panicked; continuing"
                    );
                }

                let now = Instant::now();
                // Overran or out of range; skip missed ticks instead of bursting.
                let wait = match deadline.checked_add(interval) {
                    Some(next) if next >= now => {
                        deadline = next;
                        next - now
                    }
                    Some(_) => {
                        deadline = now;
                        Duration::ZERO
                    }
                    None => Duration::MAX,
                };
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Explicit stop or dropped handle.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!(task = %thread_name, "Periodic task stopped");
            let _ = done_tx.send(());
        })?;

    Ok(PeriodicHandle {
        name,
        stop_tx: Some(stop_tx),
        done_rx,
        thread: Some(thread),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
