//! Background compactor
//!
//! A dedicated thread that runs a compaction cycle on every timer tick until
//! its stop channel disconnects.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};

use crate::engine::EngineInner;
use crate::error::Result;

use super::run_cycle;

/// Handle to the compactor thread; stopping (or dropping) joins it
pub struct Compactor {
    /// Dropping the sender is the stop signal
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Start compacting `engine` every `interval`
    pub(crate) fn spawn(engine: Arc<EngineInner>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("caskkv-merge".to_string())
            .spawn(move || run(engine, interval, stop_rx))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Compactor started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current file
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compactor thread panicked");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn run(engine: Arc<EngineInner>, interval: Duration, stop_rx: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                match run_cycle(&engine, Some(&stop_rx)) {
                    Ok(stats) if stats.interrupted => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Merge cycle failed, retrying next tick");
                    }
                }
            }
        }
    }
    tracing::debug!("Compactor stopped");
}
