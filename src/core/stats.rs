//! Usage statistics and the background sweep that refreshes them
//!
//! The sweep is observability only. A skipped, late or failed sweep leaves
//! the previous snapshot in place and never touches store state.

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Point-in-time usage snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Declared capacity in bytes
    pub capacity: u64,
    /// Bytes of sectors referenced by the index
    pub used_size: u64,
    /// `capacity - used_size`
    pub free_size: u64,
    /// Sector bytes held by pinned keys that are present in the index
    pub pinned_size: u64,
    /// Number of indexed blocks
    pub block_count: usize,
    /// Number of pinned keys present in the index
    pub pinned_count: usize,
    /// When the snapshot was computed
    ///
    /// Set at open and on every refresh; only `StoreStats::default()` leaves
    /// it `None`.
    pub swept_at: Option<DateTime<Utc>>,
}

impl StoreStats {
    /// Fraction of capacity in use, as a percentage
    pub fn usage_percent(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.used_size as f64 / self.capacity as f64) * 100.0
        }
    }
}

/// Background thread running a periodic sweep
///
/// The sweep callback returns `false` to end the thread (e.g. when the store
/// it reports on is gone). Dropping the sweeper stops and joins the thread.
pub struct StatsSweeper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatsSweeper {
    /// Start the sweep thread: wait `initial_delay`, then run every `interval`
    pub fn start<F>(initial_delay: Duration, interval: Duration, mut sweep: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown, signal) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("blockcache-stats".to_string())
            .spawn(move || {
                let mut wait = initial_delay;
                loop {
                    match signal.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !sweep() {
                                break;
                            }
                            wait = interval;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Stats sweep thread exiting");
            })?;

        Ok(StatsSweeper {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop the sweep thread and wait for it
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
