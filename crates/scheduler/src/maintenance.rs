//! Periodic cache housekeeping on a background thread

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use thumbnail_cache::{CacheConfig, ThumbnailCache};

/// Drives `preload_tick` and `cleanup_cache` on fixed intervals.
///
/// The thread holds an `Arc` to the cache and stops on [`shutdown`] or
/// when the timer is dropped.
///
/// [`shutdown`]: MaintenanceTimer::shutdown
pub struct MaintenanceTimer {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceTimer {
    /// Start with the intervals from a cache configuration
    pub fn from_config(cache: Arc<ThumbnailCache>, config: &CacheConfig) -> io::Result<Self> {
        Self::start(cache, config.preload_interval, config.cleanup_interval)
    }

    pub fn start(
        cache: Arc<ThumbnailCache>,
        preload_interval: Duration,
        cleanup_interval: Duration,
    ) -> io::Result<Self> {
        let preload_interval = preload_interval.max(Duration::from_millis(1));
        let cleanup_interval = cleanup_interval.max(Duration::from_millis(1));
        let (stop, stopped) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("thumbnail-maintenance".to_string())
            .spawn(move || {
                let mut next_preload = Instant::now() + preload_interval;
                let mut next_cleanup = Instant::now() + cleanup_interval;

                loop {
                    let wake = next_preload.min(next_cleanup);
                    let wait = wake.saturating_duration_since(Instant::now());
                    match stopped.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let now = Instant::now();
                    if now >= next_preload {
                        cache.preload_tick();
                        next_preload = now + preload_interval;
                    }
                    if now >= next_cleanup {
                        cache.cleanup_cache();
                        next_cleanup = now + cleanup_interval;
                    }
                }
                debug!("maintenance timer stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stop the timer and wait for an in-progress tick to finish
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceTimer {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
