//! Background maintenance: periodic snapshots, journal compaction, and
//! snapshot retention.
//!
//! The scheduler runs [`PersistenceManager::perform_maintenance`] on a
//! fixed period from a dedicated thread. Shutdown is cooperative: the
//! thread checks a stop flag at a fine grain so `stop()` returns promptly
//! even with long periods.

use super::manager::PersistenceManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Handle to the background maintenance thread.
pub struct MaintenanceScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawns the maintenance thread ticking every `period`.
    pub fn start(manager: Arc<PersistenceManager>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("maintenance".to_string())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "maintenance scheduler started");
                let mut next_tick = Instant::now() + period;
                while !stop_flag.load(Ordering::Acquire) {
                    if Instant::now() >= next_tick {
                        let started = Instant::now();
                        manager.perform_maintenance();
                        debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "maintenance pass complete"
                        );
                        next_tick = Instant::now() + period;
                    }
                    std::thread::sleep(Duration::from_millis(20).min(period));
                }
                info!("maintenance scheduler stopped");
            })
            .ok();

        Self {
            stop,
            handle,
        }
    }

    /// Signals the thread to stop and joins it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
