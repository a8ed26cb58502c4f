//! Background orphan reaper: runs `Queue::scan_for_orphans` on an interval.

use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::queue::Queue;
use super::store::JobStore;

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct OrphanReaperConfig {
    /// Time between scans; the first scan runs immediately.
    pub interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for OrphanReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            name: "orphan-reaper".to_string(),
        }
    }
}

impl OrphanReaperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Cumulative reaper statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReaperStats {
    pub scans: u64,
    pub reclaimed: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// Handle to a running reaper.
#[derive(Debug)]
pub struct OrphanReaperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ReaperStats>>,
}

impl OrphanReaperHandle {
    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ReaperStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Periodic orphan scanner for a shared queue.
pub struct OrphanReaper<S: JobStore> {
    queue: Arc<Queue<S>>,
}

impl<S: JobStore + 'static> OrphanReaper<S> {
    pub fn new(queue: Arc<Queue<S>>) -> Self {
        Self { queue }
    }

    /// Spawn the scan loop on its own thread.
    pub fn spawn(self, config: OrphanReaperConfig) -> std::io::Result<OrphanReaperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ReaperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || reaper_loop(self.queue, config, shutdown_rx, stats_clone))?;

        Ok(OrphanReaperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn reaper_loop<S: JobStore>(
    queue: Arc<Queue<S>>,
    config: OrphanReaperConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ReaperStats>>,
) {
    info!(reaper = %config.name, interval_secs = config.interval.as_secs(), "orphan reaper started");
    let start_time = Instant::now();

    loop {
        let result = queue.scan_for_orphans();

        {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.scans += 1;
            s.uptime_secs = start_time.elapsed().as_secs();
            match &result {
                Ok(n) => s.reclaimed += n,
                Err(_) => s.errors += 1,
            }
        }

        match result {
            Ok(0) => debug!(reaper = %config.name, "no orphaned jobs"),
            Ok(orphaned) => info!(reaper = %config.name, orphaned, "reclaimed orphaned jobs"),
            Err(e) => error!(reaper = %config.name, error = %e, "orphan scan failed"),
        }

        match shutdown_rx.recv_timeout(config.interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(reaper = %config.name, "orphan reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::jobs::requests::{JobTypeRegistry, static_request};
    use crate::jobs::store::{InMemoryJobStore, JobFilter, JobUpdate};
    use crate::jobs::types::{JobState, NewJob};
    use chrono::Utc;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn reaper_reclaims_stale_jobs_and_stops() {
        let store = InMemoryJobStore::arc();
        let mut registry = JobTypeRegistry::new();
        registry.register("*", static_request(serde_json::json!({})));
        let queue = Arc::new(Queue::new(store.clone(), registry, QueueConfig::default()));

        queue.enqueue(NewJob::named("qa")).unwrap();
        let job = queue.start_job().unwrap().unwrap();
        let stale = Utc::now() - chrono::Duration::seconds(500);
        store
            .update_one_conditional(
                &JobFilter::by_id(job.id.unwrap()),
                &JobUpdate::new().modified(stale),
            )
            .unwrap();

        let handle = OrphanReaper::new(queue.clone())
            .spawn(OrphanReaperConfig::default().with_interval(Duration::from_millis(20)))
            .unwrap();

        assert!(wait_for(|| handle.stats().reclaimed == 1));
        assert!(wait_for(|| handle.stats().scans >= 2));

        let stats = handle.stats();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.errors, 0);
        handle.shutdown();

        assert_eq!(queue.get(job.id.unwrap()).unwrap().state, JobState::Failed);
        assert_eq!(queue.list(Some(JobState::Pending), 10).unwrap().len(), 1);
    }

    #[test]
    fn shutdown_interrupts_a_long_interval() {
        let queue = Arc::new(Queue::new(
            InMemoryJobStore::arc(),
            JobTypeRegistry::new(),
            QueueConfig::default(),
        ));
        let handle = OrphanReaper::new(queue)
            .spawn(OrphanReaperConfig::default().with_interval(Duration::from_secs(3600)))
            .unwrap();

        assert!(wait_for(|| handle.stats().scans == 1));
        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
