//! Periodic liveness probing of the connection pool.

use crate::config::HealthConfig;
use crate::db::pool::PoolManager;
use crate::error::StoreResult;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthState {
    Healthy,
    Degraded,
}

pub struct HealthMonitor {
    pool: Arc<PoolManager>,
    config: HealthConfig,
    state: watch::Sender<HealthState>,
    consecutive_failures: AtomicU32,
    stopped: AtomicBool,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor without starting the background task.
    pub fn new(pool: Arc<PoolManager>, config: HealthConfig) -> Arc<Self> {
        let (state, _) = watch::channel(HealthState::Healthy);
        Arc::new(Self {
            pool,
            config,
            state,
            consecutive_failures: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
            task: std::sync::Mutex::new(None),
        })
    }

    /// Create a monitor and spawn its probe loop on the current runtime.
    pub fn start(pool: Arc<PoolManager>, config: HealthConfig) -> Arc<Self> {
        let monitor = Self::new(pool, config);
        let handle = Self::spawn_probe_task(Arc::downgrade(&monitor), monitor.config.interval());
        if let Ok(mut task) = monitor.task.lock() {
            *task = Some(handle);
        }
        info!(
            interval_secs = monitor.config.interval().as_secs(),
            failure_threshold = monitor.config.failure_threshold,
            "Health monitor started"
        );
        monitor
    }

    // Holds only a Weak so the loop ends once the store drops the monitor
    fn spawn_probe_task(weak: Weak<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it, startup just probed
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    debug!("Health monitor dropped, stopping probe task");
                    break;
                };
                if monitor.stopped.load(Ordering::Acquire) {
                    break;
                }
                monitor.check_now().await;
            }
        })
    }

    pub fn state(&self) -> HealthState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    async fn probe(&self) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.probe().await?;
        self.pool.release(conn);
        Ok(())
    }

    /// Run one probe, update the state and recreate the pool after
    /// `failure_threshold` consecutive failures.
    pub async fn check_now(&self) -> HealthState {
        match self.probe().await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.transition(HealthState::Healthy);
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    error = %err,
                    consecutive_failures = failures,
                    "Database health probe failed"
                );
                self.transition(HealthState::Degraded);

                if failures >= self.config.failure_threshold.max(1) {
                    self.consecutive_failures.store(0, Ordering::Release);
                    if let Err(e) = self.pool.recreate().await {
                        error!(error = %e, "Failed to recreate connection pool");
                    }
                }
            }
        }
        self.state()
    }

    fn transition(&self, next: HealthState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }
        match next {
            HealthState::Degraded => warn!(backend = %self.pool.backend(), "Database degraded"),
            HealthState::Healthy => info!(backend = %self.pool.backend(), "Database recovered"),
        }
    }

    /// Stop the probe task. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        debug!("Health monitor stopped");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    async fn sqlite_pool(dir: &TempDir) -> Arc<PoolManager> {
        let url = format!("sqlite:{}/health.db", dir.path().display());
        Arc::new(
            PoolManager::configure(&DatabaseConfig::parse(&url).unwrap())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_probe_healthy() {
        let dir = TempDir::new().unwrap();
        let monitor = HealthMonitor::new(sqlite_pool(&dir).await, HealthConfig::default());
        assert_eq!(monitor.check_now().await, HealthState::Healthy);
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_degrades_and_recovers_by_recreating_pool() {
        let dir = TempDir::new().unwrap();
        let pool = sqlite_pool(&dir).await;
        let monitor = HealthMonitor::new(
            pool.clone(),
            HealthConfig {
                interval_secs: 30,
                failure_threshold: 2,
            },
        );
        let mut changes = monitor.subscribe();

        // A closed pool fails every probe until it is recreated
        pool.close().await;

        assert_eq!(monitor.check_now().await, HealthState::Degraded);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), HealthState::Degraded);
        assert_eq!(monitor.consecutive_failures(), 1);

        // Second failure reaches the threshold and swaps in a fresh pool
        assert_eq!(monitor.check_now().await, HealthState::Degraded);
        assert_eq!(monitor.consecutive_failures(), 0);
        assert!(!pool.is_closed().await);

        assert_eq!(monitor.check_now().await, HealthState::Healthy);
        assert_eq!(*changes.borrow_and_update(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_busy_sqlite_connection_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}/health.db?acquire_timeout=1", dir.path().display());
        let pool = Arc::new(
            PoolManager::configure(&DatabaseConfig::parse(&url).unwrap())
                .await
                .unwrap(),
        );
        let monitor = HealthMonitor::new(
            pool.clone(),
            HealthConfig {
                interval_secs: 30,
                failure_threshold: 1,
            },
        );

        // The health check times out behind a long-running writer
        let held = pool.acquire().await.unwrap();
        assert_eq!(monitor.check_now().await, HealthState::Degraded);
        let stats = pool.stats().await;
        assert_eq!((stats.size, stats.idle), (1, 0));
        assert!(!pool.is_closed().await);
        pool.release(held);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let monitor = HealthMonitor::start(sqlite_pool(&dir).await, HealthConfig::default());
        monitor.stop();
        monitor.stop();
    }
}
