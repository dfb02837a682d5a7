//! Background expiry sweep for [`LruCacher`]

use crate::lru_cacher::LruCacher;
use query_core::{CacheError, Result};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Entries removed by one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ids_removed: usize,
    pub beans_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.ids_removed + self.beans_removed
    }
}

/// Handle to a running sweeper; dropping it stops the sweeper as well
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Whether the sweep task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweeper and wait for the task to end
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) fn spawn(cacher: Weak<LruCacher>, every: Duration) -> Result<SweeperHandle> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        CacheError::InvalidConfig("the expiry sweeper needs a running tokio runtime".to_string())
    })?;

    let (tx, mut rx) = oneshot::channel();
    let task = runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(cacher) = cacher.upgrade() else {
                        debug!("Cacher dropped, expiry sweeper exiting");
                        return;
                    };
                    let report = cacher.sweep();
                    if report.total() > 0 {
                        debug!(
                            ids_removed = report.ids_removed,
                            beans_removed = report.beans_removed,
                            "Expired cache entries removed"
                        );
                    }
                }
                _ = &mut rx => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }
        }
    });

    info!("Expiry sweeper started (interval: {:?})", every);

    Ok(SweeperHandle {
        shutdown_tx: Some(tx),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use crate::cacher::Cacher;
    use crate::config::CacheConfig;
    use crate::lru_cacher::LruCacher;
    use crate::store::MemoryStore;
    use crate::value::CachedBean;
    use query_core::{CacheError, Pk};
    use std::sync::Arc;
    use std::time::Duration;

    fn cacher(ttl: u64, every: u64, cap: usize) -> Arc<LruCacher> {
        let config = CacheConfig::default()
            .with_ttl(Duration::from_secs(ttl))
            .with_sweep_interval(Duration::from_secs(every))
            .with_max_removed_per_sweep(cap);
        Arc::new(LruCacher::new(Arc::new(MemoryStore::new()), config).unwrap())
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let cacher = cacher(60, 10, 20);
        let err = cacher.start_sweeper().unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cacher = cacher(60, 10, 20);
        let handle = cacher.start_sweeper().unwrap();

        for id in 0..5 {
            cacher
                .put_bean("user", &id.to_string(), CachedBean::new(id))
                .unwrap();
        }
        cacher.put_ids("order", "q", &[Pk::from(1)]).unwrap();

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(cacher.len_beans(), 5);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(cacher.len_beans(), 0);
        assert_eq!(cacher.len_ids(), 0);
        assert!(handle.is_running());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_spreads_removals_over_passes() {
        let cacher = cacher(5, 10, 2);
        let handle = cacher.start_sweeper().unwrap();
        for id in 0..6 {
            cacher
                .put_bean("user", &id.to_string(), CachedBean::new(id))
                .unwrap();
        }

        // First tick at 10s removes 2, then 2 more per tick
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cacher.len_beans(), 4);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(cacher.len_beans(), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let cacher = cacher(5, 10, 20);
        let handle = cacher.start_sweeper().unwrap();
        handle.shutdown().await;

        cacher.put_bean("user", "1", CachedBean::new(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cacher.len_beans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_sweeping() {
        let cacher = cacher(5, 10, 20);
        drop(cacher.start_sweeper().unwrap());

        cacher.put_bean("user", "1", CachedBean::new(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cacher.len_beans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_ends_with_cacher() {
        let cacher = cacher(5, 10, 20);
        let handle = cacher.start_sweeper().unwrap();
        drop(cacher);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!handle.is_running());
    }
}
