//! Background maintenance.
//!
//! The janitor runs independent periodic tasks, each on its own interval:
//! disk cleanup, memory expiry purge and a statistics log line. All tasks
//! share one `watch` shutdown signal. A tick that fails or panics is logged
//! and the schedule carries on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::coordinator::TierStack;
use crate::cache::stats::CacheStats;
use crate::config::JanitorConfig;
use crate::tier::Tier;

/// Handle to the running maintenance tasks.
pub struct Janitor {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Janitor {
    /// A janitor with no tasks.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Start the standard maintenance tasks over `stack`.
    pub fn start(
        stack: Arc<TierStack>,
        stats: Arc<CacheStats>,
        config: &JanitorConfig,
        purge_every: Duration,
    ) -> Self {
        let mut janitor = Self::new();

        if stack.disk.is_enabled() {
            let disk_stack = stack.clone();
            janitor.spawn_task(
                "disk_cleanup",
                Duration::from_secs(config.disk_cleanup_interval_secs),
                move || {
                    let stack = disk_stack.clone();
                    async move {
                        stack.disk.cleanup().await?;
                        anyhow::Ok(())
                    }
                },
            );
        }

        let purge_stack = stack.clone();
        janitor.spawn_task("memory_purge", purge_every, move || {
            let stack = purge_stack.clone();
            async move {
                let purged = stack.memory.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged expired memory entries");
                }
                anyhow::Ok(())
            }
        });

        janitor.spawn_task(
            "stats_log",
            Duration::from_secs(config.stats_interval_secs),
            move || {
                let snapshot = stats.snapshot(&stack.memory, &stack.disk, &stack.remote);
                async move {
                    info!(
                        hits = snapshot.hits,
                        misses = snapshot.misses,
                        hit_rate = format!("{:.1}%", snapshot.hit_rate * 100.0),
                        errors = snapshot.errors,
                        memory_keys = snapshot.memory.keys,
                        disk_bytes = snapshot.disk.size,
                        remote_connected = snapshot.remote.connected,
                        "Cache statistics"
                    );
                    anyhow::Ok(())
                }
            },
        );

        info!(tasks = janitor.task_count(), "Janitor started");
        janitor
    }

    /// Run `tick` every `every` until shutdown. A zero interval disables
    /// the task.
    pub fn spawn_task<F, Fut>(&mut self, name: &'static str, every: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if every.is_zero() {
            debug!(task = name, "Janitor task disabled");
            return;
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match AssertUnwindSafe(async { tick().await }).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(task = name, error = %e, "Janitor tick failed"),
                            Err(_) => error!(task = name, "Janitor tick panicked"),
                        }
                    }
                }
            }
            debug!(task = name, "Janitor task stopped");
        });
        self.handles.push(handle);
    }

    /// Number of scheduled tasks.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal every task and wait for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Janitor task ended abnormally");
            }
        }
        debug!("Janitor stopped");
    }
}
