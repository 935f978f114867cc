//! Cache coordinator: orchestrates reads and writes across tiers.
//!
//! The coordinator is the central entry point of the cache. It:
//! - Serves lookups from the fastest tier holding the key
//! - Promotes hits from slower tiers into every faster tier
//! - Writes through to every enabled tier, isolating per-tier failures
//! - Owns the lifecycle (start-up, readiness, shutdown) and the janitor
//!
//! No tier error escapes the data API: failures are logged, counted and
//! turned into a miss or a no-op.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::codec::{Codec, JsonCodec};
use crate::cache::entry::Entry;
use crate::cache::janitor::Janitor;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::config::CacheConfig;
use crate::tier::disk::{CleanupReport, DiskTier};
use crate::tier::memory::MemoryTier;
use crate::tier::remote::{HttpBackend, RemoteBackend, RemoteError, RemoteTier};
use crate::tier::{Tier, TierError, TierKind, TierResult};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required {tier} tier unavailable: {reason}")]
    RequiredTierUnavailable { tier: TierKind, reason: String },

    #[error("Cache not ready after {0:?}")]
    NotReady(Duration),

    #[error("Cache failed to start: {0}")]
    Failed(String),

    #[error("Cache is closed")]
    Closed,

    #[error("No tokio runtime to start the cache on: {0}")]
    NoRuntime(String),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] RemoteError),
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Initializing,
    Ready,
    Closed,
    Failed,
}

/// Per-call options for [`CacheCoordinator::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// TTL for promoted copies; defaults to each tier's own default.
    pub ttl: Option<Duration>,
}

/// Per-call options for [`CacheCoordinator::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Skip the disk and remote tiers.
    pub memory_only: bool,
}

/// The constructed tiers, fastest first.
pub struct TierStack {
    pub memory: Arc<MemoryTier>,
    pub disk: Arc<DiskTier>,
    pub remote: Arc<RemoteTier>,
}

impl TierStack {
    /// Tiers in lookup order.
    pub fn ordered(&self) -> [&dyn Tier; 3] {
        [
            self.memory.as_ref(),
            self.disk.as_ref(),
            self.remote.as_ref(),
        ]
    }

    /// Bring up every tier described by `config`.
    ///
    /// Optional tiers that fail disable themselves; required ones abort.
    pub async fn build(
        config: &CacheConfig,
        codec: Arc<dyn Codec>,
        remote_backend: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Self, CacheError> {
        let memory = MemoryTier::new(config.memory.max_keys, config.std_ttl());

        let disk = if config.disk.enabled {
            match DiskTier::open(&config.disk, codec.clone()).await {
                Ok(disk) => disk,
                Err(e) if config.disk.required => {
                    return Err(CacheError::RequiredTierUnavailable {
                        tier: TierKind::Disk,
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(
                        path = %config.disk.path.display(),
                        error = %e,
                        "Disk tier unavailable, disabling it"
                    );
                    DiskTier::disabled(&config.disk, codec.clone())
                }
            }
        } else {
            DiskTier::disabled(&config.disk, codec.clone())
        };

        let remote = match Self::remote_backend(config, remote_backend)? {
            Some(backend) => {
                let (tier, failure) = RemoteTier::connect(
                    backend,
                    &config.remote.key_prefix,
                    config.std_ttl(),
                    codec,
                    config.operation_timeout(),
                )
                .await;
                if let (Some(e), true) = (failure, config.remote.required) {
                    return Err(CacheError::RequiredTierUnavailable {
                        tier: TierKind::Remote,
                        reason: e.to_string(),
                    });
                }
                tier
            }
            None => RemoteTier::disabled(codec),
        };

        Ok(Self {
            memory: Arc::new(memory),
            disk: Arc::new(disk),
            remote: Arc::new(remote),
        })
    }

    /// An injected backend wins over the configured URL.
    fn remote_backend(
        config: &CacheConfig,
        injected: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Option<Arc<dyn RemoteBackend>>, CacheError> {
        if injected.is_some() {
            return Ok(injected);
        }
        if !config.remote.enabled {
            return Ok(None);
        }
        let Some(url) = config.remote.url.as_deref() else {
            return Ok(None);
        };

        match HttpBackend::new(url, config.operation_timeout()) {
            Ok(backend) => Ok(Some(Arc::new(backend))),
            Err(e) if config.remote.required => Err(CacheError::RequiredTierUnavailable {
                tier: TierKind::Remote,
                reason: e.to_string(),
            }),
            Err(e) => {
                warn!(url, error = %e, "Remote tier misconfigured, disabling it");
                Ok(None)
            }
        }
    }
}

/// Builds a [`CacheCoordinator`].
pub struct CacheBuilder {
    config: CacheConfig,
    codec: Arc<dyn Codec>,
    remote_backend: Option<Arc<dyn RemoteBackend>>,
    start_janitor: bool,
}

impl CacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        let start_janitor = config.janitor.enabled;
        Self {
            config,
            codec: Arc::new(JsonCodec),
            remote_backend: None,
            start_janitor,
        }
    }

    /// Override the value codec used by the disk and remote tiers.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use `backend` for the remote tier instead of the configured URL.
    pub fn remote_backend(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.remote_backend = Some(backend);
        self
    }

    /// Start background maintenance once ready (defaults to `janitor.enabled`).
    pub fn janitor(mut self, enabled: bool) -> Self {
        self.start_janitor = enabled;
        self
    }

    /// Construct the cache and wait until it is ready.
    pub async fn open(self) -> Result<CacheCoordinator, CacheError> {
        self.config.validate().map_err(CacheError::InvalidConfig)?;
        let coordinator = CacheCoordinator::initializing(self.config.clone());
        coordinator
            .start(self.codec, self.remote_backend, self.start_janitor)
            .await?;
        Ok(coordinator)
    }

    /// Return immediately and finish start-up in the background.
    ///
    /// Fails with [`CacheError::NoRuntime`] outside a tokio runtime.
    /// Operations issued before the cache is ready wait up to the start-up
    /// timeout.
    pub fn spawn(self) -> Result<CacheCoordinator, CacheError> {
        self.config.validate().map_err(CacheError::InvalidConfig)?;
        let runtime = Handle::try_current().map_err(|e| CacheError::NoRuntime(e.to_string()))?;
        let coordinator = CacheCoordinator::initializing(self.config.clone());
        let starter = coordinator.clone();
        runtime.spawn(async move {
            let _ = starter
                .start(self.codec, self.remote_backend, self.start_janitor)
                .await;
        });
        Ok(coordinator)
    }
}

struct Inner {
    config: CacheConfig,
    stack: OnceLock<Arc<TierStack>>,
    state: watch::Sender<Lifecycle>,
    failure: OnceLock<String>,
    stats: Arc<CacheStats>,
    janitor: Mutex<Option<Janitor>>,
}

/// Handle to a tiered cache. Clones share the same cache.
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

impl CacheCoordinator {
    /// Shortcut for `CacheBuilder::new(config).open()`.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        CacheBuilder::new(config).open().await
    }

    fn initializing(config: CacheConfig) -> Self {
        let (state, _) = watch::channel(Lifecycle::Initializing);
        Self {
            inner: Arc::new(Inner {
                config,
                stack: OnceLock::new(),
                state,
                failure: OnceLock::new(),
                stats: Arc::new(CacheStats::new()),
                janitor: Mutex::new(None),
            }),
        }
    }

    async fn start(
        &self,
        codec: Arc<dyn Codec>,
        remote_backend: Option<Arc<dyn RemoteBackend>>,
        start_janitor: bool,
    ) -> Result<(), CacheError> {
        let config = &self.inner.config;
        let stack = match TierStack::build(config, codec, remote_backend).await {
            Ok(stack) => Arc::new(stack),
            Err(e) => {
                warn!(error = %e, "Cache start-up failed");
                let _ = self.inner.failure.set(e.to_string());
                self.inner.state.send_if_modified(|state| {
                    let initializing = *state == Lifecycle::Initializing;
                    if initializing {
                        *state = Lifecycle::Failed;
                    }
                    initializing
                });
                return Err(e);
            }
        };
        let _ = self.inner.stack.set(stack.clone());

        // Held across the transition so a concurrent close() cannot miss the janitor.
        let became_ready = {
            let mut janitor = self.inner.janitor.lock();
            let ready = self.inner.state.send_if_modified(|state| {
                let initializing = *state == Lifecycle::Initializing;
                if initializing {
                    *state = Lifecycle::Ready;
                }
                initializing
            });
            if ready && start_janitor {
                *janitor = Some(Janitor::start(
                    stack.clone(),
                    self.inner.stats.clone(),
                    &config.janitor,
                    Duration::from_secs(config.memory.check_interval_secs),
                ));
            }
            ready
        };

        if !became_ready {
            if let Err(e) = stack.remote.close().await {
                warn!(error = %e, "Failed to close remote tier");
            }
            return Err(CacheError::Closed);
        }

        info!(
            memory_max_keys = config.memory.max_keys,
            disk = stack.disk.is_enabled(),
            remote = stack.remote.is_enabled(),
            "Cache ready"
        );
        Ok(())
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.state.borrow()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Wait until the cache is ready, bounded by the start-up timeout.
    pub async fn wait_ready(&self) -> Result<(), CacheError> {
        self.ready_stack().await.map(|_| ())
    }

    async fn ready_stack(&self) -> Result<Arc<TierStack>, CacheError> {
        let timeout = self.inner.config.startup_timeout();
        let mut state_rx = self.inner.state.subscribe();
        let state = match tokio::time::timeout(
            timeout,
            state_rx.wait_for(|s| *s != Lifecycle::Initializing),
        )
        .await
        {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => Lifecycle::Closed,
            Err(_) => return Err(CacheError::NotReady(timeout)),
        };

        match state {
            Lifecycle::Ready => self
                .inner
                .stack
                .get()
                .cloned()
                .ok_or(CacheError::NotReady(timeout)),
            Lifecycle::Failed => Err(CacheError::Failed(
                self.inner.failure.get().cloned().unwrap_or_default(),
            )),
            Lifecycle::Closed | Lifecycle::Initializing => Err(CacheError::Closed),
        }
    }

    /// The tier stack, or `None` when the operation must degrade.
    async fn stack_for(&self, op: &'static str) -> Option<Arc<TierStack>> {
        if self.lifecycle() == Lifecycle::Ready {
            if let Some(stack) = self.inner.stack.get() {
                return Some(stack.clone());
            }
        }
        match self.ready_stack().await {
            Ok(stack) => Some(stack),
            Err(e) => {
                debug!(op, error = %e, "Cache unavailable, operation degraded");
                None
            }
        }
    }

    /// Bound a slow-tier operation by the operation timeout.
    async fn bounded<T>(
        &self,
        kind: TierKind,
        op: impl Future<Output = TierResult<T>>,
    ) -> TierResult<T> {
        if kind == TierKind::Memory {
            return op.await;
        }
        let after = self.inner.config.operation_timeout();
        match tokio::time::timeout(after, op).await {
            Ok(result) => result,
            Err(_) => Err(TierError::Timeout { tier: kind, after }),
        }
    }

    fn tier_failed(&self, kind: TierKind, op: &str, key: &str, error: &TierError) {
        self.inner.stats.record_error();
        warn!(tier = %kind, op, key, error = %error, "Tier operation failed");
    }

    /// Look up `key`, promoting a hit from a slower tier into every faster one.
    pub async fn get(&self, key: &str, options: GetOptions) -> Option<Value> {
        let stack = self.stack_for("get").await?;
        let tiers = stack.ordered();

        for (level, tier) in tiers.iter().enumerate() {
            if !tier.is_enabled() {
                continue;
            }
            let kind = tier.kind();
            match self.bounded(kind, tier.get(key)).await {
                Ok(Some(entry)) => {
                    self.inner.stats.record_hit(kind);
                    debug!(key, tier = %kind, "Cache hit");
                    self.promote(key, &entry, &tiers[..level], options.ttl)
                        .await;
                    return Some(entry.value().clone());
                }
                Ok(None) => self.inner.stats.record_tier_miss(kind),
                Err(e) => self.tier_failed(kind, "get", key, &e),
            }
        }

        self.inner.stats.record_miss();
        debug!(key, "Cache miss");
        None
    }

    /// [`get`](Self::get) deserialized into `T`; a value of the wrong shape
    /// is reported as absent.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str, options: GetOptions) -> Option<T> {
        let value = self.get(key, options).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Backfill `entry` into each of the `faster` tiers.
    async fn promote(
        &self,
        key: &str,
        entry: &Entry,
        faster: &[&dyn Tier],
        ttl: Option<Duration>,
    ) {
        let remaining = entry.remaining_at(SystemTime::now());
        if remaining == Some(Duration::ZERO) {
            return;
        }

        for tier in faster.iter().filter(|t| t.is_enabled()) {
            let kind = tier.kind();
            let wanted = ttl.unwrap_or_else(|| tier.default_ttl());
            let ttl = capped_ttl(wanted, remaining);
            match self.bounded(kind, tier.set(key, entry.value(), ttl)).await {
                Ok(()) => {
                    self.inner.stats.record_promotion();
                    debug!(key, tier = %kind, ttl = ?ttl, "Promoted entry");
                }
                Err(e) => self.tier_failed(kind, "promote", key, &e),
            }
        }
    }

    /// Store `value` in every enabled tier. Returns whether the memory write
    /// succeeded; slower-tier failures are logged and counted only.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        options: SetOptions,
    ) -> bool {
        let Some(stack) = self.stack_for("set").await else {
            return false;
        };
        let ttl = ttl.unwrap_or_else(|| self.inner.config.std_ttl());

        stack.memory.insert(key, value.clone(), ttl);
        self.inner.stats.record_set();

        if !options.memory_only {
            let disk = self.write_through(stack.disk.as_ref(), key, &value, ttl);
            let remote = self.write_through(stack.remote.as_ref(), key, &value, ttl);
            futures::join!(disk, remote);
        }
        true
    }

    /// [`set`](Self::set) for any serializable value.
    pub async fn set_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        options: SetOptions,
    ) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl, options).await,
            Err(e) => {
                self.inner.stats.record_error();
                warn!(key, error = %e, "Value is not serializable");
                false
            }
        }
    }

    async fn write_through(&self, tier: &dyn Tier, key: &str, value: &Value, ttl: Duration) {
        if !tier.is_enabled() {
            return;
        }
        let kind = tier.kind();
        match self.bounded(kind, tier.set(key, value, ttl)).await {
            Ok(()) => debug!(key, tier = %kind, "Wrote through"),
            Err(e) => self.tier_failed(kind, "set", key, &e),
        }
    }

    /// Remove `key` from every tier; true if any tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(stack) = self.stack_for("delete").await else {
            return false;
        };

        let mut removed = false;
        for tier in stack.ordered().into_iter().filter(|t| t.is_enabled()) {
            let kind = tier.kind();
            match self.bounded(kind, tier.delete(key)).await {
                Ok(hit) => removed |= hit,
                Err(e) => self.tier_failed(kind, "delete", key, &e),
            }
        }

        if removed {
            self.inner.stats.record_delete();
        }
        removed
    }

    /// Whether any tier holds `key`, checking the cheapest first.
    pub async fn has(&self, key: &str) -> bool {
        let Some(stack) = self.stack_for("has").await else {
            return false;
        };

        for tier in stack.ordered().into_iter().filter(|t| t.is_enabled()) {
            let kind = tier.kind();
            match self.bounded(kind, tier.has(key)).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => self.tier_failed(kind, "has", key, &e),
            }
        }
        false
    }

    /// Clear every enabled tier.
    pub async fn flush(&self) {
        let Some(stack) = self.stack_for("flush").await else {
            return;
        };

        for tier in stack.ordered().into_iter().filter(|t| t.is_enabled()) {
            let kind = tier.kind();
            match self.bounded(kind, tier.clear()).await {
                Ok(()) => debug!(tier = %kind, "Tier flushed"),
                Err(e) => self.tier_failed(kind, "flush", "*", &e),
            }
        }
        info!("Cache flushed");
    }

    /// Run a disk sweep now. `None` when the disk tier is disabled or the
    /// sweep failed.
    pub async fn cleanup(&self) -> Option<CleanupReport> {
        let stack = self.stack_for("cleanup").await?;
        if !stack.disk.is_enabled() {
            return None;
        }
        match self.bounded(TierKind::Disk, stack.disk.cleanup()).await {
            Ok(report) => Some(report),
            Err(e) => {
                self.tier_failed(TierKind::Disk, "cleanup", "*", &e);
                None
            }
        }
    }

    /// Counters plus live tier information.
    pub fn stats(&self) -> StatsSnapshot {
        match self.inner.stack.get() {
            Some(stack) => self
                .inner
                .stats
                .snapshot(&stack.memory, &stack.disk, &stack.remote),
            None => StatsSnapshot::default(),
        }
    }

    /// Stop the janitor and release the remote backend. Idempotent.
    pub async fn close(&self) -> Result<(), CacheError> {
        let janitor = {
            let mut janitor = self.inner.janitor.lock();
            let was_open = self.inner.state.send_if_modified(|state| {
                let open = matches!(*state, Lifecycle::Initializing | Lifecycle::Ready);
                if open {
                    *state = Lifecycle::Closed;
                }
                open
            });
            if !was_open {
                return Ok(());
            }
            janitor.take()
        };

        if let Some(janitor) = janitor {
            janitor.shutdown().await;
        }
        if let Some(stack) = self.inner.stack.get() {
            stack.remote.close().await?;
        }
        info!("Cache closed");
        Ok(())
    }

    /// The memory tier, once started.
    pub fn memory(&self) -> Option<Arc<MemoryTier>> {
        self.inner.stack.get().map(|s| s.memory.clone())
    }

    /// The disk tier, once started.
    pub fn disk(&self) -> Option<Arc<DiskTier>> {
        self.inner.stack.get().map(|s| s.disk.clone())
    }

    /// The remote tier, once started.
    pub fn remote(&self) -> Option<Arc<RemoteTier>> {
        self.inner.stack.get().map(|s| s.remote.clone())
    }
}

/// TTL for a promoted copy: never longer than what the entry has left.
fn capped_ttl(wanted: Duration, remaining: Option<Duration>) -> Duration {
    match remaining {
        None => wanted,
        Some(left) if wanted.is_zero() => left,
        Some(left) => wanted.min(left),
    }
}
