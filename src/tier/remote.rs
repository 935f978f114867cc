//! Remote tier: adapter over an external key/value service.
//!
//! The service is reached through a [`RemoteBackend`]. Two backends ship
//! with the crate:
//! - [`HttpBackend`]: a small REST protocol over reqwest
//! - [`InProcessBackend`]: a shared in-process map, for single-host setups
//!   and tests
//!
//! Construction never fails the cache: when the backend cannot be reached at
//! start-up, the tier disables itself and logs once. Runtime failures drop
//! the `connected` flag until the next successful call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::codec::{Codec, CodecError};
use crate::cache::entry::{saturating_millis, Entry, Record};
use crate::tier::{Tier, TierError, TierKind, TierResult};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from remote store")]
    Status { status: u16 },

    #[error("Invalid remote URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

/// The protocol a remote key/value service must speak.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Succeeds when the service is reachable.
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError>;

    /// Store `data`; `ttl = None` means no expiry.
    async fn set(&self, key: &str, data: Bytes, ttl: Option<Duration>) -> Result<(), RemoteError>;

    async fn delete(&self, key: &str) -> Result<bool, RemoteError>;

    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;

    /// Remove every key starting with `prefix`.
    async fn clear(&self, prefix: &str) -> Result<(), RemoteError>;

    /// Release connections. Best-effort.
    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

// ─── HTTP backend ──────────────────────────────────────────────────────────

/// REST adapter.
///
/// ```text
/// GET    <base>                 ping (2xx)
/// GET    <base>/<key>           200 body | 404
/// PUT    <base>/<key>?ttl_ms=N  store body
/// DELETE <base>/<key>           2xx | 404
/// HEAD   <base>/<key>           2xx | 404
/// DELETE <base>?prefix=P        clear keys under P
/// ```
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(url).map_err(|e| RemoteError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl {
                url: url.to_string(),
                reason: "URL cannot carry path segments".to_string(),
            });
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn key_url(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url
    }
}

fn unexpected(status: StatusCode) -> RemoteError {
    RemoteError::Status {
        status: status.as_u16(),
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn ping(&self) -> Result<(), RemoteError> {
        let resp = self.client.get(self.base.clone()).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(resp.status()))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        let resp = self.client.get(self.key_url(key)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?)),
            s => Err(unexpected(s)),
        }
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Option<Duration>) -> Result<(), RemoteError> {
        let mut req = self.client.put(self.key_url(key)).body(data);
        if let Some(ttl) = ttl {
            req = req.query(&[("ttl_ms", saturating_millis(ttl))]);
        }
        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(resp.status()))
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        let resp = self.client.delete(self.key_url(key)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unexpected(s)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let resp = self.client.head(self.key_url(key)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unexpected(s)),
        }
    }

    async fn clear(&self, prefix: &str) -> Result<(), RemoteError> {
        let resp = self
            .client
            .delete(self.base.clone())
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(resp.status()))
        }
    }
}

// ─── In-process backend ────────────────────────────────────────────────────

/// Shared in-process store honoring TTLs.
///
/// Clones share the same map, so several coordinators in one process can
/// use it as their common remote tier. [`set_available`](Self::set_available)
/// simulates an outage.
#[derive(Clone, Default)]
pub struct InProcessBackend {
    store: Arc<Mutex<HashMap<String, (Bytes, Option<Instant>)>>>,
    unavailable: Arc<AtomicBool>,
}

impl InProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    /// Number of unexpired keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .lock()
            .values()
            .filter(|(_, expiry)| expiry.map_or(true, |e| e > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(RemoteError::Unavailable("backend marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteBackend for InProcessBackend {
    async fn ping(&self) -> Result<(), RemoteError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, RemoteError> {
        self.check()?;
        let mut store = self.store.lock();
        match store.get(key) {
            Some((data, expiry)) if expiry.map_or(true, |e| e > Instant::now()) => {
                return Ok(Some(data.clone()))
            }
            Some(_) => {}
            None => return Ok(None),
        }
        store.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Option<Duration>) -> Result<(), RemoteError> {
        self.check()?;
        let expiry = ttl.and_then(|t| Instant::now().checked_add(t));
        self.store.lock().insert(key.to_string(), (data, expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        self.check()?;
        Ok(self.store.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        Ok(RemoteBackend::get(self, key).await?.is_some())
    }

    async fn clear(&self, prefix: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.store.lock().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

// ─── Tier ──────────────────────────────────────────────────────────────────

/// The remote tier.
pub struct RemoteTier {
    backend: Option<Arc<dyn RemoteBackend>>,
    enabled: AtomicBool,
    connected: AtomicBool,
    key_prefix: String,
    default_ttl: Duration,
    codec: Arc<dyn Codec>,
}

impl RemoteTier {
    /// A tier that is not configured; the coordinator always skips it.
    pub fn disabled(codec: Arc<dyn Codec>) -> Self {
        Self {
            backend: None,
            enabled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            key_prefix: String::new(),
            default_ttl: Duration::ZERO,
            codec,
        }
    }

    /// Ping `backend` and build the tier.
    ///
    /// An unreachable backend yields a disabled tier; the failure is returned
    /// alongside so callers that require the tier can refuse to start.
    pub async fn connect(
        backend: Arc<dyn RemoteBackend>,
        key_prefix: &str,
        default_ttl: Duration,
        codec: Arc<dyn Codec>,
        timeout: Duration,
    ) -> (Self, Option<RemoteError>) {
        let ping = match tokio::time::timeout(timeout, backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable(format!(
                "ping timed out after {timeout:?}"
            ))),
        };

        let up = ping.is_ok();
        let tier = Self {
            backend: Some(backend),
            enabled: AtomicBool::new(up),
            connected: AtomicBool::new(up),
            key_prefix: key_prefix.to_string(),
            default_ttl,
            codec,
        };

        match ping {
            Ok(()) => {
                info!(prefix = key_prefix, "Remote tier connected");
                (tier, None)
            }
            Err(e) => {
                warn!(error = %e, "Remote tier unreachable at start-up, disabling it");
                (tier, Some(e))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix(), key)
    }

    fn backend(&self) -> Result<&Arc<dyn RemoteBackend>, RemoteError> {
        self.backend
            .as_ref()
            .ok_or_else(|| RemoteError::Unavailable("remote tier not configured".to_string()))
    }

    /// Record the outcome of a backend call on the `connected` flag.
    fn track<T>(&self, result: Result<T, RemoteError>) -> TierResult<T> {
        match result {
            Ok(value) => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn decode(&self, key: &str, raw: &[u8]) -> TierResult<Record> {
        let parsed = self
            .codec
            .decode(raw)
            .and_then(|value| serde_json::from_value::<Record>(value).map_err(CodecError::from));
        parsed.map_err(|e| TierError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Release the backend's connections.
    pub async fn close(&self) -> Result<(), RemoteError> {
        self.connected.store(false, Ordering::Relaxed);
        match &self.backend {
            Some(backend) => backend.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Tier for RemoteTier {
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> TierResult<Option<Arc<Entry>>> {
        let backend = self.backend()?;
        let raw = match self.track(backend.get(&self.remote_key(key)).await)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let record = self.decode(key, &raw)?;
        if record.key != key {
            debug!(key, stored = %record.key, "Remote record key mismatch, treating as miss");
            return Ok(None);
        }

        let entry = Entry::from_record(record);
        if entry.is_expired() {
            return Ok(None);
        }
        Ok(Some(Arc::new(entry)))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()> {
        let backend = self.backend()?;
        let record = Entry::new(value.clone(), ttl).to_record(key);
        let encoded = serde_json::to_value(&record).map_err(CodecError::from)?;
        let data = Bytes::from(self.codec.encode(&encoded)?);
        let ttl = (!ttl.is_zero()).then_some(ttl);
        self.track(backend.set(&self.remote_key(key), data, ttl).await)
    }

    async fn delete(&self, key: &str) -> TierResult<bool> {
        let backend = self.backend()?;
        self.track(backend.delete(&self.remote_key(key)).await)
    }

    async fn has(&self, key: &str) -> TierResult<bool> {
        let backend = self.backend()?;
        self.track(backend.exists(&self.remote_key(key)).await)
    }

    async fn clear(&self) -> TierResult<()> {
        let backend = self.backend()?;
        self.track(backend.clear(&self.key_prefix).await)
    }
}
