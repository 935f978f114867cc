//! Disk tier: one file per key under a root directory.
//!
//! Files are named `<sanitized-key>.cache`. Each starts with a small header
//! (expiry time and original key) followed by the codec encoding of a
//! [`Record`] (optionally zstd-compressed). Existence checks read only the
//! header. Writes go to a uniquely named
//! temp file in the same directory and are renamed over the destination, so
//! a reader never observes a partially written file.
//!
//! Expiry is checked two ways: a file older than the tier TTL is stale, and
//! a record whose own TTL has elapsed is expired. Both are deleted on touch.
//! The running byte total is a fast-path estimate; [`DiskTier::cleanup`]
//! recomputes it from a directory scan and evicts down to the low watermark
//! when the tier is over capacity.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::codec::{Codec, CodecError};
use crate::cache::compressor::{Compressed, Compressor};
use crate::cache::entry::{saturating_millis, Entry, Record};
use crate::cache::evictor::{select_victims, EvictionCandidate};
use crate::config::DiskConfig;
use crate::tier::{Tier, TierError, TierKind, TierResult};

const CACHE_SUFFIX: &str = ".cache";
const TEMP_SUFFIX: &str = ".tmp";

/// Temp files older than this are leftovers from an interrupted write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(5 * 60);

const HEADER_MAGIC: [u8; 4] = *b"TCH1";

/// Magic, expiry millis (u64 LE), key length (u32 LE). The key bytes follow.
const HEADER_PREFIX_LEN: usize = 16;

/// Leading part of every cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
    /// Milliseconds since the Unix epoch; 0 = never expires.
    expires_at_ms: u64,
    key: String,
}

impl FileHeader {
    fn for_entry(key: &str, entry: &Entry) -> Self {
        let expires_at_ms = entry
            .expires_at()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(saturating_millis)
            .unwrap_or(0);
        Self {
            expires_at_ms,
            key: key.to_string(),
        }
    }

    fn encode(&self) -> std::io::Result<Vec<u8>> {
        let key_len = u32::try_from(self.key.len()).map_err(|_| {
            std::io::Error::new(ErrorKind::InvalidInput, "key too long for cache file header")
        })?;
        let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + self.key.len());
        out.extend_from_slice(&HEADER_MAGIC);
        out.extend_from_slice(&self.expires_at_ms.to_le_bytes());
        out.extend_from_slice(&key_len.to_le_bytes());
        out.extend_from_slice(self.key.as_bytes());
        Ok(out)
    }

    /// Expiry and key length from the fixed prefix.
    fn parse_prefix(prefix: &[u8]) -> Option<(u64, usize)> {
        if prefix.len() < HEADER_PREFIX_LEN || prefix[..4] != HEADER_MAGIC {
            return None;
        }
        let expires_at_ms = u64::from_le_bytes(prefix[4..12].try_into().ok()?);
        let key_len = u32::from_le_bytes(prefix[12..16].try_into().ok()?) as usize;
        Some((expires_at_ms, key_len))
    }

    /// Split a whole file into its header and body.
    fn split(raw: &[u8]) -> Option<(Self, &[u8])> {
        let (expires_at_ms, key_len) = Self::parse_prefix(raw)?;
        let end = HEADER_PREFIX_LEN.checked_add(key_len)?;
        let key = std::str::from_utf8(raw.get(HEADER_PREFIX_LEN..end)?).ok()?;
        let header = Self {
            expires_at_ms,
            key: key.to_string(),
        };
        Some((header, &raw[end..]))
    }

    fn is_expired_at(&self, now: SystemTime) -> bool {
        if self.expires_at_ms == 0 {
            return false;
        }
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(saturating_millis)
            .unwrap_or(0);
        now_ms >= self.expires_at_ms
    }
}

/// Read just the header of the file at `path`. `None` when it is malformed.
async fn read_header(path: &Path, file_len: u64) -> std::io::Result<Option<FileHeader>> {
    let mut file = fs::File::open(path).await?;
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    match file.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let Some((expires_at_ms, key_len)) = FileHeader::parse_prefix(&prefix) else {
        return Ok(None);
    };
    if (HEADER_PREFIX_LEN + key_len) as u64 > file_len {
        return Ok(None);
    }

    let mut key = vec![0u8; key_len];
    match file.read_exact(&mut key).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    Ok(String::from_utf8(key)
        .ok()
        .map(|key| FileHeader { expires_at_ms, key }))
}

/// Map a key to a file-system-safe stem.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, so distinct keys can
/// collide (`a:b` and `a/b`). The record stores the original key and reads of
/// a foreign record are reported as misses.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files removed because they outlived the tier TTL.
    pub expired: usize,
    /// Files removed to get back under capacity.
    pub evicted: usize,
    /// Orphaned temp files removed.
    pub temp_removed: usize,
    /// Authoritative byte total after the pass.
    pub bytes_used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Cache,
    Temp,
    Other,
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    name: String,
    len: u64,
    modified: Option<SystemTime>,
    kind: FileKind,
}

fn classify(name: &str) -> FileKind {
    if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
        FileKind::Temp
    } else if name.ends_with(CACHE_SUFFIX) {
        FileKind::Cache
    } else {
        FileKind::Other
    }
}

fn age(modified: Option<SystemTime>, now: SystemTime) -> Duration {
    modified
        .and_then(|m| now.duration_since(m).ok())
        .unwrap_or(Duration::ZERO)
}

/// The disk tier.
pub struct DiskTier {
    root: PathBuf,
    enabled: AtomicBool,
    /// Maximum file age (zero = no limit).
    ttl: Duration,
    /// 0 = unbounded.
    max_bytes: u64,
    low_watermark: f64,
    bytes_used: AtomicU64,
    bytes_saved: AtomicU64,
    codec: Arc<dyn Codec>,
    compressor: Compressor,
    /// One sweep at a time.
    sweep: Mutex<()>,
}

impl DiskTier {
    /// Create the root directory and take an initial usage measurement.
    pub async fn open(config: &DiskConfig, codec: Arc<dyn Codec>) -> TierResult<Self> {
        fs::create_dir_all(&config.path).await?;

        let tier = Self::build(config, codec, true);
        let used: u64 = tier
            .list_files()
            .await?
            .iter()
            .filter(|f| f.kind == FileKind::Cache)
            .map(|f| f.len)
            .sum();
        tier.bytes_used.store(used, Ordering::Relaxed);

        info!(
            path = %config.path.display(),
            bytes_used = used,
            max_bytes = config.max_bytes,
            compression = tier.compressor.is_enabled(),
            "Disk tier ready"
        );
        Ok(tier)
    }

    /// A tier that the coordinator always skips.
    pub fn disabled(config: &DiskConfig, codec: Arc<dyn Codec>) -> Self {
        Self::build(config, codec, false)
    }

    fn build(config: &DiskConfig, codec: Arc<dyn Codec>, enabled: bool) -> Self {
        Self {
            root: config.path.clone(),
            enabled: AtomicBool::new(enabled),
            ttl: Duration::from_secs(config.ttl_secs),
            max_bytes: config.max_bytes,
            low_watermark: config.low_watermark,
            bytes_used: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
            codec,
            compressor: Compressor::new(config.compression.clone()),
            sweep: Mutex::new(()),
        }
    }

    /// Override the file-age TTL (tests use sub-second values).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `key`.
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{CACHE_SUFFIX}", sanitize_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.root.join(format!(
            ".{}.{}{TEMP_SUFFIX}",
            sanitize_key(key),
            Uuid::new_v4().simple()
        ))
    }

    /// Running byte total (estimate between sweeps).
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }

    /// Cumulative bytes saved by compression.
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn is_stale(&self, modified: Option<SystemTime>, now: SystemTime) -> bool {
        !self.ttl.is_zero() && age(modified, now) > self.ttl
    }

    fn over_capacity(&self) -> bool {
        self.max_bytes > 0 && self.bytes_used() > self.max_bytes
    }

    fn add_bytes(&self, n: u64) {
        self.bytes_used.fetch_add(n, Ordering::Relaxed);
    }

    fn sub_bytes(&self, n: u64) {
        let _ = self
            .bytes_used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n))
            });
    }

    fn encode(&self, record: &Record) -> TierResult<Vec<u8>> {
        let value = serde_json::to_value(record).map_err(CodecError::from)?;
        Ok(self.codec.encode(&value)?)
    }

    fn decode(&self, raw: &[u8]) -> TierResult<Record> {
        let (_, body) = FileHeader::split(raw)
            .ok_or_else(|| CodecError::Custom("missing or truncated file header".to_string()))?;
        let body = self.compressor.decompress(body.to_vec())?;
        let value = self.codec.decode(&body)?;
        let record = serde_json::from_value(value).map_err(CodecError::from)?;
        Ok(record)
    }

    /// Remove a file, decrementing the byte total on success.
    async fn remove_file(&self, path: &Path, len: u64) -> std::io::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                self.sub_bytes(len);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn write_entry(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()> {
        let entry = Entry::new(value.clone(), ttl);
        let Compressed { data: body, saved } =
            self.compressor.compress(self.encode(&entry.to_record(key))?)?;
        let mut data = FileHeader::for_entry(key, &entry).encode()?;
        data.extend_from_slice(&body);

        let path = self.file_path(key);
        let previous = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let tmp = self.temp_path(key);
        if let Err(e) = write_atomic(&tmp, &path, &data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.add_bytes(data.len() as u64);
        self.sub_bytes(previous);
        if saved > 0 {
            self.bytes_saved.fetch_add(saved, Ordering::Relaxed);
        }

        debug!(
            key,
            path = %path.display(),
            size = data.len(),
            saved,
            "Wrote entry to disk"
        );

        if self.over_capacity() {
            match self.cleanup().await {
                Ok(report) => debug!(?report, "Capacity cleanup after write"),
                Err(e) => warn!(error = %e, "Capacity cleanup after write failed"),
            }
        }

        Ok(())
    }

    async fn read_entry(&self, key: &str) -> TierResult<Option<Arc<Entry>>> {
        let path = self.file_path(key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if self.is_stale(meta.modified().ok(), SystemTime::now()) {
            self.remove_file(&path, meta.len()).await?;
            debug!(key, "Removed stale disk entry");
            return Ok(None);
        }

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = match self.decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                if let Err(rm) = self.remove_file(&path, meta.len()).await {
                    warn!(key, error = %rm, "Failed to remove corrupt cache file");
                }
                return Err(TierError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if record.key != key {
            debug!(key, stored = %record.key, "File name collision, treating as miss");
            return Ok(None);
        }

        let entry = Entry::from_record(record);
        if entry.is_expired() {
            self.remove_file(&path, meta.len()).await?;
            debug!(key, "Removed expired disk entry");
            return Ok(None);
        }

        Ok(Some(Arc::new(entry)))
    }

    async fn delete_entry(&self, key: &str) -> TierResult<bool> {
        let path = self.file_path(key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(self.remove_file(&path, meta.len()).await?)
    }

    /// Existence check from the file age and header, without decoding the
    /// body. Agrees with [`read_entry`](Self::read_entry) on every readable file.
    async fn has_entry(&self, key: &str) -> TierResult<bool> {
        let path = self.file_path(key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        if self.is_stale(meta.modified().ok(), now) {
            self.remove_file(&path, meta.len()).await?;
            return Ok(false);
        }

        let header = match read_header(&path, meta.len()).await {
            Ok(Some(header)) => header,
            Ok(None) => {
                if let Err(rm) = self.remove_file(&path, meta.len()).await {
                    warn!(key, error = %rm, "Failed to remove corrupt cache file");
                }
                return Err(TierError::Corrupt {
                    key: key.to_string(),
                    reason: "missing or truncated file header".to_string(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if header.key != key {
            debug!(key, stored = %header.key, "File name collision, treating as absent");
            return Ok(false);
        }
        if header.is_expired_at(now) {
            self.remove_file(&path, meta.len()).await?;
            debug!(key, "Removed expired disk entry");
            return Ok(false);
        }
        Ok(true)
    }

    /// Remove every cache and temp file under the root.
    async fn clear_all(&self) -> TierResult<()> {
        let _guard = self.sweep.lock().await;
        let mut first_error = None;

        for file in self.list_files().await? {
            if file.kind == FileKind::Other {
                continue;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to remove cache file");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.bytes_used.store(0, Ordering::Relaxed);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Sweep the directory: drop stale entries and orphaned temp files,
    /// recompute the byte total, and evict down to the low watermark if the
    /// tier is still over capacity.
    pub async fn cleanup(&self) -> TierResult<CleanupReport> {
        let _guard = self.sweep.lock().await;
        let now = SystemTime::now();
        let mut report = CleanupReport::default();
        let mut live = Vec::new();
        let mut total = 0u64;

        for file in self.list_files().await? {
            match file.kind {
                FileKind::Other => {}
                FileKind::Temp => {
                    if age(file.modified, now) > STALE_TEMP_AGE && remove_quiet(&file.path).await {
                        report.temp_removed += 1;
                    }
                }
                FileKind::Cache => {
                    if self.is_stale(file.modified, now) && remove_quiet(&file.path).await {
                        report.expired += 1;
                    } else {
                        total += file.len;
                        live.push(file);
                    }
                }
            }
        }

        if self.max_bytes > 0 && total > self.max_bytes {
            let target = (self.max_bytes as f64 * self.low_watermark) as u64;
            let candidates = live.iter().map(|f| EvictionCandidate {
                key: f.name.clone(),
                expires_at: self.expiry_of(f.modified),
                seq: f
                    .modified
                    .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0),
            });
            let victims = select_victims(candidates, live.len());
            let by_name: HashMap<&str, &FileInfo> =
                live.iter().map(|f| (f.name.as_str(), f)).collect();

            for victim in victims {
                if total <= target {
                    break;
                }
                if let Some(file) = by_name.get(victim.key.as_str()) {
                    if remove_quiet(&file.path).await {
                        total = total.saturating_sub(file.len);
                        report.evicted += 1;
                    }
                }
            }
        }

        let drift = self.bytes_used().abs_diff(total);
        self.bytes_used.store(total, Ordering::Relaxed);
        report.bytes_used = total;

        if report.expired + report.evicted + report.temp_removed > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                temp_removed = report.temp_removed,
                bytes_used = total,
                "Disk cleanup complete"
            );
        } else {
            debug!(bytes_used = total, drift, "Disk cleanup found nothing to remove");
        }

        Ok(report)
    }

    fn expiry_of(&self, modified: Option<SystemTime>) -> Option<SystemTime> {
        if self.ttl.is_zero() {
            return None;
        }
        modified.and_then(|m| m.checked_add(self.ttl))
    }

    async fn list_files(&self) -> std::io::Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // Removed between listing and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(FileInfo {
                path: entry.path(),
                kind: classify(&name),
                name,
                len: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        Ok(files)
    }
}

async fn write_atomic(tmp: &Path, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, dest).await
}

/// Remove a file during a sweep; true if it is gone afterwards.
async fn remove_quiet(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            false
        }
    }
}

#[async_trait]
impl Tier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn default_ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> TierResult<Option<Arc<Entry>>> {
        self.read_entry(key).await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()> {
        self.write_entry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> TierResult<bool> {
        self.delete_entry(key).await
    }

    async fn has(&self, key: &str) -> TierResult<bool> {
        self.has_entry(key).await
    }

    async fn clear(&self) -> TierResult<()> {
        self.clear_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::JsonCodec;
    use crate::config::CompressionConfig;
    use serde_json::json;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn config(dir: &Path) -> DiskConfig {
        DiskConfig {
            path: dir.join("disk"),
            ..Default::default()
        }
    }

    async fn open(config: &DiskConfig) -> DiskTier {
        DiskTier::open(config, Arc::new(JsonCodec)).await.unwrap()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("user:1"), "user_1");
        assert_eq!(sanitize_key("a-b_C9"), "a-b_C9");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_key("émoji✓"), "_moji_");
    }

    #[tokio::test]
    async fn test_write_and_read_entry() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "user:1", &json!({"name": "Ana"}), HOUR)
            .await
            .unwrap();
        assert!(tier.file_path("user:1").ends_with("user_1.cache"));
        assert!(tier.file_path("user:1").exists());

        let entry = Tier::get(&tier, "user:1").await.unwrap().unwrap();
        assert_eq!(entry.value(), &json!({"name": "Ana"}));
        assert_eq!(entry.ttl(), HOUR);
    }

    #[tokio::test]
    async fn test_byte_accounting() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "k", &json!("first"), HOUR).await.unwrap();
        let len = std::fs::metadata(tier.file_path("k")).unwrap().len();
        assert_eq!(tier.bytes_used(), len);

        Tier::set(&tier, "k", &json!("a much longer second value"), HOUR)
            .await
            .unwrap();
        let len = std::fs::metadata(tier.file_path("k")).unwrap().len();
        assert_eq!(tier.bytes_used(), len);

        assert!(Tier::delete(&tier, "k").await.unwrap());
        assert_eq!(tier.bytes_used(), 0);
        assert!(!Tier::delete(&tier, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_initial_usage_is_measured() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(tmp.path());
        {
            let tier = open(&cfg).await;
            Tier::set(&tier, "a", &json!(1), HOUR).await.unwrap();
            Tier::set(&tier, "b", &json!(2), HOUR).await.unwrap();
        }

        let reopened = open(&cfg).await;
        assert!(reopened.bytes_used() > 0);
        assert_eq!(
            Tier::get(&reopened, "b").await.unwrap().unwrap().value(),
            &json!(2)
        );
    }

    #[tokio::test]
    async fn test_stale_file_removed_by_has() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path()))
            .await
            .with_ttl(Duration::from_millis(200));

        Tier::set(&tier, "k", &json!("v"), HOUR).await.unwrap();
        assert!(Tier::has(&tier, "k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!Tier::has(&tier, "k").await.unwrap());
        assert!(!tier.file_path("k").exists());
    }

    #[test]
    fn test_header_split() {
        let header = FileHeader {
            expires_at_ms: 1_234,
            key: "user:1".to_string(),
        };
        let mut raw = header.encode().unwrap();
        raw.extend_from_slice(b"body");

        let (parsed, body) = FileHeader::split(&raw).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(body, b"body");
        assert!(FileHeader::split(&raw[..10]).is_none());
        assert!(FileHeader::split(&raw[..HEADER_PREFIX_LEN + 2]).is_none());
        assert!(FileHeader::split(b"{\"key\": \"k\"}").is_none());
    }

    #[tokio::test]
    async fn test_has_honors_entry_ttl() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "k", &json!("v"), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(Tier::has(&tier, "k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!Tier::has(&tier, "k").await.unwrap());
        assert!(!tier.file_path("k").exists());
        assert_eq!(tier.bytes_used(), 0);
    }

    #[tokio::test]
    async fn test_has_detects_collision() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "a/b", &json!(1), HOUR).await.unwrap();
        assert!(Tier::has(&tier, "a/b").await.unwrap());
        assert!(!Tier::has(&tier, "a:b").await.unwrap());
        assert!(Tier::get(&tier, "a:b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_has_rejects_headerless_file() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        std::fs::write(tier.file_path("bad"), b"no header here").unwrap();
        assert!(matches!(
            Tier::has(&tier, "bad").await,
            Err(TierError::Corrupt { .. })
        ));
        assert!(!tier.file_path("bad").exists());
    }

    #[tokio::test]
    async fn test_entry_ttl_honored_on_read() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "k", &json!("v"), Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(Tier::get(&tier, "k").await.unwrap().is_none());
        assert!(!tier.file_path("k").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_deleted() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        std::fs::write(tier.file_path("bad"), b"{\"key\": \"bad\", \"val").unwrap();
        let result = Tier::get(&tier, "bad").await;
        assert!(matches!(result, Err(TierError::Corrupt { .. })));
        assert!(!tier.file_path("bad").exists());
    }

    #[tokio::test]
    async fn test_sanitized_collision_reads_as_miss() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "a:b", &json!("colon"), HOUR).await.unwrap();
        Tier::set(&tier, "a/b", &json!("slash"), HOUR).await.unwrap();

        assert!(Tier::get(&tier, "a:b").await.unwrap().is_none());
        assert_eq!(
            Tier::get(&tier, "a/b").await.unwrap().unwrap().value(),
            &json!("slash")
        );
    }

    #[tokio::test]
    async fn test_write_over_capacity_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.max_bytes = 1000;
        cfg.low_watermark = 0.5;
        let tier = open(&cfg).await;

        let payload = "x".repeat(150);
        for i in 0..10 {
            Tier::set(&tier, &format!("key{i}"), &json!(payload), HOUR)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(tier.bytes_used() <= 1000);
        assert!(!tier.file_path("key0").exists());
        assert!(tier.file_path("key9").exists());
    }

    #[tokio::test]
    async fn test_cleanup_recomputes_usage() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "a", &json!(1), HOUR).await.unwrap();
        // Removed behind the tier's back: the running total drifts.
        std::fs::remove_file(tier.file_path("a")).unwrap();
        assert!(tier.bytes_used() > 0);

        let report = tier.cleanup().await.unwrap();
        assert_eq!(report.bytes_used, 0);
        assert_eq!(tier.bytes_used(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_files() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path()))
            .await
            .with_ttl(Duration::from_millis(100));

        Tier::set(&tier, "a", &json!(1), HOUR).await.unwrap();
        Tier::set(&tier, "b", &json!(2), HOUR).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let report = tier.cleanup().await.unwrap();
        assert_eq!(report.expired, 2);
        assert_eq!(report.bytes_used, 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let tier = open(&config(tmp.path())).await;

        Tier::set(&tier, "a", &json!(1), HOUR).await.unwrap();
        Tier::set(&tier, "b", &json!(2), HOUR).await.unwrap();
        let foreign = tier.root().join("README");
        std::fs::write(&foreign, b"not a cache file").unwrap();

        Tier::clear(&tier).await.unwrap();
        assert_eq!(tier.bytes_used(), 0);
        assert!(!tier.file_path("a").exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_compression_saves_bytes() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(tmp.path());
        cfg.compression = CompressionConfig {
            enabled: true,
            level: 3,
            min_size_bytes: 64,
        };
        let tier = open(&cfg).await;

        let big = json!({"text": "abc".repeat(2000)});
        Tier::set(&tier, "big", &big, HOUR).await.unwrap();

        assert!(tier.bytes_saved() > 0);
        assert_eq!(Tier::get(&tier, "big").await.unwrap().unwrap().value(), &big);
    }
}
