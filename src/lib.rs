//! tiered-cache: a key/value cache over an ordered stack of storage tiers.
//!
//! Lookups walk the tiers fastest first and promote hits upward:
//!   in-process memory (hot) → local disk (warm) → remote store (cold, shared)
//!
//! Writes go through to every enabled tier. Each tier applies its own TTL
//! and capacity bound, and a failing slow tier degrades to a miss instead of
//! an error.
//!
//! ```no_run
//! use tiered_cache::{CacheConfig, CacheCoordinator, GetOptions, SetOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), tiered_cache::CacheError> {
//! let cache = CacheCoordinator::open(CacheConfig::default()).await?;
//! cache.set("user:1", json!({"name": "Ana"}), None, SetOptions::default()).await;
//! let user = cache.get("user:1", GetOptions::default()).await;
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod tier;

pub use cache::codec::{Codec, CodecError, JsonCodec};
pub use cache::coordinator::{
    CacheBuilder, CacheCoordinator, CacheError, GetOptions, Lifecycle, SetOptions,
};
pub use cache::stats::StatsSnapshot;
pub use config::CacheConfig;
pub use tier::remote::{HttpBackend, InProcessBackend, RemoteBackend, RemoteError};
pub use tier::{Tier, TierKind};
