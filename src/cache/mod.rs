//! Cache core.
//!
//! This module contains the coordinator and the pieces the tiers share:
//! - [`entry`]: immutable value envelope and its serialized record
//! - [`codec`]: value encoding for byte-oriented tiers
//! - [`compressor`]: optional zstd compression of disk payloads
//! - [`evictor`]: victim ordering shared by memory and disk eviction
//! - [`stats`]: atomic counters and snapshots
//! - [`coordinator`]: lookups with promotion, write-through, lifecycle
//! - [`janitor`]: periodic background maintenance

pub mod codec;
pub mod compressor;
pub mod coordinator;
pub mod entry;
pub mod evictor;
pub mod janitor;
pub mod stats;
