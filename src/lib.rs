//! # cachemap
//!
//! A generic, reader/writer-locked associative container with bulk import/export
//! and a self-describing binary encoding.
//!
//! ## Features
//!
//! - **Convenience operations**: `get`, `set`, `delete`, `len`, `clear`, `export`,
//!   `import`, `encode`, `decode`, each taking the lock it needs internally
//! - **Scoped batches**: [`ConcurrentMap::read`], [`ConcurrentMap::upgradable_read`]
//!   and [`ConcurrentMap::lock`] return RAII guards carrying the same operations
//!   without further locking, so several steps run as one critical section
//! - **Binary encoding**: a type-tagged, length-prefixed record of the whole map
//!   (feature `serde`, enabled by default)
//! - **Metrics**: lock contention and codec counters via [`MetricsCollector`]
//!
//! ## Quick Start
//!
//! ```rust
//! use cachemap::ConcurrentMap;
//!
//! let map: ConcurrentMap<String, u32> = ConcurrentMap::new();
//! map.set("x".to_string(), 10);
//! assert_eq!(map.get("x"), Some(10));
//!
//! // Get-then-conditionally-set without a race
//! {
//!     let mut guard = map.lock();
//!     if guard.get("y").is_none() {
//!         guard.set("y".to_string(), 20);
//!     }
//! }
//! assert_eq!(map.len(), 2);
//! ```
//!
//! ## Thread Safety
//!
//! Storage is only reachable through a lock guard. The "without lock" operations
//! live on the guard types, so they cannot be called unless the caller holds the
//! matching lock.
//!
//! ## Not a Cache Engine
//!
//! There is no eviction, expiry or sharding. The map keeps exactly what it is given.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(feature = "unstable", feature(doc_cfg))]

#[cfg(not(feature = "std"))]
compile_error!("cachemap requires the `std` feature");

#[cfg(feature = "serde")]
pub mod codec;
pub mod map;
pub mod metrics;

pub use crate::map::{ConcurrentMap, MapReadGuard, MapUpgradableGuard, MapWriteGuard};
pub use crate::metrics::{MapMetrics, MetricsCollector};

/// Errors produced while encoding a map
#[cfg(feature = "serde")]
#[cfg_attr(feature = "unstable", doc(cfg(feature = "serde")))]
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A key could not be serialized
    #[error("failed to encode key")]
    Key {
        /// Underlying serializer error
        #[source]
        source: bincode::Error,
    },
    /// A value could not be serialized
    #[error("failed to encode value")]
    Value {
        /// Underlying serializer error
        #[source]
        source: bincode::Error,
    },
    /// A single key or value serialized to more bytes than a length prefix can hold
    #[error("encoded payload of {len} bytes exceeds the u32 length prefix")]
    PayloadTooLarge {
        /// Size of the offending payload
        len: usize,
    },
}

/// Errors produced while decoding a map
///
/// Whatever the variant, the map being decoded into keeps its previous contents.
#[cfg(feature = "serde")]
#[cfg_attr(feature = "unstable", doc(cfg(feature = "serde")))]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Input ended before a complete field could be read
    #[error("input truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the field being read
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },
    /// Input does not start with the record magic
    #[error("input is not an encoded map (bad magic)")]
    BadMagic,
    /// Record written by an unknown format version
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    /// A type tag is not valid UTF-8
    #[error("type tag is not valid UTF-8")]
    InvalidTag(#[source] core::str::Utf8Error),
    /// The record was written for different key or value types
    #[error("type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Type tag of the receiving map
        expected: String,
        /// Type tag found in the record
        found: String,
    },
    /// A key payload could not be deserialized
    #[error("failed to decode key of entry {index}")]
    Key {
        /// Position of the entry in the record
        index: u64,
        /// Underlying deserializer error
        #[source]
        source: bincode::Error,
    },
    /// A value payload could not be deserialized
    #[error("failed to decode value of entry {index}")]
    Value {
        /// Position of the entry in the record
        index: u64,
        /// Underlying deserializer error
        #[source]
        source: bincode::Error,
    },
    /// The same key appears twice in the record
    #[error("duplicate key at entry {index}")]
    DuplicateKey {
        /// Position of the repeated entry
        index: u64,
    },
    /// Bytes remain after the last declared entry
    #[error("{0} trailing bytes after the last entry")]
    TrailingBytes(usize),
}
