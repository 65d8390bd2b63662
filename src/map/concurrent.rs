//! Reader/writer-locked map
//!
//! [`ConcurrentMap`] wraps a `HashMap` in a `parking_lot::RwLock`. Every operation
//! exists in two forms:
//!
//! - a convenience method on the map itself that takes the lock it needs, runs,
//!   and releases the lock before returning;
//! - the same operation on a guard returned by [`ConcurrentMap::read`],
//!   [`ConcurrentMap::upgradable_read`] or [`ConcurrentMap::lock`], which runs
//!   without further locking.
//!
//! Holding one guard across several guard operations makes them a single atomic
//! step. Because the guard owns the lock, a guard operation cannot be called
//! without the lock being held, and dropping the guard always releases it.
//!
//! ## Lock Kinds
//!
//! | Guard | Coexists with | Operations |
//! |-------|---------------|------------|
//! | [`MapReadGuard`] | readers, one upgradable reader | lookups, `export`, `encode` |
//! | [`MapUpgradableGuard`] | readers | lookups, then `upgrade` |
//! | [`MapWriteGuard`] | nothing | everything |
//!
//! ## Example
//!
//! ```rust
//! use cachemap::ConcurrentMap;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let hits: Arc<ConcurrentMap<&'static str, u64>> = Arc::new(ConcurrentMap::new());
//!
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let hits = Arc::clone(&hits);
//!         thread::spawn(move || {
//!             for _ in 0..100 {
//!                 let mut guard = hits.lock();
//!                 let count = guard.get("page").copied().unwrap_or(0);
//!                 guard.set("page", count + 1);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//! assert_eq!(hits.get("page"), Some(400));
//! ```

use crate::metrics::{AtomicMetrics, MapMetrics, MetricsCollector};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use fxhash::FxBuildHasher;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use tracing::trace;

#[cfg(feature = "serde")]
use crate::{codec, DecodeError, EncodeError};
#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
#[cfg(feature = "serde")]
use tracing::debug;

/// A map guarded by a reader/writer lock
///
/// # Type Parameters
///
/// * `K` - The key type, must implement `Hash + Eq` for lookups
/// * `V` - The value type, unconstrained for storage; `get` and `export` need `Clone`
/// * `S` - The hasher builder, [`FxBuildHasher`] by default
///
/// # Examples
///
/// ```rust
/// use cachemap::ConcurrentMap;
///
/// let map: ConcurrentMap<String, u32> = ConcurrentMap::new();
/// map.set("x".to_string(), 10);
/// map.set("y".to_string(), 20);
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.get("x"), Some(10));
/// assert_eq!(map.get("z"), None);
/// ```
pub struct ConcurrentMap<K, V, S = FxBuildHasher> {
    entries: RwLock<HashMap<K, V, S>>,
    metrics: AtomicMetrics,
}

impl<K, V> ConcurrentMap<K, V, FxBuildHasher> {
    /// Create an empty map
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<i32, String> = ConcurrentMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(FxBuildHasher::default())
    }

    /// Create an empty map with room for at least `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, FxBuildHasher::default())
    }
}

impl<K, V, S> ConcurrentMap<K, V, S> {
    /// Create an empty map using `hasher` to hash keys
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map: ConcurrentMap<u64, u64, RandomState> = ConcurrentMap::with_hasher(RandomState::new());
    /// map.set(1, 2);
    /// assert_eq!(map.get(&1), Some(2));
    /// ```
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_entries(HashMap::with_hasher(hasher))
    }

    /// Create an empty map with room for `capacity` entries, using `hasher`
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::from_entries(HashMap::with_capacity_and_hasher(capacity, hasher))
    }

    fn from_entries(entries: HashMap<K, V, S>) -> Self {
        Self {
            entries: RwLock::new(entries),
            metrics: AtomicMetrics::default(),
        }
    }

    /// Acquire a shared lock
    ///
    /// Blocks while an exclusive lock is held. Any number of shared locks can be
    /// held at once. The lock is released when the guard is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
    /// map.set("a", 1);
    /// map.set("b", 2);
    ///
    /// let guard = map.read();
    /// let total: i32 = ["a", "b"].iter().filter_map(|k| guard.get(k)).sum();
    /// assert_eq!(total, 3);
    /// assert_eq!(guard.len(), 2);
    /// ```
    pub fn read(&self) -> MapReadGuard<'_, K, V, S> {
        let inner = match self.entries.try_read() {
            Some(inner) => {
                self.metrics.record_shared(false);
                inner
            }
            None => {
                self.metrics.record_shared(true);
                self.entries.read()
            }
        };
        MapReadGuard {
            inner,
            metrics: &self.metrics,
        }
    }

    /// Acquire a shared lock that can later be upgraded to an exclusive one
    ///
    /// Plain readers keep running while this guard is held, but other writers and
    /// upgradable readers wait. [`MapUpgradableGuard::upgrade`] then converts it
    /// without letting any other writer in between.
    pub fn upgradable_read(&self) -> MapUpgradableGuard<'_, K, V, S> {
        let inner = match self.entries.try_upgradable_read() {
            Some(inner) => {
                self.metrics.record_shared(false);
                inner
            }
            None => {
                self.metrics.record_shared(true);
                self.entries.upgradable_read()
            }
        };
        MapUpgradableGuard {
            inner,
            metrics: &self.metrics,
        }
    }

    /// Acquire the exclusive lock
    ///
    /// Blocks until no other guard of any kind is held. The lock is released when
    /// the guard is dropped or [`MapWriteGuard::unlock`] is called.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
    ///
    /// let mut guard = map.lock();
    /// if !guard.contains_key("a") {
    ///     guard.set("a", 1);
    /// }
    /// guard.unlock();
    ///
    /// assert_eq!(map.get("a"), Some(1));
    /// ```
    pub fn lock(&self) -> MapWriteGuard<'_, K, V, S> {
        let inner = match self.entries.try_write() {
            Some(inner) => {
                self.metrics.record_exclusive(false);
                inner
            }
            None => {
                self.metrics.record_exclusive(true);
                self.entries.write()
            }
        };
        MapWriteGuard {
            inner,
            metrics: &self.metrics,
        }
    }

    /// Consume the map and return its storage
    pub fn into_inner(self) -> HashMap<K, V, S> {
        self.entries.into_inner()
    }
}

impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Look up `key` under a shared lock and return a clone of its value
    ///
    /// `None` means the key is absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.read().get(key).cloned()
    }

    /// Look up `key`, returning `V::default()` when it is absent
    pub fn get_or_default<Q>(&self, key: &Q) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        self.get(key).unwrap_or_default()
    }

    /// Check whether `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Insert or overwrite `key` under the exclusive lock
    ///
    /// Returns the value previously stored for `key`, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<i32, &str> = ConcurrentMap::new();
    /// assert_eq!(map.set(1, "hello"), None);
    /// assert_eq!(map.set(1, "world"), Some("hello"));
    /// assert_eq!(map.get(&1), Some("world"));
    /// ```
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.lock().set(key, value)
    }

    /// Remove `key` under the exclusive lock
    ///
    /// Removing an absent key does nothing and returns `None`.
    pub fn delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().delete(key)
    }

    /// Number of entries, read under a shared lock
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the map has no entries
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Discard every entry under the exclusive lock
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Clone every entry under a shared lock
    ///
    /// The returned map is independent: changing it never affects this one.
    pub fn export(&self) -> HashMap<K, V, S>
    where
        K: Clone,
        V: Clone,
        S: Clone,
    {
        self.read().export()
    }

    /// Replace the entire contents with `entries` under the exclusive lock
    ///
    /// Previous entries are discarded, not merged. The old storage is dropped
    /// after the lock has been released.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    /// use std::collections::HashMap;
    ///
    /// let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
    /// map.set("a", 1);
    ///
    /// let mut replacement = HashMap::default();
    /// replacement.insert("b", 2);
    /// map.import(replacement);
    ///
    /// assert_eq!(map.get("a"), None);
    /// assert_eq!(map.get("b"), Some(2));
    /// ```
    pub fn import(&self, entries: HashMap<K, V, S>) {
        let previous = self.lock().import(entries);
        drop(previous);
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(feature = "unstable", doc(cfg(feature = "serde")))]
impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Encode the whole map under a shared lock
    ///
    /// See [`codec`] for the record layout.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if a key or value cannot be serialized. The map is
    /// left untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<String, u32> = ConcurrentMap::new();
    /// map.set("x".to_string(), 10);
    ///
    /// let bytes = map.encode()?;
    /// map.clear();
    /// map.decode(&bytes)?;
    /// assert_eq!(map.get("x"), Some(10));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError>
    where
        K: Serialize,
        V: Serialize,
    {
        self.read().encode()
    }

    /// Replace the contents with a record produced by [`encode`](Self::encode)
    ///
    /// The record is parsed completely before anything is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the record is malformed, truncated, or was
    /// written for other key or value types. The map keeps its previous contents.
    pub fn decode(&self, bytes: &[u8]) -> Result<(), DecodeError>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
        S: Clone,
    {
        let previous = self.lock().decode(bytes)?;
        drop(previous);
        Ok(())
    }
}

/// Read-only operations shared by every guard kind
macro_rules! read_ops {
    () => {
        /// Look up `key` without further locking
        pub fn get<Q>(&self, key: &Q) -> Option<&V>
        where
            K: Borrow<Q>,
            Q: Hash + Eq + ?Sized,
        {
            self.inner.get(key)
        }

        /// Check whether `key` is present
        pub fn contains_key<Q>(&self, key: &Q) -> bool
        where
            K: Borrow<Q>,
            Q: Hash + Eq + ?Sized,
        {
            self.inner.contains_key(key)
        }

        /// Number of entries
        pub fn len(&self) -> usize {
            self.inner.len()
        }

        /// Check if there are no entries
        pub fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }

        /// Clone every entry into an independent map
        pub fn export(&self) -> HashMap<K, V, S>
        where
            K: Clone,
            V: Clone,
            S: Clone,
        {
            (*self.inner).clone()
        }

        /// Encode every entry, see [`ConcurrentMap::encode`]
        #[cfg(feature = "serde")]
        #[cfg_attr(feature = "unstable", doc(cfg(feature = "serde")))]
        pub fn encode(&self) -> Result<Vec<u8>, EncodeError>
        where
            K: Serialize,
            V: Serialize,
        {
            match codec::encode(&*self.inner) {
                Ok(bytes) => {
                    self.metrics.record_encode(bytes.len());
                    debug!(entries = self.inner.len(), bytes = bytes.len(), "encoded map");
                    Ok(bytes)
                }
                Err(err) => {
                    self.metrics.record_encode_failure();
                    Err(err)
                }
            }
        }
    };
}

/// Shared access to a [`ConcurrentMap`]
///
/// Returned by [`ConcurrentMap::read`]. The shared lock is held until the guard
/// is dropped.
#[must_use = "the shared lock is released as soon as the guard is dropped"]
pub struct MapReadGuard<'a, K, V, S = FxBuildHasher> {
    inner: RwLockReadGuard<'a, HashMap<K, V, S>>,
    #[cfg_attr(not(feature = "serde"), allow(dead_code))]
    metrics: &'a AtomicMetrics,
}

impl<'a, K, V, S> MapReadGuard<'a, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    read_ops!();
}

impl<'a, K, V, S> MapReadGuard<'a, K, V, S> {
    /// Release the shared lock
    pub fn unlock(self) {
        drop(self);
    }
}

/// Shared access that can be upgraded to exclusive access
///
/// Returned by [`ConcurrentMap::upgradable_read`].
#[must_use = "the upgradable lock is released as soon as the guard is dropped"]
pub struct MapUpgradableGuard<'a, K, V, S = FxBuildHasher> {
    inner: RwLockUpgradableReadGuard<'a, HashMap<K, V, S>>,
    metrics: &'a AtomicMetrics,
}

impl<'a, K, V, S> MapUpgradableGuard<'a, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    read_ops!();
}

impl<'a, K, V, S> MapUpgradableGuard<'a, K, V, S> {
    /// Atomically turn this guard into exclusive access
    ///
    /// Waits for plain readers to leave. No other writer can run between the
    /// reads made through this guard and the writes made through the result.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cachemap::ConcurrentMap;
    ///
    /// let map: ConcurrentMap<&str, u32> = ConcurrentMap::new();
    ///
    /// let guard = map.upgradable_read();
    /// if guard.get("seed").is_none() {
    ///     let mut guard = guard.upgrade();
    ///     guard.set("seed", 42);
    /// }
    /// assert_eq!(map.get("seed"), Some(42));
    /// ```
    pub fn upgrade(self) -> MapWriteGuard<'a, K, V, S> {
        let metrics = self.metrics;
        let inner = match RwLockUpgradableReadGuard::try_upgrade(self.inner) {
            Ok(inner) => {
                metrics.record_exclusive(false);
                inner
            }
            Err(inner) => {
                metrics.record_exclusive(true);
                RwLockUpgradableReadGuard::upgrade(inner)
            }
        };
        MapWriteGuard { inner, metrics }
    }

    /// Release the upgradable lock
    pub fn unlock(self) {
        drop(self);
    }
}

/// Exclusive access to a [`ConcurrentMap`]
///
/// Returned by [`ConcurrentMap::lock`] and [`MapUpgradableGuard::upgrade`]. No
/// other guard exists while this one is alive.
#[must_use = "the exclusive lock is released as soon as the guard is dropped"]
pub struct MapWriteGuard<'a, K, V, S = FxBuildHasher> {
    inner: RwLockWriteGuard<'a, HashMap<K, V, S>>,
    metrics: &'a AtomicMetrics,
}

impl<'a, K, V, S> MapWriteGuard<'a, K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    read_ops!();

    /// Mutable access to the value stored for `key`
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get_mut(key)
    }

    /// Insert or overwrite `key`, returning the replaced value
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Remove `key`, returning its value; absent keys are ignored
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.remove(key)
    }

    /// Discard every entry
    pub fn clear(&mut self) {
        trace!(entries = self.inner.len(), "clearing map");
        self.inner.clear();
    }

    /// Replace the entire contents with `entries` and return the previous ones
    pub fn import(&mut self, entries: HashMap<K, V, S>) -> HashMap<K, V, S> {
        trace!(
            previous = self.inner.len(),
            imported = entries.len(),
            "importing entries"
        );
        core::mem::replace(&mut *self.inner, entries)
    }

    /// Replace the contents with a decoded record and return the previous ones
    ///
    /// On error the contents are unchanged.
    #[cfg(feature = "serde")]
    #[cfg_attr(feature = "unstable", doc(cfg(feature = "serde")))]
    pub fn decode(&mut self, bytes: &[u8]) -> Result<HashMap<K, V, S>, DecodeError>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
        S: Clone,
    {
        match codec::decode(bytes, self.inner.hasher().clone()) {
            Ok(staged) => {
                self.metrics.record_decode(bytes.len());
                debug!(entries = staged.len(), bytes = bytes.len(), "decoded map");
                Ok(core::mem::replace(&mut *self.inner, staged))
            }
            Err(err) => {
                self.metrics.record_decode_failure();
                Err(err)
            }
        }
    }
}

impl<'a, K, V, S> MapWriteGuard<'a, K, V, S> {
    /// Atomically turn exclusive access into shared access
    pub fn downgrade(self) -> MapReadGuard<'a, K, V, S> {
        MapReadGuard {
            inner: RwLockWriteGuard::downgrade(self.inner),
            metrics: self.metrics,
        }
    }

    /// Release the exclusive lock
    pub fn unlock(self) {
        drop(self);
    }
}

impl<K, V, S> MetricsCollector for ConcurrentMap<K, V, S> {
    fn metrics(&self) -> MapMetrics {
        self.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.metrics.reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.metrics.set_enabled(enabled);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.metrics.is_enabled()
    }
}

impl<K, V, S: Default> Default for ConcurrentMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> From<HashMap<K, V, S>> for ConcurrentMap<K, V, S> {
    fn from(entries: HashMap<K, V, S>) -> Self {
        Self::from_entries(entries)
    }
}

impl<K, V, S> FromIterator<(K, V)> for ConcurrentMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

impl<K, V, S> Clone for ConcurrentMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    /// Snapshot the entries under a shared lock; metrics start from zero
    fn clone(&self) -> Self {
        Self::from_entries((*self.entries.read()).clone())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for ConcurrentMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ConcurrentMap");
        // Never block: the caller may be holding the exclusive lock itself.
        match self.entries.try_read() {
            Some(entries) => d.field("entries", &*entries),
            None => d.field("entries", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for MapReadGuard<'_, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapReadGuard").field(&*self.inner).finish()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for MapUpgradableGuard<'_, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapUpgradableGuard").field(&*self.inner).finish()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for MapWriteGuard<'_, K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapWriteGuard").field(&*self.inner).finish()
    }
}

#[cfg(feature = "serde")]
impl<K, V, S> Serialize for ConcurrentMap<K, V, S>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    S: BuildHasher,
{
    /// Serialize the entries as a map under a shared lock
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        self.read().inner.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> Deserialize<'de> for ConcurrentMap<K, V, S>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: BuildHasher + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        HashMap::<K, V, S>::deserialize(deserializer).map(Self::from_entries)
    }
}
