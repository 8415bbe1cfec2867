//! Asset cache
//!
//! Key to resource map with single-flight loading. Entries are tagged with
//! the static type they were loaded as; lookups under any other type fail
//! with [`CacheError::TypeMismatch`] and leave the entry untouched.
//!
//! Some resources (scene instances) can become invalid while still cached.
//! Such entries carry a validity probe and are pruned the next time they
//! are looked up.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CacheError, ProviderError};
use crate::in_flight::{InFlightGuard, InFlightRegistry, InFlightWaiter};
use crate::key::AssetKey;

/// Static type tag of a cached resource
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceTag {
    type_id: TypeId,
    type_name: &'static str,
}

impl ResourceTag {
    /// Tag for type `T`
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the tagged type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check whether this tag denotes `T`
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

type ErasedValue = Arc<dyn Any + Send + Sync>;
type ValidityProbe = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> bool + Send + Sync>;
type ReleaseHook = Arc<dyn Fn(&AssetKey) + Send + Sync>;

/// Stored cache entry
struct CacheEntry {
    tag: ResourceTag,
    value: ErasedValue,
    probe: Option<ValidityProbe>,
}

impl CacheEntry {
    fn new<T: Any + Send + Sync>(value: Arc<T>, probe: Option<fn(&T) -> bool>) -> Self {
        Self {
            tag: ResourceTag::of::<T>(),
            value: value as ErasedValue,
            probe: probe.map(|probe| {
                Arc::new(move |any: &(dyn Any + Send + Sync)| {
                    any.downcast_ref::<T>().map_or(false, probe)
                }) as ValidityProbe
            }),
        }
    }

    fn is_valid(&self) -> bool {
        self.probe.as_ref().map_or(true, |probe| probe(&*self.value))
    }

    fn typed<T: Any + Send + Sync>(&self, key: &AssetKey) -> Result<Arc<T>, CacheError> {
        let mismatch = || CacheError::TypeMismatch {
            key: key.clone(),
            requested: std::any::type_name::<T>(),
            cached: self.tag.type_name(),
        };

        if !self.tag.is::<T>() {
            return Err(mismatch());
        }
        self.value.clone().downcast::<T>().map_err(|_| mismatch())
    }
}

/// Outcome of a cache lookup at the start of a load
enum Begin<T> {
    Hit(Arc<T>),
    Wait(Option<InFlightWaiter>),
    Load(InFlightGuard),
}

/// Outcome of [`AssetCache::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The entry was removed and handed to the release hook
    Released,
    /// The key is still loading; it will be released once the load completes
    Deferred,
    /// Nothing was cached under the key
    NotLoaded,
}

/// Key to resource cache with single-flight loading
pub struct AssetCache {
    entries: Mutex<HashMap<AssetKey, CacheEntry>>,
    in_flight: InFlightRegistry,
    release_hook: Option<ReleaseHook>,
}

impl AssetCache {
    /// Create a cache whose releases only drop entries
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: InFlightRegistry::new(),
            release_hook: None,
        }
    }

    /// Create a cache that calls `hook` for every released entry
    pub fn with_release_hook(hook: impl Fn(&AssetKey) + Send + Sync + 'static) -> Self {
        Self {
            release_hook: Some(Arc::new(hook)),
            ..Self::new()
        }
    }

    /// The in-flight registry guarding this cache
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Look up a cached resource
    ///
    /// A miss is `Ok(None)`. Stale entries are pruned and reported as a miss.
    pub fn get<T: Any + Send + Sync>(&self, key: &AssetKey) -> Result<Option<Arc<T>>, CacheError> {
        let mut entries = self.entries.lock();
        if Self::prune_if_stale(&mut entries, key) {
            return Ok(None);
        }
        entries.get(key).map(|entry| entry.typed::<T>(key)).transpose()
    }

    /// Load `key` through `loader` unless it is cached or already loading
    ///
    /// Concurrent calls for the same key share a single `loader` call.
    pub async fn load<T, F, Fut>(&self, key: &AssetKey, loader: F) -> Result<Arc<T>, CacheError>
    where
        T: Any + Send + Sync,
        F: FnOnce(AssetKey) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.load_with_validity(key, loader, None).await
    }

    /// Like [`load`](Self::load), attaching a validity probe to the stored entry
    pub async fn load_with_validity<T, F, Fut>(
        &self,
        key: &AssetKey,
        loader: F,
        probe: Option<fn(&T) -> bool>,
    ) -> Result<Arc<T>, CacheError>
    where
        T: Any + Send + Sync,
        F: FnOnce(AssetKey) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let guard = loop {
            match self.begin::<T>(key)? {
                Begin::Hit(value) => return Ok(value),
                Begin::Wait(Some(waiter)) => waiter.cleared().await,
                Begin::Wait(None) => {}
                Begin::Load(guard) => break guard,
            }
        };

        let value = Arc::new(loader(key.clone()).await?);

        // `release` and `clear` both take the entries lock before touching
        // the in-flight slots, so holding it here orders this insert with them.
        let mut entries = self.entries.lock();
        if !guard.is_current() {
            drop(entries);
            drop(guard);
            log::debug!("Releasing {} right after load, the cache was cleared while loading", key);
            self.run_release_hook(key);
            return Ok(value);
        }
        if guard.release_requested() {
            drop(entries);
            drop(guard);
            log::debug!("Releasing {} right after load, release was requested while loading", key);
            self.run_release_hook(key);
            return Ok(value);
        }

        entries.insert(key.clone(), CacheEntry::new(value.clone(), probe));
        drop(entries);
        drop(guard);

        Ok(value)
    }

    fn begin<T: Any + Send + Sync>(&self, key: &AssetKey) -> Result<Begin<T>, CacheError> {
        let mut entries = self.entries.lock();

        if let Some(waiter) = self.in_flight.waiter(key) {
            return Ok(Begin::Wait(Some(waiter)));
        }

        if !Self::prune_if_stale(&mut entries, key) {
            if let Some(entry) = entries.get(key) {
                return entry.typed::<T>(key).map(Begin::Hit);
            }
        }

        Ok(match self.in_flight.mark_in_flight(key) {
            Some(guard) => Begin::Load(guard),
            None => Begin::Wait(self.in_flight.waiter(key)),
        })
    }

    fn prune_if_stale(entries: &mut HashMap<AssetKey, CacheEntry>, key: &AssetKey) -> bool {
        let stale = entries.get(key).map_or(false, |entry| !entry.is_valid());
        if stale {
            entries.remove(key);
            log::debug!("Pruned stale cache entry: {}", key);
        }
        stale
    }

    /// Store a resource, replacing any previous entry
    pub fn insert<T: Any + Send + Sync>(&self, key: AssetKey, value: T) -> Arc<T> {
        self.insert_with_validity(key, value, None)
    }

    /// Store a resource with a validity probe
    pub fn insert_with_validity<T: Any + Send + Sync>(
        &self,
        key: AssetKey,
        value: T,
        probe: Option<fn(&T) -> bool>,
    ) -> Arc<T> {
        let value = Arc::new(value);
        self.entries
            .lock()
            .insert(key, CacheEntry::new(value.clone(), probe));
        value
    }

    /// Release `key`: drop the entry and run the release hook
    ///
    /// Releasing a missing key does nothing. Releasing a key that is still
    /// loading defers the release until the load completes.
    pub fn release(&self, key: &AssetKey) -> ReleaseOutcome {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            drop(entries);
            self.run_release_hook(key);
            return ReleaseOutcome::Released;
        }

        let deferred = self.in_flight.request_release(key);
        drop(entries);

        if deferred {
            log::debug!("Release of {} deferred until its load completes", key);
            ReleaseOutcome::Deferred
        } else {
            ReleaseOutcome::NotLoaded
        }
    }

    /// Release every entry, returning the released keys
    pub fn release_all(&self) -> Vec<AssetKey> {
        let drained: Vec<AssetKey> = self.entries.lock().drain().map(|(key, _)| key).collect();
        for key in &drained {
            self.run_release_hook(key);
        }
        drained
    }

    /// Remove an entry without running the release hook
    pub fn remove(&self, key: &AssetKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove and return the entry under `key` without running the release hook
    ///
    /// Stale entries are returned as well. A type mismatch leaves the entry
    /// in place.
    pub fn take<T: Any + Send + Sync>(&self, key: &AssetKey) -> Result<Option<Arc<T>>, CacheError> {
        let mut entries = self.entries.lock();
        let value = match entries.get(key) {
            Some(entry) => entry.typed::<T>(key)?,
            None => return Ok(None),
        };
        entries.remove(key);
        Ok(Some(value))
    }

    /// Drop every entry whose validity probe fails
    pub fn prune_invalid(&self) -> Vec<AssetKey> {
        let mut entries = self.entries.lock();
        let stale: Vec<AssetKey> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_valid())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.remove(key);
        }
        stale
    }

    /// Check for a valid entry under `key`
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, CacheEntry::is_valid)
    }

    /// Type tag of the entry under `key`
    pub fn tag(&self, key: &AssetKey) -> Option<ResourceTag> {
        self.entries.lock().get(key).map(|entry| entry.tag)
    }

    /// All cached keys
    pub fn keys(&self) -> Vec<AssetKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries and in-flight markers without running release hooks
    ///
    /// Loads still running are not stored when they complete; their value
    /// goes straight to the release hook.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.in_flight.clear();
    }

    fn run_release_hook(&self, key: &AssetKey) {
        if let Some(hook) = &self.release_hook {
            hook(key);
        }
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Texture(u32);

    #[derive(Debug, PartialEq)]
    struct Mesh(u32);

    fn key(s: &str) -> AssetKey {
        AssetKey::parse(s).unwrap()
    }

    #[test]
    fn test_insert_get() {
        let cache = AssetCache::new();
        cache.insert(key("hero"), Texture(1));

        assert_eq!(*cache.get::<Texture>(&key("hero")).unwrap().unwrap(), Texture(1));
        assert!(cache.get::<Texture>(&key("villain")).unwrap().is_none());
        assert_eq!(cache.tag(&key("hero")), Some(ResourceTag::of::<Texture>()));
    }

    #[test]
    fn test_type_mismatch_keeps_entry() {
        let cache = AssetCache::new();
        cache.insert(key("hero"), Texture(1));

        let err = cache.get::<Mesh>(&key("hero")).unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
        assert!(cache.contains(&key("hero")));
        assert_eq!(*cache.get::<Texture>(&key("hero")).unwrap().unwrap(), Texture(1));
    }

    #[test]
    fn test_release_runs_hook_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let cache = AssetCache::with_release_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.insert(key("hero"), Texture(1));
        assert_eq!(cache.release(&key("hero")), ReleaseOutcome::Released);
        assert_eq!(cache.release(&key("hero")), ReleaseOutcome::NotLoaded);
        assert_eq!(cache.release(&key("never")), ReleaseOutcome::NotLoaded);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    struct Scene {
        loaded: Arc<AtomicBool>,
    }

    fn scene_is_loaded(scene: &Scene) -> bool {
        scene.loaded.load(Ordering::SeqCst)
    }

    #[test]
    fn test_stale_entries_are_pruned() {
        let cache = AssetCache::new();
        let loaded = Arc::new(AtomicBool::new(true));
        cache.insert_with_validity(
            key("level"),
            Scene { loaded: loaded.clone() },
            Some(scene_is_loaded),
        );

        assert!(cache.get::<Scene>(&key("level")).unwrap().is_some());

        loaded.store(false, Ordering::SeqCst);
        assert!(!cache.contains(&key("level")));
        assert!(cache.get::<Scene>(&key("level")).unwrap().is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_prune_invalid() {
        let cache = AssetCache::new();
        let loaded = Arc::new(AtomicBool::new(false));
        cache.insert_with_validity(key("old"), Scene { loaded }, Some(scene_is_loaded));
        cache.insert(key("hero"), Texture(1));

        assert_eq!(cache.prune_invalid(), vec![key("old")]);
        assert_eq!(cache.keys(), vec![key("hero")]);
    }

    #[test]
    fn test_take_returns_stale_entries() {
        let cache = AssetCache::new();
        let loaded = Arc::new(AtomicBool::new(false));
        cache.insert_with_validity(key("level"), Scene { loaded }, Some(scene_is_loaded));

        assert!(cache.take::<Texture>(&key("level")).is_err());
        let scene = cache.take::<Scene>(&key("level")).unwrap().unwrap();
        assert!(!scene_is_loaded(&scene));
        assert!(cache.is_empty());
        assert!(cache.take::<Scene>(&key("level")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_miss_then_hit() {
        let cache = AssetCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .load(&key("hero"), |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Texture(9))
                })
                .await
                .unwrap();
            assert_eq!(*value, Texture(9));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_clears_in_flight() {
        let cache = AssetCache::new();

        let result = cache
            .load::<Texture, _, _>(&key("hero"), |k| async move {
                Err(ProviderError::NotFound(k.to_string()))
            })
            .await;

        assert!(matches!(result, Err(CacheError::Provider(ProviderError::NotFound(_)))));
        assert!(cache.in_flight().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_release_during_load_is_deferred() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let cache = Arc::new(AssetCache::with_release_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let (gate, mut opened) = tokio::sync::watch::channel(false);

        let load = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .load(&key("hero"), |_| async move {
                        let _ = opened.wait_for(|open| *open).await;
                        Ok(Texture(1))
                    })
                    .await
            })
        };
        while !cache.in_flight().is_in_flight(&key("hero")) {
            tokio::task::yield_now().await;
        }

        assert_eq!(cache.release(&key("hero")), ReleaseOutcome::Deferred);
        gate.send_replace(true);

        assert_eq!(*load.await.unwrap().unwrap(), Texture(1));
        assert!(!cache.contains(&key("hero")));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(cache.release(&key("hero")), ReleaseOutcome::NotLoaded);
    }

    #[tokio::test]
    async fn test_load_after_clear_is_not_stored() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let cache = Arc::new(AssetCache::with_release_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let (gate, mut opened) = tokio::sync::watch::channel(false);

        let load = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .load(&key("hero"), |_| async move {
                        let _ = opened.wait_for(|open| *open).await;
                        Ok(Texture(1))
                    })
                    .await
            })
        };
        while !cache.in_flight().is_in_flight(&key("hero")) {
            tokio::task::yield_now().await;
        }

        cache.clear();
        gate.send_replace(true);

        assert_eq!(*load.await.unwrap().unwrap(), Texture(1));
        assert!(cache.is_empty());
        assert!(cache.in_flight().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_type_mismatch() {
        let cache = AssetCache::new();
        cache.insert(key("hero"), Texture(1));

        let result = cache
            .load(&key("hero"), |_| async { Ok(Mesh(2)) })
            .await;

        assert!(matches!(result, Err(CacheError::TypeMismatch { .. })));
        assert_eq!(*cache.get::<Texture>(&key("hero")).unwrap().unwrap(), Texture(1));
    }
}
