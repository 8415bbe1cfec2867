//! Addressables facade
//!
//! [`Addressables`] ties the pieces together: it normalizes keys, coalesces
//! loads through the [`AssetCache`], tracks scenes and instances, and
//! releases docked keys when the [`LifecycleEvents`] hub reports an owner
//! going away.
//!
//! Every operation answers with an [`OperationResult`]. `Err` is only
//! returned for invalid keys and provider failures under
//! [`ExceptionHandling::Throw`].

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::cache::{AssetCache, ReleaseOutcome, ResourceTag};
use crate::config::{AddressablesConfig, ExceptionHandling};
use crate::dock::{DockRegistry, OwnerId};
use crate::envelope::OperationResult;
use crate::error::{AddressablesError, AddressablesResult, ProviderError};
use crate::key::{normalize_key, AssetKey, IntoAssetKey, KeyIdentity};
use crate::lifecycle::{LifecycleEvents, SubscriptionId};
use crate::provider::{
    AssetProvider, InstanceHandle, InstantiateOptions, LoadSceneMode, LoadSceneOptions,
    ResourceLocation, ResourceLocator, SceneInstance,
};

struct Inner {
    config: RwLock<AddressablesConfig>,
    provider: Arc<dyn AssetProvider>,
    /// Loaded assets; releases go back to the provider
    assets: AssetCache,
    /// Loaded scenes, pruned once the engine unloads them
    scenes: AssetCache,
    instances: Mutex<HashMap<AssetKey, Vec<InstanceHandle>>>,
    locations: Mutex<HashMap<AssetKey, Vec<ResourceLocation>>>,
    docks: DockRegistry,
    lifecycle: LifecycleEvents,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Inner {
    /// Release everything docked to `owner`
    fn release_owner(&self, owner: OwnerId) -> Vec<AssetKey> {
        let keys = self.docks.on_owner_destroyed(owner, &self.assets);
        for key in &keys {
            self.docks.undock_key(key);
            self.release_tracked_instances(key);
        }
        if !keys.is_empty() {
            log::debug!("Released {} key(s) docked to {}", keys.len(), owner);
        }
        keys
    }

    fn release_tracked_instances(&self, key: &AssetKey) -> usize {
        let handles = self.instances.lock().remove(key).unwrap_or_default();
        for handle in &handles {
            self.provider.release_instance(handle);
        }
        handles.len()
    }

    fn unsubscribe(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.lifecycle.unsubscribe(id);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get_mut().take() {
            self.lifecycle.unsubscribe(id);
        }
    }
}

/// Keyed asset cache with ownership docking over an [`AssetProvider`]
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct Addressables {
    inner: Arc<Inner>,
}

impl Addressables {
    /// Create a facade with the default configuration
    pub fn new(provider: Arc<dyn AssetProvider>, lifecycle: LifecycleEvents) -> Self {
        Self::with_config(provider, lifecycle, AddressablesConfig::default())
    }

    /// Create a facade with a custom configuration
    pub fn with_config(
        provider: Arc<dyn AssetProvider>,
        lifecycle: LifecycleEvents,
        config: AddressablesConfig,
    ) -> Self {
        let releaser = provider.clone();
        let assets = AssetCache::with_release_hook(move |key| {
            log::debug!("Releasing asset: {}", key);
            releaser.release_asset(key);
        });

        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                provider,
                assets,
                scenes: AssetCache::new(),
                instances: Mutex::new(HashMap::new()),
                locations: Mutex::new(HashMap::new()),
                docks: DockRegistry::new(),
                lifecycle,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Current configuration
    pub fn config(&self) -> AddressablesConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration
    pub fn set_config(&self, config: AddressablesConfig) {
        *self.inner.config.write() = config;
    }

    /// The hub this facade listens to
    pub fn lifecycle(&self) -> &LifecycleEvents {
        &self.inner.lifecycle
    }

    /// Ownership docks
    pub fn docks(&self) -> &DockRegistry {
        &self.inner.docks
    }

    /// Reset all state and initialize the provider
    pub async fn initialize(&self) -> AddressablesResult<OperationResult<ResourceLocator>> {
        self.clear();

        match self.inner.provider.initialize().await {
            Ok(locator) => {
                log::info!(
                    "Addressables initialized: locator '{}' with {} key(s)",
                    locator.locator_id,
                    locator.keys.len()
                );
                Ok(OperationResult::success(KeyIdentity::None, locator))
            }
            Err(e) => self.report(KeyIdentity::None, e.into(), None),
        }
    }

    /// Resolve and cache the locations of `key`
    pub async fn load_locations<K>(
        &self,
        key: &K,
    ) -> AddressablesResult<OperationResult<Vec<ResourceLocation>>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        let cached = self.inner.locations.lock().get(&key).cloned();
        if let Some(locations) = cached {
            return Ok(OperationResult::success(identity, locations));
        }

        match self.inner.provider.load_locations(&key).await {
            Ok(locations) => {
                self.inner.locations.lock().insert(key, locations.clone());
                Ok(OperationResult::success(identity, locations))
            }
            Err(e) => self.report(identity, e.into(), None),
        }
    }

    /// Load an asset, sharing any load of the same key already running
    pub async fn load_asset<T, K>(&self, key: &K) -> AddressablesResult<OperationResult<Arc<T>>>
    where
        T: Any + Send + Sync,
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        match self.load_normalized::<T>(&key).await {
            Ok(value) => Ok(OperationResult::success(identity, value)),
            Err(e) => self.report(identity, e, None),
        }
    }

    /// Load an asset and dock it to `owner`
    ///
    /// A dock conflict is reported as a warning; the load still succeeds.
    pub async fn load_asset_docked<T, K>(
        &self,
        key: &K,
        owner: OwnerId,
    ) -> AddressablesResult<OperationResult<Arc<T>>>
    where
        T: Any + Send + Sync,
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        match self.load_normalized::<T>(&key).await {
            Ok(value) => {
                self.dock_normalized(&key, owner);
                Ok(OperationResult::success(identity, value))
            }
            Err(e) => self.report(identity, e, None),
        }
    }

    async fn load_normalized<T>(&self, key: &AssetKey) -> Result<Arc<T>, AddressablesError>
    where
        T: Any + Send + Sync,
    {
        let provider = self.inner.provider.clone();
        let value = self
            .inner
            .assets
            .load::<T, _, _>(key, move |key| async move {
                let erased = provider.load_asset(&key, ResourceTag::of::<T>()).await;
                erased.and_then(|erased| match erased.downcast::<T>() {
                    Ok(value) => Ok(*value),
                    Err(_) => {
                        provider.release_asset(&key);
                        Err(ProviderError::WrongType {
                            key: key.to_string(),
                            expected: type_name::<T>(),
                        })
                    }
                })
            })
            .await?;
        Ok(value)
    }

    /// Get an already loaded asset without touching the provider
    pub fn get_asset<T, K>(&self, key: &K) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        K: IntoAssetKey + ?Sized,
    {
        let key = normalize_key(key).ok()?;
        self.inner.assets.get::<T>(&key).ok().flatten()
    }

    /// Load a scene
    ///
    /// A cached scene that is still loaded is reused and activated if
    /// requested. A `Single` load drops every cached scene the engine has
    /// since unloaded.
    pub async fn load_scene<K>(
        &self,
        key: &K,
        options: LoadSceneOptions,
    ) -> AddressablesResult<OperationResult<SceneInstance>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        let provider = self.inner.provider.clone();
        let loaded = self
            .inner
            .scenes
            .load_with_validity::<SceneInstance, _, _>(
                &key,
                move |key| async move { provider.load_scene(&key, options).await },
                Some(SceneInstance::is_valid),
            )
            .await;

        let scene = match loaded {
            Ok(scene) => SceneInstance::clone(&scene),
            Err(e) => return self.report(identity, e.into(), None),
        };

        if options.mode == LoadSceneMode::Single {
            let pruned = self.inner.scenes.prune_invalid();
            if !pruned.is_empty() {
                log::debug!("Dropped {} unloaded scene(s) after loading {}", pruned.len(), key);
            }
        }

        if options.activate_on_load && !scene.is_activated() {
            if let Err(e) = self.inner.provider.activate_scene(&scene, options.priority).await {
                return self.report(identity, e.into(), Some(scene));
            }
        }

        Ok(OperationResult::success(identity, scene))
    }

    /// Activate a loaded scene
    pub async fn activate_scene(
        &self,
        scene: &SceneInstance,
        priority: i32,
    ) -> AddressablesResult<OperationResult<()>> {
        let identity = KeyIdentity::Address(scene.name().to_string());
        if !scene.is_valid() {
            let error = AddressablesError::NotLoaded(format!("scene {} is no longer loaded", scene.name()));
            return self.report(identity, error, None);
        }

        match self.inner.provider.activate_scene(scene, priority).await {
            Ok(()) => Ok(OperationResult::success(identity, ())),
            Err(e) => self.report(identity, e.into(), None),
        }
    }

    /// Unload a scene loaded through [`load_scene`](Self::load_scene)
    ///
    /// On success every key docked to the scene is released.
    pub async fn unload_scene<K>(&self, key: &K) -> AddressablesResult<OperationResult<SceneInstance>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        let scene = match self.inner.scenes.take::<SceneInstance>(&key) {
            Ok(Some(scene)) => SceneInstance::clone(&scene),
            Ok(None) => {
                let error = AddressablesError::NotLoaded(format!("no scene loaded for key {}", key));
                return self.report(identity, error, None);
            }
            Err(e) => return self.report(identity, e.into(), None),
        };

        if !scene.is_valid() {
            log::debug!("Scene {} was already unloaded, dropped it", key);
            return Ok(OperationResult::failure(identity));
        }

        match self.inner.provider.unload_scene(&scene).await {
            Ok(()) => {
                scene.mark_unloaded();
                self.inner.release_owner(OwnerId::Scene(scene.id()));
                Ok(OperationResult::success(identity, scene))
            }
            Err(e) => self.report(identity, e.into(), Some(scene)),
        }
    }

    /// Instantiate an object from `key`
    ///
    /// Waits for any load of the same key to finish first. Tracked handles
    /// can be released per key with [`release_instances`](Self::release_instances).
    /// If the key is released while the provider is instantiating, the new
    /// instance is released right away and the call reports `NotLoaded`.
    pub async fn instantiate<K>(
        &self,
        key: &K,
        options: InstantiateOptions,
    ) -> AddressablesResult<OperationResult<InstanceHandle>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        match self.instantiate_normalized(&key, options).await {
            Ok(handle) => Ok(OperationResult::success(identity, handle)),
            Err(e) => self.report(identity, e, None),
        }
    }

    /// Instantiate an object and dock its key to `owner`
    pub async fn instantiate_docked<K>(
        &self,
        key: &K,
        options: InstantiateOptions,
        owner: OwnerId,
    ) -> AddressablesResult<OperationResult<InstanceHandle>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        match self.instantiate_normalized(&key, options).await {
            Ok(handle) => {
                self.dock_normalized(&key, owner);
                Ok(OperationResult::success(identity, handle))
            }
            Err(e) => self.report(identity, e, None),
        }
    }

    async fn instantiate_normalized(
        &self,
        key: &AssetKey,
        options: InstantiateOptions,
    ) -> Result<InstanceHandle, AddressablesError> {
        let guard = self.inner.assets.in_flight().acquire(key).await;
        let id = self.inner.provider.instantiate(key, options).await?;
        let handle = InstanceHandle {
            id,
            key: key.clone(),
        };

        // A cleared registry or a release request both mean nobody should
        // keep this instance.
        if !guard.is_current() || guard.release_requested() {
            drop(guard);
            log::debug!("Releasing instance of {}, it was released while instantiating", key);
            self.inner.provider.release_instance(&handle);
            return Err(AddressablesError::NotLoaded(format!(
                "{} was released while instantiating",
                key
            )));
        }
        drop(guard);

        if options.track_handle {
            self.inner
                .instances
                .lock()
                .entry(key.clone())
                .or_default()
                .push(handle.clone());
        }
        Ok(handle)
    }

    /// Release a loaded asset
    ///
    /// The key is undocked from every owner. Releasing a key that is still
    /// loading takes effect when the load completes.
    pub fn release_asset<K>(&self, key: &K) -> AddressablesResult<OperationResult<ReleaseOutcome>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        self.inner.docks.undock_key(&key);
        match self.inner.assets.release(&key) {
            ReleaseOutcome::NotLoaded => {
                let error = AddressablesError::NotLoaded(format!("no asset loaded for key {}", key));
                self.report(identity, error, Some(ReleaseOutcome::NotLoaded))
            }
            outcome => Ok(OperationResult::success(identity, outcome)),
        }
    }

    /// Release one instantiated object; returns `false` if it was unknown
    pub fn release_instance(&self, handle: &InstanceHandle) -> bool {
        {
            let mut instances = self.inner.instances.lock();
            if let Some(handles) = instances.get_mut(&handle.key) {
                handles.retain(|h| h.id != handle.id);
                if handles.is_empty() {
                    instances.remove(&handle.key);
                }
            }
        }
        self.inner.provider.release_instance(handle)
    }

    /// Release every tracked instance of `key`, returning how many there were
    pub fn release_instances<K>(&self, key: &K) -> AddressablesResult<OperationResult<usize>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        let released = self.inner.release_tracked_instances(&key);
        Ok(OperationResult::success(identity, released))
    }

    /// Tracked instances of `key`
    pub fn instances<K>(&self, key: &K) -> Vec<InstanceHandle>
    where
        K: IntoAssetKey + ?Sized,
    {
        normalize_key(key)
            .ok()
            .and_then(|key| self.inner.instances.lock().get(&key).cloned())
            .unwrap_or_default()
    }

    /// Dock `key` to `owner` so it is released when the owner goes away
    pub fn dock_to_owner<K>(&self, key: &K, owner: OwnerId) -> AddressablesResult<OperationResult<()>>
    where
        K: IntoAssetKey + ?Sized,
    {
        let identity = key.identity();
        let key = match normalize_key(key) {
            Ok(key) => key,
            Err(e) => return self.report(identity, e.into(), None),
        };

        self.ensure_subscribed();
        match self.inner.docks.dock(&key, owner) {
            Ok(_) => Ok(OperationResult::success(identity, ())),
            Err(e) => self.report(identity, e.into(), None),
        }
    }

    fn dock_normalized(&self, key: &AssetKey, owner: OwnerId) {
        self.ensure_subscribed();
        if let Err(e) = self.inner.docks.dock(key, owner) {
            self.warn(&AddressablesError::from(e));
        }
    }

    /// Release everything docked to `owner`, as if the hub reported it gone
    pub fn notify_owner_destroyed(&self, owner: OwnerId) -> Vec<AssetKey> {
        self.inner.release_owner(owner)
    }

    fn ensure_subscribed(&self) {
        let mut subscription = self.inner.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = self.inner.lifecycle.subscribe_fn(move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.release_owner(event.owner());
            }
        });
        *subscription = Some(id);
        log::debug!("Subscribed to owner lifecycle events");
    }

    /// Whether the lifecycle subscription is active
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Whether a valid asset is cached under `key`
    pub fn is_loaded<K>(&self, key: &K) -> bool
    where
        K: IntoAssetKey + ?Sized,
    {
        normalize_key(key).map_or(false, |key| self.inner.assets.contains(&key))
    }

    /// Whether `key` has a load or instantiation running
    pub fn is_in_flight<K>(&self, key: &K) -> bool
    where
        K: IntoAssetKey + ?Sized,
    {
        normalize_key(key).map_or(false, |key| self.inner.assets.in_flight().is_in_flight(&key))
    }

    /// Keys of every cached asset
    pub fn loaded_keys(&self) -> Vec<AssetKey> {
        self.inner.assets.keys()
    }

    /// Keys of every cached scene
    pub fn loaded_scenes(&self) -> Vec<AssetKey> {
        self.inner.scenes.keys()
    }

    /// Forget all state without calling the provider
    ///
    /// Loads and instantiations still running hand their result back to the
    /// provider when they complete. Drops the lifecycle subscription; the
    /// next dock re-arms it.
    pub fn clear(&self) {
        self.inner.assets.clear();
        self.inner.scenes.clear();
        self.inner.instances.lock().clear();
        self.inner.locations.lock().clear();
        self.inner.docks.clear();
        self.inner.unsubscribe();
    }

    /// Release every asset and tracked instance through the provider, then clear
    pub fn shutdown(&self) {
        let released = self.inner.assets.release_all();
        let instances: Vec<InstanceHandle> = self
            .inner
            .instances
            .lock()
            .drain()
            .flat_map(|(_, handles)| handles)
            .collect();
        for handle in &instances {
            self.inner.provider.release_instance(handle);
        }

        log::info!(
            "Addressables shut down: released {} asset(s) and {} instance(s)",
            released.len(),
            instances.len()
        );
        self.clear();
    }

    /// Turn a failure into an envelope or an error according to the config
    fn report<T>(
        &self,
        identity: KeyIdentity,
        error: AddressablesError,
        value: Option<T>,
    ) -> AddressablesResult<OperationResult<T>> {
        if error.is_escalable() {
            match self.config().exception_handling {
                ExceptionHandling::Throw => return Err(error),
                ExceptionHandling::Log => log::error!("{} ({})", error, identity),
                ExceptionHandling::Silent => {}
            }
        } else {
            self.warn(&error);
        }

        Ok(match value {
            Some(value) => OperationResult::failure_with(identity, value),
            None => OperationResult::failure(identity),
        })
    }

    fn warn(&self, error: &AddressablesError) {
        if !self.config().suppress_warnings {
            log::warn!("{}", error);
        }
    }
}
