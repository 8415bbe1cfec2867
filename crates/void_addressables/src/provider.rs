//! Asset provider seam
//!
//! [`AssetProvider`] is the engine side of the addressables layer: it does
//! the actual loading, instantiation and scene management. The facade only
//! caches and tracks what the provider hands back.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::ResourceTag;
use crate::dock::{ObjectId, SceneId};
use crate::error::ProviderError;
use crate::key::AssetKey;

/// Scene load mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadSceneMode {
    /// Replace every loaded scene
    #[default]
    Single,
    /// Load alongside the current scenes
    Additive,
}

/// Options for [`Addressables::load_scene`](crate::Addressables::load_scene)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSceneOptions {
    pub mode: LoadSceneMode,
    /// Activate the scene once loaded
    pub activate_on_load: bool,
    /// Load priority
    pub priority: i32,
}

impl Default for LoadSceneOptions {
    fn default() -> Self {
        Self {
            mode: LoadSceneMode::Single,
            activate_on_load: true,
            priority: 100,
        }
    }
}

impl LoadSceneOptions {
    /// Additive load with default activation and priority
    pub fn additive() -> Self {
        Self {
            mode: LoadSceneMode::Additive,
            ..Self::default()
        }
    }

    /// Set whether the scene activates once loaded
    pub fn with_activate_on_load(mut self, activate: bool) -> Self {
        self.activate_on_load = activate;
        self
    }

    /// Set the load priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Options for [`Addressables::instantiate`](crate::Addressables::instantiate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantiateOptions {
    /// Parent object, if any
    pub parent: Option<ObjectId>,
    /// Keep the world transform when parenting
    pub in_world_space: bool,
    /// Let the provider track the instance for release
    pub track_handle: bool,
}

impl Default for InstantiateOptions {
    fn default() -> Self {
        Self {
            parent: None,
            in_world_space: false,
            track_handle: true,
        }
    }
}

impl InstantiateOptions {
    /// Parent the instance under `parent`
    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Debug)]
struct SceneState {
    loaded: AtomicBool,
    activated: AtomicBool,
}

/// Handle to a loaded scene
///
/// Clones share state, so a scene unloaded by the engine is seen as
/// invalid by every holder.
#[derive(Debug, Clone)]
pub struct SceneInstance {
    id: SceneId,
    name: String,
    state: Arc<SceneState>,
}

impl SceneInstance {
    /// A loaded, not yet activated scene
    pub fn new(id: SceneId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: Arc::new(SceneState {
                loaded: AtomicBool::new(true),
                activated: AtomicBool::new(false),
            }),
        }
    }

    /// Scene id
    pub fn id(&self) -> SceneId {
        self.id
    }

    /// Scene name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the scene is still loaded
    pub fn is_valid(&self) -> bool {
        self.state.loaded.load(Ordering::Acquire)
    }

    /// Whether the scene was activated
    pub fn is_activated(&self) -> bool {
        self.state.activated.load(Ordering::Acquire)
    }

    /// Mark the scene as activated
    pub fn mark_activated(&self) {
        self.state.activated.store(true, Ordering::Release);
    }

    /// Flag the scene as gone
    pub fn mark_unloaded(&self) {
        self.state.loaded.store(false, Ordering::Release);
        self.state.activated.store(false, Ordering::Release);
    }
}

impl PartialEq for SceneInstance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SceneInstance {}

/// An object created by [`AssetProvider::instantiate`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InstanceHandle {
    pub id: ObjectId,
    /// Key the object was instantiated from
    pub key: AssetKey,
}

/// Where a resource can be loaded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocation {
    pub primary_key: String,
    pub internal_id: String,
    pub provider_id: String,
    pub resource_type: String,
}

impl ResourceLocation {
    /// Create a location for `primary_key`
    pub fn new(primary_key: impl Into<String>, internal_id: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            internal_id: internal_id.into(),
            provider_id: String::new(),
            resource_type: String::new(),
        }
    }
}

/// Catalog handed back by [`AssetProvider::initialize`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocator {
    pub locator_id: String,
    pub keys: Vec<String>,
}

/// Engine backend used by the addressables facade
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Prepare the provider and return its catalog
    async fn initialize(&self) -> Result<ResourceLocator, ProviderError> {
        Ok(ResourceLocator::default())
    }

    /// Resolve the locations of `key`
    async fn load_locations(&self, _key: &AssetKey) -> Result<Vec<ResourceLocation>, ProviderError> {
        Ok(Vec::new())
    }

    /// Load the resource under `key` as the type described by `tag`
    async fn load_asset(
        &self,
        key: &AssetKey,
        tag: ResourceTag,
    ) -> Result<Box<dyn Any + Send + Sync>, ProviderError>;

    /// Give back a resource previously returned by `load_asset`
    fn release_asset(&self, key: &AssetKey);

    /// Load a scene
    async fn load_scene(
        &self,
        key: &AssetKey,
        options: LoadSceneOptions,
    ) -> Result<SceneInstance, ProviderError>;

    /// Activate a loaded scene
    async fn activate_scene(&self, scene: &SceneInstance, _priority: i32) -> Result<(), ProviderError> {
        scene.mark_activated();
        Ok(())
    }

    /// Unload a scene
    async fn unload_scene(&self, scene: &SceneInstance) -> Result<(), ProviderError>;

    /// Create a new object from `key`
    async fn instantiate(
        &self,
        key: &AssetKey,
        options: InstantiateOptions,
    ) -> Result<ObjectId, ProviderError>;

    /// Destroy an instantiated object; returns `false` if it was unknown
    fn release_instance(&self, instance: &InstanceHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_validity_is_shared() {
        let scene = SceneInstance::new(SceneId(1), "Level01");
        let copy = scene.clone();
        assert!(copy.is_valid());
        assert!(!copy.is_activated());

        scene.mark_activated();
        assert!(copy.is_activated());

        scene.mark_unloaded();
        assert!(!copy.is_valid());
        assert!(!copy.is_activated());
    }

    #[test]
    fn test_option_defaults() {
        let options = LoadSceneOptions::default();
        assert_eq!(options.mode, LoadSceneMode::Single);
        assert!(options.activate_on_load);
        assert_eq!(options.priority, 100);

        let additive = LoadSceneOptions::additive().with_activate_on_load(false);
        assert_eq!(additive.mode, LoadSceneMode::Additive);
        assert!(!additive.activate_on_load);

        let instantiate = InstantiateOptions::default();
        assert!(instantiate.track_handle);
        assert!(!instantiate.in_world_space);
        assert_eq!(instantiate.with_parent(ObjectId(3)).parent, Some(ObjectId(3)));
    }
}
