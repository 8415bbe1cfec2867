//! Ownership docking
//!
//! Docking associates a loaded key with an owner so the key is released
//! when the owner goes away. Scenes may share keys; objects claim keys
//! exclusively. Docks only hold keys; releasing always goes through the
//! [`AssetCache`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::AssetCache;
use crate::error::DockError;
use crate::key::AssetKey;

/// Identity of a loaded scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SceneId(pub u64);

/// Identity of a game object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Owner a key can be docked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerId {
    Scene(SceneId),
    Object(ObjectId),
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scene(id) => write!(f, "scene#{}", id.0),
            Self::Object(id) => write!(f, "object#{}", id.0),
        }
    }
}

impl From<SceneId> for OwnerId {
    fn from(id: SceneId) -> Self {
        Self::Scene(id)
    }
}

impl From<ObjectId> for OwnerId {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

/// Keys docked to scenes
#[derive(Default)]
pub struct SceneDock {
    scenes: Mutex<HashMap<SceneId, BTreeSet<AssetKey>>>,
}

impl SceneDock {
    /// Create an empty scene dock
    pub fn new() -> Self {
        Self::default()
    }

    /// Dock `key` to `scene`; returns `false` if it was already docked there
    pub fn dock(&self, key: &AssetKey, scene: SceneId) -> bool {
        self.scenes
            .lock()
            .entry(scene)
            .or_default()
            .insert(key.clone())
    }

    /// Release every key docked to `scene` and forget the scene
    pub fn on_scene_unloaded(&self, scene: SceneId, cache: &AssetCache) -> Vec<AssetKey> {
        let keys = self.scenes.lock().remove(&scene).unwrap_or_default();
        for key in &keys {
            cache.release(key);
        }
        keys.into_iter().collect()
    }

    /// Keys docked to `scene`
    pub fn docked_keys(&self, scene: SceneId) -> Vec<AssetKey> {
        self.scenes
            .lock()
            .get(&scene)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `key` from every scene
    pub fn undock_key(&self, key: &AssetKey) {
        let mut scenes = self.scenes.lock();
        for keys in scenes.values_mut() {
            keys.remove(key);
        }
        scenes.retain(|_, keys| !keys.is_empty());
    }

    /// Number of scenes with docked keys
    pub fn owner_count(&self) -> usize {
        self.scenes.lock().len()
    }

    /// Forget every scene without releasing anything
    pub fn clear(&self) {
        self.scenes.lock().clear();
    }
}

#[derive(Default)]
struct ObjectDockState {
    by_key: HashMap<AssetKey, ObjectId>,
    by_owner: HashMap<ObjectId, BTreeSet<AssetKey>>,
}

/// Keys docked to game objects, one object per key
#[derive(Default)]
pub struct ObjectDock {
    state: Mutex<ObjectDockState>,
}

impl ObjectDock {
    /// Create an empty object dock
    pub fn new() -> Self {
        Self::default()
    }

    /// Dock `key` to `object`
    ///
    /// Returns `Ok(false)` when already docked to the same object and
    /// [`DockError::Conflict`] when another object holds the key.
    pub fn dock(&self, key: &AssetKey, object: ObjectId) -> Result<bool, DockError> {
        let mut state = self.state.lock();
        match state.by_key.get(key) {
            Some(&holder) if holder == object => Ok(false),
            Some(&holder) => Err(DockError::Conflict {
                key: key.clone(),
                owner: OwnerId::Object(holder),
            }),
            None => {
                state.by_key.insert(key.clone(), object);
                state.by_owner.entry(object).or_default().insert(key.clone());
                Ok(true)
            }
        }
    }

    /// Object holding `key`, if any
    pub fn holder(&self, key: &AssetKey) -> Option<ObjectId> {
        self.state.lock().by_key.get(key).copied()
    }

    /// Release every key docked to `object` and forget the object
    pub fn on_object_destroyed(&self, object: ObjectId, cache: &AssetCache) -> Vec<AssetKey> {
        let keys = {
            let mut state = self.state.lock();
            let keys = state.by_owner.remove(&object).unwrap_or_default();
            for key in &keys {
                state.by_key.remove(key);
            }
            keys
        };

        for key in &keys {
            cache.release(key);
        }
        keys.into_iter().collect()
    }

    /// Keys docked to `object`
    pub fn docked_keys(&self, object: ObjectId) -> Vec<AssetKey> {
        self.state
            .lock()
            .by_owner
            .get(&object)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `key` from its object, if docked
    pub fn undock_key(&self, key: &AssetKey) {
        let mut state = self.state.lock();
        if let Some(object) = state.by_key.remove(key) {
            if let Some(keys) = state.by_owner.get_mut(&object) {
                keys.remove(key);
                if keys.is_empty() {
                    state.by_owner.remove(&object);
                }
            }
        }
    }

    /// Number of objects with docked keys
    pub fn owner_count(&self) -> usize {
        self.state.lock().by_owner.len()
    }

    /// Forget every object without releasing anything
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.by_key.clear();
        state.by_owner.clear();
    }
}

/// Scene and object docks behind one owner-keyed interface
#[derive(Default)]
pub struct DockRegistry {
    scenes: SceneDock,
    objects: ObjectDock,
}

impl DockRegistry {
    /// Create empty scene and object docks
    pub fn new() -> Self {
        Self::default()
    }

    /// Dock `key` to `owner`; returns `false` if nothing changed
    pub fn dock(&self, key: &AssetKey, owner: OwnerId) -> Result<bool, DockError> {
        match owner {
            OwnerId::Scene(scene) => Ok(self.scenes.dock(key, scene)),
            OwnerId::Object(object) => self.objects.dock(key, object),
        }
    }

    /// Release everything docked to `owner`; returns the released keys
    pub fn on_owner_destroyed(&self, owner: OwnerId, cache: &AssetCache) -> Vec<AssetKey> {
        match owner {
            OwnerId::Scene(scene) => self.scenes.on_scene_unloaded(scene, cache),
            OwnerId::Object(object) => self.objects.on_object_destroyed(object, cache),
        }
    }

    /// Keys docked to `owner`
    pub fn docked_keys(&self, owner: OwnerId) -> Vec<AssetKey> {
        match owner {
            OwnerId::Scene(scene) => self.scenes.docked_keys(scene),
            OwnerId::Object(object) => self.objects.docked_keys(object),
        }
    }

    /// Forget `key` in both docks
    pub fn undock_key(&self, key: &AssetKey) {
        self.scenes.undock_key(key);
        self.objects.undock_key(key);
    }

    /// The scene side
    pub fn scenes(&self) -> &SceneDock {
        &self.scenes
    }

    /// The object side
    pub fn objects(&self) -> &ObjectDock {
        &self.objects
    }

    /// Forget every owner without releasing anything
    pub fn clear(&self) {
        self.scenes.clear();
        self.objects.clear();
    }
}
