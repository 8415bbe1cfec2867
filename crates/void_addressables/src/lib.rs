//! # Void Addressables
//!
//! Keyed async resource cache with ownership docking.
//!
//! Wraps an engine's addressable asset backend ([`AssetProvider`]) and adds:
//! - Key normalization for addresses and asset references
//! - Single-flight loading (one provider call per key, however many callers)
//! - Type-checked cache hits
//! - Docking keys to scenes and objects, released when the owner goes away
//! - Scene and instance tracking
//!
//! ## Usage
//!
//! ```ignore
//! let lifecycle = LifecycleEvents::new();
//! let addressables = Addressables::new(provider, lifecycle.clone());
//!
//! let hero = addressables
//!     .load_asset_docked::<Texture, _>("hero", OwnerId::Scene(scene.id()))
//!     .await?;
//!
//! // Later, when the engine unloads the scene
//! lifecycle.publish(LifecycleEvent::SceneUnloaded(scene.id()));
//! ```

pub mod cache;
pub mod config;
pub mod dock;
pub mod envelope;
pub mod error;
pub mod in_flight;
pub mod key;
pub mod lifecycle;
pub mod manager;
pub mod provider;

pub use cache::{AssetCache, ReleaseOutcome, ResourceTag};
pub use config::{AddressablesConfig, ExceptionHandling};
pub use dock::{DockRegistry, ObjectDock, ObjectId, OwnerId, SceneDock, SceneId};
pub use envelope::OperationResult;
pub use error::{
    AddressablesError, AddressablesResult, CacheError, DockError, KeyError, ProviderError,
};
pub use in_flight::{InFlightGuard, InFlightRegistry};
pub use key::{normalize_key, AssetKey, AssetReference, IntoAssetKey, KeyIdentity};
pub use lifecycle::{LifecycleEvent, LifecycleEvents, SubscriptionId};
pub use manager::Addressables;
pub use provider::{
    AssetProvider, InstanceHandle, InstantiateOptions, LoadSceneMode, LoadSceneOptions,
    ResourceLocation, ResourceLocator, SceneInstance,
};

/// Prelude
pub mod prelude {
    pub use crate::{
        Addressables, AddressablesConfig, AddressablesError, AssetKey, AssetProvider,
        AssetReference, ExceptionHandling, LifecycleEvent, LifecycleEvents, ObjectId,
        OperationResult, OwnerId, SceneId,
    };
}
