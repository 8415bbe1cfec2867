//! Asset keys
//!
//! Every public entry point resolves its raw input to a canonical
//! [`AssetKey`] before touching any shared state. Raw input is either a
//! string address or an [`AssetReference`] carrying an embedded GUID.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Length of a GUID in its compact hex form
const GUID_LEN: usize = 32;

/// Canonical identity of a loadable resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetKey(String);

impl AssetKey {
    /// Parse a string address into a key
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub(crate) fn new_unchecked(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for AssetKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reference to an addressable asset by GUID
///
/// Two references to the same GUID (and sub-object) resolve to the same key
/// regardless of the GUID's letter case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetReference {
    /// Asset GUID, 32 hex digits
    pub guid: String,
    /// Optional sub-object inside the asset (e.g. a sprite in an atlas)
    pub sub_object_name: Option<String>,
}

impl AssetReference {
    /// Create a reference to an asset GUID
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            sub_object_name: None,
        }
    }

    /// Point the reference at a sub-object
    pub fn with_sub_object(mut self, name: impl Into<String>) -> Self {
        self.sub_object_name = Some(name.into());
        self
    }

    /// Check whether the embedded GUID is well formed
    pub fn runtime_key_is_valid(&self) -> bool {
        let guid = self.guid.trim();
        guid.len() == GUID_LEN
            && guid.bytes().all(|b| b.is_ascii_hexdigit())
            && guid.bytes().any(|b| b != b'0')
    }

    /// Resolve the canonical key of this reference
    pub fn runtime_key(&self) -> Result<AssetKey, KeyError> {
        if !self.runtime_key_is_valid() {
            return Err(KeyError::InvalidReference(self.guid.clone()));
        }

        let guid = self.guid.trim().to_ascii_lowercase();
        match self.sub_object_name.as_deref().map(str::trim) {
            Some("") => Err(KeyError::InvalidReference(format!("{}[]", guid))),
            Some(sub) => Ok(AssetKey::new_unchecked(&format!("{}[{}]", guid, sub))),
            None => Ok(AssetKey::new_unchecked(&guid)),
        }
    }
}

/// Identity reported back in an [`OperationResult`](crate::envelope::OperationResult)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyIdentity {
    /// No key was supplied
    #[default]
    None,
    /// A string address, as supplied by the caller
    Address(String),
    /// An asset reference
    Reference(AssetReference),
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("<none>"),
            Self::Address(address) => f.write_str(address),
            Self::Reference(reference) => write!(f, "ref:{}", reference.guid),
        }
    }
}

/// Raw input that can be normalized into an [`AssetKey`]
pub trait IntoAssetKey {
    /// Resolve the canonical key
    fn to_asset_key(&self) -> Result<AssetKey, KeyError>;

    /// The caller-facing identity, echoed in result envelopes
    fn identity(&self) -> KeyIdentity;
}

impl IntoAssetKey for str {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        AssetKey::parse(self)
    }

    fn identity(&self) -> KeyIdentity {
        KeyIdentity::Address(self.to_string())
    }
}

impl IntoAssetKey for String {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        AssetKey::parse(self)
    }

    fn identity(&self) -> KeyIdentity {
        KeyIdentity::Address(self.clone())
    }
}

impl IntoAssetKey for AssetKey {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        Ok(self.clone())
    }

    fn identity(&self) -> KeyIdentity {
        KeyIdentity::Address(self.0.clone())
    }
}

impl IntoAssetKey for AssetReference {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        self.runtime_key()
    }

    fn identity(&self) -> KeyIdentity {
        KeyIdentity::Reference(self.clone())
    }
}

impl<T: IntoAssetKey> IntoAssetKey for Option<T> {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        match self {
            Some(inner) => inner.to_asset_key(),
            None => Err(KeyError::Missing),
        }
    }

    fn identity(&self) -> KeyIdentity {
        self.as_ref().map(T::identity).unwrap_or_default()
    }
}

impl<T: IntoAssetKey + ?Sized> IntoAssetKey for &T {
    fn to_asset_key(&self) -> Result<AssetKey, KeyError> {
        (**self).to_asset_key()
    }

    fn identity(&self) -> KeyIdentity {
        (**self).identity()
    }
}

/// Normalize a raw key or reference into its canonical form
pub fn normalize_key<K: IntoAssetKey + ?Sized>(raw: &K) -> Result<AssetKey, KeyError> {
    raw.to_asset_key()
}
