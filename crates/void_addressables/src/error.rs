//! Error types
//!
//! Every concern owns a small error enum; [`AddressablesError`] folds them
//! together for the facade.

use thiserror::Error;

use crate::dock::OwnerId;
use crate::key::AssetKey;

/// Key normalization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Key is missing")]
    Missing,

    #[error("Key is empty")]
    Empty,

    #[error("Invalid asset reference: {0}")]
    InvalidReference(String),
}

/// Errors reported by an [`AssetProvider`](crate::provider::AssetProvider)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("No resource found for key: {0}")]
    NotFound(String),

    #[error("Provider returned the wrong type for {key}, expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("Provider failed: {0}")]
    Failed(String),
}

/// Cache lookup and load errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Asset {key} is not an instance of {requested} (cached as {cached})")]
    TypeMismatch {
        key: AssetKey,
        requested: &'static str,
        cached: &'static str,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Docking errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DockError {
    #[error("Asset {key} is already docked to {owner}")]
    Conflict { key: AssetKey, owner: OwnerId },
}

/// Facade level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressablesError {
    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Provider failure: {0}")]
    ProviderFailure(#[from] ProviderError),

    #[error("Dock conflict: {0}")]
    DockConflict(#[from] DockError),

    #[error("Not loaded: {0}")]
    NotLoaded(String),
}

impl AddressablesError {
    /// Whether this error is escalated according to the configured
    /// [`ExceptionHandling`](crate::config::ExceptionHandling) mode.
    ///
    /// Type mismatches, dock conflicts and missing entries are always
    /// reported as warnings instead.
    pub fn is_escalable(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::ProviderFailure(_))
    }
}

impl From<CacheError> for AddressablesError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::TypeMismatch { .. } => Self::TypeMismatch(e.to_string()),
            CacheError::Provider(p) => Self::ProviderFailure(p),
        }
    }
}

pub type AddressablesResult<T> = Result<T, AddressablesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalable_kinds() {
        assert!(AddressablesError::InvalidKey(KeyError::Empty).is_escalable());
        assert!(AddressablesError::ProviderFailure(ProviderError::Failed("io".into())).is_escalable());
        assert!(!AddressablesError::TypeMismatch("x".into()).is_escalable());
        assert!(!AddressablesError::NotLoaded("x".into()).is_escalable());
    }

    #[test]
    fn test_cache_error_conversion() {
        let err: AddressablesError = CacheError::TypeMismatch {
            key: AssetKey::new_unchecked("k"),
            requested: "B",
            cached: "A",
        }
        .into();
        assert!(matches!(err, AddressablesError::TypeMismatch(_)));

        let err: AddressablesError = CacheError::Provider(ProviderError::NotFound("k".into())).into();
        assert_eq!(err, AddressablesError::ProviderFailure(ProviderError::NotFound("k".into())));
    }
}
