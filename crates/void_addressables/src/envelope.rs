//! Operation result envelope
//!
//! Every facade operation reports back through [`OperationResult`], whether
//! it succeeded, failed recoverably, or failed under a non-throwing error
//! mode.

use crate::key::KeyIdentity;

/// Uniform success/identity/value wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T> {
    succeeded: bool,
    identity: KeyIdentity,
    value: Option<T>,
}

impl<T> OperationResult<T> {
    /// Successful result carrying a value
    pub fn success(identity: KeyIdentity, value: T) -> Self {
        Self {
            succeeded: true,
            identity,
            value: Some(value),
        }
    }

    /// Failed result
    pub fn failure(identity: KeyIdentity) -> Self {
        Self {
            succeeded: false,
            identity,
            value: None,
        }
    }

    /// Failed result that still hands back a value (e.g. the scene that
    /// could not be unloaded)
    pub fn failure_with(identity: KeyIdentity, value: T) -> Self {
        Self {
            succeeded: false,
            identity,
            value: Some(value),
        }
    }

    /// Whether the operation succeeded
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// The key or reference the operation was issued for
    pub fn identity(&self) -> &KeyIdentity {
        &self.identity
    }

    /// Borrow the value
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the value
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Map the carried value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            succeeded: self.succeeded,
            identity: self.identity,
            value: self.value.map(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelopes() {
        let ok = OperationResult::success(KeyIdentity::Address("hero".into()), 7u32);
        assert!(ok.succeeded());
        assert_eq!(ok.value(), Some(&7));
        assert_eq!(ok.identity(), &KeyIdentity::Address("hero".into()));

        let failed: OperationResult<u32> = OperationResult::failure(KeyIdentity::None);
        assert!(!failed.succeeded());
        assert!(failed.value().is_none());

        let mapped = ok.map(|v| v * 2);
        assert_eq!(mapped.into_value(), Some(14));
    }
}
