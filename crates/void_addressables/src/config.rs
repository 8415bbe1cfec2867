//! Addressables configuration

use serde::{Deserialize, Serialize};

/// How escalable failures (invalid keys, provider failures) are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionHandling {
    /// Return the error to the caller
    Throw,
    /// Log the error and return a failure envelope
    #[default]
    Log,
    /// Return a failure envelope without logging
    Silent,
}

/// Addressables configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressablesConfig {
    /// Error reporting mode
    pub exception_handling: ExceptionHandling,
    /// Suppress warnings for recoverable failures
    pub suppress_warnings: bool,
}

impl Default for AddressablesConfig {
    fn default() -> Self {
        Self {
            exception_handling: ExceptionHandling::Log,
            suppress_warnings: false,
        }
    }
}

impl AddressablesConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the error reporting mode
    pub fn with_exception_handling(mut self, mode: ExceptionHandling) -> Self {
        self.exception_handling = mode;
        self
    }

    /// Enable or disable warning suppression
    pub fn with_suppress_warnings(mut self, suppress: bool) -> Self {
        self.suppress_warnings = suppress;
        self
    }
}
