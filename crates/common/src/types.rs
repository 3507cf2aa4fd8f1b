//! Common data types for the telemetry collector.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a device that publishes telemetry.
///
/// Device ids are opaque strings chosen by the devices themselves. Inbound
/// ids only have to be non-empty; ids already persisted are taken as stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

/// Reasons a string is rejected as a [`DeviceId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceIdError {
    #[error("device id must not be empty")]
    Empty,
}

impl DeviceId {
    /// Validate and wrap a device identifier.
    ///
    /// Any non-empty string is accepted, including whitespace and long ids.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceIdError::Empty`] for the empty string.
    pub fn parse(value: impl Into<String>) -> Result<Self, DeviceIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DeviceIdError::Empty);
        }
        Ok(Self(value))
    }

    /// Wrap an id read back from the store without re-validating it.
    ///
    /// The table may hold rows written by other producers.
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
