use alloc::string::String;

use core::fmt;

use serde::{Serialize, Serializer};

/// The identifier used by single-device deployments.
pub const DEFAULT_DEVICE: &str = "greenhouse";

/// A device identifier.
///
/// It is the first segment of every topic a device publishes or subscribes
/// to, hence it cannot be empty nor contain `/`, `+` or `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[cfg_attr(feature = "deserialize", serde(try_from = "String"))]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a [`DeviceId`] if the given value is a valid topic segment.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        Self::is_valid(&value).then_some(Self(value))
    }

    /// Returns the [`DeviceId`] as a [`&str`].
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(value: &str) -> bool {
        !value.is_empty() && !value.contains(['/', '+', '#'])
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self(String::from(DEFAULT_DEVICE))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or("a device identifier must be a non-empty topic segment")
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_DEVICE, DeviceId};

    #[test]
    fn test_device_id() {
        assert_eq!(DeviceId::default().as_str(), DEFAULT_DEVICE);
        assert_eq!(DeviceId::new("north-wing").unwrap().as_str(), "north-wing");

        assert_eq!(DeviceId::new(""), None);
        assert_eq!(DeviceId::new("a/b"), None);
        assert_eq!(DeviceId::new("+"), None);
        assert_eq!(DeviceId::new("#"), None);
    }

    #[test]
    #[cfg(feature = "deserialize")]
    fn test_device_id_serde() {
        let device = DeviceId::new("north-wing").unwrap();

        assert_eq!(crate::serialize(&device), serde_json::json!("north-wing"));
        assert_eq!(
            crate::deserialize::<DeviceId>(serde_json::json!("north-wing")),
            device
        );
        assert!(serde_json::from_value::<DeviceId>(serde_json::json!("a/b")).is_err());
    }
}
