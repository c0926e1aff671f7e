//! Audio endpoint model shared by every backend.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::MirrorError;

/// Stable identifier of an audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Device connection/state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Active,     // device is active and usable
    Disabled,   // device is disabled
    Unplugged,  // device is unplugged
    NotPresent, // device is not present
    Unknown,
}

/// Basic device info used by the menu projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub friendly_name: String,
    pub state: DeviceState,
}

/// Read side of the OS endpoint registry.
///
/// Every query is expected to be fast and fail-fast: a device that cannot be
/// resolved is simply absent, never retried inside the call.
pub trait DeviceDirectory: Send + Sync {
    /// Backend handle for a resolved endpoint.
    type Device: Clone + Send + fmt::Debug + 'static;

    fn resolve(&self, id: &DeviceId) -> Option<Self::Device>;

    /// Live state check. Must re-query the OS rather than trust a cached value.
    fn is_active(&self, device: &Self::Device) -> bool;

    fn enumerate_active_render_devices(&self) -> Result<Vec<DeviceInfo>, MirrorError>;

    /// Resolve and check in one step.
    fn resolve_active(&self, id: &DeviceId) -> Option<Self::Device> {
        self.resolve(id).filter(|device| self.is_active(device))
    }
}
