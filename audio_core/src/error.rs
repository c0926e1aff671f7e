use thiserror::Error;

use crate::device::DeviceId;

/// Errors raised inside the mirror core.
///
/// None of these are fatal. The controller logs them at the point of use and
/// relies on the next reconciliation to retry.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("device {0} is not available")]
    DeviceUnavailable(DeviceId),

    #[error("capture initialization failed: {0}")]
    CaptureInit(String),

    #[error("render initialization failed on {device}: {reason}")]
    RenderInit { device: DeviceId, reason: String },

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("failed to spawn {name} thread")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mirror lane is closed")]
    LaneClosed,

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl MirrorError {
    /// Wrap an `anyhow` chain coming out of a platform backend.
    pub fn backend(err: anyhow::Error) -> Self {
        MirrorError::Backend(format!("{:#}", err))
    }
}
